//! # Metadata Store
//!
//! Class and attribute definitions and the `EXTENDS` inheritance tree.
//!
//! Reads consult the cache first and fall back to a Graph Store read
//! transaction. Every structural write runs in one write transaction and,
//! only after it commits, invalidates the cached results of the affected
//! class's ancestor chain and descendant subtree.

use crate::cache::{CacheKey, CacheManager, CacheValue, Clock};
use crate::graph::{GraphRead, GraphStore};
use crate::hierarchy;
use crate::storage::StorageBackend;
use crate::types::{
    AttributeDef, AttributeType, ClassDefinition, ClassId, ClassMetadata, ClassNode, ClassRole,
    ClassUpdate, TaxonError, is_reserved_attribute, validate_attribute_name, validate_class_name,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Manages classes, attributes and the class hierarchy.
#[derive(Debug)]
pub struct MetadataStore {
    store: Arc<StorageBackend>,
    cache: Arc<CacheManager>,
    clock: Arc<dyn Clock>,
}

impl MetadataStore {
    #[must_use]
    pub fn new(store: Arc<StorageBackend>, cache: Arc<CacheManager>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            cache,
            clock,
        }
    }

    // =========================================================================
    // CLASS CRUD
    // =========================================================================

    /// Define a new class below an existing, non-dummy parent.
    ///
    /// The new class inherits its parent's role.
    pub fn create_class(&self, definition: ClassDefinition) -> Result<ClassId, TaxonError> {
        validate_class_name(&definition.name)?;
        validate_attribute_list(&definition.attributes)?;
        let now = self.clock.now_millis();

        let (id, affected) = self.store.write(|g| {
            if g.class_id_by_name(&definition.name)?.is_some() {
                return Err(TaxonError::invalid(format!(
                    "class '{}' already exists",
                    definition.name
                )));
            }
            let parent = g.class(definition.parent)?.ok_or_else(|| {
                TaxonError::invalid(format!("parent {} does not exist", definition.parent))
            })?;
            if parent.role == ClassRole::Dummy {
                return Err(TaxonError::invalid(format!(
                    "'{}' is a dummy class and cannot be extended",
                    parent.name
                )));
            }
            check_attribute_types(&*g, &definition.attributes)?;
            let inherited = hierarchy::resolve(&*g, parent.id)?;
            check_shadowing(&inherited, &definition.attributes)?;

            let id = ClassId(g.next_id()?);
            let class = ClassNode {
                id,
                display_name: definition
                    .display_name
                    .clone()
                    .unwrap_or_else(|| definition.name.clone()),
                name: definition.name.clone(),
                is_abstract: definition.is_abstract,
                role: parent.role,
                in_design: definition.in_design,
                custom: true,
                creation_date: now,
                attributes: definition.attributes.clone(),
            };
            g.put_class(&class)?;
            g.set_superclass(id, parent.id)?;

            // Fails on a cycle, aborting the transaction.
            let affected = hierarchy::ancestors(&*g, id)?;
            Ok((id, affected))
        })?;

        self.invalidate_classes(&affected);
        info!(class = %definition.name, id = id.0, "class created");
        Ok(id)
    }

    /// Resolve a class with its effective attribute list.
    pub fn get_class(&self, id: ClassId) -> Result<ClassMetadata, TaxonError> {
        let key = CacheKey::Class(id);
        if let Some(CacheValue::Class(metadata)) = self.cache.get(&key) {
            return Ok((*metadata).clone());
        }
        let generation = self.cache.generation();
        let metadata = self.store.read(|g| hierarchy::resolve(g, id))?;
        self.cache.put_if_unchanged(
            key,
            CacheValue::Class(Arc::new(metadata.clone())),
            generation,
        );
        Ok(metadata)
    }

    pub fn get_class_by_name(&self, name: &str) -> Result<ClassMetadata, TaxonError> {
        let id = self
            .class_id(name)?
            .ok_or_else(|| TaxonError::not_found("class", name))?;
        self.get_class(id)
    }

    /// Indexed name lookup. `None` if no class has that name.
    pub fn class_id(&self, name: &str) -> Result<Option<ClassId>, TaxonError> {
        self.store.read(|g| g.class_id_by_name(name))
    }

    /// Every class, optionally leaving out list types.
    pub fn list_classes(&self, include_list_types: bool) -> Result<Vec<ClassMetadata>, TaxonError> {
        let ids = self.store.read(|g| g.class_ids())?;
        let mut classes = Vec::with_capacity(ids.len());
        for id in ids {
            let class = self.get_class(id)?;
            if include_list_types || class.role != ClassRole::ListType {
                classes.push(class);
            }
        }
        Ok(classes)
    }

    /// Change a class's own flags.
    ///
    /// A class with direct instances cannot become abstract.
    pub fn update_class(&self, id: ClassId, update: ClassUpdate) -> Result<(), TaxonError> {
        let affected = self.store.write(|g| {
            let mut class = hierarchy::require_class(&*g, id)?;
            if let Some(display_name) = update.display_name {
                class.display_name = display_name;
            }
            if let Some(is_abstract) = update.is_abstract {
                if is_abstract && !class.is_abstract && !g.instances_of(id)?.is_empty() {
                    return Err(TaxonError::constraint(format!(
                        "'{}' has instances and cannot become abstract",
                        class.name
                    )));
                }
                class.is_abstract = is_abstract;
            }
            if let Some(in_design) = update.in_design {
                class.in_design = in_design;
            }
            g.put_class(&class)?;
            affected_by(&*g, id)
        })?;

        self.invalidate_classes(&affected);
        info!(id = id.0, "class updated");
        Ok(())
    }

    /// Delete a class that has neither subclasses nor instances.
    ///
    /// Core classes and classes referenced by an attribute type are kept.
    pub fn delete_class(&self, id: ClassId) -> Result<(), TaxonError> {
        let (name, affected) = self.store.write(|g| {
            let class = hierarchy::require_class(&*g, id)?;
            if !class.custom || class.role == ClassRole::Dummy {
                return Err(TaxonError::constraint(format!(
                    "'{}' is a core class and cannot be deleted",
                    class.name
                )));
            }
            let subclasses = g.subclasses(id)?;
            if !subclasses.is_empty() {
                return Err(TaxonError::constraint(format!(
                    "'{}' still has {} subclass(es)",
                    class.name,
                    subclasses.len()
                )));
            }
            let instances = g.instances_of(id)?;
            if !instances.is_empty() {
                return Err(TaxonError::constraint(format!(
                    "'{}' still has {} instance(s)",
                    class.name,
                    instances.len()
                )));
            }
            if let Some((owner, attribute)) = find_type_reference(&*g, &class.name)? {
                return Err(TaxonError::constraint(format!(
                    "'{}' is the type of attribute '{}' in '{}'",
                    class.name, attribute, owner
                )));
            }

            let mut affected = hierarchy::ancestors(&*g, id)?;
            affected.push(id);
            g.remove_class(id)?;
            Ok((class.name, affected))
        })?;

        self.invalidate_classes(&affected);
        info!(class = %name, id = id.0, "class deleted");
        Ok(())
    }

    // =========================================================================
    // ATTRIBUTES
    // =========================================================================

    /// Declare a new attribute on a class.
    ///
    /// The name must not already be in the class's effective set. Subclasses
    /// that declare the same name keep shadowing it.
    pub fn create_attribute(&self, id: ClassId, attribute: AttributeDef) -> Result<(), TaxonError> {
        validate_attribute_name(&attribute.name)?;
        let name = attribute.name.clone();
        let affected = self.store.write(|g| {
            let metadata = hierarchy::resolve(&*g, id)?;
            if metadata.attribute(&attribute.name).is_some() {
                return Err(TaxonError::invalid(format!(
                    "attribute '{}' already exists in '{}'",
                    attribute.name, metadata.name
                )));
            }
            for descendant in hierarchy::descendants(&*g, id)? {
                let subclass = hierarchy::require_class(&*g, descendant)?;
                if subclass.local_attribute(&attribute.name).is_some() {
                    return Err(TaxonError::invalid(format!(
                        "attribute '{}' is already declared by subclass '{}'",
                        attribute.name, subclass.name
                    )));
                }
            }
            check_attribute_types(&*g, std::slice::from_ref(&attribute))?;

            let mut class = hierarchy::require_class(&*g, id)?;
            class.attributes.push(attribute);
            g.put_class(&class)?;
            affected_by(&*g, id)
        })?;

        self.invalidate_classes(&affected);
        info!(id = id.0, attribute = %name, "attribute created");
        Ok(())
    }

    /// Remove a locally declared attribute.
    ///
    /// Values already stored on instances stay where they are, orphaned.
    pub fn delete_attribute(&self, id: ClassId, name: &str) -> Result<(), TaxonError> {
        if is_reserved_attribute(name) {
            return Err(TaxonError::invalid(format!(
                "attribute '{}' cannot be deleted",
                name
            )));
        }
        let affected = self.store.write(|g| {
            let mut class = hierarchy::require_class(&*g, id)?;
            let before = class.attributes.len();
            class.attributes.retain(|a| a.name != name);
            if class.attributes.len() == before {
                return Err(TaxonError::not_found(
                    "attribute",
                    format!("{}.{}", class.name, name),
                ));
            }
            g.put_class(&class)?;
            affected_by(&*g, id)
        })?;

        self.invalidate_classes(&affected);
        info!(id = id.0, attribute = %name, "attribute deleted");
        Ok(())
    }

    pub fn get_mandatory_attributes(&self, id: ClassId) -> Result<Vec<AttributeDef>, TaxonError> {
        let class = self.get_class(id)?;
        Ok(class
            .mandatory_attributes()
            .into_iter()
            .cloned()
            .collect())
    }

    // =========================================================================
    // HIERARCHY QUERIES
    // =========================================================================

    /// Whether `candidate` is `ancestor` or descends from it.
    pub fn is_subclass_of(&self, candidate: ClassId, ancestor: ClassId) -> Result<bool, TaxonError> {
        let chain = self.ancestor_ids(candidate)?;
        Ok(candidate == ancestor || chain.contains(&ancestor))
    }

    /// Name-based variant of `is_subclass_of`. Unknown names are never subclasses.
    pub fn is_subclass_of_name(&self, candidate: &str, ancestor: &str) -> Result<bool, TaxonError> {
        match (self.class_id(candidate)?, self.class_id(ancestor)?) {
            (Some(candidate), Some(ancestor)) => self.is_subclass_of(candidate, ancestor),
            _ => Ok(false),
        }
    }

    /// Ancestors of a class, nearest first, optionally starting with itself.
    pub fn get_upstream_class_hierarchy(
        &self,
        id: ClassId,
        include_self: bool,
    ) -> Result<Vec<ClassMetadata>, TaxonError> {
        let mut ids = Vec::new();
        if include_self {
            ids.push(id);
        }
        ids.extend(self.ancestor_ids(id)?);
        ids.into_iter().map(|i| self.get_class(i)).collect()
    }

    /// Names of a class and its ancestors, nearest first. `None` for an
    /// unknown name.
    pub fn lineage_names(&self, name: &str) -> Result<Option<Vec<String>>, TaxonError> {
        let Some(id) = self.class_id(name)? else {
            return Ok(None);
        };
        let lineage = self
            .get_upstream_class_hierarchy(id, true)?
            .into_iter()
            .map(|c| c.name)
            .collect();
        Ok(Some(lineage))
    }

    /// Transitive subclasses of a class.
    pub fn get_subclasses(
        &self,
        id: ClassId,
        include_abstract: bool,
        include_self: bool,
    ) -> Result<Vec<ClassMetadata>, TaxonError> {
        let key = CacheKey::Subclasses {
            class: id,
            include_abstract,
            include_self,
        };
        let ids = match self.cache.get(&key) {
            Some(CacheValue::ClassIds(ids)) => ids,
            _ => {
                debug!(id = id.0, include_abstract, include_self, "resolving subclasses");
                let generation = self.cache.generation();
                let ids = self.store.read(|g| {
                    let root = hierarchy::require_class(g, id)?;
                    let mut ids = Vec::new();
                    if include_self && (include_abstract || !root.is_abstract) {
                        ids.push(id);
                    }
                    for descendant in hierarchy::descendants(g, id)? {
                        let class = hierarchy::require_class(g, descendant)?;
                        if include_abstract || !class.is_abstract {
                            ids.push(descendant);
                        }
                    }
                    Ok(ids)
                })?;
                self.cache
                    .put_if_unchanged(key, CacheValue::ClassIds(ids.clone()), generation);
                ids
            }
        };
        ids.into_iter().map(|i| self.get_class(i)).collect()
    }

    /// Direct subclasses only.
    pub fn get_subclasses_no_recursive(&self, id: ClassId) -> Result<Vec<ClassMetadata>, TaxonError> {
        let key = CacheKey::DirectSubclasses(id);
        let ids = match self.cache.get(&key) {
            Some(CacheValue::ClassIds(ids)) => ids,
            _ => {
                let generation = self.cache.generation();
                let ids = self.store.read(|g| {
                    hierarchy::require_class(g, id)?;
                    g.subclasses(id)
                })?;
                self.cache
                    .put_if_unchanged(key, CacheValue::ClassIds(ids.clone()), generation);
                ids
            }
        };
        ids.into_iter().map(|i| self.get_class(i)).collect()
    }

    // =========================================================================
    // CACHE PLUMBING
    // =========================================================================

    fn ancestor_ids(&self, id: ClassId) -> Result<Vec<ClassId>, TaxonError> {
        let key = CacheKey::Ancestors(id);
        if let Some(CacheValue::ClassIds(ids)) = self.cache.get(&key) {
            return Ok(ids);
        }
        let generation = self.cache.generation();
        let ids = self.store.read(|g| {
            hierarchy::require_class(g, id)?;
            hierarchy::ancestors(g, id)
        })?;
        self.cache
            .put_if_unchanged(key, CacheValue::ClassIds(ids.clone()), generation);
        Ok(ids)
    }

    fn invalidate_classes(&self, classes: &[ClassId]) {
        for class in classes {
            self.cache.invalidate_class(*class);
        }
        debug!(count = classes.len(), "invalidated cached class results");
    }
}

// =============================================================================
// VALIDATION HELPERS
// =============================================================================

/// Names valid and unique within the declared list.
fn validate_attribute_list(attributes: &[AttributeDef]) -> Result<(), TaxonError> {
    let mut seen = BTreeSet::new();
    for attribute in attributes {
        validate_attribute_name(&attribute.name)?;
        if !seen.insert(attribute.name.as_str()) {
            return Err(TaxonError::invalid(format!(
                "attribute '{}' is declared twice",
                attribute.name
            )));
        }
    }
    Ok(())
}

/// Reference types must point at existing classes; list types at list-type classes.
fn check_attribute_types<G: GraphRead + ?Sized>(
    g: &G,
    attributes: &[AttributeDef],
) -> Result<(), TaxonError> {
    for attribute in attributes {
        let Some(target) = attribute.attr_type.referenced_class() else {
            continue;
        };
        let class = g
            .class_id_by_name(target)?
            .map(|id| g.class(id))
            .transpose()?
            .flatten()
            .ok_or_else(|| {
                TaxonError::invalid(format!(
                    "attribute '{}' references unknown class '{}'",
                    attribute.name, target
                ))
            })?;
        if matches!(attribute.attr_type, AttributeType::ListType(_))
            && class.role != ClassRole::ListType
        {
            return Err(TaxonError::invalid(format!(
                "attribute '{}': '{}' is not a list type",
                attribute.name, target
            )));
        }
    }
    Ok(())
}

/// A local attribute may shadow an inherited one only with the same type.
fn check_shadowing(inherited: &ClassMetadata, attributes: &[AttributeDef]) -> Result<(), TaxonError> {
    for attribute in attributes {
        if let Some(shadowed) = inherited.attribute(&attribute.name) {
            if shadowed.attr_type != attribute.attr_type {
                return Err(TaxonError::invalid(format!(
                    "attribute '{}' is inherited from '{}' as {}, not {}",
                    attribute.name, inherited.name, shadowed.attr_type, attribute.attr_type
                )));
            }
        }
    }
    Ok(())
}

/// First `(class, attribute)` whose declared type refers to `class_name`.
fn find_type_reference<G: GraphRead + ?Sized>(
    g: &G,
    class_name: &str,
) -> Result<Option<(String, String)>, TaxonError> {
    for id in g.class_ids()? {
        let Some(class) = g.class(id)? else {
            continue;
        };
        if let Some(attribute) = class
            .attributes
            .iter()
            .find(|a| a.attr_type.referenced_class() == Some(class_name))
        {
            return Ok(Some((class.name.clone(), attribute.name.clone())));
        }
    }
    Ok(None)
}

/// A class plus its ancestor chain and descendant subtree.
fn affected_by<G: GraphRead + ?Sized>(g: &G, id: ClassId) -> Result<Vec<ClassId>, TaxonError> {
    let mut affected = hierarchy::ancestors(g, id)?;
    affected.push(id);
    affected.extend(hierarchy::descendants(g, id)?);
    Ok(affected)
}

// =============================================================================
// TESTS
// =============================================================================
