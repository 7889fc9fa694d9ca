//! # Instance Store
//!
//! Inventory objects, their containment tree and their domain relationships.
//!
//! Every write validates against the view of its own transaction: the
//! class is resolved, containment and connection rules are matched over
//! lineages read from that view, and attribute values are checked against
//! the class's effective attribute set. The cache is only touched after the
//! transaction has committed.

use crate::cache::{CacheKey, CacheManager, CacheValue, Clock};
use crate::graph::{GraphRead, GraphStore};
use crate::hierarchy;
use crate::primitives::{
    ATTR_CREATION_DATE, ATTR_NAME, CLASS_GENERIC_OBJECT_LIST, CLASS_INVENTORY_OBJECT,
    MAX_CONTAINMENT_DEPTH, REL_CHILD_OF_SPECIAL, REL_DUMMY_ROOT,
};
use crate::rules::RuleEngine;
use crate::storage::StorageBackend;
use crate::types::{
    AttributeDef, AttributeType, ClassId, ClassMetadata, ClassRole, InstanceId, InstanceNode,
    NodeLabel, Relationship, TaxonError,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Attribute values keyed by attribute name, all in string form.
pub type AttributeValues = BTreeMap<String, String>;

/// How a new object hangs below its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Containment {
    Regular,
    Special,
}

/// Manages instances, containment and relationships.
#[derive(Debug)]
pub struct InstanceStore {
    store: Arc<StorageBackend>,
    cache: Arc<CacheManager>,
    rules: Arc<RuleEngine>,
    clock: Arc<dyn Clock>,
}

impl InstanceStore {
    #[must_use]
    pub fn new(
        store: Arc<StorageBackend>,
        cache: Arc<CacheManager>,
        rules: Arc<RuleEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            cache,
            rules,
            clock,
        }
    }

    // =========================================================================
    // CREATION
    // =========================================================================

    /// Create an object of `class_id` below `parent`.
    ///
    /// A `None` parent places inventory objects under the dummy root. List
    /// type items take no parent at all.
    pub fn create_instance(
        &self,
        class_id: ClassId,
        parent: Option<InstanceId>,
        values: AttributeValues,
    ) -> Result<InstanceId, TaxonError> {
        let now = self.clock.now_millis();
        let id = self.store.write(|g| {
            let class = instantiable_class(&*g, class_id)?;
            let container = if class.role == ClassRole::ListType {
                if parent.is_some() {
                    return Err(TaxonError::invalid(format!(
                        "'{}' is a list type; its items have no container",
                        class.name
                    )));
                }
                None
            } else {
                let container = match parent {
                    Some(parent) => parent,
                    None => dummy_root(&*g)?,
                };
                self.check_containment(&*g, container, &class, Containment::Regular)?;
                Some(container)
            };

            let (name, attributes) =
                apply_values(&*g, &class, String::new(), BTreeMap::new(), values)?;
            let id = InstanceId(g.next_id()?);
            g.put_instance(&InstanceNode {
                id,
                name,
                class_id,
                label: class.role.instance_label(),
                creation_date: now,
                attributes,
            })?;
            g.set_parent(id, container)?;
            Ok(id)
        })?;

        info!(%id, class = class_id.0, "object created");
        Ok(id)
    }

    /// Create an object attached to `parent` through `CHILD_OF_SPECIAL`.
    pub fn create_special_instance(
        &self,
        class_id: ClassId,
        parent: InstanceId,
        values: AttributeValues,
    ) -> Result<InstanceId, TaxonError> {
        let now = self.clock.now_millis();
        let id = self.store.write(|g| {
            let class = instantiable_class(&*g, class_id)?;
            if class.role == ClassRole::ListType {
                return Err(TaxonError::invalid(format!(
                    "'{}' is a list type and cannot be a special child",
                    class.name
                )));
            }
            self.check_containment(&*g, parent, &class, Containment::Special)?;

            let (name, attributes) =
                apply_values(&*g, &class, String::new(), BTreeMap::new(), values)?;
            let id = InstanceId(g.next_id()?);
            g.put_instance(&InstanceNode {
                id,
                name,
                class_id,
                label: class.role.instance_label(),
                creation_date: now,
                attributes,
            })?;
            g.add_relationship(&Relationship::new(id, parent, REL_CHILD_OF_SPECIAL))?;
            Ok(id)
        })?;

        info!(%id, %parent, class = class_id.0, "special object created");
        Ok(id)
    }

    fn check_containment<G: GraphRead + ?Sized>(
        &self,
        g: &G,
        container: InstanceId,
        class: &ClassMetadata,
        kind: Containment,
    ) -> Result<(), TaxonError> {
        let parent = g.instance(container)?.ok_or_else(|| {
            TaxonError::invalid(format!("parent {} does not exist", container))
        })?;
        let parent_lineage = hierarchy::lineage_names(g, parent.class_id)?;
        let child_lineage = hierarchy::lineage_names(g, class.id)?;
        let allowed = match kind {
            Containment::Regular => self.rules.allows_child(&parent_lineage, &child_lineage),
            Containment::Special => self
                .rules
                .allows_special_child(&parent_lineage, &child_lineage),
        };
        if allowed {
            Ok(())
        } else {
            let parent_class = parent_lineage.first().map_or("?", String::as_str);
            Err(TaxonError::constraint(format!(
                "'{}' cannot be a {}child of '{}'",
                class.name,
                if kind == Containment::Special { "special " } else { "" },
                parent_class
            )))
        }
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub fn get_instance(&self, id: InstanceId) -> Result<InstanceNode, TaxonError> {
        self.store.read(|g| require_instance(g, id))
    }

    /// Direct `CHILD_OF` children.
    pub fn get_children(&self, id: InstanceId) -> Result<Vec<InstanceNode>, TaxonError> {
        self.store.read(|g| {
            require_instance(g, id)?;
            let ids = g.children(id)?;
            load_all(g, &ids)
        })
    }

    /// Objects attached through `CHILD_OF_SPECIAL`.
    pub fn get_special_children(&self, id: InstanceId) -> Result<Vec<InstanceNode>, TaxonError> {
        self.store.read(|g| {
            require_instance(g, id)?;
            let ids = special_children(g, id)?;
            load_all(g, &ids)
        })
    }

    /// The immediate container, `None` for top-level objects and list items.
    pub fn get_parent(&self, id: InstanceId) -> Result<Option<InstanceNode>, TaxonError> {
        self.store.read(|g| {
            require_instance(g, id)?;
            let root = g.reference(REL_DUMMY_ROOT)?;
            match container_of(g, id)? {
                Some(parent) if Some(parent) != root => Ok(Some(require_instance(g, parent)?)),
                _ => Ok(None),
            }
        })
    }

    /// Container chain, nearest first, stopping below the dummy root.
    pub fn get_parents(&self, id: InstanceId) -> Result<Vec<InstanceNode>, TaxonError> {
        let key = CacheKey::Parents(id);
        if let Some(CacheValue::InstanceIds(ids)) = self.cache.get(&key) {
            // Cached chains can outlive a concurrent delete; skip vanished nodes.
            return self.store.read(|g| {
                let mut nodes = Vec::with_capacity(ids.len());
                for parent in &ids {
                    if let Some(node) = g.instance(*parent)? {
                        nodes.push(node);
                    }
                }
                Ok(nodes)
            });
        }

        let generation = self.cache.generation();
        let (ids, nodes) = self.store.read(|g| {
            require_instance(g, id)?;
            let ids = container_chain(g, id)?;
            let nodes = load_all(g, &ids)?;
            Ok((ids, nodes))
        })?;
        self.cache
            .put_if_unchanged(key, CacheValue::InstanceIds(ids), generation);
        Ok(nodes)
    }

    /// Instances of a class, optionally including those of its subclasses.
    pub fn get_instances_of_class(
        &self,
        class_id: ClassId,
        recursive: bool,
    ) -> Result<Vec<InstanceNode>, TaxonError> {
        self.store.read(|g| {
            hierarchy::require_class(g, class_id)?;
            let mut classes = vec![class_id];
            if recursive {
                classes.extend(hierarchy::descendants(g, class_id)?);
            }
            let mut nodes = Vec::new();
            for class in classes {
                let ids = g.instances_of(class)?;
                nodes.extend(load_all(g, &ids)?);
            }
            Ok(nodes)
        })
    }

    /// Domain relationships touching `id`, outgoing first.
    pub fn get_relationships(&self, id: InstanceId) -> Result<Vec<Relationship>, TaxonError> {
        self.store.read(|g| {
            require_instance(g, id)?;
            let mut relationships = g.relationships_from(id)?;
            relationships.extend(g.relationships_to(id)?);
            Ok(relationships)
        })
    }

    // =========================================================================
    // UPDATES
    // =========================================================================

    /// Set attribute values. An empty string clears an optional value.
    pub fn update_instance(&self, id: InstanceId, values: AttributeValues) -> Result<(), TaxonError> {
        self.store.write(|g| {
            let mut instance = require_instance(&*g, id)?;
            if instance.label == NodeLabel::SpecialNodes {
                return Err(TaxonError::constraint(format!(
                    "{} is a special node and cannot be updated",
                    id
                )));
            }
            let class = hierarchy::resolve(&*g, instance.class_id)?;
            let (name, attributes) =
                apply_values(&*g, &class, instance.name, instance.attributes, values)?;
            instance.name = name;
            instance.attributes = attributes;
            g.put_instance(&instance)
        })?;
        info!(%id, "object updated");
        Ok(())
    }

    /// Re-parent an object (and its subtree) under `new_parent`.
    pub fn move_instance(&self, id: InstanceId, new_parent: InstanceId) -> Result<(), TaxonError> {
        let moved = self.store.write(|g| {
            let instance = require_instance(&*g, id)?;
            match instance.label {
                NodeLabel::SpecialNodes => {
                    return Err(TaxonError::constraint(format!(
                        "{} is a special node and cannot be moved",
                        id
                    )));
                }
                NodeLabel::ListTypeItems => {
                    return Err(TaxonError::constraint(format!(
                        "{} is a list type item and has no container",
                        id
                    )));
                }
                NodeLabel::InventoryObjects => {}
            }
            if g.instance(new_parent)?.is_none() {
                return Err(TaxonError::invalid(format!(
                    "parent {} does not exist",
                    new_parent
                )));
            }

            let mut cursor = Some(new_parent);
            let mut depth = 0;
            while let Some(current) = cursor {
                if current == id {
                    return Err(TaxonError::constraint(format!(
                        "{} cannot be moved into its own subtree",
                        id
                    )));
                }
                depth += 1;
                if depth > MAX_CONTAINMENT_DEPTH {
                    return Err(TaxonError::database(format!(
                        "containment chain above {} does not terminate",
                        new_parent
                    )));
                }
                cursor = container_of(&*g, current)?;
            }

            let class = hierarchy::resolve(&*g, instance.class_id)?;
            self.check_containment(&*g, new_parent, &class, Containment::Regular)?;

            for special in g.relationships_from(id)? {
                if special.kind == REL_CHILD_OF_SPECIAL {
                    g.remove_relationship(&special)?;
                }
            }
            g.set_parent(id, Some(new_parent))?;
            subtree(&*g, id)
        })?;

        for instance in &moved {
            self.cache.invalidate_instance(*instance);
        }
        info!(%id, %new_parent, subtree = moved.len(), "object moved");
        Ok(())
    }

    /// Delete an object. With `cascade` its whole containment subtree goes
    /// too; without it, an object that still contains anything is kept.
    pub fn delete_instance(&self, id: InstanceId, cascade: bool) -> Result<(), TaxonError> {
        let removed = self.store.write(|g| {
            require_instance(&*g, id)?;
            if g.reference(REL_DUMMY_ROOT)? == Some(id) {
                return Err(TaxonError::constraint("the dummy root cannot be deleted"));
            }
            let direct = g.children(id)?.len() + special_children(&*g, id)?.len();
            if direct > 0 && !cascade {
                return Err(TaxonError::constraint(format!(
                    "{} still contains {} object(s)",
                    id, direct
                )));
            }

            let doomed = subtree(&*g, id)?;
            for victim in doomed.iter().rev() {
                let mut links = g.relationships_from(*victim)?;
                links.extend(g.relationships_to(*victim)?);
                for link in &links {
                    g.remove_relationship(link)?;
                }
                g.remove_instance(*victim)?;
            }
            Ok(doomed)
        })?;

        for instance in &removed {
            self.cache.invalidate_instance(*instance);
        }
        info!(%id, removed = removed.len(), "object deleted");
        Ok(())
    }

    // =========================================================================
    // RELATIONSHIPS
    // =========================================================================

    /// Link two objects with an instance of `link_class`.
    ///
    /// The relationship kind is the link class's name.
    pub fn connect(
        &self,
        source: InstanceId,
        target: InstanceId,
        link_class: ClassId,
    ) -> Result<Relationship, TaxonError> {
        let relationship = self.store.write(|g| {
            if source == target {
                return Err(TaxonError::invalid(format!(
                    "{} cannot be related with itself",
                    source
                )));
            }
            let link = g.class(link_class)?.ok_or_else(|| {
                TaxonError::invalid(format!("link class {} does not exist", link_class))
            })?;
            if link.is_abstract {
                return Err(TaxonError::invalid(format!(
                    "link class '{}' is abstract",
                    link.name
                )));
            }
            let a = g.instance(source)?.ok_or_else(|| {
                TaxonError::invalid(format!("endpoint {} does not exist", source))
            })?;
            let b = g.instance(target)?.ok_or_else(|| {
                TaxonError::invalid(format!("endpoint {} does not exist", target))
            })?;

            let link_lineage = hierarchy::lineage_names(&*g, link.id)?;
            let a_lineage = hierarchy::lineage_names(&*g, a.class_id)?;
            let b_lineage = hierarchy::lineage_names(&*g, b.class_id)?;
            if !self
                .rules
                .allows_connection(&link_lineage, &a_lineage, &b_lineage)
            {
                let a_class = a_lineage.first().map_or("?", String::as_str);
                let b_class = b_lineage.first().map_or("?", String::as_str);
                return Err(TaxonError::constraint(format!(
                    "'{}' cannot connect '{}' and '{}'",
                    link.name, a_class, b_class
                )));
            }

            let relationship = Relationship::new(source, target, link.name.clone());
            let reverse = Relationship::new(target, source, link.name);
            if g.relationships_from(target)?.contains(&reverse)
                || !g.add_relationship(&relationship)?
            {
                return Err(TaxonError::constraint(format!(
                    "{} and {} are already connected by '{}'",
                    source, target, relationship.kind
                )));
            }
            Ok(relationship)
        })?;

        info!(%source, %target, kind = %relationship.kind, "objects connected");
        Ok(relationship)
    }

    /// Remove a relationship created by `connect`, in either direction.
    pub fn disconnect(
        &self,
        source: InstanceId,
        target: InstanceId,
        link_class: ClassId,
    ) -> Result<(), TaxonError> {
        self.store.write(|g| {
            let link = g.class(link_class)?.ok_or_else(|| {
                TaxonError::invalid(format!("link class {} does not exist", link_class))
            })?;
            let forward = Relationship::new(source, target, link.name.clone());
            let reverse = Relationship::new(target, source, link.name.clone());
            if g.remove_relationship(&forward)? || g.remove_relationship(&reverse)? {
                Ok(())
            } else {
                Err(TaxonError::not_found(
                    "relationship",
                    format!("{} -[{}]- {}", source, link.name, target),
                ))
            }
        })?;
        debug!(%source, %target, "objects disconnected");
        Ok(())
    }
}

// =============================================================================
// VIEW HELPERS
// =============================================================================

fn require_instance<G: GraphRead + ?Sized>(g: &G, id: InstanceId) -> Result<InstanceNode, TaxonError> {
    g.instance(id)?
        .ok_or_else(|| TaxonError::instance_not_found(id))
}

fn load_all<G: GraphRead + ?Sized>(g: &G, ids: &[InstanceId]) -> Result<Vec<InstanceNode>, TaxonError> {
    ids.iter().map(|id| require_instance(g, *id)).collect()
}

fn dummy_root<G: GraphRead + ?Sized>(g: &G) -> Result<InstanceId, TaxonError> {
    g.reference(REL_DUMMY_ROOT)?
        .ok_or_else(|| TaxonError::database("dummy root is missing; bootstrap has not run"))
}

/// Resolve a class that new objects may be created from.
fn instantiable_class<G: GraphRead + ?Sized>(g: &G, id: ClassId) -> Result<ClassMetadata, TaxonError> {
    if g.class(id)?.is_none() {
        return Err(TaxonError::invalid(format!("class {} does not exist", id)));
    }
    let class = hierarchy::resolve(g, id)?;
    if class.is_abstract {
        return Err(TaxonError::invalid(format!(
            "'{}' is abstract and cannot be instantiated",
            class.name
        )));
    }
    if class.role == ClassRole::Dummy {
        return Err(TaxonError::invalid(format!(
            "'{}' is a dummy class and cannot be instantiated",
            class.name
        )));
    }
    if class.in_design {
        return Err(TaxonError::constraint(format!(
            "'{}' is still in design",
            class.name
        )));
    }
    if !hierarchy::is_subclass_of_name(g, id, CLASS_INVENTORY_OBJECT)?
        && !hierarchy::is_subclass_of_name(g, id, CLASS_GENERIC_OBJECT_LIST)?
    {
        return Err(TaxonError::constraint(format!(
            "'{}' is neither an inventory object nor a list type",
            class.name
        )));
    }
    Ok(class)
}

/// Apply `values` over an existing name and attribute map.
///
/// `name` lives in the node itself; an empty value clears an attribute.
/// Mandatory attributes must be set afterwards.
fn apply_values<G: GraphRead + ?Sized>(
    g: &G,
    class: &ClassMetadata,
    mut name: String,
    mut attributes: BTreeMap<String, String>,
    values: AttributeValues,
) -> Result<(String, BTreeMap<String, String>), TaxonError> {
    for (key, value) in values {
        if key == ATTR_CREATION_DATE {
            return Err(TaxonError::invalid(format!(
                "'{}' is set by the engine",
                ATTR_CREATION_DATE
            )));
        }
        let definition = class.attribute(&key).ok_or_else(|| {
            TaxonError::invalid(format!("'{}' has no attribute '{}'", class.name, key))
        })?;
        if !value.is_empty() {
            check_value(g, definition, &value)?;
        }
        if key == ATTR_NAME {
            name = value;
        } else if value.is_empty() {
            attributes.remove(&key);
        } else {
            attributes.insert(key, value);
        }
    }

    for definition in class.mandatory_attributes() {
        let present = if definition.name == ATTR_NAME {
            !name.is_empty()
        } else {
            attributes.contains_key(&definition.name)
        };
        if !present {
            return Err(TaxonError::constraint(format!(
                "mandatory attribute '{}' of '{}' has no value",
                definition.name, class.name
            )));
        }
    }
    Ok((name, attributes))
}

fn check_value<G: GraphRead + ?Sized>(
    g: &G,
    definition: &AttributeDef,
    value: &str,
) -> Result<(), TaxonError> {
    match &definition.attr_type {
        AttributeType::Primitive(primitive) => {
            if primitive.accepts(value) {
                Ok(())
            } else {
                Err(TaxonError::constraint(format!(
                    "'{}' is not a valid {} for '{}'",
                    value, definition.attr_type, definition.name
                )))
            }
        }
        AttributeType::ListType(target) | AttributeType::ClassRef(target) => {
            let referenced = value
                .parse::<u64>()
                .ok()
                .map(|raw| g.instance(InstanceId(raw)))
                .transpose()?
                .flatten()
                .ok_or_else(|| {
                    TaxonError::constraint(format!(
                        "'{}' does not reference an existing object for '{}'",
                        value, definition.name
                    ))
                })?;
            if hierarchy::is_subclass_of_name(g, referenced.class_id, target)? {
                Ok(())
            } else {
                Err(TaxonError::constraint(format!(
                    "{} is not a '{}' as required by '{}'",
                    referenced.id, target, definition.name
                )))
            }
        }
    }
}

fn special_children<G: GraphRead + ?Sized>(g: &G, id: InstanceId) -> Result<Vec<InstanceId>, TaxonError> {
    Ok(g.relationships_to(id)?
        .into_iter()
        .filter(|r| r.kind == REL_CHILD_OF_SPECIAL)
        .map(|r| r.from)
        .collect())
}

/// `CHILD_OF` target, or the `CHILD_OF_SPECIAL` target for special children.
fn container_of<G: GraphRead + ?Sized>(g: &G, id: InstanceId) -> Result<Option<InstanceId>, TaxonError> {
    if let Some(parent) = g.parent(id)? {
        return Ok(Some(parent));
    }
    Ok(g.relationships_from(id)?
        .into_iter()
        .find(|r| r.kind == REL_CHILD_OF_SPECIAL)
        .map(|r| r.to))
}

/// Containers of `id`, nearest first, excluding the dummy root.
fn container_chain<G: GraphRead + ?Sized>(g: &G, id: InstanceId) -> Result<Vec<InstanceId>, TaxonError> {
    let root = g.reference(REL_DUMMY_ROOT)?;
    let mut chain = Vec::new();
    let mut cursor = container_of(g, id)?;
    while let Some(current) = cursor {
        if Some(current) == root {
            break;
        }
        if chain.contains(&current) || chain.len() >= MAX_CONTAINMENT_DEPTH {
            return Err(TaxonError::database(format!(
                "containment chain above {} does not terminate",
                id
            )));
        }
        chain.push(current);
        cursor = container_of(g, current)?;
    }
    Ok(chain)
}

/// `id` and everything contained below it, regular or special, pre-order.
fn subtree<G: GraphRead + ?Sized>(g: &G, id: InstanceId) -> Result<Vec<InstanceId>, TaxonError> {
    let mut order = Vec::new();
    let mut seen = BTreeSet::new();
    let mut stack = vec![id];
    while let Some(current) = stack.pop() {
        if !seen.insert(current) {
            continue;
        }
        order.push(current);
        let mut below = g.children(current)?;
        below.extend(special_children(g, current)?);
        stack.extend(below.into_iter().rev());
    }
    Ok(order)
}

// =============================================================================
// TESTS
// =============================================================================
