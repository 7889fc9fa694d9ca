//! # Containment & Connection Rules
//!
//! Rule tables are keyed by class *name* so that they stay meaningful
//! across environments. Matching generalizes through inheritance: an entry
//! for an ancestor applies to all of its descendants, on either side.
//!
//! ## Tables
//!
//! - containment: parent class -> classes allowed as `CHILD_OF` children
//! - special containment: parent class -> classes allowed as special children
//! - relationships: link class -> endpoint class pairs (order-insensitive)
//! - validators: class -> tag; the closest ancestor with a tag wins

use crate::cache::{CacheKey, CacheManager, CacheValue};
use crate::metadata::MetadataStore;
use crate::primitives::{CLASS_DUMMY_ROOT, CLASS_INVENTORY_OBJECT};
use crate::types::{ClassId, ClassMetadata, TaxonError, validate_class_name};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// Allowed endpoint classes of a link class. Matched in either order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EndpointPair {
    pub a: String,
    pub b: String,
}

impl EndpointPair {
    #[must_use]
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        Self {
            a: a.into(),
            b: b.into(),
        }
    }
}

/// The four rule tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    pub containment: BTreeMap<String, BTreeSet<String>>,
    pub special_containment: BTreeMap<String, BTreeSet<String>>,
    pub relationships: BTreeMap<String, BTreeSet<EndpointPair>>,
    pub validators: BTreeMap<String, String>,
}

impl RuleSet {
    /// Tables every fresh engine starts with.
    #[must_use]
    pub fn seeded() -> Self {
        let mut rules = Self::default();
        rules
            .containment
            .entry(CLASS_DUMMY_ROOT.to_string())
            .or_default()
            .insert(CLASS_INVENTORY_OBJECT.to_string());

        for (parent, children) in [
            ("WireContainer", &["OpticalLink", "ElectricalLink"][..]),
            ("WirelessContainer", &["RadioLink"][..]),
        ] {
            rules
                .special_containment
                .entry(parent.to_string())
                .or_default()
                .extend(children.iter().map(|c| (*c).to_string()));
        }

        for (link, a, b) in [
            ("GenericPhysicalLink", "GenericPort", "GenericPort"),
            (
                "GenericPhysicalContainer",
                "GenericPhysicalNode",
                "GenericPhysicalNode",
            ),
        ] {
            rules
                .relationships
                .entry(link.to_string())
                .or_default()
                .insert(EndpointPair::new(a, b));
        }

        for (class, tag) in [
            ("GenericPhysicalNode", "physicalNode"),
            ("GenericPhysicalLink", "physicalLink"),
            ("GenericPhysicalContainer", "physicalContainer"),
            ("GenericPort", "physicalPort"),
        ] {
            rules.validators.insert(class.to_string(), tag.to_string());
        }
        rules
    }

    /// Whether some class in `child_lineage` is listed under some class in
    /// `parent_lineage`. Lineages are nearest-first name chains.
    #[must_use]
    pub fn allows_child(&self, parent_lineage: &[String], child_lineage: &[String]) -> bool {
        allows(&self.containment, parent_lineage, child_lineage)
    }

    #[must_use]
    pub fn allows_special_child(&self, parent_lineage: &[String], child_lineage: &[String]) -> bool {
        allows(&self.special_containment, parent_lineage, child_lineage)
    }

    #[must_use]
    pub fn allows_connection(
        &self,
        link_lineage: &[String],
        a_lineage: &[String],
        b_lineage: &[String],
    ) -> bool {
        link_lineage
            .iter()
            .filter_map(|link| self.relationships.get(link))
            .flatten()
            .any(|pair| {
                (a_lineage.contains(&pair.a) && b_lineage.contains(&pair.b))
                    || (a_lineage.contains(&pair.b) && b_lineage.contains(&pair.a))
            })
    }

    /// Tag of the nearest class in `lineage` that has one.
    #[must_use]
    pub fn validator_for(&self, lineage: &[String]) -> Option<&str> {
        lineage
            .iter()
            .find_map(|name| self.validators.get(name))
            .map(String::as_str)
    }

    /// Every name a table entry mentions for `parent` across its lineage.
    fn listed_children(&self, parent_lineage: &[String]) -> BTreeSet<String> {
        parent_lineage
            .iter()
            .filter_map(|p| self.containment.get(p))
            .flatten()
            .cloned()
            .collect()
    }
}

fn allows(
    table: &BTreeMap<String, BTreeSet<String>>,
    parent_lineage: &[String],
    child_lineage: &[String],
) -> bool {
    parent_lineage
        .iter()
        .filter_map(|parent| table.get(parent))
        .any(|allowed| child_lineage.iter().any(|child| allowed.contains(child)))
}

fn validate_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<(), TaxonError> {
    names.into_iter().try_for_each(validate_class_name)
}

// =============================================================================
// RULE ENGINE
// =============================================================================

/// Runtime-mutable rule tables plus the queries over them.
#[derive(Debug)]
pub struct RuleEngine {
    tables: RwLock<RuleSet>,
    metadata: Arc<MetadataStore>,
    cache: Arc<CacheManager>,
}

impl RuleEngine {
    #[must_use]
    pub fn new(rules: RuleSet, metadata: Arc<MetadataStore>, cache: Arc<CacheManager>) -> Self {
        Self {
            tables: RwLock::new(rules),
            metadata,
            cache,
        }
    }

    /// Copy of the current tables.
    #[must_use]
    pub fn snapshot(&self) -> RuleSet {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap every table at once.
    pub fn replace(&self, rules: RuleSet) {
        self.mutate(|tables| {
            *tables = rules;
            true
        });
    }

    fn mutate(&self, f: impl FnOnce(&mut RuleSet) -> bool) -> bool {
        let changed = {
            let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut tables)
        };
        if changed {
            let dropped = self
                .cache
                .invalidate_where(|key| matches!(key, CacheKey::ValidatorTag(_)));
            debug!(dropped, "rule tables changed");
        }
        changed
    }

    fn with_tables<T>(&self, f: impl FnOnce(&RuleSet) -> T) -> T {
        f(&self.tables.read().unwrap_or_else(PoisonError::into_inner))
    }

    // =========================================================================
    // MUTATORS
    // =========================================================================

    pub fn add_possible_children(&self, parent: &str, children: &[&str]) -> Result<(), TaxonError> {
        validate_names(std::iter::once(parent).chain(children.iter().copied()))?;
        self.mutate(|t| {
            let entry = t.containment.entry(parent.to_string()).or_default();
            let before = entry.len();
            entry.extend(children.iter().map(|c| (*c).to_string()));
            entry.len() != before
        });
        info!(parent, ?children, "possible children added");
        Ok(())
    }

    /// Returns how many entries were removed.
    pub fn remove_possible_children(&self, parent: &str, children: &[&str]) -> usize {
        let mut removed = 0;
        self.mutate(|t| {
            removed = remove_entries(&mut t.containment, parent, children);
            removed > 0
        });
        removed
    }

    pub fn add_possible_special_children(
        &self,
        parent: &str,
        children: &[&str],
    ) -> Result<(), TaxonError> {
        validate_names(std::iter::once(parent).chain(children.iter().copied()))?;
        self.mutate(|t| {
            let entry = t.special_containment.entry(parent.to_string()).or_default();
            let before = entry.len();
            entry.extend(children.iter().map(|c| (*c).to_string()));
            entry.len() != before
        });
        info!(parent, ?children, "possible special children added");
        Ok(())
    }

    pub fn remove_possible_special_children(&self, parent: &str, children: &[&str]) -> usize {
        let mut removed = 0;
        self.mutate(|t| {
            removed = remove_entries(&mut t.special_containment, parent, children);
            removed > 0
        });
        removed
    }

    pub fn add_relationship_mapping(&self, link: &str, a: &str, b: &str) -> Result<(), TaxonError> {
        validate_names([link, a, b])?;
        self.mutate(|t| {
            t.relationships
                .entry(link.to_string())
                .or_default()
                .insert(EndpointPair::new(a, b))
        });
        info!(link, a, b, "relationship mapping added");
        Ok(())
    }

    /// Returns `false` if no such mapping existed.
    pub fn remove_relationship_mapping(&self, link: &str, a: &str, b: &str) -> bool {
        self.mutate(|t| {
            let Some(pairs) = t.relationships.get_mut(link) else {
                return false;
            };
            let removed =
                pairs.remove(&EndpointPair::new(a, b)) || pairs.remove(&EndpointPair::new(b, a));
            if pairs.is_empty() {
                t.relationships.remove(link);
            }
            removed
        })
    }

    pub fn set_validator_tag(&self, class: &str, tag: &str) -> Result<(), TaxonError> {
        validate_class_name(class)?;
        if tag.trim().is_empty() {
            return Err(TaxonError::invalid("validator tag cannot be empty"));
        }
        self.mutate(|t| {
            t.validators.insert(class.to_string(), tag.to_string()).as_deref() != Some(tag)
        });
        info!(class, tag, "validator tag set");
        Ok(())
    }

    /// Returns the tag that was removed, if any.
    pub fn remove_validator_tag(&self, class: &str) -> Option<String> {
        let mut previous = None;
        self.mutate(|t| {
            previous = t.validators.remove(class);
            previous.is_some()
        });
        previous
    }

    // =========================================================================
    // LINEAGE-BASED CHECKS
    // =========================================================================
    //
    // Used by the Instance Store inside its write transactions, where the
    // lineages come from the transaction's own view.

    #[must_use]
    pub fn allows_child(&self, parent_lineage: &[String], child_lineage: &[String]) -> bool {
        self.with_tables(|t| t.allows_child(parent_lineage, child_lineage))
    }

    #[must_use]
    pub fn allows_special_child(&self, parent_lineage: &[String], child_lineage: &[String]) -> bool {
        self.with_tables(|t| t.allows_special_child(parent_lineage, child_lineage))
    }

    #[must_use]
    pub fn allows_connection(
        &self,
        link_lineage: &[String],
        a_lineage: &[String],
        b_lineage: &[String],
    ) -> bool {
        self.with_tables(|t| t.allows_connection(link_lineage, a_lineage, b_lineage))
    }

    // =========================================================================
    // NAME-BASED QUERIES
    // =========================================================================
    //
    // An unknown class name never matches anything.

    pub fn can_be_child(&self, parent: &str, child: &str) -> Result<bool, TaxonError> {
        let (Some(parent), Some(child)) = (
            self.metadata.lineage_names(parent)?,
            self.metadata.lineage_names(child)?,
        ) else {
            return Ok(false);
        };
        Ok(self.allows_child(&parent, &child))
    }

    pub fn can_be_special_child(&self, parent: &str, child: &str) -> Result<bool, TaxonError> {
        let (Some(parent), Some(child)) = (
            self.metadata.lineage_names(parent)?,
            self.metadata.lineage_names(child)?,
        ) else {
            return Ok(false);
        };
        Ok(self.allows_special_child(&parent, &child))
    }

    pub fn can_connect(&self, link: &str, a: &str, b: &str) -> Result<bool, TaxonError> {
        let (Some(link), Some(a), Some(b)) = (
            self.metadata.lineage_names(link)?,
            self.metadata.lineage_names(a)?,
            self.metadata.lineage_names(b)?,
        ) else {
            return Ok(false);
        };
        Ok(self.allows_connection(&link, &a, &b))
    }

    /// Tag of the closest class in `class`'s lineage that has one.
    pub fn resolve_validator_tag(&self, class: &str) -> Result<Option<String>, TaxonError> {
        let Some(id) = self.metadata.class_id(class)? else {
            return Ok(None);
        };
        self.validator_tag(id)
    }

    pub fn validator_tag(&self, id: ClassId) -> Result<Option<String>, TaxonError> {
        let key = CacheKey::ValidatorTag(id);
        if let Some(CacheValue::Tag(tag)) = self.cache.get(&key) {
            return Ok(tag);
        }
        let generation = self.cache.generation();
        let lineage: Vec<String> = self
            .metadata
            .get_upstream_class_hierarchy(id, true)?
            .into_iter()
            .map(|c| c.name)
            .collect();
        let tag = self.with_tables(|t| t.validator_for(&lineage).map(str::to_string));
        self.cache
            .put_if_unchanged(key, CacheValue::Tag(tag.clone()), generation);
        Ok(tag)
    }

    /// Concrete classes allowed directly below `parent`, sorted by name.
    ///
    /// Listed classes are expanded to their concrete subclasses.
    pub fn possible_children(&self, parent: &str) -> Result<Vec<ClassMetadata>, TaxonError> {
        let Some(lineage) = self.metadata.lineage_names(parent)? else {
            return Err(TaxonError::not_found("class", parent));
        };
        let listed = self.with_tables(|t| t.listed_children(&lineage));

        let mut found = BTreeMap::new();
        for name in listed {
            let Some(id) = self.metadata.class_id(&name)? else {
                continue;
            };
            for class in self.metadata.get_subclasses(id, false, true)? {
                found.insert(class.id, class);
            }
        }
        let mut classes: Vec<ClassMetadata> = found.into_values().collect();
        classes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(classes)
    }
}

fn remove_entries(
    table: &mut BTreeMap<String, BTreeSet<String>>,
    parent: &str,
    children: &[&str],
) -> usize {
    let Some(entry) = table.get_mut(parent) else {
        return 0;
    };
    let removed = children.iter().filter(|c| entry.remove(**c)).count();
    if entry.is_empty() {
        table.remove(parent);
    }
    removed
}

// =============================================================================
// TESTS
// =============================================================================
