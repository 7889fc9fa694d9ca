//! # Graph Store
//!
//! The transactional property-graph layer underneath the metamodel.
//!
//! This module defines the `GraphRead`/`GraphWrite` views and the
//! `GraphStore` trait, and implements the in-memory backend `MemoryGraph`.
//! All data structures use `BTreeMap` for deterministic ordering.
//!
//! ## Transactions
//!
//! `GraphStore::write` runs a closure against a private copy of the graph
//! (in memory) or a redb write transaction (on disk). The closure's writes
//! become visible only if it returns `Ok`; on `Err` nothing is applied.
//! Writers are serialized, so the first committed writer wins and later
//! writers observe its result.

use crate::types::{ClassId, ClassNode, InstanceId, InstanceNode, Relationship, TaxonError};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

// =============================================================================
// GRAPH VIEWS
// =============================================================================

/// Read access to one consistent snapshot of the graph.
///
/// Lookups for ids that do not exist return `Ok(None)` or an empty list;
/// `Err` is reserved for storage failures.
pub trait GraphRead {
    /// Class node by id.
    fn class(&self, id: ClassId) -> Result<Option<ClassNode>, TaxonError>;

    /// Indexed lookup of a class by its unique name.
    fn class_id_by_name(&self, name: &str) -> Result<Option<ClassId>, TaxonError>;

    /// Target of the class's `EXTENDS` edge.
    fn superclass(&self, id: ClassId) -> Result<Option<ClassId>, TaxonError>;

    /// Direct subclasses (sources of `EXTENDS` edges pointing at `id`).
    fn subclasses(&self, id: ClassId) -> Result<Vec<ClassId>, TaxonError>;

    /// Every class id, ascending.
    fn class_ids(&self) -> Result<Vec<ClassId>, TaxonError>;

    /// Instance node by id.
    fn instance(&self, id: InstanceId) -> Result<Option<InstanceNode>, TaxonError>;

    /// Instances whose `INSTANCE_OF` edge points at exactly `class`.
    fn instances_of(&self, class: ClassId) -> Result<Vec<InstanceId>, TaxonError>;

    /// Every instance id, ascending.
    fn instance_ids(&self) -> Result<Vec<InstanceId>, TaxonError>;

    /// Target of the instance's `CHILD_OF` edge.
    fn parent(&self, id: InstanceId) -> Result<Option<InstanceId>, TaxonError>;

    /// Sources of `CHILD_OF` edges pointing at `id`.
    fn children(&self, id: InstanceId) -> Result<Vec<InstanceId>, TaxonError>;

    /// Domain relationships leaving `id`.
    fn relationships_from(&self, id: InstanceId) -> Result<Vec<Relationship>, TaxonError>;

    /// Domain relationships arriving at `id`.
    fn relationships_to(&self, id: InstanceId) -> Result<Vec<Relationship>, TaxonError>;

    /// Target of a named link from the singleton reference node.
    fn reference(&self, link: &str) -> Result<Option<InstanceId>, TaxonError>;

    /// Whether the singleton reference node exists.
    fn has_reference_node(&self) -> Result<bool, TaxonError>;
}

/// Write access inside one atomic transaction.
///
/// The view does not enforce schema rules; the Metadata and Instance stores
/// validate before they write. Removing a node also removes its index
/// entries and structural edges (`EXTENDS` for classes, `CHILD_OF` for
/// instances) but not domain relationships.
pub trait GraphWrite: GraphRead {
    /// Allocate an id from the sequence shared by classes and instances.
    fn next_id(&mut self) -> Result<u64, TaxonError>;

    /// Insert or replace a class node and its name index entry.
    fn put_class(&mut self, class: &ClassNode) -> Result<(), TaxonError>;

    fn remove_class(&mut self, id: ClassId) -> Result<(), TaxonError>;

    /// Point the class's `EXTENDS` edge at `parent`, replacing any previous edge.
    fn set_superclass(&mut self, id: ClassId, parent: ClassId) -> Result<(), TaxonError>;

    /// Insert or replace an instance node and its `INSTANCE_OF` index entry.
    fn put_instance(&mut self, instance: &InstanceNode) -> Result<(), TaxonError>;

    fn remove_instance(&mut self, id: InstanceId) -> Result<(), TaxonError>;

    /// Rewrite the instance's `CHILD_OF` edge. `None` removes it.
    fn set_parent(&mut self, id: InstanceId, parent: Option<InstanceId>)
    -> Result<(), TaxonError>;

    /// Returns `false` if the relationship already existed.
    fn add_relationship(&mut self, rel: &Relationship) -> Result<bool, TaxonError>;

    /// Returns `false` if the relationship did not exist.
    fn remove_relationship(&mut self, rel: &Relationship) -> Result<bool, TaxonError>;

    /// Create or replace a named link from the reference node.
    fn set_reference(&mut self, link: &str, target: InstanceId) -> Result<(), TaxonError>;
}

/// A graph backend offering read snapshots and atomic write transactions.
pub trait GraphStore {
    /// Run `f` against a consistent read view.
    fn read<T, F>(&self, f: F) -> Result<T, TaxonError>
    where
        F: FnOnce(&dyn GraphRead) -> Result<T, TaxonError>;

    /// Run `f` inside one write transaction, committing only if it returns `Ok`.
    fn write<T, F>(&self, f: F) -> Result<T, TaxonError>
    where
        F: FnOnce(&mut dyn GraphWrite) -> Result<T, TaxonError>;
}

// =============================================================================
// IN-MEMORY STATE
// =============================================================================

#[derive(Debug, Clone, Default)]
struct GraphState {
    next_id: u64,
    reference_node: bool,
    classes: BTreeMap<ClassId, ClassNode>,
    class_names: BTreeMap<String, ClassId>,
    extends: BTreeMap<ClassId, ClassId>,
    subclasses: BTreeMap<ClassId, BTreeSet<ClassId>>,
    instances: BTreeMap<InstanceId, InstanceNode>,
    instances_by_class: BTreeMap<ClassId, BTreeSet<InstanceId>>,
    child_of: BTreeMap<InstanceId, InstanceId>,
    children: BTreeMap<InstanceId, BTreeSet<InstanceId>>,
    /// Keyed (from, to, kind).
    relationships: BTreeSet<(InstanceId, InstanceId, String)>,
    /// Keyed (to, from, kind).
    relationships_rev: BTreeSet<(InstanceId, InstanceId, String)>,
    references: BTreeMap<String, InstanceId>,
}

/// Entries of an edge index whose first key is `id`.
fn edges_keyed_by(
    index: &BTreeSet<(InstanceId, InstanceId, String)>,
    id: InstanceId,
) -> impl Iterator<Item = &(InstanceId, InstanceId, String)> {
    index
        .range((id, InstanceId(0), String::new())..)
        .take_while(move |(first, _, _)| *first == id)
}

impl GraphRead for GraphState {
    fn class(&self, id: ClassId) -> Result<Option<ClassNode>, TaxonError> {
        Ok(self.classes.get(&id).cloned())
    }

    fn class_id_by_name(&self, name: &str) -> Result<Option<ClassId>, TaxonError> {
        Ok(self.class_names.get(name).copied())
    }

    fn superclass(&self, id: ClassId) -> Result<Option<ClassId>, TaxonError> {
        Ok(self.extends.get(&id).copied())
    }

    fn subclasses(&self, id: ClassId) -> Result<Vec<ClassId>, TaxonError> {
        Ok(self
            .subclasses
            .get(&id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    fn class_ids(&self) -> Result<Vec<ClassId>, TaxonError> {
        Ok(self.classes.keys().copied().collect())
    }

    fn instance(&self, id: InstanceId) -> Result<Option<InstanceNode>, TaxonError> {
        Ok(self.instances.get(&id).cloned())
    }

    fn instances_of(&self, class: ClassId) -> Result<Vec<InstanceId>, TaxonError> {
        Ok(self
            .instances_by_class
            .get(&class)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    fn instance_ids(&self) -> Result<Vec<InstanceId>, TaxonError> {
        Ok(self.instances.keys().copied().collect())
    }

    fn parent(&self, id: InstanceId) -> Result<Option<InstanceId>, TaxonError> {
        Ok(self.child_of.get(&id).copied())
    }

    fn children(&self, id: InstanceId) -> Result<Vec<InstanceId>, TaxonError> {
        Ok(self
            .children
            .get(&id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    fn relationships_from(&self, id: InstanceId) -> Result<Vec<Relationship>, TaxonError> {
        Ok(edges_keyed_by(&self.relationships, id)
            .map(|(from, to, kind)| Relationship::new(*from, *to, kind.clone()))
            .collect())
    }

    fn relationships_to(&self, id: InstanceId) -> Result<Vec<Relationship>, TaxonError> {
        Ok(edges_keyed_by(&self.relationships_rev, id)
            .map(|(to, from, kind)| Relationship::new(*from, *to, kind.clone()))
            .collect())
    }

    fn reference(&self, link: &str) -> Result<Option<InstanceId>, TaxonError> {
        Ok(self.references.get(link).copied())
    }

    fn has_reference_node(&self) -> Result<bool, TaxonError> {
        Ok(self.reference_node)
    }
}

impl GraphWrite for GraphState {
    fn next_id(&mut self) -> Result<u64, TaxonError> {
        self.next_id = self.next_id.saturating_add(1);
        Ok(self.next_id)
    }

    fn put_class(&mut self, class: &ClassNode) -> Result<(), TaxonError> {
        if let Some(previous) = self.classes.insert(class.id, class.clone()) {
            if previous.name != class.name {
                self.class_names.remove(&previous.name);
            }
        }
        self.class_names.insert(class.name.clone(), class.id);
        Ok(())
    }

    fn remove_class(&mut self, id: ClassId) -> Result<(), TaxonError> {
        if let Some(class) = self.classes.remove(&id) {
            self.class_names.remove(&class.name);
        }
        if let Some(set) = self
            .extends
            .remove(&id)
            .and_then(|parent| self.subclasses.get_mut(&parent))
        {
            set.remove(&id);
        }
        if let Some(children) = self.subclasses.remove(&id) {
            for child in children {
                self.extends.remove(&child);
            }
        }
        self.instances_by_class.remove(&id);
        Ok(())
    }

    fn set_superclass(&mut self, id: ClassId, parent: ClassId) -> Result<(), TaxonError> {
        if let Some(set) = self
            .extends
            .insert(id, parent)
            .and_then(|previous| self.subclasses.get_mut(&previous))
        {
            set.remove(&id);
        }
        self.subclasses.entry(parent).or_default().insert(id);
        Ok(())
    }

    fn put_instance(&mut self, instance: &InstanceNode) -> Result<(), TaxonError> {
        if let Some(previous) = self.instances.insert(instance.id, instance.clone()) {
            if let Some(set) = self.instances_by_class.get_mut(&previous.class_id) {
                set.remove(&instance.id);
            }
        }
        self.instances_by_class
            .entry(instance.class_id)
            .or_default()
            .insert(instance.id);
        Ok(())
    }

    fn remove_instance(&mut self, id: InstanceId) -> Result<(), TaxonError> {
        if let Some(set) = self
            .instances
            .remove(&id)
            .and_then(|instance| self.instances_by_class.get_mut(&instance.class_id))
        {
            set.remove(&id);
        }
        self.set_parent(id, None)?;
        if let Some(children) = self.children.remove(&id) {
            for child in children {
                self.child_of.remove(&child);
            }
        }
        Ok(())
    }

    fn set_parent(
        &mut self,
        id: InstanceId,
        parent: Option<InstanceId>,
    ) -> Result<(), TaxonError> {
        if let Some(set) = self
            .child_of
            .remove(&id)
            .and_then(|previous| self.children.get_mut(&previous))
        {
            set.remove(&id);
        }
        if let Some(parent) = parent {
            self.child_of.insert(id, parent);
            self.children.entry(parent).or_default().insert(id);
        }
        Ok(())
    }

    fn add_relationship(&mut self, rel: &Relationship) -> Result<bool, TaxonError> {
        let added = self
            .relationships
            .insert((rel.from, rel.to, rel.kind.clone()));
        self.relationships_rev
            .insert((rel.to, rel.from, rel.kind.clone()));
        Ok(added)
    }

    fn remove_relationship(&mut self, rel: &Relationship) -> Result<bool, TaxonError> {
        let removed = self
            .relationships
            .remove(&(rel.from, rel.to, rel.kind.clone()));
        self.relationships_rev
            .remove(&(rel.to, rel.from, rel.kind.clone()));
        Ok(removed)
    }

    fn set_reference(&mut self, link: &str, target: InstanceId) -> Result<(), TaxonError> {
        self.references.insert(link.to_string(), target);
        Ok(())
    }
}

// =============================================================================
// MEMORY GRAPH
// =============================================================================

/// In-memory graph store.
///
/// Writers are serialized by the lock and work on a copy of the state that
/// replaces the live state only when the transaction closure succeeds.
#[derive(Debug)]
pub struct MemoryGraph {
    state: RwLock<GraphState>,
}

impl MemoryGraph {
    /// Create an empty graph with its singleton reference node.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(GraphState {
                reference_node: true,
                ..GraphState::default()
            }),
        }
    }

    /// Create an empty graph that lacks the reference node, as a damaged
    /// database would. Bootstrapping such a graph fails.
    #[must_use]
    pub fn without_reference_node() -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
        }
    }
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore for MemoryGraph {
    fn read<T, F>(&self, f: F) -> Result<T, TaxonError>
    where
        F: FnOnce(&dyn GraphRead) -> Result<T, TaxonError>,
    {
        let state = self
            .state
            .read()
            .map_err(|_| TaxonError::database("graph lock poisoned"))?;
        f(&*state)
    }

    fn write<T, F>(&self, f: F) -> Result<T, TaxonError>
    where
        F: FnOnce(&mut dyn GraphWrite) -> Result<T, TaxonError>,
    {
        let mut state = self
            .state
            .write()
            .map_err(|_| TaxonError::database("graph lock poisoned"))?;
        let mut draft = state.clone();
        let value = f(&mut draft)?;
        *state = draft;
        Ok(value)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClassRole, NodeLabel};

    fn class(id: u64, name: &str) -> ClassNode {
        ClassNode {
            id: ClassId(id),
            name: name.to_string(),
            display_name: name.to_string(),
            is_abstract: false,
            role: ClassRole::Inventory,
            in_design: false,
            custom: true,
            creation_date: 0,
            attributes: Vec::new(),
        }
    }

    fn instance(id: u64, class_id: u64) -> InstanceNode {
        InstanceNode {
            id: InstanceId(id),
            name: format!("obj-{}", id),
            class_id: ClassId(class_id),
            label: NodeLabel::InventoryObjects,
            creation_date: 0,
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let graph = MemoryGraph::new();
        let first = graph.write(|g| g.next_id()).expect("id");
        let second = graph.write(|g| g.next_id()).expect("id");
        assert!(second > first);
    }

    #[test]
    fn failed_write_applies_nothing() {
        let graph = MemoryGraph::new();
        let result: Result<(), TaxonError> = graph.write(|g| {
            g.put_class(&class(1, "Rack"))?;
            Err(TaxonError::constraint("abort"))
        });
        assert!(result.is_err());

        let found = graph
            .read(|g| g.class_id_by_name("Rack"))
            .expect("read");
        assert_eq!(found, None);
    }

    #[test]
    fn writes_are_visible_inside_the_transaction() {
        let graph = MemoryGraph::new();
        let seen = graph
            .write(|g| {
                g.put_class(&class(1, "Rack"))?;
                g.class_id_by_name("Rack")
            })
            .expect("write");
        assert_eq!(seen, Some(ClassId(1)));
    }

    #[test]
    fn extends_index_tracks_reparenting() {
        let graph = MemoryGraph::new();
        graph
            .write(|g| {
                for (id, name) in [(1, "A"), (2, "B"), (3, "C")] {
                    g.put_class(&class(id, name))?;
                }
                g.set_superclass(ClassId(3), ClassId(1))?;
                g.set_superclass(ClassId(3), ClassId(2))
            })
            .expect("write");

        graph
            .read(|g| {
                assert_eq!(g.superclass(ClassId(3))?, Some(ClassId(2)));
                assert!(g.subclasses(ClassId(1))?.is_empty());
                assert_eq!(g.subclasses(ClassId(2))?, vec![ClassId(3)]);
                Ok(())
            })
            .expect("read");
    }

    #[test]
    fn remove_instance_drops_containment_edges() {
        let graph = MemoryGraph::new();
        graph
            .write(|g| {
                g.put_class(&class(1, "Rack"))?;
                g.put_instance(&instance(10, 1))?;
                g.put_instance(&instance(11, 1))?;
                g.set_parent(InstanceId(11), Some(InstanceId(10)))?;
                g.remove_instance(InstanceId(10))
            })
            .expect("write");

        graph
            .read(|g| {
                assert_eq!(g.parent(InstanceId(11))?, None);
                assert_eq!(g.instances_of(ClassId(1))?, vec![InstanceId(11)]);
                Ok(())
            })
            .expect("read");
    }

    #[test]
    fn relationships_indexed_both_ways() {
        let graph = MemoryGraph::new();
        let rel = Relationship::new(InstanceId(1), InstanceId(2), "Cable");
        let added = graph.write(|g| g.add_relationship(&rel)).expect("add");
        let again = graph.write(|g| g.add_relationship(&rel)).expect("add");
        assert!(added);
        assert!(!again);

        graph
            .read(|g| {
                assert_eq!(g.relationships_from(InstanceId(1))?, vec![rel.clone()]);
                assert_eq!(g.relationships_to(InstanceId(2))?, vec![rel.clone()]);
                assert!(g.relationships_from(InstanceId(2))?.is_empty());
                Ok(())
            })
            .expect("read");
    }

    #[test]
    fn relationship_lookup_stays_within_one_object() {
        let graph = MemoryGraph::new();
        let ids = [0, 1, 2, 3, u64::MAX];
        graph
            .write(|g| {
                for pair in ids.windows(2) {
                    let (a, b) = (InstanceId(pair[0]), InstanceId(pair[1]));
                    g.add_relationship(&Relationship::new(a, b, "Cable"))?;
                    g.add_relationship(&Relationship::new(b, a, "Duct"))?;
                }
                Ok(())
            })
            .expect("write");

        graph
            .read(|g| {
                let from = g.relationships_from(InstanceId(2))?;
                assert_eq!(
                    from,
                    vec![
                        Relationship::new(InstanceId(2), InstanceId(1), "Duct"),
                        Relationship::new(InstanceId(2), InstanceId(3), "Cable"),
                    ]
                );
                let to = g.relationships_to(InstanceId(u64::MAX))?;
                assert_eq!(
                    to,
                    vec![Relationship::new(InstanceId(3), InstanceId(u64::MAX), "Cable")]
                );
                assert_eq!(g.relationships_from(InstanceId(0))?.len(), 1);
                assert!(g.relationships_to(InstanceId(7))?.is_empty());
                Ok(())
            })
            .expect("read");
    }

    #[test]
    fn reference_node_presence() {
        assert!(MemoryGraph::new()
            .read(|g| g.has_reference_node())
            .expect("read"));
        assert!(!MemoryGraph::without_reference_node()
            .read(|g| g.has_reference_node())
            .expect("read"));
    }
}
