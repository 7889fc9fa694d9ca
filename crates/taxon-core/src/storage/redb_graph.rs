//! # redb-backed Graph Storage
//!
//! A disk-backed graph store using the redb embedded database.
//!
//! redb provides what the metamodel needs from its Graph Store:
//! - ACID transactions (one write transaction per engine operation)
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! Class and instance records are postcard-encoded. Edges are stored as
//! one table per direction so both ends can be scanned with a range query.

use crate::graph::{GraphRead, GraphStore, GraphWrite};
use crate::types::{ClassId, ClassNode, InstanceId, InstanceNode, Relationship, TaxonError};
use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, Table, TableDefinition,
    WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::path::Path;

/// Class nodes: ClassId -> postcard(ClassNode)
const CLASSES: TableDefinition<u64, &[u8]> = TableDefinition::new("classes");

/// Unique class name index: name -> ClassId
const CLASS_NAMES: TableDefinition<&str, u64> = TableDefinition::new("class_names");

/// `EXTENDS`: child ClassId -> parent ClassId
const EXTENDS: TableDefinition<u64, u64> = TableDefinition::new("extends");

/// Reverse `EXTENDS`: (parent, child)
const SUBCLASSES: TableDefinition<(u64, u64), ()> = TableDefinition::new("subclasses");

/// Instance nodes: InstanceId -> postcard(InstanceNode)
const INSTANCES: TableDefinition<u64, &[u8]> = TableDefinition::new("instances");

/// Reverse `INSTANCE_OF`: (class, instance)
const INSTANCES_BY_CLASS: TableDefinition<(u64, u64), ()> =
    TableDefinition::new("instances_by_class");

/// `CHILD_OF`: child InstanceId -> container InstanceId
const CHILD_OF: TableDefinition<u64, u64> = TableDefinition::new("child_of");

/// Reverse `CHILD_OF`: (container, child)
const CHILDREN: TableDefinition<(u64, u64), ()> = TableDefinition::new("children");

/// Domain relationships: (from, to) -> postcard(BTreeSet<kind>)
const RELATIONSHIPS: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("relationships");

/// Reverse domain relationships: (to, from) -> postcard(BTreeSet<kind>)
const RELATIONSHIPS_REV: TableDefinition<(u64, u64), &[u8]> =
    TableDefinition::new("relationships_rev");

/// Links from the singleton reference node: link name -> InstanceId
const REFERENCES: TableDefinition<&str, u64> = TableDefinition::new("references");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const NEXT_ID_KEY: &str = "next_id";
const REFERENCE_NODE_KEY: &str = "reference_node";

// =============================================================================
// ENCODING HELPERS
// =============================================================================

fn storage_err(e: impl std::fmt::Display) -> TaxonError {
    TaxonError::DatabaseError(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, TaxonError> {
    postcard::to_allocvec(value).map_err(|e| TaxonError::database(format!("encode: {}", e)))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, TaxonError> {
    postcard::from_bytes(bytes).map_err(|e| TaxonError::database(format!("corrupt record: {}", e)))
}

/// Second key component of every `(id, *)` entry in an index table.
fn index_targets(
    table: &impl ReadableTable<(u64, u64), ()>,
    id: u64,
) -> Result<Vec<u64>, TaxonError> {
    let mut targets = Vec::new();
    for entry in table
        .range((id, 0u64)..=(id, u64::MAX))
        .map_err(storage_err)?
    {
        let (key, _) = entry.map_err(storage_err)?;
        targets.push(key.value().1);
    }
    Ok(targets)
}

/// `(other end, kind)` pairs of every relationship stored under `(id, *)`.
fn relationship_entries(
    table: &impl ReadableTable<(u64, u64), &'static [u8]>,
    id: u64,
) -> Result<Vec<(u64, String)>, TaxonError> {
    let mut entries = Vec::new();
    for entry in table
        .range((id, 0u64)..=(id, u64::MAX))
        .map_err(storage_err)?
    {
        let (key, value) = entry.map_err(storage_err)?;
        let other = key.value().1;
        let kinds: BTreeSet<String> = decode(value.value())?;
        entries.extend(kinds.into_iter().map(|kind| (other, kind)));
    }
    Ok(entries)
}

/// Add or remove one kind in a relationship set. Returns whether it changed.
fn update_kinds(
    table: &mut Table<'_, (u64, u64), &'static [u8]>,
    key: (u64, u64),
    kind: &str,
    insert: bool,
) -> Result<bool, TaxonError> {
    let mut kinds: BTreeSet<String> = table
        .get(key)
        .map_err(storage_err)?
        .map(|guard| decode(guard.value()))
        .transpose()?
        .unwrap_or_default();
    let changed = if insert {
        kinds.insert(kind.to_string())
    } else {
        kinds.remove(kind)
    };
    if kinds.is_empty() {
        table.remove(key).map_err(storage_err)?;
    } else {
        let bytes = encode(&kinds)?;
        table.insert(key, bytes.as_slice()).map_err(storage_err)?;
    }
    Ok(changed)
}

// =============================================================================
// TRANSACTION VIEWS
// =============================================================================

/// Read view over a redb read transaction.
struct RedbReader {
    txn: ReadTransaction,
}

/// Read/write view over a redb write transaction.
///
/// Each method opens the tables it needs and releases them before
/// returning, so calls never hold two handles on the same table.
struct RedbWriter<'t> {
    txn: &'t WriteTransaction,
}

/// Both views read the same tables; only the transaction type differs.
macro_rules! impl_graph_read {
    ($view:ty) => {
        impl GraphRead for $view {
            fn class(&self, id: ClassId) -> Result<Option<ClassNode>, TaxonError> {
                let table = self.txn.open_table(CLASSES).map_err(storage_err)?;
                let record = table.get(id.0).map_err(storage_err)?;
                record.map(|guard| decode(guard.value())).transpose()
            }

            fn class_id_by_name(&self, name: &str) -> Result<Option<ClassId>, TaxonError> {
                let table = self.txn.open_table(CLASS_NAMES).map_err(storage_err)?;
                let found = table
                    .get(name)
                    .map_err(storage_err)?
                    .map(|guard| ClassId(guard.value()));
                Ok(found)
            }

            fn superclass(&self, id: ClassId) -> Result<Option<ClassId>, TaxonError> {
                let table = self.txn.open_table(EXTENDS).map_err(storage_err)?;
                let found = table
                    .get(id.0)
                    .map_err(storage_err)?
                    .map(|guard| ClassId(guard.value()));
                Ok(found)
            }

            fn subclasses(&self, id: ClassId) -> Result<Vec<ClassId>, TaxonError> {
                let table = self.txn.open_table(SUBCLASSES).map_err(storage_err)?;
                let ids = index_targets(&table, id.0)?;
                Ok(ids.into_iter().map(ClassId).collect())
            }

            fn class_ids(&self) -> Result<Vec<ClassId>, TaxonError> {
                let table = self.txn.open_table(CLASSES).map_err(storage_err)?;
                let mut ids = Vec::new();
                for entry in table.iter().map_err(storage_err)? {
                    let (key, _) = entry.map_err(storage_err)?;
                    ids.push(ClassId(key.value()));
                }
                Ok(ids)
            }

            fn instance(&self, id: InstanceId) -> Result<Option<InstanceNode>, TaxonError> {
                let table = self.txn.open_table(INSTANCES).map_err(storage_err)?;
                let record = table.get(id.0).map_err(storage_err)?;
                record.map(|guard| decode(guard.value())).transpose()
            }

            fn instances_of(&self, class: ClassId) -> Result<Vec<InstanceId>, TaxonError> {
                let table = self
                    .txn
                    .open_table(INSTANCES_BY_CLASS)
                    .map_err(storage_err)?;
                let ids = index_targets(&table, class.0)?;
                Ok(ids.into_iter().map(InstanceId).collect())
            }

            fn instance_ids(&self) -> Result<Vec<InstanceId>, TaxonError> {
                let table = self.txn.open_table(INSTANCES).map_err(storage_err)?;
                let mut ids = Vec::new();
                for entry in table.iter().map_err(storage_err)? {
                    let (key, _) = entry.map_err(storage_err)?;
                    ids.push(InstanceId(key.value()));
                }
                Ok(ids)
            }

            fn parent(&self, id: InstanceId) -> Result<Option<InstanceId>, TaxonError> {
                let table = self.txn.open_table(CHILD_OF).map_err(storage_err)?;
                let found = table
                    .get(id.0)
                    .map_err(storage_err)?
                    .map(|guard| InstanceId(guard.value()));
                Ok(found)
            }

            fn children(&self, id: InstanceId) -> Result<Vec<InstanceId>, TaxonError> {
                let table = self.txn.open_table(CHILDREN).map_err(storage_err)?;
                let ids = index_targets(&table, id.0)?;
                Ok(ids.into_iter().map(InstanceId).collect())
            }

            fn relationships_from(
                &self,
                id: InstanceId,
            ) -> Result<Vec<Relationship>, TaxonError> {
                let table = self.txn.open_table(RELATIONSHIPS).map_err(storage_err)?;
                let entries = relationship_entries(&table, id.0)?;
                Ok(entries
                    .into_iter()
                    .map(|(to, kind)| Relationship::new(id, InstanceId(to), kind))
                    .collect())
            }

            fn relationships_to(&self, id: InstanceId) -> Result<Vec<Relationship>, TaxonError> {
                let table = self
                    .txn
                    .open_table(RELATIONSHIPS_REV)
                    .map_err(storage_err)?;
                let entries = relationship_entries(&table, id.0)?;
                Ok(entries
                    .into_iter()
                    .map(|(from, kind)| Relationship::new(InstanceId(from), id, kind))
                    .collect())
            }

            fn reference(&self, link: &str) -> Result<Option<InstanceId>, TaxonError> {
                let table = self.txn.open_table(REFERENCES).map_err(storage_err)?;
                let found = table
                    .get(link)
                    .map_err(storage_err)?
                    .map(|guard| InstanceId(guard.value()));
                Ok(found)
            }

            fn has_reference_node(&self) -> Result<bool, TaxonError> {
                let table = self.txn.open_table(METADATA).map_err(storage_err)?;
                let marker = table.get(REFERENCE_NODE_KEY).map_err(storage_err)?;
                Ok(marker.is_some())
            }
        }
    };
}

impl_graph_read!(RedbReader);
impl_graph_read!(RedbWriter<'_>);

impl GraphWrite for RedbWriter<'_> {
    fn next_id(&mut self) -> Result<u64, TaxonError> {
        let mut table = self.txn.open_table(METADATA).map_err(storage_err)?;
        let current = table
            .get(NEXT_ID_KEY)
            .map_err(storage_err)?
            .map(|guard| guard.value())
            .unwrap_or(0);
        let next = current.saturating_add(1);
        table.insert(NEXT_ID_KEY, next).map_err(storage_err)?;
        Ok(next)
    }

    fn put_class(&mut self, class: &ClassNode) -> Result<(), TaxonError> {
        let bytes = encode(class)?;
        let previous: Option<ClassNode> = {
            let mut classes = self.txn.open_table(CLASSES).map_err(storage_err)?;
            let old = classes
                .insert(class.id.0, bytes.as_slice())
                .map_err(storage_err)?;
            old.map(|guard| decode(guard.value())).transpose()?
        };

        let mut names = self.txn.open_table(CLASS_NAMES).map_err(storage_err)?;
        if let Some(previous) = previous {
            if previous.name != class.name {
                names.remove(previous.name.as_str()).map_err(storage_err)?;
            }
        }
        names
            .insert(class.name.as_str(), class.id.0)
            .map_err(storage_err)?;
        Ok(())
    }

    fn remove_class(&mut self, id: ClassId) -> Result<(), TaxonError> {
        let removed: Option<ClassNode> = {
            let mut classes = self.txn.open_table(CLASSES).map_err(storage_err)?;
            let old = classes.remove(id.0).map_err(storage_err)?;
            old.map(|guard| decode(guard.value())).transpose()?
        };
        if let Some(class) = removed {
            let mut names = self.txn.open_table(CLASS_NAMES).map_err(storage_err)?;
            names.remove(class.name.as_str()).map_err(storage_err)?;
        }

        let mut extends = self.txn.open_table(EXTENDS).map_err(storage_err)?;
        let mut subclasses = self.txn.open_table(SUBCLASSES).map_err(storage_err)?;
        let parent = extends
            .remove(id.0)
            .map_err(storage_err)?
            .map(|guard| guard.value());
        if let Some(parent) = parent {
            subclasses.remove((parent, id.0)).map_err(storage_err)?;
        }
        for child in index_targets(&subclasses, id.0)? {
            subclasses.remove((id.0, child)).map_err(storage_err)?;
            extends.remove(child).map_err(storage_err)?;
        }

        let mut by_class = self
            .txn
            .open_table(INSTANCES_BY_CLASS)
            .map_err(storage_err)?;
        for instance in index_targets(&by_class, id.0)? {
            by_class.remove((id.0, instance)).map_err(storage_err)?;
        }
        Ok(())
    }

    fn set_superclass(&mut self, id: ClassId, parent: ClassId) -> Result<(), TaxonError> {
        let mut extends = self.txn.open_table(EXTENDS).map_err(storage_err)?;
        let mut subclasses = self.txn.open_table(SUBCLASSES).map_err(storage_err)?;
        let previous = extends
            .insert(id.0, parent.0)
            .map_err(storage_err)?
            .map(|guard| guard.value());
        if let Some(previous) = previous {
            subclasses.remove((previous, id.0)).map_err(storage_err)?;
        }
        subclasses.insert((parent.0, id.0), ()).map_err(storage_err)?;
        Ok(())
    }

    fn put_instance(&mut self, instance: &InstanceNode) -> Result<(), TaxonError> {
        let bytes = encode(instance)?;
        let previous: Option<InstanceNode> = {
            let mut instances = self.txn.open_table(INSTANCES).map_err(storage_err)?;
            let old = instances
                .insert(instance.id.0, bytes.as_slice())
                .map_err(storage_err)?;
            old.map(|guard| decode(guard.value())).transpose()?
        };

        let mut by_class = self
            .txn
            .open_table(INSTANCES_BY_CLASS)
            .map_err(storage_err)?;
        if let Some(previous) = previous {
            by_class
                .remove((previous.class_id.0, instance.id.0))
                .map_err(storage_err)?;
        }
        by_class
            .insert((instance.class_id.0, instance.id.0), ())
            .map_err(storage_err)?;
        Ok(())
    }

    fn remove_instance(&mut self, id: InstanceId) -> Result<(), TaxonError> {
        let removed: Option<InstanceNode> = {
            let mut instances = self.txn.open_table(INSTANCES).map_err(storage_err)?;
            let old = instances.remove(id.0).map_err(storage_err)?;
            old.map(|guard| decode(guard.value())).transpose()?
        };
        if let Some(instance) = removed {
            let mut by_class = self
                .txn
                .open_table(INSTANCES_BY_CLASS)
                .map_err(storage_err)?;
            by_class
                .remove((instance.class_id.0, id.0))
                .map_err(storage_err)?;
        }

        self.set_parent(id, None)?;

        let mut child_of = self.txn.open_table(CHILD_OF).map_err(storage_err)?;
        let mut children = self.txn.open_table(CHILDREN).map_err(storage_err)?;
        for child in index_targets(&children, id.0)? {
            children.remove((id.0, child)).map_err(storage_err)?;
            child_of.remove(child).map_err(storage_err)?;
        }
        Ok(())
    }

    fn set_parent(
        &mut self,
        id: InstanceId,
        parent: Option<InstanceId>,
    ) -> Result<(), TaxonError> {
        let mut child_of = self.txn.open_table(CHILD_OF).map_err(storage_err)?;
        let mut children = self.txn.open_table(CHILDREN).map_err(storage_err)?;
        let previous = child_of
            .remove(id.0)
            .map_err(storage_err)?
            .map(|guard| guard.value());
        if let Some(previous) = previous {
            children.remove((previous, id.0)).map_err(storage_err)?;
        }
        if let Some(parent) = parent {
            child_of.insert(id.0, parent.0).map_err(storage_err)?;
            children.insert((parent.0, id.0), ()).map_err(storage_err)?;
        }
        Ok(())
    }

    fn add_relationship(&mut self, rel: &Relationship) -> Result<bool, TaxonError> {
        let mut forward = self.txn.open_table(RELATIONSHIPS).map_err(storage_err)?;
        let mut reverse = self
            .txn
            .open_table(RELATIONSHIPS_REV)
            .map_err(storage_err)?;
        let added = update_kinds(&mut forward, (rel.from.0, rel.to.0), &rel.kind, true)?;
        update_kinds(&mut reverse, (rel.to.0, rel.from.0), &rel.kind, true)?;
        Ok(added)
    }

    fn remove_relationship(&mut self, rel: &Relationship) -> Result<bool, TaxonError> {
        let mut forward = self.txn.open_table(RELATIONSHIPS).map_err(storage_err)?;
        let mut reverse = self
            .txn
            .open_table(RELATIONSHIPS_REV)
            .map_err(storage_err)?;
        let removed = update_kinds(&mut forward, (rel.from.0, rel.to.0), &rel.kind, false)?;
        update_kinds(&mut reverse, (rel.to.0, rel.from.0), &rel.kind, false)?;
        Ok(removed)
    }

    fn set_reference(&mut self, link: &str, target: InstanceId) -> Result<(), TaxonError> {
        let mut table = self.txn.open_table(REFERENCES).map_err(storage_err)?;
        table.insert(link, target.0).map_err(storage_err)?;
        Ok(())
    }
}

// =============================================================================
// REDB GRAPH
// =============================================================================

/// A disk-backed graph store using redb.
///
/// Opening a new file creates every table plus the singleton reference
/// node. An existing file that has data but no reference node is left as is,
/// and bootstrapping it will report the corruption.
pub struct RedbGraph {
    /// The redb database handle.
    db: Database,
}

impl std::fmt::Debug for RedbGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbGraph").finish_non_exhaustive()
    }
}

impl RedbGraph {
    /// Open or create a graph database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TaxonError> {
        let db = Database::create(path.as_ref()).map_err(storage_err)?;

        // Initialize tables if they don't exist
        let write_txn = db.begin_write().map_err(storage_err)?;
        {
            write_txn.open_table(CLASSES).map_err(storage_err)?;
            write_txn.open_table(CLASS_NAMES).map_err(storage_err)?;
            write_txn.open_table(EXTENDS).map_err(storage_err)?;
            write_txn.open_table(SUBCLASSES).map_err(storage_err)?;
            write_txn.open_table(INSTANCES).map_err(storage_err)?;
            write_txn
                .open_table(INSTANCES_BY_CLASS)
                .map_err(storage_err)?;
            write_txn.open_table(CHILD_OF).map_err(storage_err)?;
            write_txn.open_table(CHILDREN).map_err(storage_err)?;
            write_txn.open_table(RELATIONSHIPS).map_err(storage_err)?;
            write_txn
                .open_table(RELATIONSHIPS_REV)
                .map_err(storage_err)?;
            write_txn.open_table(REFERENCES).map_err(storage_err)?;

            let mut meta = write_txn.open_table(METADATA).map_err(storage_err)?;
            let fresh = meta.get(NEXT_ID_KEY).map_err(storage_err)?.is_none()
                && meta.get(REFERENCE_NODE_KEY).map_err(storage_err)?.is_none();
            if fresh {
                meta.insert(NEXT_ID_KEY, 0).map_err(storage_err)?;
                meta.insert(REFERENCE_NODE_KEY, 1).map_err(storage_err)?;
            }
        }
        write_txn.commit().map_err(storage_err)?;

        Ok(Self { db })
    }
}

// =============================================================================
// GRAPHSTORE TRAIT IMPLEMENTATION
// =============================================================================

impl GraphStore for RedbGraph {
    fn read<T, F>(&self, f: F) -> Result<T, TaxonError>
    where
        F: FnOnce(&dyn GraphRead) -> Result<T, TaxonError>,
    {
        let txn = self.db.begin_read().map_err(storage_err)?;
        let view = RedbReader { txn };
        f(&view)
    }

    fn write<T, F>(&self, f: F) -> Result<T, TaxonError>
    where
        F: FnOnce(&mut dyn GraphWrite) -> Result<T, TaxonError>,
    {
        let txn = self.db.begin_write().map_err(storage_err)?;
        let result = {
            let mut view = RedbWriter { txn: &txn };
            f(&mut view)
        };
        match result {
            Ok(value) => {
                txn.commit().map_err(storage_err)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort) = txn.abort() {
                    tracing::warn!(error = %abort, "failed to abort write transaction");
                }
                Err(e)
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClassRole, NodeLabel};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

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
    fn class_round_trip_and_name_index() {
        let temp = tempdir().expect("temp dir");
        let graph = RedbGraph::open(temp.path().join("test.redb")).expect("open db");

        graph
            .write(|g| {
                g.put_class(&class(1, "Rack"))?;
                g.put_class(&class(2, "Shelf"))?;
                g.set_superclass(ClassId(2), ClassId(1))
            })
            .expect("write");

        graph
            .read(|g| {
                assert_eq!(g.class(ClassId(1))?, Some(class(1, "Rack")));
                assert_eq!(g.class_id_by_name("Shelf")?, Some(ClassId(2)));
                assert_eq!(g.superclass(ClassId(2))?, Some(ClassId(1)));
                assert_eq!(g.subclasses(ClassId(1))?, vec![ClassId(2)]);
                assert_eq!(g.class_ids()?, vec![ClassId(1), ClassId(2)]);
                Ok(())
            })
            .expect("read");
    }

    #[test]
    fn aborted_write_leaves_no_trace() {
        let temp = tempdir().expect("temp dir");
        let graph = RedbGraph::open(temp.path().join("test.redb")).expect("open db");

        let result: Result<(), TaxonError> = graph.write(|g| {
            g.put_class(&class(1, "Rack"))?;
            Err(TaxonError::constraint("abort"))
        });
        assert!(matches!(result, Err(TaxonError::ConstraintViolation(_))));

        let found = graph.read(|g| g.class_id_by_name("Rack")).expect("read");
        assert_eq!(found, None);
    }

    #[test]
    fn remove_class_clears_edges() {
        let temp = tempdir().expect("temp dir");
        let graph = RedbGraph::open(temp.path().join("test.redb")).expect("open db");

        graph
            .write(|g| {
                g.put_class(&class(1, "Rack"))?;
                g.put_class(&class(2, "Shelf"))?;
                g.set_superclass(ClassId(2), ClassId(1))?;
                g.remove_class(ClassId(2))
            })
            .expect("write");

        graph
            .read(|g| {
                assert_eq!(g.class(ClassId(2))?, None);
                assert_eq!(g.class_id_by_name("Shelf")?, None);
                assert!(g.subclasses(ClassId(1))?.is_empty());
                Ok(())
            })
            .expect("read");
    }

    #[test]
    fn containment_and_instance_indexes() {
        let temp = tempdir().expect("temp dir");
        let graph = RedbGraph::open(temp.path().join("test.redb")).expect("open db");

        graph
            .write(|g| {
                g.put_class(&class(1, "Rack"))?;
                g.put_instance(&instance(10, 1))?;
                g.put_instance(&instance(11, 1))?;
                g.put_instance(&instance(12, 1))?;
                g.set_parent(InstanceId(11), Some(InstanceId(10)))?;
                g.set_parent(InstanceId(12), Some(InstanceId(10)))?;
                g.set_parent(InstanceId(12), Some(InstanceId(11)))
            })
            .expect("write");

        graph
            .read(|g| {
                assert_eq!(g.children(InstanceId(10))?, vec![InstanceId(11)]);
                assert_eq!(g.parent(InstanceId(12))?, Some(InstanceId(11)));
                assert_eq!(g.instances_of(ClassId(1))?.len(), 3);
                Ok(())
            })
            .expect("read");

        graph
            .write(|g| g.remove_instance(InstanceId(11)))
            .expect("remove");
        graph
            .read(|g| {
                assert_eq!(g.parent(InstanceId(12))?, None);
                assert!(g.children(InstanceId(10))?.is_empty());
                assert_eq!(g.instance_ids()?, vec![InstanceId(10), InstanceId(12)]);
                Ok(())
            })
            .expect("read");
    }

    #[test]
    fn relationship_kinds_share_a_pair() {
        let temp = tempdir().expect("temp dir");
        let graph = RedbGraph::open(temp.path().join("test.redb")).expect("open db");
        let cable = Relationship::new(InstanceId(1), InstanceId(2), "Cable");
        let fiber = Relationship::new(InstanceId(1), InstanceId(2), "Fiber");

        graph
            .write(|g| {
                assert!(g.add_relationship(&cable)?);
                assert!(g.add_relationship(&fiber)?);
                assert!(!g.add_relationship(&cable)?);
                Ok(())
            })
            .expect("write");

        graph
            .read(|g| {
                assert_eq!(
                    g.relationships_from(InstanceId(1))?,
                    vec![cable.clone(), fiber.clone()]
                );
                assert_eq!(g.relationships_to(InstanceId(2))?.len(), 2);
                Ok(())
            })
            .expect("read");

        let removed = graph
            .write(|g| g.remove_relationship(&cable))
            .expect("remove");
        assert!(removed);
        let remaining = graph
            .read(|g| g.relationships_to(InstanceId(2)))
            .expect("read");
        assert_eq!(remaining, vec![fiber]);
    }

    #[test]
    fn recovery_persistence_after_reopen() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");

        let first_id = {
            let graph = RedbGraph::open(&db_path).expect("open db");
            graph
                .write(|g| {
                    let id = g.next_id()?;
                    g.put_class(&class(id, "Rack"))?;
                    g.set_reference("DUMMY_ROOT", InstanceId(99))?;
                    Ok(id)
                })
                .expect("write")
        };

        let graph = RedbGraph::open(&db_path).expect("reopen db");
        graph
            .read(|g| {
                assert_eq!(g.class_id_by_name("Rack")?, Some(ClassId(first_id)));
                assert_eq!(g.reference("DUMMY_ROOT")?, Some(InstanceId(99)));
                assert!(g.has_reference_node()?);
                Ok(())
            })
            .expect("read");
        let next = graph.write(|g| g.next_id()).expect("id");
        assert!(next > first_id);
    }

    #[test]
    fn existing_file_without_reference_node() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("damaged.redb");
        {
            let db = Database::create(&db_path).expect("create");
            let txn = db.begin_write().expect("txn");
            {
                let mut meta = txn.open_table(METADATA).expect("table");
                meta.insert(NEXT_ID_KEY, 12).expect("insert");
            }
            txn.commit().expect("commit");
        }

        let graph = RedbGraph::open(&db_path).expect("open db");
        let present = graph.read(|g| g.has_reference_node()).expect("read");
        assert!(!present);
    }
}
