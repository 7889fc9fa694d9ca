//! # Storage Backends
//!
//! The engine runs over one of two Graph Store backends:
//! - `InMemory`: `MemoryGraph` (fast, volatile; tests and embedding)
//! - `Persistent`: `RedbGraph` for disk-backed ACID storage

mod redb_graph;

pub use redb_graph::RedbGraph;

use crate::graph::{GraphRead, GraphStore, GraphWrite, MemoryGraph};
use crate::types::TaxonError;
use std::path::Path;

/// Storage backend selected at runtime.
#[derive(Debug)]
pub enum StorageBackend {
    /// In-memory graph (fast, volatile).
    InMemory(MemoryGraph),
    /// Disk-backed graph using redb (ACID, persistent).
    Persistent(RedbGraph),
}

impl StorageBackend {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::InMemory(MemoryGraph::new())
    }

    /// Open or create a redb database file.
    pub fn open_redb(path: impl AsRef<Path>) -> Result<Self, TaxonError> {
        Ok(Self::Persistent(RedbGraph::open(path)?))
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Persistent(_))
    }
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl GraphStore for StorageBackend {
    fn read<T, F>(&self, f: F) -> Result<T, TaxonError>
    where
        F: FnOnce(&dyn GraphRead) -> Result<T, TaxonError>,
    {
        match self {
            Self::InMemory(graph) => graph.read(f),
            Self::Persistent(graph) => graph.read(f),
        }
    }

    fn write<T, F>(&self, f: F) -> Result<T, TaxonError>
    where
        F: FnOnce(&mut dyn GraphWrite) -> Result<T, TaxonError>,
    {
        match self {
            Self::InMemory(graph) => graph.write(f),
            Self::Persistent(graph) => graph.write(f),
        }
    }
}
