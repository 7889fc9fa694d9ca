//! # Engine
//!
//! Wires the stores over one storage backend and one shared cache.
//!
//! Initialization order is fixed: the Integrity Service bootstraps the
//! core metamodel before any store is handed out, and a bootstrap failure
//! aborts construction.

use crate::cache::{CacheManager, Clock, SystemClock};
use crate::config::EngineConfig;
use crate::instance::InstanceStore;
use crate::integrity::{BootstrapOutcome, IntegrityService};
use crate::metadata::MetadataStore;
use crate::rules::RuleEngine;
use crate::storage::StorageBackend;
use crate::types::TaxonError;
use std::path::Path;
use std::sync::Arc;

/// A bootstrapped metamodel engine.
#[derive(Debug)]
pub struct Engine {
    backend: Arc<StorageBackend>,
    cache: Arc<CacheManager>,
    metadata: Arc<MetadataStore>,
    rules: Arc<RuleEngine>,
    instances: InstanceStore,
    integrity: IntegrityService,
    bootstrap: BootstrapOutcome,
}

impl Engine {
    /// Build an engine over `backend` using the wall clock.
    pub fn open(backend: StorageBackend, config: &EngineConfig) -> Result<Self, TaxonError> {
        Self::with_clock(backend, config, Arc::new(SystemClock))
    }

    /// Build an engine with an explicit clock (tests drive cache expiry with it).
    pub fn with_clock(
        backend: StorageBackend,
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TaxonError> {
        let backend = Arc::new(backend);
        let integrity = IntegrityService::new(Arc::clone(&backend), Arc::clone(&clock));
        let bootstrap = integrity.bootstrap_root()?;

        let cache = Arc::new(CacheManager::new(Arc::clone(&clock), config.cache_ttl()));
        let metadata = Arc::new(MetadataStore::new(
            Arc::clone(&backend),
            Arc::clone(&cache),
            Arc::clone(&clock),
        ));
        let rules = Arc::new(RuleEngine::new(
            config.rules.clone(),
            Arc::clone(&metadata),
            Arc::clone(&cache),
        ));
        let instances = InstanceStore::new(
            Arc::clone(&backend),
            Arc::clone(&cache),
            Arc::clone(&rules),
            clock,
        );

        tracing::info!(
            persistent = backend.is_persistent(),
            root = %bootstrap.root(),
            cache_ttl_secs = config.cache.ttl_secs,
            "engine ready"
        );
        Ok(Self {
            backend,
            cache,
            metadata,
            rules,
            instances,
            integrity,
            bootstrap,
        })
    }

    /// Volatile engine with default configuration.
    pub fn in_memory() -> Result<Self, TaxonError> {
        Self::open(StorageBackend::in_memory(), &EngineConfig::default())
    }

    /// Engine over a redb file, created if absent.
    pub fn open_redb(path: impl AsRef<Path>, config: &EngineConfig) -> Result<Self, TaxonError> {
        Self::open(StorageBackend::open_redb(path)?, config)
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn instances(&self) -> &InstanceStore {
        &self.instances
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    pub fn integrity(&self) -> &IntegrityService {
        &self.integrity
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// What the startup bootstrap found.
    pub fn bootstrap_outcome(&self) -> BootstrapOutcome {
        self.bootstrap
    }

    pub fn is_persistent(&self) -> bool {
        self.backend.is_persistent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::primitives::CLASS_INVENTORY_OBJECT;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn in_memory_engine_is_bootstrapped() {
        let engine = Engine::in_memory().expect("engine");
        assert!(engine.bootstrap_outcome().was_created());
        assert!(!engine.is_persistent());
        assert!(engine.integrity().check_integrity().expect("check").is_clean());
    }

    #[test]
    fn reopening_redb_finds_existing_root() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("taxon.db");

        let root = {
            let engine = Engine::open_redb(&path, &EngineConfig::default()).expect("open");
            assert!(engine.bootstrap_outcome().was_created());
            engine.bootstrap_outcome().root()
        };

        let engine = Engine::open_redb(&path, &EngineConfig::default()).expect("reopen");
        assert_eq!(engine.bootstrap_outcome(), BootstrapOutcome::Existing(root));
        assert!(engine.is_persistent());
    }

    #[test]
    fn configured_ttl_drives_expiry() {
        let clock = Arc::new(ManualClock::starting_at(0));
        let mut config = EngineConfig::default();
        config.cache.ttl_secs = 10;
        let engine = Engine::with_clock(
            StorageBackend::in_memory(),
            &config,
            Arc::clone(&clock) as Arc<dyn Clock>,
        )
        .expect("engine");

        let class = engine
            .metadata()
            .get_class_by_name(CLASS_INVENTORY_OBJECT)
            .expect("class");
        assert!(!engine.cache().is_empty());
        engine.metadata().get_class(class.id).expect("cached");
        let hits = engine.cache().stats().hits;
        assert!(hits >= 1);

        clock.advance(Duration::from_secs(11));
        engine.metadata().get_class(class.id).expect("recomputed");
        assert!(engine.cache().stats().expirations >= 1);
    }
}
