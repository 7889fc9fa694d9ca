//! # taxon-core
//!
//! A dynamic metamodel engine for inventory management.
//!
//! Users define classes with inherited attributes at runtime, instantiate
//! business objects from them, arrange those objects in a containment tree
//! and link them with typed relationships. A rule engine decides which
//! classes may contain or connect to which, matching through the class
//! hierarchy on both sides.
//!
//! ## Layers
//!
//! - `graph` / `storage`: transactional property graph (in-memory or redb)
//! - `metadata`: classes, attributes, `EXTENDS` tree
//! - `instance`: objects, containment, relationships
//! - `rules`: containment and connection tables, validator tags
//! - `cache`: TTL cache of derived hierarchy results
//! - `integrity`: bootstrap and structural audit
//!
//! ## Constraints
//!
//! - Synchronous: every mutation is one Graph Store transaction
//! - The cache is invalidated only after a commit
//! - `Engine` bootstraps before any store is reachable

// =============================================================================
// MODULES
// =============================================================================

pub mod cache;
pub mod config;
pub mod engine;
pub mod graph;
pub mod hierarchy;
pub mod instance;
pub mod integrity;
pub mod metadata;
pub mod primitives;
pub mod rules;
pub mod storage;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{
    AttributeDef, AttributeType, ClassDefinition, ClassId, ClassMetadata, ClassNode, ClassRole,
    ClassUpdate, InstanceId, InstanceNode, NodeLabel, PrimitiveType, Relationship, TaxonError,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use cache::{CacheKey, CacheManager, CacheStats, CacheValue, Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, EngineConfig};
pub use engine::Engine;
pub use graph::{GraphRead, GraphStore, GraphWrite, MemoryGraph};
pub use instance::{AttributeValues, InstanceStore};
pub use integrity::{BootstrapOutcome, IntegrityReport, IntegrityService, Violation};
pub use metadata::MetadataStore;
pub use rules::{EndpointPair, RuleEngine, RuleSet};
pub use storage::{RedbGraph, StorageBackend};
