//! # Schema Primitives
//!
//! Fixed names and bounds of the graph schema. These are compiled into the
//! binary: labels, relationship types and the core classes seeded at
//! bootstrap never change at runtime.

// =============================================================================
// NODE LABELS
// =============================================================================

pub const LABEL_CLASSES: &str = "classes";
pub const LABEL_INVENTORY_OBJECTS: &str = "inventoryObjects";
pub const LABEL_LIST_TYPE_ITEMS: &str = "listTypeItems";
pub const LABEL_SPECIAL_NODES: &str = "specialNodes";

// =============================================================================
// RELATIONSHIP TYPES
// =============================================================================

/// Class → Class, child → parent.
pub const REL_EXTENDS: &str = "EXTENDS";
/// Instance → Class.
pub const REL_INSTANCE_OF: &str = "INSTANCE_OF";
/// Instance → Instance, child → container.
pub const REL_CHILD_OF: &str = "CHILD_OF";
/// Instance → Instance, special child → container.
pub const REL_CHILD_OF_SPECIAL: &str = "CHILD_OF_SPECIAL";
/// Singleton reference node → dummy root instance.
pub const REL_DUMMY_ROOT: &str = "DUMMY_ROOT";

/// Relationship types that can never be used as class names (connection
/// classes double as relationship names).
pub const RESERVED_RELATIONSHIPS: [&str; 5] = [
    REL_EXTENDS,
    REL_INSTANCE_OF,
    REL_CHILD_OF,
    REL_CHILD_OF_SPECIAL,
    REL_DUMMY_ROOT,
];

// =============================================================================
// CORE CLASSES
// =============================================================================

/// Root of the `EXTENDS` tree. Declares `name` and `creationDate`.
pub const CLASS_ROOT_OBJECT: &str = "RootObject";
/// Every business class descends from this one.
pub const CLASS_INVENTORY_OBJECT: &str = "InventoryObject";
/// Every list-type class descends from this one.
pub const CLASS_GENERIC_OBJECT_LIST: &str = "GenericObjectList";
/// Class of the singleton top-level container instance.
pub const CLASS_DUMMY_ROOT: &str = "DummyRoot";

pub const ATTR_NAME: &str = "name";
pub const ATTR_CREATION_DATE: &str = "creationDate";

// =============================================================================
// BOUNDS
// =============================================================================

/// Default life expectancy of a cache slot, in seconds.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 600;

/// Maximum depth of the class hierarchy.
///
/// Upward walks that exceed this bound report a cycle instead of looping.
pub const MAX_HIERARCHY_DEPTH: usize = 256;

/// Maximum depth of the containment tree.
pub const MAX_CONTAINMENT_DEPTH: usize = 4096;

/// Maximum length of a class name, in bytes.
pub const MAX_CLASS_NAME_LENGTH: usize = 64;
