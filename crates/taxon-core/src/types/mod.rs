//! # Core Type Definitions
//!
//! This module contains the plain data records exchanged with callers of the
//! metamodel engine:
//! - Identifiers (`ClassId`, `InstanceId`)
//! - Class and attribute definitions (`ClassNode`, `ClassMetadata`, `AttributeDef`)
//! - Instances and their relationships (`InstanceNode`, `Relationship`)
//! - Error types (`TaxonError`)
//!
//! No storage handle or lock ever crosses this boundary: every record is an
//! owned value that can be serialized with `serde`.

use crate::primitives::{
    ATTR_CREATION_DATE, ATTR_NAME, LABEL_INVENTORY_OBJECTS, LABEL_LIST_TYPE_ITEMS,
    LABEL_SPECIAL_NODES, MAX_CLASS_NAME_LENGTH, RESERVED_RELATIONSHIPS,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Stable identifier of a class node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassId(pub u64);

/// Stable identifier of an instance node (business object or list-type item).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub u64);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

// =============================================================================
// CLASS ROLE & NODE LABELS
// =============================================================================

/// The structural role of a class, fixed when the class is defined.
///
/// A class inherits the role of its parent. Only the bootstrap seeds a
/// `Dummy` class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ClassRole {
    /// Business classes whose instances live in the containment tree.
    Inventory,
    /// Enumerations; instances are list-type items referenced by attributes.
    ListType,
    /// Internal marker types such as the dummy root.
    Dummy,
}

impl ClassRole {
    /// The label carried by instance nodes of a class with this role.
    #[must_use]
    pub const fn instance_label(self) -> NodeLabel {
        match self {
            Self::Inventory => NodeLabel::InventoryObjects,
            Self::ListType => NodeLabel::ListTypeItems,
            Self::Dummy => NodeLabel::SpecialNodes,
        }
    }
}

/// Label of an instance node in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeLabel {
    InventoryObjects,
    ListTypeItems,
    SpecialNodes,
}

impl NodeLabel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InventoryObjects => LABEL_INVENTORY_OBJECTS,
            Self::ListTypeItems => LABEL_LIST_TYPE_ITEMS,
            Self::SpecialNodes => LABEL_SPECIAL_NODES,
        }
    }
}

// =============================================================================
// ATTRIBUTES
// =============================================================================

/// Primitive attribute types. Values are stored as strings and parsed on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PrimitiveType {
    String,
    Integer,
    Long,
    Float,
    Boolean,
    /// Epoch millis.
    Date,
    /// Epoch millis.
    Timestamp,
}

impl PrimitiveType {
    /// Check that `value` parses as this type. Floats must be finite.
    #[must_use]
    pub fn accepts(self, value: &str) -> bool {
        match self {
            Self::String => true,
            Self::Integer => value.parse::<i32>().is_ok(),
            Self::Long => value.parse::<i64>().is_ok(),
            Self::Float => value.parse::<f64>().is_ok_and(f64::is_finite),
            Self::Boolean => matches!(value, "true" | "false"),
            Self::Date | Self::Timestamp => value.parse::<u64>().is_ok(),
        }
    }

    const fn keyword(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Long => "long",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
        }
    }
}

/// Declared type of an attribute.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AttributeType {
    Primitive(PrimitiveType),
    /// Reference to an item of the named list-type class (or a subclass).
    ListType(String),
    /// Reference to an instance of the named class (or a subclass).
    ClassRef(String),
}

impl AttributeType {
    /// Name of the class this type points at, if it is a reference type.
    #[must_use]
    pub fn referenced_class(&self) -> Option<&str> {
        match self {
            Self::Primitive(_) => None,
            Self::ListType(name) | Self::ClassRef(name) => Some(name),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(p) => f.write_str(p.keyword()),
            Self::ListType(name) => write!(f, "list:{}", name),
            Self::ClassRef(name) => write!(f, "class:{}", name),
        }
    }
}

impl FromStr for AttributeType {
    type Err = TaxonError;

    /// Parse `string`, `integer`, ..., `list:<Class>` or `class:<Class>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(name) = s.strip_prefix("list:") {
            validate_class_name(name)?;
            return Ok(Self::ListType(name.to_string()));
        }
        if let Some(name) = s.strip_prefix("class:") {
            validate_class_name(name)?;
            return Ok(Self::ClassRef(name.to_string()));
        }
        let primitive = match s.to_ascii_lowercase().as_str() {
            "string" => PrimitiveType::String,
            "integer" | "int" => PrimitiveType::Integer,
            "long" => PrimitiveType::Long,
            "float" => PrimitiveType::Float,
            "boolean" | "bool" => PrimitiveType::Boolean,
            "date" => PrimitiveType::Date,
            "timestamp" => PrimitiveType::Timestamp,
            other => {
                return Err(TaxonError::invalid(format!(
                    "unknown attribute type '{}'",
                    other
                )));
            }
        };
        Ok(Self::Primitive(primitive))
    }
}

/// An attribute definition declared on a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDef {
    pub name: String,
    pub display_name: String,
    pub attr_type: AttributeType,
    pub mandatory: bool,
    pub visible: bool,
    pub administrative: bool,
}

impl AttributeDef {
    /// A visible, optional, non-administrative attribute.
    #[must_use]
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            attr_type,
            mandatory: false,
            visible: true,
            administrative: false,
        }
    }

    #[must_use]
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    #[must_use]
    pub fn administrative(mut self) -> Self {
        self.administrative = true;
        self
    }

    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Whether the attribute is one of the engine-managed attributes.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        is_reserved_attribute(&self.name)
    }
}

/// `name` and `creationDate` are declared on the root class and cannot be removed.
#[must_use]
pub fn is_reserved_attribute(name: &str) -> bool {
    name == ATTR_NAME || name == ATTR_CREATION_DATE
}

// =============================================================================
// CLASSES
// =============================================================================

/// A class node as stored in the graph: only its locally declared attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassNode {
    pub id: ClassId,
    pub name: String,
    pub display_name: String,
    pub is_abstract: bool,
    pub role: ClassRole,
    /// Classes still being designed cannot be instantiated.
    pub in_design: bool,
    /// False for the classes seeded at bootstrap.
    pub custom: bool,
    pub creation_date: u64,
    pub attributes: Vec<AttributeDef>,
}

impl ClassNode {
    #[must_use]
    pub fn local_attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// A resolved class: stored properties plus its parent and effective attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassMetadata {
    pub id: ClassId,
    pub name: String,
    pub display_name: String,
    pub is_abstract: bool,
    pub role: ClassRole,
    pub in_design: bool,
    pub custom: bool,
    pub creation_date: u64,
    pub parent: Option<ClassId>,
    /// Ancestor attributes first (root-most first), local ones last; a
    /// local attribute replaces an inherited one of the same name in place.
    pub attributes: Vec<AttributeDef>,
}

impl ClassMetadata {
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }

    #[must_use]
    pub fn mandatory_attributes(&self) -> Vec<&AttributeDef> {
        self.attributes.iter().filter(|a| a.mandatory).collect()
    }
}

/// Request to define a new class below an existing parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDefinition {
    pub name: String,
    pub parent: ClassId,
    pub display_name: Option<String>,
    pub is_abstract: bool,
    pub in_design: bool,
    pub attributes: Vec<AttributeDef>,
}

impl ClassDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>, parent: ClassId) -> Self {
        Self {
            name: name.into(),
            parent,
            display_name: None,
            is_abstract: false,
            in_design: false,
            attributes: Vec::new(),
        }
    }

    #[must_use]
    pub fn abstract_class(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    #[must_use]
    pub fn in_design(mut self) -> Self {
        self.in_design = true;
        self
    }

    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, attribute: AttributeDef) -> Self {
        self.attributes.push(attribute);
        self
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: impl IntoIterator<Item = AttributeDef>) -> Self {
        self.attributes.extend(attributes);
        self
    }
}

/// Partial update of a class's own properties. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassUpdate {
    pub display_name: Option<String>,
    pub is_abstract: Option<bool>,
    pub in_design: Option<bool>,
}

// =============================================================================
// INSTANCES
// =============================================================================

/// An instance node. `name` and `creation_date` are kept out of `attributes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceNode {
    pub id: InstanceId,
    pub name: String,
    /// Target of the `INSTANCE_OF` edge.
    pub class_id: ClassId,
    pub label: NodeLabel,
    pub creation_date: u64,
    pub attributes: BTreeMap<String, String>,
}

/// A named, directed domain relationship between two instances.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub from: InstanceId,
    pub to: InstanceId,
    pub kind: String,
}

impl Relationship {
    #[must_use]
    pub fn new(from: InstanceId, to: InstanceId, kind: impl Into<String>) -> Self {
        Self {
            from,
            to,
            kind: kind.into(),
        }
    }
}

// =============================================================================
// NAME VALIDATION
// =============================================================================

/// Class names: non-empty, bounded, `[A-Za-z0-9_-]` only, not a relationship type.
pub fn validate_class_name(name: &str) -> Result<(), TaxonError> {
    if name.is_empty() {
        return Err(TaxonError::invalid("class name cannot be empty"));
    }
    if name.len() > MAX_CLASS_NAME_LENGTH {
        return Err(TaxonError::invalid(format!(
            "class name '{}' exceeds {} characters",
            name, MAX_CLASS_NAME_LENGTH
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(TaxonError::invalid(format!(
            "class name '{}' contains invalid characters",
            name
        )));
    }
    if RESERVED_RELATIONSHIPS.contains(&name) {
        return Err(TaxonError::invalid(format!(
            "class name '{}' is a reserved relationship type",
            name
        )));
    }
    Ok(())
}

/// Attribute names: non-empty, no whitespace.
pub fn validate_attribute_name(name: &str) -> Result<(), TaxonError> {
    if name.is_empty() {
        return Err(TaxonError::invalid("attribute name cannot be empty"));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(TaxonError::invalid(format!(
            "attribute name '{}' contains whitespace",
            name
        )));
    }
    Ok(())
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors returned by every fallible engine operation.
///
/// Storage failures are mapped to `DatabaseError` at the Graph Store boundary;
/// no raw redb or postcard error reaches a caller. Rule mismatches are not
/// errors unless an operation was asked to commit them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaxonError {
    /// Malformed input, or an input reference that does not resolve.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation would break a structural invariant.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// The subject of the operation does not exist.
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// Underlying Graph Store failure or detected corruption.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Configuration could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TaxonError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::ConstraintViolation(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::DatabaseError(msg.into())
    }

    pub fn not_found(kind: &'static str, key: impl fmt::Display) -> Self {
        Self::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    pub fn class_not_found(id: ClassId) -> Self {
        Self::not_found("class", id)
    }

    pub fn instance_not_found(id: InstanceId) -> Self {
        Self::not_found("object", id)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_name_rules() {
        assert!(validate_class_name("RJ45Port").is_ok());
        assert!(validate_class_name("Generic_Port-2").is_ok());
        assert!(matches!(
            validate_class_name(""),
            Err(TaxonError::InvalidArgument(_))
        ));
        assert!(validate_class_name("Bad Name").is_err());
        assert!(validate_class_name("Bad.Name").is_err());
        assert!(validate_class_name(&"X".repeat(MAX_CLASS_NAME_LENGTH + 1)).is_err());
        assert!(validate_class_name("CHILD_OF").is_err());
    }

    #[test]
    fn attribute_name_rules() {
        assert!(validate_attribute_name("serialNumber").is_ok());
        assert!(validate_attribute_name("").is_err());
        assert!(validate_attribute_name("serial number").is_err());
    }

    #[test]
    fn attribute_type_parsing() {
        assert_eq!(
            "integer".parse::<AttributeType>().expect("parse"),
            AttributeType::Primitive(PrimitiveType::Integer)
        );
        assert_eq!(
            "list:EquipmentVendor".parse::<AttributeType>().expect("parse"),
            AttributeType::ListType("EquipmentVendor".to_string())
        );
        assert_eq!(
            "class:GenericPort".parse::<AttributeType>().expect("parse"),
            AttributeType::ClassRef("GenericPort".to_string())
        );
        assert!("matrix".parse::<AttributeType>().is_err());
        assert!("list:".parse::<AttributeType>().is_err());
    }

    #[test]
    fn attribute_type_display_parses_back() {
        for text in ["string", "timestamp", "list:Vendor", "class:Rack"] {
            let parsed: AttributeType = text.parse().expect("parse");
            assert_eq!(parsed.to_string(), text);
        }
    }

    #[test]
    fn primitive_values() {
        assert!(PrimitiveType::Integer.accepts("-42"));
        assert!(!PrimitiveType::Integer.accepts("4.2"));
        assert!(PrimitiveType::Long.accepts("9000000000"));
        assert!(!PrimitiveType::Integer.accepts("9000000000"));
        assert!(PrimitiveType::Float.accepts("4.2"));
        assert!(PrimitiveType::Boolean.accepts("true"));
        assert!(!PrimitiveType::Boolean.accepts("yes"));
        assert!(PrimitiveType::Timestamp.accepts("1700000000000"));
        assert!(!PrimitiveType::Date.accepts("-1"));
    }

    #[test]
    fn float_values_must_be_finite() {
        assert!(PrimitiveType::Float.accepts("1.5"));
        assert!(PrimitiveType::Float.accepts("-3e8"));
        for value in ["NaN", "nan", "inf", "-inf", "infinity", "1e400"] {
            assert!(!PrimitiveType::Float.accepts(value), "{value} accepted");
        }
    }

    #[test]
    fn reserved_attributes() {
        assert!(is_reserved_attribute("name"));
        assert!(is_reserved_attribute("creationDate"));
        assert!(!AttributeDef::new("serial", AttributeType::Primitive(PrimitiveType::String)).is_reserved());
    }

    #[test]
    fn role_labels() {
        assert_eq!(ClassRole::Inventory.instance_label().as_str(), "inventoryObjects");
        assert_eq!(ClassRole::ListType.instance_label().as_str(), "listTypeItems");
        assert_eq!(ClassRole::Dummy.instance_label().as_str(), "specialNodes");
    }

    #[test]
    fn error_display() {
        let err = TaxonError::class_not_found(ClassId(7));
        assert_eq!(err.to_string(), "class not found: class#7");
    }
}
