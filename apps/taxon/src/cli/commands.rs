//! # CLI Command Implementations
//!
//! Each command opens the engine, performs one operation and renders the
//! result as text or pretty JSON.

use serde_json::{Value, json};
use std::path::Path;
use taxon_core::{
    AttributeDef, AttributeType, AttributeValues, ClassDefinition, ClassId, ClassMetadata,
    Engine, EngineConfig, InstanceId, InstanceNode, TaxonError,
};

// =============================================================================
// HELPERS
// =============================================================================

/// Load the engine configuration, or the defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, TaxonError> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => Ok(EngineConfig::default()),
    }
}

/// Open (and bootstrap if needed) the redb database at `db_path`.
pub fn open_engine(db_path: &Path, config: &EngineConfig) -> Result<Engine, TaxonError> {
    tracing::debug!(path = %db_path.display(), "opening database");
    Engine::open_redb(db_path, config)
}

/// Parse `name:type[:mandatory]`.
///
/// The type part may itself contain a colon (`list:Vendor`, `class:Rack`).
pub fn parse_attribute_spec(spec: &str) -> Result<AttributeDef, TaxonError> {
    let (name, rest) = spec.split_once(':').ok_or_else(|| {
        TaxonError::invalid(format!(
            "attribute '{}' must be written as name:type[:mandatory]",
            spec
        ))
    })?;
    let (type_part, mandatory) = match rest.strip_suffix(":mandatory") {
        Some(type_part) => (type_part, true),
        None => (rest, false),
    };
    let attr_type: AttributeType = type_part.parse()?;
    let attribute = AttributeDef::new(name, attr_type);
    Ok(if mandatory {
        attribute.mandatory()
    } else {
        attribute
    })
}

/// Parse `key=value` pairs into attribute values. An empty value is kept.
pub fn parse_assignments(pairs: &[String]) -> Result<AttributeValues, TaxonError> {
    let mut values = AttributeValues::new();
    for pair in pairs {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            TaxonError::invalid(format!("value '{}' must be written as key=value", pair))
        })?;
        values.insert(key.trim().to_string(), value.to_string());
    }
    Ok(values)
}

fn render(json_mode: bool, output: &Value, text: impl FnOnce() -> String) -> String {
    if json_mode {
        serde_json::to_string_pretty(output).unwrap_or_default()
    } else {
        text()
    }
}

fn class_json(class: &ClassMetadata) -> Value {
    json!({
        "id": class.id.0,
        "name": class.name,
        "display_name": class.display_name,
        "abstract": class.is_abstract,
        "role": format!("{:?}", class.role),
        "in_design": class.in_design,
        "custom": class.custom,
        "parent": class.parent.map(|p| p.0),
        "attributes": class.attributes.iter().map(|a| json!({
            "name": a.name,
            "type": a.attr_type.to_string(),
            "mandatory": a.mandatory,
            "visible": a.visible,
            "administrative": a.administrative,
        })).collect::<Vec<_>>(),
    })
}

fn instance_json(node: &InstanceNode, class_name: &str) -> Value {
    json!({
        "id": node.id.0,
        "name": node.name,
        "class": class_name,
        "label": node.label.as_str(),
        "creation_date": node.creation_date,
        "attributes": node.attributes,
    })
}

fn class_names(classes: &[ClassMetadata]) -> Vec<&str> {
    classes.iter().map(|c| c.name.as_str()).collect()
}

fn instance_line(engine: &Engine, node: &InstanceNode) -> Result<String, TaxonError> {
    let class = engine.metadata().get_class(node.class_id)?;
    Ok(format!("  [{}] {} ({})", node.id.0, node.name, class.name))
}

fn class_id_of(engine: &Engine, name: &str) -> Result<ClassId, TaxonError> {
    engine
        .metadata()
        .class_id(name)?
        .ok_or_else(|| TaxonError::not_found("class", name))
}

// =============================================================================
// DATABASE COMMANDS
// =============================================================================

/// Create the database and bootstrap it.
pub fn cmd_init(
    db_path: &Path,
    config: &EngineConfig,
    json_mode: bool,
    force: bool,
) -> Result<String, TaxonError> {
    if db_path.exists() {
        if !force {
            return Err(TaxonError::invalid(format!(
                "database {} already exists (use --force to recreate it)",
                db_path.display()
            )));
        }
        std::fs::remove_file(db_path).map_err(|e| {
            TaxonError::database(format!("cannot remove {}: {}", db_path.display(), e))
        })?;
        tracing::info!(path = %db_path.display(), "removed existing database");
    }

    let engine = open_engine(db_path, config)?;
    let outcome = engine.bootstrap_outcome();
    let output = json!({
        "database": db_path.to_string_lossy(),
        "root": outcome.root().0,
        "created": outcome.was_created(),
    });
    Ok(render(json_mode, &output, || {
        format!(
            "Initialized {}\nDummy root: {}",
            db_path.display(),
            outcome.root().0
        )
    }))
}

/// Run the integrity audit.
pub fn cmd_check(engine: &Engine, json_mode: bool) -> Result<String, TaxonError> {
    let report = engine.integrity().check_integrity()?;
    let violations: Vec<String> = report.violations.iter().map(ToString::to_string).collect();
    let output = json!({
        "clean": report.is_clean(),
        "classes_checked": report.classes_checked,
        "instances_checked": report.instances_checked,
        "violations": violations,
    });
    Ok(render(json_mode, &output, || {
        let mut text = format!(
            "Integrity Check\n===============\nClasses:   {}\nInstances: {}\n",
            report.classes_checked, report.instances_checked
        );
        if report.is_clean() {
            text.push_str("No violations found");
        } else {
            text.push_str(&format!("{} violation(s):", violations.len()));
            for violation in &violations {
                text.push_str(&format!("\n  - {}", violation));
            }
        }
        text
    }))
}

// =============================================================================
// CLASS COMMANDS
// =============================================================================

/// Define a new class below `parent`.
#[allow(clippy::too_many_arguments)]
pub fn cmd_class_create(
    engine: &Engine,
    json_mode: bool,
    name: &str,
    parent: &str,
    is_abstract: bool,
    in_design: bool,
    display_name: Option<String>,
    attributes: &[String],
) -> Result<String, TaxonError> {
    let parent_id = engine
        .metadata()
        .class_id(parent)?
        .ok_or_else(|| TaxonError::invalid(format!("parent class '{}' does not exist", parent)))?;

    let mut definition = ClassDefinition::new(name, parent_id);
    if is_abstract {
        definition = definition.abstract_class();
    }
    if in_design {
        definition = definition.in_design();
    }
    if let Some(display_name) = display_name {
        definition = definition.with_display_name(display_name);
    }
    for spec in attributes {
        definition = definition.with_attribute(parse_attribute_spec(spec)?);
    }

    let id = engine.metadata().create_class(definition)?;
    let output = json!({ "id": id.0, "name": name, "parent": parent });
    Ok(render(json_mode, &output, || {
        format!("Created class {} ({}) extending {}", name, id.0, parent)
    }))
}

/// Show one class with its effective attributes.
pub fn cmd_class_show(engine: &Engine, json_mode: bool, name: &str) -> Result<String, TaxonError> {
    let class = engine.metadata().get_class_by_name(name)?;
    let lineage = engine.metadata().lineage_names(name)?.unwrap_or_default();

    let mut output = class_json(&class);
    output["lineage"] = json!(lineage);
    Ok(render(json_mode, &output, || {
        let mut text = format!(
            "Class {} ({})\nDisplay name: {}\nRole:         {:?}\nAbstract:     {}\nIn design:    {}\nLineage:      {}\nAttributes:",
            class.name,
            class.id.0,
            class.display_name,
            class.role,
            class.is_abstract,
            class.in_design,
            lineage.join(" > ")
        );
        for attribute in &class.attributes {
            text.push_str(&format!("\n  {}: {}", attribute.name, attribute.attr_type));
            if attribute.mandatory {
                text.push_str(" (mandatory)");
            }
        }
        text
    }))
}

/// Delete a leaf class without instances.
pub fn cmd_class_delete(
    engine: &Engine,
    json_mode: bool,
    name: &str,
) -> Result<String, TaxonError> {
    let id = class_id_of(engine, name)?;
    engine.metadata().delete_class(id)?;
    let output = json!({ "deleted": name, "id": id.0 });
    Ok(render(json_mode, &output, || format!("Deleted class {}", name)))
}

// =============================================================================
// ATTRIBUTE COMMANDS
// =============================================================================

/// Declare an attribute on a class.
pub fn cmd_attribute_add(
    engine: &Engine,
    json_mode: bool,
    class: &str,
    spec: &str,
) -> Result<String, TaxonError> {
    let id = class_id_of(engine, class)?;
    let attribute = parse_attribute_spec(spec)?;
    let name = attribute.name.clone();
    let attr_type = attribute.attr_type.to_string();
    engine.metadata().create_attribute(id, attribute)?;
    let output = json!({ "class": class, "attribute": name, "type": attr_type });
    Ok(render(json_mode, &output, || {
        format!("Added {}: {} to {}", name, attr_type, class)
    }))
}

/// Remove an attribute declared on a class.
pub fn cmd_attribute_delete(
    engine: &Engine,
    json_mode: bool,
    class: &str,
    name: &str,
) -> Result<String, TaxonError> {
    let id = class_id_of(engine, class)?;
    engine.metadata().delete_attribute(id, name)?;
    let output = json!({ "class": class, "deleted": name });
    Ok(render(json_mode, &output, || {
        format!("Removed {} from {}", name, class)
    }))
}

// =============================================================================
// HIERARCHY COMMANDS
// =============================================================================

/// List the subclasses of a class.
pub fn cmd_subclasses(
    engine: &Engine,
    json_mode: bool,
    class: &str,
    include_abstract: bool,
    include_self: bool,
    direct: bool,
) -> Result<String, TaxonError> {
    let id = class_id_of(engine, class)?;
    let classes = if direct {
        engine.metadata().get_subclasses_no_recursive(id)?
    } else {
        engine
            .metadata()
            .get_subclasses(id, include_abstract, include_self)?
    };
    let names = class_names(&classes);
    let output = json!({ "class": class, "direct": direct, "subclasses": names });
    Ok(render(json_mode, &output, || {
        if names.is_empty() {
            format!("{} has no matching subclasses", class)
        } else {
            format!("Subclasses of {}:\n  {}", class, names.join("\n  "))
        }
    }))
}

/// Check whether `class` is `ancestor` or one of its descendants.
pub fn cmd_is_subclass(
    engine: &Engine,
    json_mode: bool,
    class: &str,
    ancestor: &str,
) -> Result<String, TaxonError> {
    let result = engine.metadata().is_subclass_of_name(class, ancestor)?;
    let output = json!({ "class": class, "ancestor": ancestor, "is_subclass": result });
    Ok(render(json_mode, &output, || {
        if result {
            format!("{} is a subclass of {}", class, ancestor)
        } else {
            format!("{} is not a subclass of {}", class, ancestor)
        }
    }))
}

// =============================================================================
// INSTANCE COMMANDS
// =============================================================================

/// Create an object of `class`.
pub fn cmd_instance_create(
    engine: &Engine,
    json_mode: bool,
    class: &str,
    parent: Option<u64>,
    special: bool,
    values: &[String],
) -> Result<String, TaxonError> {
    let class_id = engine
        .metadata()
        .class_id(class)?
        .ok_or_else(|| TaxonError::invalid(format!("class '{}' does not exist", class)))?;
    let values = parse_assignments(values)?;

    let id = match (parent, special) {
        (Some(parent), true) => {
            engine
                .instances()
                .create_special_instance(class_id, InstanceId(parent), values)?
        }
        (None, true) => {
            return Err(TaxonError::invalid(
                "a special child needs an explicit parent",
            ));
        }
        (parent, false) => {
            engine
                .instances()
                .create_instance(class_id, parent.map(InstanceId), values)?
        }
    };

    let output = json!({ "id": id.0, "class": class, "parent": parent, "special": special });
    Ok(render(json_mode, &output, || {
        format!("Created {} object {}", class, id.0)
    }))
}

/// Show one object, optionally with what it contains.
pub fn cmd_instance_show(
    engine: &Engine,
    json_mode: bool,
    id: u64,
    children: bool,
) -> Result<String, TaxonError> {
    let instances = engine.instances();
    let node = instances.get_instance(InstanceId(id))?;
    let class = engine.metadata().get_class(node.class_id)?;
    let parents = instances.get_parents(node.id)?;
    let relationships = instances.get_relationships(node.id)?;
    let contained = if children {
        let mut nodes = instances.get_children(node.id)?;
        nodes.extend(instances.get_special_children(node.id)?);
        nodes
    } else {
        Vec::new()
    };

    let mut output = instance_json(&node, &class.name);
    output["parents"] = json!(parents.iter().map(|p| p.id.0).collect::<Vec<_>>());
    output["relationships"] = json!(
        relationships
            .iter()
            .map(|r| json!({ "from": r.from.0, "to": r.to.0, "kind": r.kind }))
            .collect::<Vec<_>>()
    );
    if children {
        output["children"] = json!(contained.iter().map(|c| c.id.0).collect::<Vec<_>>());
    }

    if json_mode {
        return Ok(serde_json::to_string_pretty(&output).unwrap_or_default());
    }

    let mut text = format!("Object {} ({})\nName:   {}\n", node.id.0, class.name, node.name);
    let path: Vec<String> = parents
        .iter()
        .map(|p| format!("{} [{}]", p.name, p.id.0))
        .collect();
    text.push_str(&format!("Parents: {}", path.join(" < ")));
    for (key, value) in &node.attributes {
        text.push_str(&format!("\n  {} = {}", key, value));
    }
    for relationship in &relationships {
        text.push_str(&format!(
            "\n  {} --{}--> {}",
            relationship.from.0, relationship.kind, relationship.to.0
        ));
    }
    if children {
        text.push_str(&format!("\nContains {} object(s)", contained.len()));
        for child in &contained {
            text.push('\n');
            text.push_str(&instance_line(engine, child)?);
        }
    }
    Ok(text)
}

/// Move an object under another container.
pub fn cmd_instance_move(
    engine: &Engine,
    json_mode: bool,
    id: u64,
    parent: u64,
) -> Result<String, TaxonError> {
    engine
        .instances()
        .move_instance(InstanceId(id), InstanceId(parent))?;
    let output = json!({ "id": id, "parent": parent });
    Ok(render(json_mode, &output, || {
        format!("Moved object {} under {}", id, parent)
    }))
}

/// Delete an object, and with `cascade` everything below it.
pub fn cmd_instance_delete(
    engine: &Engine,
    json_mode: bool,
    id: u64,
    cascade: bool,
) -> Result<String, TaxonError> {
    engine.instances().delete_instance(InstanceId(id), cascade)?;
    let output = json!({ "deleted": id, "cascade": cascade });
    Ok(render(json_mode, &output, || format!("Deleted object {}", id)))
}

/// Link two objects.
pub fn cmd_connect(
    engine: &Engine,
    json_mode: bool,
    source: u64,
    target: u64,
    link: &str,
) -> Result<String, TaxonError> {
    let link_id = engine
        .metadata()
        .class_id(link)?
        .ok_or_else(|| TaxonError::invalid(format!("link class '{}' does not exist", link)))?;
    let relationship =
        engine
            .instances()
            .connect(InstanceId(source), InstanceId(target), link_id)?;
    let output = json!({
        "from": relationship.from.0,
        "to": relationship.to.0,
        "kind": relationship.kind,
    });
    Ok(render(json_mode, &output, || {
        format!(
            "Connected {} to {} with {}",
            relationship.from.0, relationship.to.0, relationship.kind
        )
    }))
}

// =============================================================================
// RULE COMMANDS
// =============================================================================

/// Check a containment pair.
pub fn cmd_can_contain(
    engine: &Engine,
    json_mode: bool,
    parent: &str,
    child: &str,
    special: bool,
) -> Result<String, TaxonError> {
    let allowed = if special {
        engine.rules().can_be_special_child(parent, child)?
    } else {
        engine.rules().can_be_child(parent, child)?
    };
    let output = json!({
        "parent": parent,
        "child": child,
        "special": special,
        "allowed": allowed,
    });
    Ok(render(json_mode, &output, || {
        let kind = if special { "special child" } else { "child" };
        if allowed {
            format!("{} may be a {} of {}", child, kind, parent)
        } else {
            format!("{} may not be a {} of {}", child, kind, parent)
        }
    }))
}

/// Resolve the validator tag of a class.
pub fn cmd_tag(engine: &Engine, json_mode: bool, class: &str) -> Result<String, TaxonError> {
    let tag = engine.rules().resolve_validator_tag(class)?;
    let output = json!({ "class": class, "tag": tag });
    Ok(render(json_mode, &output, || match &tag {
        Some(tag) => format!("{}: {}", class, tag),
        None => format!("{} has no validator tag", class),
    }))
}

/// Print the active rule tables.
pub fn cmd_rules(engine: &Engine, json_mode: bool) -> Result<String, TaxonError> {
    let rules = engine.rules().snapshot();
    if json_mode {
        return Ok(serde_json::to_string_pretty(&rules).unwrap_or_default());
    }

    let mut text = String::from("Containment:");
    for (parent, children) in &rules.containment {
        for child in children {
            text.push_str(&format!("\n  {} > {}", parent, child));
        }
    }
    text.push_str("\nSpecial containment:");
    for (parent, children) in &rules.special_containment {
        for child in children {
            text.push_str(&format!("\n  {} >> {}", parent, child));
        }
    }
    text.push_str("\nRelationships:");
    for (link, pairs) in &rules.relationships {
        for pair in pairs {
            text.push_str(&format!("\n  {}: {} <-> {}", link, pair.a, pair.b));
        }
    }
    text.push_str("\nValidator tags:");
    for (class, tag) in &rules.validators {
        text.push_str(&format!("\n  {} = {}", class, tag));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taxon_core::PrimitiveType;

    #[test]
    fn attribute_spec_with_primitive_type() {
        let attribute = parse_attribute_spec("serial:string").expect("parse");
        assert_eq!(attribute.name, "serial");
        assert_eq!(
            attribute.attr_type,
            AttributeType::Primitive(PrimitiveType::String)
        );
        assert!(!attribute.mandatory);
    }

    #[test]
    fn attribute_spec_with_reference_and_mandatory() {
        let attribute = parse_attribute_spec("vendor:list:EquipmentVendor:mandatory").expect("parse");
        assert_eq!(attribute.name, "vendor");
        assert_eq!(
            attribute.attr_type,
            AttributeType::ListType("EquipmentVendor".into())
        );
        assert!(attribute.mandatory);
    }

    #[test]
    fn attribute_spec_rejects_missing_type() {
        assert!(matches!(
            parse_attribute_spec("serial"),
            Err(TaxonError::InvalidArgument(_))
        ));
        assert!(matches!(
            parse_attribute_spec("serial:blob"),
            Err(TaxonError::InvalidArgument(_))
        ));
    }

    #[test]
    fn assignments_keep_empty_values() {
        let values = parse_assignments(&["name=R1".into(), "serial=".into(), "note=a=b".into()])
            .expect("parse");
        assert_eq!(values.get("name").map(String::as_str), Some("R1"));
        assert_eq!(values.get("serial").map(String::as_str), Some(""));
        assert_eq!(values.get("note").map(String::as_str), Some("a=b"));
    }

    #[test]
    fn assignment_without_equals_is_rejected() {
        assert!(matches!(
            parse_assignments(&["name".into()]),
            Err(TaxonError::InvalidArgument(_))
        ));
    }

    #[test]
    fn missing_config_path_means_defaults() {
        let config = load_config(None).expect("defaults");
        assert_eq!(config, EngineConfig::default());
    }
}
