//! # Class Hierarchy Traversal
//!
//! Walks over the `EXTENDS` tree against any graph view. These functions
//! never touch the cache, so they are safe to call inside a write
//! transaction where cached data could be stale.
//!
//! Upward walks are bounded by `MAX_HIERARCHY_DEPTH` and track visited
//! classes; a revisit is reported as a cycle instead of looping.

use crate::graph::GraphRead;
use crate::primitives::MAX_HIERARCHY_DEPTH;
use crate::types::{AttributeDef, ClassId, ClassMetadata, ClassNode, TaxonError};
use std::collections::{BTreeSet, VecDeque};

/// Load a class node or fail with `NotFound`.
pub fn require_class<G: GraphRead + ?Sized>(g: &G, id: ClassId) -> Result<ClassNode, TaxonError> {
    g.class(id)?.ok_or_else(|| TaxonError::class_not_found(id))
}

/// Ancestor chain of `id`, nearest first, excluding `id` itself.
pub fn ancestors<G: GraphRead + ?Sized>(g: &G, id: ClassId) -> Result<Vec<ClassId>, TaxonError> {
    let mut chain = Vec::new();
    let mut seen = BTreeSet::from([id]);
    let mut current = id;
    while let Some(parent) = g.superclass(current)? {
        if !seen.insert(parent) || chain.len() >= MAX_HIERARCHY_DEPTH {
            return Err(TaxonError::constraint(format!(
                "EXTENDS cycle reached from {}",
                id
            )));
        }
        chain.push(parent);
        current = parent;
    }
    Ok(chain)
}

/// Reflexive: every class is a subclass of itself.
pub fn is_subclass_of<G: GraphRead + ?Sized>(
    g: &G,
    candidate: ClassId,
    ancestor: ClassId,
) -> Result<bool, TaxonError> {
    if candidate == ancestor {
        return Ok(true);
    }
    Ok(ancestors(g, candidate)?.contains(&ancestor))
}

/// Whether `candidate` is, or descends from, the class named `ancestor`.
pub fn is_subclass_of_name<G: GraphRead + ?Sized>(
    g: &G,
    candidate: ClassId,
    ancestor: &str,
) -> Result<bool, TaxonError> {
    match g.class_id_by_name(ancestor)? {
        Some(ancestor) => is_subclass_of(g, candidate, ancestor),
        None => Ok(false),
    }
}

/// Names of `id` and its ancestors, nearest first.
pub fn lineage_names<G: GraphRead + ?Sized>(g: &G, id: ClassId) -> Result<Vec<String>, TaxonError> {
    let mut names = vec![require_class(g, id)?.name];
    for ancestor in ancestors(g, id)? {
        let class = g.class(ancestor)?.ok_or_else(|| {
            TaxonError::database(format!("EXTENDS edge points at missing {}", ancestor))
        })?;
        names.push(class.name);
    }
    Ok(names)
}

/// All transitive subclasses of `id` in breadth-first order, excluding `id`.
pub fn descendants<G: GraphRead + ?Sized>(
    g: &G,
    id: ClassId,
) -> Result<Vec<ClassId>, TaxonError> {
    let mut found = Vec::new();
    let mut seen = BTreeSet::from([id]);
    let mut queue = VecDeque::from([id]);
    while let Some(current) = queue.pop_front() {
        for child in g.subclasses(current)? {
            if seen.insert(child) {
                found.push(child);
                queue.push_back(child);
            }
        }
    }
    Ok(found)
}

/// Merge attribute lists root-most first; a later list replaces entries of
/// the same name in place.
pub fn merge_attributes<'a>(
    layers: impl IntoIterator<Item = &'a [AttributeDef]>,
) -> Vec<AttributeDef> {
    let mut merged: Vec<AttributeDef> = Vec::new();
    for layer in layers {
        for attribute in layer {
            match merged.iter_mut().find(|a| a.name == attribute.name) {
                Some(slot) => *slot = attribute.clone(),
                None => merged.push(attribute.clone()),
            }
        }
    }
    merged
}

/// Resolve a class with its parent and effective attribute set.
pub fn resolve<G: GraphRead + ?Sized>(g: &G, id: ClassId) -> Result<ClassMetadata, TaxonError> {
    let class = require_class(g, id)?;
    let mut lineage = Vec::new();
    for ancestor in ancestors(g, id)? {
        let node = g.class(ancestor)?.ok_or_else(|| {
            TaxonError::database(format!("EXTENDS edge points at missing {}", ancestor))
        })?;
        lineage.push(node);
    }
    lineage.reverse();

    let attributes = merge_attributes(
        lineage
            .iter()
            .chain(std::iter::once(&class))
            .map(|c| c.attributes.as_slice()),
    );

    Ok(ClassMetadata {
        id: class.id,
        name: class.name,
        display_name: class.display_name,
        is_abstract: class.is_abstract,
        role: class.role,
        in_design: class.in_design,
        custom: class.custom,
        creation_date: class.creation_date,
        parent: g.superclass(id)?,
        attributes,
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphStore, GraphWrite, MemoryGraph};
    use crate::types::{AttributeType, ClassRole, PrimitiveType};

    fn node(id: u64, name: &str, attributes: Vec<AttributeDef>) -> ClassNode {
        ClassNode {
            id: ClassId(id),
            name: name.to_string(),
            display_name: name.to_string(),
            is_abstract: false,
            role: ClassRole::Inventory,
            in_design: false,
            custom: true,
            creation_date: 0,
            attributes,
        }
    }

    fn string_attr(name: &str) -> AttributeDef {
        AttributeDef::new(name, AttributeType::Primitive(PrimitiveType::String))
    }

    /// Root(1) <- Equipment(2) <- Router(3), Equipment(2) <- Switch(4)
    fn sample() -> MemoryGraph {
        let graph = MemoryGraph::new();
        graph
            .write(|g| {
                g.put_class(&node(1, "Root", vec![string_attr("name")]))?;
                g.put_class(&node(
                    2,
                    "Equipment",
                    vec![string_attr("serial"), string_attr("vendor")],
                ))?;
                g.put_class(&node(
                    3,
                    "Router",
                    vec![AttributeDef::new(
                        "serial",
                        AttributeType::Primitive(PrimitiveType::Long),
                    )],
                ))?;
                g.put_class(&node(4, "Switch", Vec::new()))?;
                g.set_superclass(ClassId(2), ClassId(1))?;
                g.set_superclass(ClassId(3), ClassId(2))?;
                g.set_superclass(ClassId(4), ClassId(2))
            })
            .expect("seed");
        graph
    }

    #[test]
    fn ancestors_nearest_first() {
        let graph = sample();
        let chain = graph.read(|g| ancestors(g, ClassId(3))).expect("read");
        assert_eq!(chain, vec![ClassId(2), ClassId(1)]);
    }

    #[test]
    fn subclass_is_reflexive_and_transitive() {
        let graph = sample();
        graph
            .read(|g| {
                assert!(is_subclass_of(g, ClassId(3), ClassId(3))?);
                assert!(is_subclass_of(g, ClassId(3), ClassId(1))?);
                assert!(!is_subclass_of(g, ClassId(1), ClassId(3))?);
                assert!(!is_subclass_of(g, ClassId(3), ClassId(4))?);
                assert!(is_subclass_of_name(g, ClassId(4), "Equipment")?);
                assert!(!is_subclass_of_name(g, ClassId(4), "Unknown")?);
                Ok(())
            })
            .expect("read");
    }

    #[test]
    fn descendants_breadth_first() {
        let graph = sample();
        let found = graph.read(|g| descendants(g, ClassId(1))).expect("read");
        assert_eq!(found, vec![ClassId(2), ClassId(3), ClassId(4)]);
    }

    #[test]
    fn local_attribute_shadows_in_place() {
        let graph = sample();
        let router = graph.read(|g| resolve(g, ClassId(3))).expect("read");
        let names: Vec<&str> = router.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["name", "serial", "vendor"]);
        assert_eq!(
            router.attribute("serial").map(|a| a.attr_type.clone()),
            Some(AttributeType::Primitive(PrimitiveType::Long))
        );
        assert_eq!(router.parent, Some(ClassId(2)));
    }

    #[test]
    fn lineage_names_include_self() {
        let graph = sample();
        let names = graph.read(|g| lineage_names(g, ClassId(4))).expect("read");
        assert_eq!(names, vec!["Switch", "Equipment", "Root"]);
    }

    #[test]
    fn cycle_is_reported_not_followed() {
        let graph = sample();
        graph
            .write(|g| g.set_superclass(ClassId(1), ClassId(3)))
            .expect("corrupt");
        let result = graph.read(|g| ancestors(g, ClassId(3)));
        assert!(matches!(result, Err(TaxonError::ConstraintViolation(_))));
    }

    #[test]
    fn missing_class_is_not_found() {
        let graph = sample();
        let result = graph.read(|g| resolve(g, ClassId(42)));
        assert!(matches!(result, Err(TaxonError::NotFound { .. })));
    }
}
