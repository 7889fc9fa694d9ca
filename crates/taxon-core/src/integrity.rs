//! # Integrity Service
//!
//! Bootstraps the core metamodel and audits the graph for structural damage.
//!
//! Bootstrap runs in one write transaction that first looks for the
//! `DUMMY_ROOT` link. Two racing bootstraps serialize on the Graph Store's
//! writer, so the second one sees the committed root and returns it
//! unchanged instead of creating another.

use crate::cache::Clock;
use crate::graph::{GraphRead, GraphStore, GraphWrite};
use crate::hierarchy;
use crate::primitives::{
    ATTR_CREATION_DATE, ATTR_NAME, CLASS_DUMMY_ROOT, CLASS_GENERIC_OBJECT_LIST,
    CLASS_INVENTORY_OBJECT, CLASS_ROOT_OBJECT, REL_CHILD_OF_SPECIAL, REL_DUMMY_ROOT,
};
use crate::storage::StorageBackend;
use crate::types::{
    AttributeDef, AttributeType, ClassId, ClassNode, ClassRole, InstanceId, InstanceNode,
    NodeLabel, PrimitiveType, TaxonError,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// What `bootstrap_root` found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// This call created the core classes and the dummy root.
    Created(InstanceId),
    /// A previous bootstrap already committed this root.
    Existing(InstanceId),
}

impl BootstrapOutcome {
    #[must_use]
    pub fn root(self) -> InstanceId {
        match self {
            Self::Created(id) | Self::Existing(id) => id,
        }
    }

    #[must_use]
    pub fn was_created(self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// One structural problem found by `check_integrity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// The reference node has no `DUMMY_ROOT` link.
    MissingRoot,
    /// `DUMMY_ROOT` points at an instance that does not exist.
    DanglingRoot(InstanceId),
    /// A class whose `EXTENDS` target is missing.
    OrphanClass { class: ClassId, parent: ClassId },
    /// More than one class has no parent.
    MultipleRoots(Vec<ClassId>),
    /// Walking `EXTENDS` upward from this class never reaches a root.
    HierarchyCycle(ClassId),
    /// An attribute declared more than once on the same class.
    DuplicateAttribute { class: ClassId, attribute: String },
    /// A local attribute shadows an inherited one with another type.
    IncompatibleShadowing { class: ClassId, attribute: String },
    /// An instance whose `INSTANCE_OF` target is missing.
    OrphanInstance { instance: InstanceId, class: ClassId },
    /// An instance whose container is missing.
    DanglingContainer {
        instance: InstanceId,
        container: InstanceId,
    },
    /// An instance of an abstract class.
    AbstractInstance { instance: InstanceId, class: ClassId },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRoot => write!(f, "no DUMMY_ROOT link on the reference node"),
            Self::DanglingRoot(id) => write!(f, "DUMMY_ROOT points at missing {}", id),
            Self::OrphanClass { class, parent } => {
                write!(f, "{} extends missing {}", class, parent)
            }
            Self::MultipleRoots(ids) => write!(f, "{} classes have no parent", ids.len()),
            Self::HierarchyCycle(id) => write!(f, "EXTENDS cycle reached from {}", id),
            Self::DuplicateAttribute { class, attribute } => {
                write!(f, "{} declares '{}' more than once", class, attribute)
            }
            Self::IncompatibleShadowing { class, attribute } => {
                write!(f, "{} shadows '{}' with a different type", class, attribute)
            }
            Self::OrphanInstance { instance, class } => {
                write!(f, "{} is an instance of missing {}", instance, class)
            }
            Self::DanglingContainer {
                instance,
                container,
            } => write!(f, "{} is contained by missing {}", instance, container),
            Self::AbstractInstance { instance, class } => {
                write!(f, "{} instantiates abstract {}", instance, class)
            }
        }
    }
}

/// Result of one integrity audit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub violations: Vec<Violation>,
    pub classes_checked: usize,
    pub instances_checked: usize,
}

impl IntegrityReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

// =============================================================================
// SERVICE
// =============================================================================

#[derive(Debug)]
pub struct IntegrityService {
    store: Arc<StorageBackend>,
    clock: Arc<dyn Clock>,
}

impl IntegrityService {
    #[must_use]
    pub fn new(store: Arc<StorageBackend>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Seed the core classes and the dummy root unless already present.
    ///
    /// Fails with `DatabaseError` if the reference node is missing or a
    /// previous bootstrap left the core classes without a root.
    pub fn bootstrap_root(&self) -> Result<BootstrapOutcome, TaxonError> {
        let now = self.clock.now_millis();
        let outcome = self.store.write(|g| {
            if !g.has_reference_node()? {
                return Err(TaxonError::database(
                    "the reference node is missing; the database is damaged",
                ));
            }
            if let Some(root) = g.reference(REL_DUMMY_ROOT)? {
                return Ok(BootstrapOutcome::Existing(root));
            }
            if g.class_id_by_name(CLASS_ROOT_OBJECT)?.is_some() {
                return Err(TaxonError::database(
                    "core classes exist without a dummy root; refusing to bootstrap over them",
                ));
            }
            seed(g, now).map(BootstrapOutcome::Created)
        })?;

        match outcome {
            BootstrapOutcome::Created(root) => info!(%root, "metamodel bootstrapped"),
            BootstrapOutcome::Existing(root) => info!(%root, "dummy root already present"),
        }
        Ok(outcome)
    }

    /// Audit the graph. Reports problems; repairs nothing.
    pub fn check_integrity(&self) -> Result<IntegrityReport, TaxonError> {
        let report = self.store.read(|g| {
            let mut report = IntegrityReport::default();
            check_root(g, &mut report)?;
            check_classes(g, &mut report)?;
            check_instances(g, &mut report)?;
            Ok(report)
        })?;

        for violation in &report.violations {
            warn!(%violation, "integrity violation");
        }
        info!(
            classes = report.classes_checked,
            instances = report.instances_checked,
            violations = report.violations.len(),
            "integrity check finished"
        );
        Ok(report)
    }
}

fn core_class(
    g: &mut dyn GraphWrite,
    name: &str,
    role: ClassRole,
    attributes: Vec<AttributeDef>,
    now: u64,
) -> Result<ClassId, TaxonError> {
    let id = ClassId(g.next_id()?);
    g.put_class(&ClassNode {
        id,
        name: name.to_string(),
        display_name: name.to_string(),
        is_abstract: role != ClassRole::Dummy,
        role,
        in_design: false,
        custom: false,
        creation_date: now,
        attributes,
    })?;
    Ok(id)
}

fn seed(g: &mut dyn GraphWrite, now: u64) -> Result<InstanceId, TaxonError> {
    let root_class = core_class(
        g,
        CLASS_ROOT_OBJECT,
        ClassRole::Inventory,
        vec![
            AttributeDef::new(ATTR_NAME, AttributeType::Primitive(PrimitiveType::String)),
            AttributeDef::new(
                ATTR_CREATION_DATE,
                AttributeType::Primitive(PrimitiveType::Timestamp),
            )
            .administrative(),
        ],
        now,
    )?;
    for (name, role) in [
        (CLASS_INVENTORY_OBJECT, ClassRole::Inventory),
        (CLASS_GENERIC_OBJECT_LIST, ClassRole::ListType),
        (CLASS_DUMMY_ROOT, ClassRole::Dummy),
    ] {
        let id = core_class(g, name, role, Vec::new(), now)?;
        g.set_superclass(id, root_class)?;
    }

    let dummy_class = g
        .class_id_by_name(CLASS_DUMMY_ROOT)?
        .ok_or_else(|| TaxonError::database("dummy root class vanished during bootstrap"))?;
    let root = InstanceId(g.next_id()?);
    g.put_instance(&InstanceNode {
        id: root,
        name: CLASS_DUMMY_ROOT.to_string(),
        class_id: dummy_class,
        label: NodeLabel::SpecialNodes,
        creation_date: now,
        attributes: BTreeMap::new(),
    })?;
    g.set_reference(REL_DUMMY_ROOT, root)?;
    Ok(root)
}

// =============================================================================
// CHECKS
// =============================================================================

fn check_root(g: &dyn GraphRead, report: &mut IntegrityReport) -> Result<(), TaxonError> {
    match g.reference(REL_DUMMY_ROOT)? {
        None => report.violations.push(Violation::MissingRoot),
        Some(root) if g.instance(root)?.is_none() => {
            report.violations.push(Violation::DanglingRoot(root));
        }
        Some(_) => {}
    }
    Ok(())
}

fn check_classes(g: &dyn GraphRead, report: &mut IntegrityReport) -> Result<(), TaxonError> {
    let ids = g.class_ids()?;
    let mut parentless = Vec::new();
    let mut broken = BTreeSet::new();

    for id in &ids {
        let Some(class) = g.class(*id)? else {
            continue;
        };
        report.classes_checked += 1;

        match g.superclass(*id)? {
            None => parentless.push(*id),
            Some(parent) if g.class(parent)?.is_none() => {
                report.violations.push(Violation::OrphanClass { class: *id, parent });
                broken.insert(*id);
            }
            Some(_) => {}
        }

        let mut declared = BTreeSet::new();
        for attribute in &class.attributes {
            if !declared.insert(attribute.name.as_str()) {
                report.violations.push(Violation::DuplicateAttribute {
                    class: *id,
                    attribute: attribute.name.clone(),
                });
            }
        }

        match hierarchy::ancestors(g, *id) {
            Ok(_) => {}
            Err(TaxonError::ConstraintViolation(_)) => {
                report.violations.push(Violation::HierarchyCycle(*id));
                broken.insert(*id);
            }
            Err(e) => return Err(e),
        }
    }

    if parentless.len() > 1 {
        report.violations.push(Violation::MultipleRoots(parentless));
    }

    // Shadowing needs a walkable chain; classes reported above are skipped.
    for id in ids.iter().filter(|id| !broken.contains(id)) {
        let Some(class) = g.class(*id)? else {
            continue;
        };
        let Some(parent) = g.superclass(*id)? else {
            continue;
        };
        let Ok(inherited) = hierarchy::resolve(g, parent) else {
            continue;
        };
        for attribute in &class.attributes {
            if let Some(shadowed) = inherited.attribute(&attribute.name) {
                if shadowed.attr_type != attribute.attr_type {
                    report.violations.push(Violation::IncompatibleShadowing {
                        class: *id,
                        attribute: attribute.name.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

fn check_instances(g: &dyn GraphRead, report: &mut IntegrityReport) -> Result<(), TaxonError> {
    for id in g.instance_ids()? {
        let Some(instance) = g.instance(id)? else {
            continue;
        };
        report.instances_checked += 1;

        match g.class(instance.class_id)? {
            None => report.violations.push(Violation::OrphanInstance {
                instance: id,
                class: instance.class_id,
            }),
            Some(class) if class.is_abstract => {
                report.violations.push(Violation::AbstractInstance {
                    instance: id,
                    class: instance.class_id,
                });
            }
            Some(_) => {}
        }

        let mut containers: Vec<InstanceId> = g.parent(id)?.into_iter().collect();
        containers.extend(
            g.relationships_from(id)?
                .into_iter()
                .filter(|r| r.kind == REL_CHILD_OF_SPECIAL)
                .map(|r| r.to),
        );
        for container in containers {
            if g.instance(container)?.is_none() {
                report.violations.push(Violation::DanglingContainer {
                    instance: id,
                    container,
                });
            }
        }
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SystemClock;
    use crate::graph::MemoryGraph;
    use std::thread;

    fn service(backend: StorageBackend) -> IntegrityService {
        IntegrityService::new(Arc::new(backend), Arc::new(SystemClock))
    }

    #[test]
    fn bootstrap_is_idempotent() {
        let integrity = service(StorageBackend::in_memory());
        let first = integrity.bootstrap_root().expect("first");
        let second = integrity.bootstrap_root().expect("second");
        assert!(first.was_created());
        assert_eq!(second, BootstrapOutcome::Existing(first.root()));

        let roots = integrity
            .store
            .read(|g| {
                let dummy = g.class_id_by_name(CLASS_DUMMY_ROOT)?;
                Ok(dummy.map(|c| g.instances_of(c)).transpose()?.unwrap_or_default())
            })
            .expect("read");
        assert_eq!(roots, vec![first.root()]);
    }

    #[test]
    fn bootstrap_seeds_core_classes() {
        let integrity = service(StorageBackend::in_memory());
        integrity.bootstrap_root().expect("bootstrap");
        integrity
            .store
            .read(|g| {
                let root = g.class_id_by_name(CLASS_ROOT_OBJECT)?.expect("root class");
                assert_eq!(g.superclass(root)?, None);
                for name in [CLASS_INVENTORY_OBJECT, CLASS_GENERIC_OBJECT_LIST, CLASS_DUMMY_ROOT] {
                    let id = g.class_id_by_name(name)?.expect("core class");
                    assert_eq!(g.superclass(id)?, Some(root));
                }
                let list = g.class_id_by_name(CLASS_GENERIC_OBJECT_LIST)?.expect("list");
                assert_eq!(g.class(list)?.map(|c| c.role), Some(ClassRole::ListType));
                Ok(())
            })
            .expect("read");
        assert!(integrity.check_integrity().expect("check").is_clean());
    }

    #[test]
    fn concurrent_bootstraps_agree_on_one_root() {
        let integrity = Arc::new(service(StorageBackend::in_memory()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let integrity = Arc::clone(&integrity);
                thread::spawn(move || integrity.bootstrap_root())
            })
            .collect();

        let outcomes: Vec<BootstrapOutcome> = handles
            .into_iter()
            .map(|h| h.join().expect("thread").expect("bootstrap"))
            .collect();
        assert_eq!(outcomes.iter().filter(|o| o.was_created()).count(), 1);
        let root = outcomes[0].root();
        assert!(outcomes.iter().all(|o| o.root() == root));
    }

    #[test]
    fn missing_reference_node_is_fatal() {
        let integrity = service(StorageBackend::InMemory(MemoryGraph::without_reference_node()));
        let result = integrity.bootstrap_root();
        assert!(matches!(result, Err(TaxonError::DatabaseError(_))));
    }

    #[test]
    fn detects_orphans_and_missing_root() {
        let integrity = service(StorageBackend::in_memory());
        let empty = integrity.check_integrity().expect("check");
        assert_eq!(empty.violations, vec![Violation::MissingRoot]);

        integrity.bootstrap_root().expect("bootstrap");
        let (ghost_parent, child, lost) = integrity
            .store
            .write(|g| {
                let inventory = g.class_id_by_name(CLASS_INVENTORY_OBJECT)?.expect("class");
                let child = ClassId(g.next_id()?);
                let ghost_parent = ClassId(g.next_id()?);
                let mut node = g.class(inventory)?.expect("node");
                node.id = child;
                node.name = "Stray".to_string();
                node.is_abstract = true;
                g.put_class(&node)?;
                g.set_superclass(child, ghost_parent)?;

                let lost = InstanceId(g.next_id()?);
                g.put_instance(&InstanceNode {
                    id: lost,
                    name: "lost".to_string(),
                    class_id: ClassId(9_999),
                    label: NodeLabel::InventoryObjects,
                    creation_date: 0,
                    attributes: BTreeMap::new(),
                })?;
                Ok((ghost_parent, child, lost))
            })
            .expect("corrupt");

        let report = integrity.check_integrity().expect("check");
        assert!(report.violations.contains(&Violation::OrphanClass {
            class: child,
            parent: ghost_parent,
        }));
        assert!(report.violations.contains(&Violation::OrphanInstance {
            instance: lost,
            class: ClassId(9_999),
        }));
    }

    #[test]
    fn detects_incompatible_shadowing_and_duplicates() {
        let integrity = service(StorageBackend::in_memory());
        integrity.bootstrap_root().expect("bootstrap");
        let rack = integrity
            .store
            .write(|g| {
                let inventory = g.class_id_by_name(CLASS_INVENTORY_OBJECT)?.expect("class");
                let id = ClassId(g.next_id()?);
                let long = AttributeDef::new(ATTR_NAME, AttributeType::Primitive(PrimitiveType::Long));
                g.put_class(&ClassNode {
                    id,
                    name: "Rack".to_string(),
                    display_name: "Rack".to_string(),
                    is_abstract: false,
                    role: ClassRole::Inventory,
                    in_design: false,
                    custom: true,
                    creation_date: 0,
                    attributes: vec![long.clone(), long],
                })?;
                g.set_superclass(id, inventory)?;
                Ok(id)
            })
            .expect("seed");

        let report = integrity.check_integrity().expect("check");
        assert!(report.violations.contains(&Violation::DuplicateAttribute {
            class: rack,
            attribute: ATTR_NAME.to_string(),
        }));
        assert!(report.violations.contains(&Violation::IncompatibleShadowing {
            class: rack,
            attribute: ATTR_NAME.to_string(),
        }));
    }
}
