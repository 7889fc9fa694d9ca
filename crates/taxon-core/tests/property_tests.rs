//! # Property-Based Tests
//!
//! Hierarchy, containment and cache invariants over generated inputs.

use proptest::collection::vec;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use taxon_core::{
    AttributeDef, AttributeType, CacheKey, CacheManager, CacheValue, ClassDefinition, ClassId,
    Clock, Engine, ManualClock, PrimitiveType, RuleSet,
};

/// Build a random tree below `InventoryObject`.
///
/// `parents[i]` picks the parent of class `i` among the classes created
/// before it (index 0 meaning `InventoryObject` itself).
fn build_tree(engine: &Engine, parents: &[usize]) -> Vec<ClassId> {
    let md = engine.metadata();
    let base = md
        .class_id("InventoryObject")
        .expect("lookup")
        .expect("bootstrapped");
    let mut ids = vec![base];
    for (i, pick) in parents.iter().enumerate() {
        let parent = ids[pick % ids.len()];
        let id = md
            .create_class(ClassDefinition::new(format!("C{}", i), parent))
            .expect("create");
        ids.push(id);
    }
    ids
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every class is its own subclass.
    #[test]
    fn subclass_is_reflexive(parents in vec(0usize..64, 1..24)) {
        let engine = Engine::in_memory().expect("engine");
        let ids = build_tree(&engine, &parents);
        for id in &ids {
            prop_assert!(engine.metadata().is_subclass_of(*id, *id).expect("check"));
        }
    }

    /// Subclass-of composes along EXTENDS chains.
    #[test]
    fn subclass_is_transitive(parents in vec(0usize..64, 2..24)) {
        let engine = Engine::in_memory().expect("engine");
        let md = engine.metadata();
        let ids = build_tree(&engine, &parents);
        for a in &ids {
            for b in &ids {
                if !md.is_subclass_of(*a, *b).expect("check") {
                    continue;
                }
                for c in &ids {
                    if md.is_subclass_of(*b, *c).expect("check") {
                        prop_assert!(md.is_subclass_of(*a, *c).expect("check"));
                    }
                }
            }
        }
    }

    /// Walking EXTENDS upward ends at RootObject within the tree's depth.
    #[test]
    fn upward_walk_terminates_at_root(parents in vec(0usize..64, 1..24)) {
        let engine = Engine::in_memory().expect("engine");
        let ids = build_tree(&engine, &parents);
        for id in &ids {
            let chain = engine
                .metadata()
                .get_upstream_class_hierarchy(*id, false)
                .expect("upstream");
            prop_assert!(chain.len() <= parents.len() + 1);
            prop_assert_eq!(chain.last().map(|c| c.name.as_str()), Some("RootObject"));
        }
    }

    /// A class's own attribute replaces the inherited one in place.
    #[test]
    fn local_attribute_shadows_inherited(mandatory_flags in vec(any::<bool>(), 1..8)) {
        let engine = Engine::in_memory().expect("engine");
        let md = engine.metadata();
        let mut parent = md
            .class_id("InventoryObject")
            .expect("lookup")
            .expect("bootstrapped");
        let string = AttributeType::Primitive(PrimitiveType::String);

        for (depth, mandatory) in mandatory_flags.iter().enumerate() {
            let mut attribute = AttributeDef::new("tag", string.clone());
            if *mandatory {
                attribute = attribute.mandatory();
            }
            parent = md
                .create_class(ClassDefinition::new(format!("L{}", depth), parent).with_attribute(attribute))
                .expect("create");

            let resolved = md.get_class(parent).expect("get");
            let tags: Vec<&AttributeDef> =
                resolved.attributes.iter().filter(|a| a.name == "tag").collect();
            prop_assert_eq!(tags.len(), 1);
            prop_assert_eq!(tags[0].mandatory, *mandatory);
            prop_assert_eq!(resolved.attributes.len(), 3);
        }
    }

    /// An allowed (parent, child) pair extends to subclasses on either side.
    #[test]
    fn containment_generalizes(parent_depth in 0usize..4, child_depth in 0usize..4) {
        let mut rules = RuleSet::default();
        rules.containment.entry("P".into()).or_default().insert("Ch".into());

        let mut parent: Vec<String> = vec!["P".into(), "Root".into()];
        for d in 0..parent_depth {
            parent.insert(0, format!("P{}", d));
        }
        let mut child: Vec<String> = vec!["Ch".into(), "Root".into()];
        for d in 0..child_depth {
            child.insert(0, format!("Ch{}", d));
        }

        prop_assert!(rules.allows_child(&parent, &child));
        prop_assert!(!rules.allows_child(&child, &parent));
    }

    /// A slot is served until its life expectancy has passed, then never again.
    #[test]
    fn cache_respects_ttl(ttl_ms in 1u64..10_000, elapsed_ms in 0u64..20_000) {
        let clock = Arc::new(ManualClock::starting_at(1_000));
        let cache = CacheManager::new(Arc::clone(&clock) as Arc<dyn Clock>, Duration::from_millis(ttl_ms));
        let key = CacheKey::Ancestors(ClassId(7));
        let value = CacheValue::ClassIds(vec![ClassId(1)]);

        cache.put(key.clone(), value.clone());
        prop_assert_eq!(cache.get(&key), Some(value.clone()));

        clock.advance(Duration::from_millis(elapsed_ms));
        if elapsed_ms > ttl_ms {
            prop_assert_eq!(cache.get(&key), None);
        } else {
            prop_assert_eq!(cache.get(&key), Some(value));
        }
    }

    /// Bootstrapping any number of times yields one root.
    #[test]
    fn bootstrap_is_idempotent(repeats in 1usize..6) {
        let engine = Engine::in_memory().expect("engine");
        let root = engine.bootstrap_outcome().root();
        for _ in 0..repeats {
            let outcome = engine.integrity().bootstrap_root().expect("bootstrap");
            prop_assert!(!outcome.was_created());
            prop_assert_eq!(outcome.root(), root);
        }
    }
}
