//! # Cache Layer
//!
//! Process-wide memoization of derived metamodel results: resolved class
//! metadata, subclass sets, ancestor chains, validator tags and container
//! chains of instances.
//!
//! Every slot carries a last-update timestamp and a life expectancy. A slot
//! is expired once `now - last_update > life_expectancy`; expired slots are
//! dropped on access and never returned. The cache holds no persistent
//! state, so a cold cache always yields the same answers as a warm one.
//!
//! Writers invalidate only after their transaction has committed.

use crate::primitives::DEFAULT_CACHE_TTL_SECS;
use crate::types::{ClassId, ClassMetadata, InstanceId};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// =============================================================================
// CLOCK
// =============================================================================

/// Source of wall-clock time, in epoch millis.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_millis(&self) -> u64;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub fn starting_at(millis: u64) -> Self {
        Self {
            now: AtomicU64::new(millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

// =============================================================================
// KEYS & VALUES
// =============================================================================

/// What a cache slot was derived from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheKey {
    /// Resolved metadata (effective attributes) of a class.
    Class(ClassId),
    /// Transitive subclasses of a class.
    Subclasses {
        class: ClassId,
        include_abstract: bool,
        include_self: bool,
    },
    /// Direct subclasses of a class.
    DirectSubclasses(ClassId),
    /// Ancestor chain of a class, nearest first, excluding itself.
    Ancestors(ClassId),
    /// Validator tag resolved for a class.
    ValidatorTag(ClassId),
    /// Container chain of an instance, nearest first.
    Parents(InstanceId),
}

impl CacheKey {
    /// The class this key is derived from, if any.
    #[must_use]
    pub fn class_id(&self) -> Option<ClassId> {
        match self {
            Self::Class(id)
            | Self::Subclasses { class: id, .. }
            | Self::DirectSubclasses(id)
            | Self::Ancestors(id)
            | Self::ValidatorTag(id) => Some(*id),
            Self::Parents(_) => None,
        }
    }

    /// The instance this key is derived from, if any.
    #[must_use]
    pub fn instance_id(&self) -> Option<InstanceId> {
        match self {
            Self::Parents(id) => Some(*id),
            _ => None,
        }
    }
}

/// A cached derived value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    Class(Arc<ClassMetadata>),
    ClassIds(Vec<ClassId>),
    Tag(Option<String>),
    InstanceIds(Vec<InstanceId>),
}

// =============================================================================
// CACHE SLOT
// =============================================================================

/// A TTL-bounded memoized value.
#[derive(Debug, Clone)]
pub struct CacheSlot {
    value: CacheValue,
    last_update: u64,
    life_expectancy: u64,
}

impl CacheSlot {
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.last_update) > self.life_expectancy
    }
}

/// Counters for diagnostics. Not part of any correctness decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
}

// =============================================================================
// CACHE MANAGER
// =============================================================================

/// Shared cache of derived metamodel results.
///
/// Lock poisoning is ignored: a panicking reader cannot leave a slot half
/// written, and the Graph Store remains the source of truth.
///
/// Every invalidation advances a generation counter. Readers capture it
/// before their graph read and store through [`CacheManager::put_if_unchanged`],
/// so a result computed before a concurrent commit is never cached after
/// that commit's invalidation.
#[derive(Debug)]
pub struct CacheManager {
    slots: RwLock<BTreeMap<CacheKey, CacheSlot>>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
}

impl CacheManager {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, default_ttl: Duration) -> Self {
        Self {
            slots: RwLock::new(BTreeMap::new()),
            clock,
            default_ttl,
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// System clock, default life expectancy.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(
            Arc::new(SystemClock),
            Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
        )
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// The live value for `key`; `None` if absent or expired.
    pub fn get(&self, key: &CacheKey) -> Option<CacheValue> {
        let now = self.clock.now_millis();
        let expired = {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            match slots.get(key) {
                Some(slot) if !slot.is_expired(now) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(?key, "cache hit");
                    return Some(slot.value.clone());
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
            // A writer may have refreshed the slot in between.
            if slots.get(key).is_some_and(|slot| slot.is_expired(now)) {
                slots.remove(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(?key, "cache slot expired");
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store `value` with the default life expectancy.
    pub fn put(&self, key: CacheKey, value: CacheValue) {
        self.put_with_ttl(key, value, self.default_ttl);
    }

    /// Store `value` with `last_update = now`.
    pub fn put_with_ttl(&self, key: CacheKey, value: CacheValue, life_expectancy: Duration) {
        let slot = CacheSlot {
            value,
            last_update: self.clock.now_millis(),
            life_expectancy: life_expectancy.as_millis() as u64,
        };
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, slot);
    }

    /// Current invalidation generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Store `value` unless an invalidation happened since `generation` was
    /// read. Returns whether the slot was written.
    pub fn put_if_unchanged(&self, key: CacheKey, value: CacheValue, generation: u64) -> bool {
        let slot = CacheSlot {
            value,
            last_update: self.clock.now_millis(),
            life_expectancy: self.default_ttl.as_millis() as u64,
        };
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if self.generation.load(Ordering::Acquire) != generation {
            tracing::debug!(?key, "stale result not cached");
            return false;
        }
        slots.insert(key, slot);
        true
    }

    /// Remove one exact slot.
    pub fn invalidate(&self, key: &CacheKey) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.remove(key);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Remove every slot derived from `class`.
    pub fn invalidate_class(&self, class: ClassId) {
        self.invalidate_where(|key| key.class_id() == Some(class));
    }

    /// Remove every slot derived from `instance`.
    pub fn invalidate_instance(&self, instance: InstanceId) {
        self.invalidate_where(|key| key.instance_id() == Some(instance));
    }

    /// Remove every slot whose key matches `predicate`. Returns how many.
    pub fn invalidate_where(&self, predicate: impl Fn(&CacheKey) -> bool) -> usize {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let before = slots.len();
        slots.retain(|key, _| !predicate(key));
        self.generation.fetch_add(1, Ordering::AcqRel);
        before - slots.len()
    }

    pub fn clear(&self) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.clear();
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Number of stored slots, expired ones included.
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn manual_cache(ttl_secs: u64) -> (Arc<ManualClock>, CacheManager) {
        let clock = Arc::new(ManualClock::starting_at(1_000));
        let cache = CacheManager::new(clock.clone(), Duration::from_secs(ttl_secs));
        (clock, cache)
    }

    #[test]
    fn put_then_get_returns_value() {
        let (_, cache) = manual_cache(60);
        let key = CacheKey::DirectSubclasses(ClassId(1));
        cache.put(key.clone(), CacheValue::ClassIds(vec![ClassId(2)]));
        assert_eq!(
            cache.get(&key),
            Some(CacheValue::ClassIds(vec![ClassId(2)]))
        );
    }

    #[test]
    fn slot_lives_exactly_its_life_expectancy() {
        let (clock, cache) = manual_cache(10);
        let key = CacheKey::Ancestors(ClassId(3));
        cache.put(key.clone(), CacheValue::ClassIds(Vec::new()));

        clock.advance(Duration::from_secs(10));
        assert!(cache.get(&key).is_some(), "now - last_update == ttl is still live");

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get(&key), None);
        assert!(!cache.contains(&key), "expired slot is dropped");
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn per_slot_life_expectancy() {
        let (clock, cache) = manual_cache(600);
        let short = CacheKey::ValidatorTag(ClassId(1));
        let long = CacheKey::ValidatorTag(ClassId(2));
        cache.put_with_ttl(short.clone(), CacheValue::Tag(None), Duration::from_secs(1));
        cache.put(long.clone(), CacheValue::Tag(Some("physicalNode".to_string())));

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.get(&short), None);
        assert!(cache.get(&long).is_some());
    }

    #[test]
    fn invalidate_class_removes_every_derived_slot() {
        let (_, cache) = manual_cache(60);
        let class = ClassId(5);
        cache.put(CacheKey::Ancestors(class), CacheValue::ClassIds(Vec::new()));
        cache.put(
            CacheKey::Subclasses {
                class,
                include_abstract: true,
                include_self: false,
            },
            CacheValue::ClassIds(Vec::new()),
        );
        cache.put(CacheKey::ValidatorTag(class), CacheValue::Tag(None));
        cache.put(CacheKey::Ancestors(ClassId(6)), CacheValue::ClassIds(Vec::new()));
        cache.put(
            CacheKey::Parents(InstanceId(5)),
            CacheValue::InstanceIds(Vec::new()),
        );

        cache.invalidate_class(class);
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&CacheKey::Ancestors(ClassId(6))));
        assert!(cache.contains(&CacheKey::Parents(InstanceId(5))));

        cache.invalidate_instance(InstanceId(5));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn exact_invalidation_and_clear() {
        let (_, cache) = manual_cache(60);
        cache.put(CacheKey::Ancestors(ClassId(1)), CacheValue::ClassIds(Vec::new()));
        cache.put(CacheKey::Ancestors(ClassId(2)), CacheValue::ClassIds(Vec::new()));

        cache.invalidate(&CacheKey::Ancestors(ClassId(1)));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn result_read_before_an_invalidation_is_not_stored() {
        let (_, cache) = manual_cache(60);
        let key = CacheKey::Ancestors(ClassId(3));

        let seen = cache.generation();
        cache.invalidate_class(ClassId(3));
        assert!(!cache.put_if_unchanged(key.clone(), CacheValue::ClassIds(Vec::new()), seen));
        assert!(!cache.contains(&key));

        let seen = cache.generation();
        assert!(cache.put_if_unchanged(key.clone(), CacheValue::ClassIds(Vec::new()), seen));
        assert!(cache.contains(&key));

        let seen = cache.generation();
        cache.clear();
        assert!(!cache.put_if_unchanged(key, CacheValue::ClassIds(Vec::new()), seen));
    }

    #[test]
    fn stats_count_hits_and_misses() {
        let (_, cache) = manual_cache(60);
        let key = CacheKey::Ancestors(ClassId(1));
        assert_eq!(cache.get(&key), None);
        cache.put(key.clone(), CacheValue::ClassIds(Vec::new()));
        let _ = cache.get(&key);
        let _ = cache.get(&key);

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }
}
