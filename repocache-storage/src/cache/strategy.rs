//! Caching strategies.
//!
//! A strategy decides whether a read can be served from cache, records read
//! results, and drops every cached read of an entity type after a write.
//! The repository only talks to [`CachingStrategy`], so swapping
//! [`StandardCachingStrategy`] for [`NoCachingStrategy`] changes nothing but
//! cache behavior.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use repocache_core::{CacheConfig, EntityTypeTag};
use tracing::{debug, trace};

use super::fingerprint::{FingerprintBuilder, ReadDescriptor};
use super::store::{CacheEntry, CacheStats, CacheStore, InMemoryCacheStore};
use crate::lock::{rw_read, rw_write};

const TARGET: &str = "repocache_storage::cache::strategy";

/// A read served from cache.
#[derive(Debug, Clone)]
pub struct CachedRead {
    entry: CacheEntry,
    paged: bool,
}

impl CachedRead {
    /// Clone the cached value out if it has type `V`.
    pub fn downcast<V: Clone + 'static>(&self) -> Option<V> {
        self.entry.downcast()
    }

    /// Stored total for paged reads; `None` for unpaged reads.
    pub fn total_count(&self) -> Option<u64> {
        if self.paged {
            self.entry.total_count()
        } else {
            None
        }
    }
}

/// Cache policy consulted by the repository around every read and write.
pub trait CachingStrategy: Send + Sync {
    /// Look up a previously stored read.
    fn try_get(
        &self,
        entity_type: &EntityTypeTag,
        descriptor: &ReadDescriptor,
    ) -> Option<CachedRead>;

    /// Record the result of a read that went to storage.
    fn store(&self, entity_type: &EntityTypeTag, descriptor: &ReadDescriptor, entry: CacheEntry);

    /// Forget every cached read of `entity_type`.
    fn invalidate(&self, entity_type: &EntityTypeTag);

    /// Invalidation generation of `entity_type`.
    ///
    /// Read before going to storage and attached to the resulting entry, so
    /// that a result computed before an invalidation is not stored after it.
    fn generation(&self, _entity_type: &EntityTypeTag) -> u64 {
        0
    }

    /// Whether writes should prime the get-by-key entry of the written entity.
    fn write_through(&self) -> bool {
        false
    }

    /// Name for logs and diagnostics.
    fn name(&self) -> &str;
}

// ============================================================================
// STANDARD STRATEGY
// ============================================================================

/// Read-through caching with type-wide invalidation on writes.
///
/// Each invalidation bumps the entity type's generation. Entries tagged with
/// an older generation are dropped by `store` instead of being written, which
/// keeps a slow read from re-caching data a concurrent write just replaced.
/// Generations are tracked per strategy, so repositories that must see each
/// other's writes should share the strategy, not just the store.
pub struct StandardCachingStrategy {
    store: Arc<dyn CacheStore>,
    keys: FingerprintBuilder,
    generations: RwLock<HashMap<EntityTypeTag, u64>>,
    enabled: bool,
    ttl: Option<Duration>,
    write_through: bool,
}

impl StandardCachingStrategy {
    /// Strategy with default configuration over a fresh in-memory store.
    pub fn new() -> Self {
        Self::from_config(&CacheConfig::default())
    }

    /// Strategy over a fresh in-memory store sized by `config`.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::with_store(config, Arc::new(InMemoryCacheStore::from_config(config)))
    }

    /// Strategy over an existing store, for sharing one store between
    /// several repositories.
    pub fn with_store(config: &CacheConfig, store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            keys: FingerprintBuilder::from_config(config),
            generations: RwLock::new(HashMap::new()),
            enabled: config.enabled,
            ttl: config.entry_ttl(),
            write_through: config.write_through,
        }
    }

    pub fn cache_store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn fingerprints(&self) -> &FingerprintBuilder {
        &self.keys
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for StandardCachingStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl CachingStrategy for StandardCachingStrategy {
    fn try_get(
        &self,
        entity_type: &EntityTypeTag,
        descriptor: &ReadDescriptor,
    ) -> Option<CachedRead> {
        if !self.enabled {
            return None;
        }
        let key = self.keys.build(entity_type, descriptor);
        let entry = self.store.get(&key)?;

        if let Some(ttl) = self.ttl {
            if entry.age() >= ttl {
                self.store.remove(&key);
                trace!(
                    entity_type = %entity_type,
                    operation = %descriptor.operation,
                    "Cached read expired"
                );
                return None;
            }
        }

        Some(CachedRead {
            entry,
            paged: descriptor.is_paged(),
        })
    }

    fn store(&self, entity_type: &EntityTypeTag, descriptor: &ReadDescriptor, entry: CacheEntry) {
        if !self.enabled {
            return;
        }
        // Held across the set so an invalidation cannot slip in between.
        let generations = rw_read(&self.generations, TARGET, "store");
        let current = generations.get(entity_type).copied().unwrap_or(0);
        if entry.generation() != current {
            trace!(
                entity_type = %entity_type,
                operation = %descriptor.operation,
                "Dropped result read before an invalidation"
            );
            return;
        }
        let key = self.keys.build(entity_type, descriptor);
        self.store.set(key, entry);
    }

    fn invalidate(&self, entity_type: &EntityTypeTag) {
        if !self.enabled {
            return;
        }
        let mut generations = rw_write(&self.generations, TARGET, "invalidate");
        *generations.entry(entity_type.clone()).or_insert(0) += 1;
        let prefix = self.keys.type_prefix(entity_type);
        let removed = self.store.remove_by_prefix(&prefix);
        drop(generations);
        debug!(entity_type = %entity_type, removed, "Invalidated cached reads");
    }

    fn generation(&self, entity_type: &EntityTypeTag) -> u64 {
        rw_read(&self.generations, TARGET, "generation")
            .get(entity_type)
            .copied()
            .unwrap_or(0)
    }

    fn write_through(&self) -> bool {
        self.enabled && self.write_through
    }

    fn name(&self) -> &str {
        "standard"
    }
}

// ============================================================================
// NO-OP STRATEGY
// ============================================================================

/// Strategy that never caches. Every read goes to storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCachingStrategy;

impl CachingStrategy for NoCachingStrategy {
    fn try_get(
        &self,
        _entity_type: &EntityTypeTag,
        _descriptor: &ReadDescriptor,
    ) -> Option<CachedRead> {
        None
    }

    fn store(
        &self,
        _entity_type: &EntityTypeTag,
        _descriptor: &ReadDescriptor,
        _entry: CacheEntry,
    ) {
    }

    fn invalidate(&self, _entity_type: &EntityTypeTag) {}

    fn name(&self) -> &str {
        "none"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repocache_core::PagingOptions;

    fn tag() -> EntityTypeTag {
        EntityTypeTag::new("Contact")
    }

    #[test]
    fn test_store_then_hit() {
        let strategy = StandardCachingStrategy::new();
        let descriptor = ReadDescriptor::get_all();
        assert!(strategy.try_get(&tag(), &descriptor).is_none());

        strategy.store(&tag(), &descriptor, CacheEntry::new(vec![1u32], None));
        let hit = strategy.try_get(&tag(), &descriptor).unwrap();
        assert_eq!(hit.downcast::<Vec<u32>>(), Some(vec![1]));
        assert_eq!(hit.total_count(), None);
    }

    #[test]
    fn test_paged_hit_carries_total() {
        let strategy = StandardCachingStrategy::new();
        let descriptor = ReadDescriptor::get_all().with_paging(&PagingOptions::new(1, 1));
        strategy.store(&tag(), &descriptor, CacheEntry::new(vec![1u32], Some(4)));
        assert_eq!(strategy.try_get(&tag(), &descriptor).unwrap().total_count(), Some(4));
    }

    #[test]
    fn test_invalidate_drops_only_that_type() {
        let strategy = StandardCachingStrategy::new();
        let other = EntityTypeTag::new("Order");
        let descriptor = ReadDescriptor::get_all();
        strategy.store(&tag(), &descriptor, CacheEntry::new(1u32, None));
        strategy.store(&other, &descriptor, CacheEntry::new(2u32, None));

        strategy.invalidate(&tag());
        assert!(strategy.try_get(&tag(), &descriptor).is_none());
        assert!(strategy.try_get(&other, &descriptor).is_some());
    }

    #[test]
    fn test_invalidate_leaves_other_blank_tag_cached() {
        let strategy = StandardCachingStrategy::new();
        let one = EntityTypeTag::new(" ");
        let two = EntityTypeTag::new("  ");
        let descriptor = ReadDescriptor::get_all();
        strategy.store(&one, &descriptor, CacheEntry::new(1u32, None));

        strategy.invalidate(&two);
        assert!(strategy.try_get(&one, &descriptor).is_some());
    }

    #[test]
    fn test_disabled_config_passes_through() {
        let config = CacheConfig::disabled().with_write_through(true);
        let strategy = StandardCachingStrategy::from_config(&config);
        let descriptor = ReadDescriptor::get_all();
        strategy.store(&tag(), &descriptor, CacheEntry::new(1u32, None));
        assert!(strategy.try_get(&tag(), &descriptor).is_none());
        assert!(strategy.cache_store().is_empty());
        assert!(!strategy.write_through());
    }

    #[test]
    fn test_expired_entry_is_a_miss_and_removed() {
        let config = CacheConfig::default().with_ttl(Duration::from_secs(60));
        let strategy = StandardCachingStrategy::from_config(&config);
        let descriptor = ReadDescriptor::get_all();
        let stale = CacheEntry::new(1u32, None)
            .with_cached_at(chrono::Utc::now() - chrono::Duration::seconds(120));
        strategy.store(&tag(), &descriptor, stale);

        assert!(strategy.try_get(&tag(), &descriptor).is_none());
        assert!(strategy.cache_store().is_empty());

        strategy.store(&tag(), &descriptor, CacheEntry::new(2u32, None));
        assert!(strategy.try_get(&tag(), &descriptor).is_some());
    }

    #[test]
    fn test_shared_store_between_strategies() {
        let store: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
        let config = CacheConfig::default();
        let a = StandardCachingStrategy::with_store(&config, Arc::clone(&store));
        let b = StandardCachingStrategy::with_store(&config, Arc::clone(&store));

        a.store(&tag(), &ReadDescriptor::get_all(), CacheEntry::new(1u32, None));
        assert!(b.try_get(&tag(), &ReadDescriptor::get_all()).is_some());
        b.invalidate(&tag());
        assert!(a.try_get(&tag(), &ReadDescriptor::get_all()).is_none());
    }

    #[test]
    fn test_stale_generation_is_not_stored() {
        let strategy = StandardCachingStrategy::new();
        let descriptor = ReadDescriptor::get_all();
        let before = strategy.generation(&tag());

        strategy.invalidate(&tag());
        assert_eq!(strategy.generation(&tag()), before + 1);
        assert_eq!(strategy.generation(&EntityTypeTag::new("Order")), 0);

        strategy.store(&tag(), &descriptor, CacheEntry::new(1u32, None).with_generation(before));
        assert!(strategy.try_get(&tag(), &descriptor).is_none());

        let current = strategy.generation(&tag());
        strategy.store(&tag(), &descriptor, CacheEntry::new(2u32, None).with_generation(current));
        assert_eq!(strategy.try_get(&tag(), &descriptor).unwrap().downcast::<u32>(), Some(2));
    }

    #[test]
    fn test_no_caching_strategy_never_hits() {
        let strategy = NoCachingStrategy;
        let descriptor = ReadDescriptor::get_all();
        strategy.store(&tag(), &descriptor, CacheEntry::new(1u32, None));
        assert!(strategy.try_get(&tag(), &descriptor).is_none());
        strategy.invalidate(&tag());
        assert_eq!(strategy.name(), "none");
        assert!(!strategy.write_through());
    }

    #[test]
    fn test_write_through_flag() {
        let config = CacheConfig::default().with_write_through(true);
        let strategy = StandardCachingStrategy::from_config(&config);
        assert!(strategy.write_through());
        assert_eq!(strategy.name(), "standard");
    }
}
