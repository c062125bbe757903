//! Keyed store of cached read results.
//!
//! The store knows nothing about entities. It maps opaque [`CacheKey`]s to
//! type-erased values and supports removing every key under a prefix.

use std::any::Any;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use lru::LruCache;
use repocache_core::CacheConfig;
use tracing::trace;

use super::fingerprint::CacheKey;
use crate::lock::{rw_read, rw_write};

const TARGET: &str = "repocache_storage::cache::store";

// ============================================================================
// ENTRIES
// ============================================================================

/// One cached read result.
#[derive(Clone)]
pub struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,
    total_count: Option<u64>,
    cached_at: DateTime<Utc>,
    generation: u64,
}

impl CacheEntry {
    pub fn new<V: Any + Send + Sync>(value: V, total_count: Option<u64>) -> Self {
        Self {
            value: Arc::new(value),
            total_count,
            cached_at: Utc::now(),
            generation: 0,
        }
    }

    /// Tag the entry with the invalidation generation its read started in.
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Override the insertion timestamp.
    pub fn with_cached_at(mut self, cached_at: DateTime<Utc>) -> Self {
        self.cached_at = cached_at;
        self
    }

    /// Clone the value out if it has type `V`.
    pub fn downcast<V: Clone + 'static>(&self) -> Option<V> {
        self.value.downcast_ref::<V>().cloned()
    }

    /// Total matching items, stored with paged reads.
    pub fn total_count(&self) -> Option<u64> {
        self.total_count
    }

    pub fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }

    /// Time since the entry was cached. Zero if the clock went backwards.
    pub fn age(&self) -> std::time::Duration {
        (Utc::now() - self.cached_at).to_std().unwrap_or_default()
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("total_count", &self.total_count)
            .field("cached_at", &self.cached_at)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// STATS
// ============================================================================

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Number of evictions due to capacity.
    pub evictions: u64,
    /// Number of entries removed by prefix invalidation.
    pub invalidations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Storage for cached read results.
///
/// Implementations must be safe for concurrent use. `remove_by_prefix` must
/// be atomic with respect to concurrent `set` calls: an entry written before
/// the removal started is either removed or was never visible.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry>;

    /// Insert or replace the entry under `key`.
    fn set(&self, key: CacheKey, entry: CacheEntry);

    /// Remove a single entry. Returns whether it existed.
    fn remove(&self, key: &CacheKey) -> bool;

    /// Remove every entry whose key starts with `prefix`.
    fn remove_by_prefix(&self, prefix: &str) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self);

    fn stats(&self) -> CacheStats;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// Process-local LRU store.
///
/// A single lock guards the map, so prefix removal and inserts are
/// serialised. `get` takes the write side because it updates recency.
pub struct InMemoryCacheStore {
    entries: RwLock<LruCache<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

impl InMemoryCacheStore {
    /// Unbounded store.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Store holding at most `max_entries`; 0 means unbounded.
    pub fn with_capacity(max_entries: usize) -> Self {
        let cache = match NonZeroUsize::new(max_entries) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self {
            entries: RwLock::new(cache),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::with_capacity(config.max_entries)
    }

    /// Capacity, or `None` when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        let cap = rw_read(&self.entries, TARGET, "capacity").cap().get();
        (cap != usize::MAX).then_some(cap)
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryCacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryCacheStore")
            .field("stats", &self.stats())
            .finish()
    }
}

impl CacheStore for InMemoryCacheStore {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let found = rw_write(&self.entries, TARGET, "get")
            .get(key.as_str())
            .cloned();
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    fn set(&self, key: CacheKey, entry: CacheEntry) {
        let key = key.as_str().to_string();
        let displaced = rw_write(&self.entries, TARGET, "set").push(key.clone(), entry);
        if let Some((old_key, _)) = displaced {
            if old_key != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                trace!(evicted = %old_key, "Evicted least recently used entry");
            }
        }
    }

    fn remove(&self, key: &CacheKey) -> bool {
        rw_write(&self.entries, TARGET, "remove")
            .pop(key.as_str())
            .is_some()
    }

    fn remove_by_prefix(&self, prefix: &str) -> usize {
        let mut entries = rw_write(&self.entries, TARGET, "remove_by_prefix");
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        drop(entries);

        self.invalidations
            .fetch_add(doomed.len() as u64, Ordering::Relaxed);
        doomed.len()
    }

    fn len(&self) -> usize {
        rw_read(&self.entries, TARGET, "len").len()
    }

    fn clear(&self) {
        rw_write(&self.entries, TARGET, "clear").clear();
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.len() as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{FingerprintBuilder, ReadDescriptor};
    use repocache_core::EntityTypeTag;

    fn key(tag: &str, id: u32) -> CacheKey {
        FingerprintBuilder::new("test")
            .build(&EntityTypeTag::new(tag), &ReadDescriptor::get_by_key(&id))
    }

    fn prefix(tag: &str) -> String {
        FingerprintBuilder::new("test").type_prefix(&EntityTypeTag::new(tag))
    }

    #[test]
    fn test_set_then_get() {
        let store = InMemoryCacheStore::new();
        store.set(key("Contact", 1), CacheEntry::new(vec![1u32, 2], Some(2)));

        let entry = store.get(&key("Contact", 1)).unwrap();
        assert_eq!(entry.downcast::<Vec<u32>>(), Some(vec![1, 2]));
        assert_eq!(entry.total_count(), Some(2));
        assert!(store.get(&key("Contact", 2)).is_none());

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_downcast_wrong_type_is_none() {
        let entry = CacheEntry::new(String::from("x"), None);
        assert_eq!(entry.downcast::<u32>(), None);
        assert_eq!(entry.downcast::<String>(), Some("x".to_string()));
    }

    #[test]
    fn test_set_overwrites() {
        let store = InMemoryCacheStore::new();
        store.set(key("Contact", 1), CacheEntry::new(1u32, None));
        store.set(key("Contact", 1), CacheEntry::new(2u32, None));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&key("Contact", 1)).unwrap().downcast::<u32>(), Some(2));
        assert_eq!(store.stats().evictions, 0);
    }

    #[test]
    fn test_remove_by_prefix_only_touches_one_type() {
        let store = InMemoryCacheStore::new();
        for id in 0..3 {
            store.set(key("Contact", id), CacheEntry::new(id, None));
            store.set(key("Order", id), CacheEntry::new(id, None));
        }

        assert_eq!(store.remove_by_prefix(&prefix("Contact")), 3);
        assert_eq!(store.len(), 3);
        assert!(store.get(&key("Contact", 0)).is_none());
        assert!(store.get(&key("Order", 0)).is_some());
        assert_eq!(store.stats().invalidations, 3);

        assert_eq!(store.remove_by_prefix(&prefix("Contact")), 0);
    }

    #[test]
    fn test_remove_single_entry() {
        let store = InMemoryCacheStore::new();
        store.set(key("Contact", 1), CacheEntry::new(1u32, None));
        assert!(store.remove(&key("Contact", 1)));
        assert!(!store.remove(&key("Contact", 1)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let store = InMemoryCacheStore::with_capacity(2);
        assert_eq!(store.capacity(), Some(2));
        store.set(key("Contact", 1), CacheEntry::new(1u32, None));
        store.set(key("Contact", 2), CacheEntry::new(2u32, None));
        // Touch 1 so that 2 becomes the eviction candidate.
        assert!(store.get(&key("Contact", 1)).is_some());
        store.set(key("Contact", 3), CacheEntry::new(3u32, None));

        assert!(store.get(&key("Contact", 2)).is_none());
        assert!(store.get(&key("Contact", 1)).is_some());
        assert!(store.get(&key("Contact", 3)).is_some());
        assert_eq!(store.stats().evictions, 1);
    }

    #[test]
    fn test_unbounded_store() {
        let store = InMemoryCacheStore::from_config(&CacheConfig::default());
        assert_eq!(store.capacity(), None);
        for id in 0..100 {
            store.set(key("Contact", id), CacheEntry::new(id, None));
        }
        assert_eq!(store.len(), 100);
    }

    #[test]
    fn test_clear() {
        let store = InMemoryCacheStore::new();
        store.set(key("Contact", 1), CacheEntry::new(1u32, None));
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_entry_age() {
        let entry = CacheEntry::new(1u32, None)
            .with_cached_at(Utc::now() - chrono::Duration::seconds(10));
        assert!(entry.age() >= std::time::Duration::from_secs(10));
    }
}
