//! In-memory storage backend.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use repocache_core::{Entity, RepoResult, StorageError};

use crate::StorageBackend;

/// Backend holding entities in a key-ordered map.
///
/// Counts the queries it serves, which makes it useful for checking
/// whether a read was answered by the cache.
pub struct InMemoryBackend<T: Entity> {
    entities: RwLock<BTreeMap<T::Key, T>>,
    queries: AtomicU64,
}

impl<T: Entity> InMemoryBackend<T> {
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(BTreeMap::new()),
            queries: AtomicU64::new(0),
        }
    }

    /// Backend pre-populated with `entities`. Later duplicates win.
    pub fn with_entities(entities: impl IntoIterator<Item = T>) -> Self {
        let map = entities.into_iter().map(|e| (e.key(), e)).collect();
        Self {
            entities: RwLock::new(map),
            queries: AtomicU64::new(0),
        }
    }

    /// Number of `query_all`/`query_by_key` calls served so far.
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn reset_query_count(&self) {
        self.queries.store(0, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all stored data.
    pub fn clear(&self) -> RepoResult<()> {
        self.write()?.clear();
        Ok(())
    }

    fn read(&self) -> RepoResult<RwLockReadGuard<'_, BTreeMap<T::Key, T>>> {
        Ok(self.entities.read().map_err(|_| StorageError::LockPoisoned)?)
    }

    fn write(&self) -> RepoResult<RwLockWriteGuard<'_, BTreeMap<T::Key, T>>> {
        Ok(self.entities.write().map_err(|_| StorageError::LockPoisoned)?)
    }
}

impl<T: Entity> Default for InMemoryBackend<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> fmt::Debug for InMemoryBackend<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("entity_type", &T::entity_type())
            .field("len", &self.len())
            .field("queries", &self.query_count())
            .finish()
    }
}

impl<T: Entity> StorageBackend<T> for InMemoryBackend<T> {
    fn query_all(&self) -> RepoResult<Vec<T>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.read()?.values().cloned().collect())
    }

    fn query_by_key(&self, key: &T::Key) -> RepoResult<Option<T>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.read()?.get(key).cloned())
    }

    fn insert(&self, entity: &T) -> RepoResult<()> {
        let mut entities = self.write()?;
        let key = entity.key();
        if entities.contains_key(&key) {
            return Err(StorageError::InsertFailed {
                entity_type: T::entity_type(),
                reason: format!("key {} already exists", key),
            }
            .into());
        }
        entities.insert(key, entity.clone());
        Ok(())
    }

    fn remove(&self, entity: &T) -> RepoResult<()> {
        self.write()?.remove(&entity.key());
        Ok(())
    }

    fn save(&self, entity: &T) -> RepoResult<()> {
        self.write()?.insert(entity.key(), entity.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repocache_core::RepoError;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: u32,
        label: String,
    }

    impl Entity for Item {
        type Key = u32;

        fn key(&self) -> u32 {
            self.id
        }
    }

    fn item(id: u32, label: &str) -> Item {
        Item {
            id,
            label: label.to_string(),
        }
    }

    #[test]
    fn test_insert_and_query() {
        let backend = InMemoryBackend::new();
        backend.insert(&item(2, "b")).unwrap();
        backend.insert(&item(1, "a")).unwrap();

        let all = backend.query_all().unwrap();
        assert_eq!(all, vec![item(1, "a"), item(2, "b")]);
        assert_eq!(backend.query_by_key(&2).unwrap(), Some(item(2, "b")));
        assert_eq!(backend.query_by_key(&9).unwrap(), None);
        assert_eq!(backend.query_count(), 3);
    }

    #[test]
    fn test_duplicate_insert_fails() {
        let backend = InMemoryBackend::with_entities([item(1, "a")]);
        let err = backend.insert(&item(1, "again")).unwrap_err();
        assert!(matches!(
            err,
            RepoError::Storage(StorageError::InsertFailed { .. })
        ));
        assert_eq!(backend.query_by_key(&1).unwrap(), Some(item(1, "a")));
    }

    #[test]
    fn test_save_upserts() {
        let backend = InMemoryBackend::new();
        backend.save(&item(1, "a")).unwrap();
        backend.save(&item(1, "b")).unwrap();
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.query_by_key(&1).unwrap(), Some(item(1, "b")));
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let backend = InMemoryBackend::with_entities([item(1, "a")]);
        backend.remove(&item(5, "x")).unwrap();
        backend.remove(&item(1, "a")).unwrap();
        assert!(backend.is_empty());
    }

    #[test]
    fn test_query_count_reset() {
        let backend: InMemoryBackend<Item> = InMemoryBackend::new();
        backend.query_all().unwrap();
        backend.reset_query_count();
        assert_eq!(backend.query_count(), 0);
    }

    #[test]
    fn test_default_key_validation() {
        let backend: InMemoryBackend<Item> = InMemoryBackend::new();
        assert!(backend.is_valid_key(&0));
    }

    #[test]
    fn test_clear() {
        let backend = InMemoryBackend::with_entities([item(1, "a"), item(2, "b")]);
        backend.clear().unwrap();
        assert!(backend.is_empty());
    }
}
