//! Storage backend abstraction.
//!
//! A backend is the source of truth behind a repository. It is never aware
//! of caching.

use std::sync::Arc;

use repocache_core::{Entity, RepoResult};

/// Storage operations a repository needs from its backend.
///
/// All methods are synchronous and must be safe to call from several
/// threads at once.
pub trait StorageBackend<T: Entity>: Send + Sync {
    /// Every stored entity, in backend order.
    fn query_all(&self) -> RepoResult<Vec<T>>;

    /// The entity stored under `key`, if any.
    fn query_by_key(&self, key: &T::Key) -> RepoResult<Option<T>>;

    /// Store a new entity.
    fn insert(&self, entity: &T) -> RepoResult<()>;

    /// Remove the stored entity with the same key.
    fn remove(&self, entity: &T) -> RepoResult<()>;

    /// Persist changes to an entity.
    fn save(&self, entity: &T) -> RepoResult<()>;

    /// Whether `key` can address a stored entity.
    ///
    /// The default rejects keys whose display form is blank.
    fn is_valid_key(&self, key: &T::Key) -> bool {
        !key.to_string().trim().is_empty()
    }
}

impl<T: Entity, B: StorageBackend<T> + ?Sized> StorageBackend<T> for Arc<B> {
    fn query_all(&self) -> RepoResult<Vec<T>> {
        (**self).query_all()
    }

    fn query_by_key(&self, key: &T::Key) -> RepoResult<Option<T>> {
        (**self).query_by_key(key)
    }

    fn insert(&self, entity: &T) -> RepoResult<()> {
        (**self).insert(entity)
    }

    fn remove(&self, entity: &T) -> RepoResult<()> {
        (**self).remove(entity)
    }

    fn save(&self, entity: &T) -> RepoResult<()> {
        (**self).save(entity)
    }

    fn is_valid_key(&self, key: &T::Key) -> bool {
        (**self).is_valid_key(key)
    }
}
