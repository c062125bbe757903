//! Repository façade.
//!
//! [`Repository`] wraps a [`StorageBackend`] and routes every read through a
//! [`CachingStrategy`]. Writes go to the backend first and invalidate the
//! entity type only once the backend accepted them.

use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use repocache_core::{
    apply_query, CacheConfig, Entity, EntityTypeTag, Filter, Page, PagingOptions, Projection,
    RepoResult,
};
use tracing::{debug, warn};

use crate::cache::{
    CacheEntry, CachingStrategy, NoCachingStrategy, ReadDescriptor, StandardCachingStrategy,
};
use crate::StorageBackend;

/// Cached data access for one entity type.
///
/// `cache_used` reports whether the most recent read on this instance was
/// served from cache. Under concurrent reads it reflects whichever read
/// finished last.
pub struct Repository<T: Entity, B: StorageBackend<T>> {
    backend: B,
    strategy: Arc<dyn CachingStrategy>,
    entity_type: EntityTypeTag,
    cache_used: AtomicBool,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity, B: StorageBackend<T>> Repository<T, B> {
    /// Repository with the standard strategy over a private in-memory store.
    pub fn new(backend: B) -> Self {
        Self::with_strategy(backend, Arc::new(StandardCachingStrategy::new()))
    }

    pub fn with_strategy(backend: B, strategy: Arc<dyn CachingStrategy>) -> Self {
        Self {
            backend,
            strategy,
            entity_type: T::entity_type(),
            cache_used: AtomicBool::new(false),
            _entity: PhantomData,
        }
    }

    /// Repository that always reads from storage.
    pub fn without_cache(backend: B) -> Self {
        Self::with_strategy(backend, Arc::new(NoCachingStrategy))
    }

    /// Repository with the standard strategy configured by `config`.
    pub fn from_config(backend: B, config: &CacheConfig) -> RepoResult<Self> {
        config.validate()?;
        Ok(Self::with_strategy(
            backend,
            Arc::new(StandardCachingStrategy::from_config(config)),
        ))
    }

    pub fn entity_type(&self) -> &EntityTypeTag {
        &self.entity_type
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Whether the most recent read was served from cache.
    pub fn cache_used(&self) -> bool {
        self.cache_used.load(Ordering::SeqCst)
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Entity stored under `key`.
    ///
    /// Keys the backend considers invalid yield `None` without touching
    /// storage or cache.
    pub fn get(&self, key: &T::Key) -> RepoResult<Option<T>> {
        self.get_with(key, ReadDescriptor::get_by_key(key), |entity| entity)
    }

    pub fn get_as<P>(&self, key: &T::Key, projection: &Projection<T, P>) -> RepoResult<Option<P>>
    where
        P: Clone + Send + Sync + 'static,
    {
        let descriptor = ReadDescriptor::get_by_key(key).with_projection(projection.fingerprint());
        self.get_with(key, descriptor, |entity| projection.apply(&entity))
    }

    pub fn get_all(&self) -> RepoResult<Vec<T>> {
        self.read_many(ReadDescriptor::get_all(), None, None, |entity| entity)
            .map(|(items, _)| items)
    }

    pub fn get_all_as<P>(&self, projection: &Projection<T, P>) -> RepoResult<Vec<P>>
    where
        P: Clone + Send + Sync + 'static,
    {
        let descriptor = ReadDescriptor::get_all().with_projection(projection.fingerprint());
        self.read_many(descriptor, None, None, |entity| projection.apply(&entity))
            .map(|(items, _)| items)
    }

    pub fn get_all_paged(&self, paging: &PagingOptions) -> RepoResult<Page<T>> {
        paging.validate()?;
        let descriptor = ReadDescriptor::get_all().with_paging(paging);
        self.read_page(descriptor, None, paging, |entity| entity)
    }

    pub fn get_all_paged_as<P>(
        &self,
        projection: &Projection<T, P>,
        paging: &PagingOptions,
    ) -> RepoResult<Page<P>>
    where
        P: Clone + Send + Sync + 'static,
    {
        paging.validate()?;
        let descriptor = ReadDescriptor::get_all()
            .with_projection(projection.fingerprint())
            .with_paging(paging);
        self.read_page(descriptor, None, paging, |entity| projection.apply(&entity))
    }

    /// First entity in backend order matching `filter`.
    pub fn find(&self, filter: &Filter<T>) -> RepoResult<Option<T>> {
        self.find_with(ReadDescriptor::find_one(filter.fingerprint()), filter, |entity| entity)
    }

    pub fn find_as<P>(
        &self,
        filter: &Filter<T>,
        projection: &Projection<T, P>,
    ) -> RepoResult<Option<P>>
    where
        P: Clone + Send + Sync + 'static,
    {
        let descriptor = ReadDescriptor::find_one(filter.fingerprint())
            .with_projection(projection.fingerprint());
        self.find_with(descriptor, filter, |entity| projection.apply(&entity))
    }

    pub fn find_all(&self, filter: &Filter<T>) -> RepoResult<Vec<T>> {
        let descriptor = ReadDescriptor::find_all(filter.fingerprint());
        self.read_many(descriptor, Some(filter), None, |entity| entity)
            .map(|(items, _)| items)
    }

    pub fn find_all_as<P>(
        &self,
        filter: &Filter<T>,
        projection: &Projection<T, P>,
    ) -> RepoResult<Vec<P>>
    where
        P: Clone + Send + Sync + 'static,
    {
        let descriptor = ReadDescriptor::find_all(filter.fingerprint())
            .with_projection(projection.fingerprint());
        self.read_many(descriptor, Some(filter), None, |entity| projection.apply(&entity))
            .map(|(items, _)| items)
    }

    pub fn find_all_paged(
        &self,
        filter: &Filter<T>,
        paging: &PagingOptions,
    ) -> RepoResult<Page<T>> {
        paging.validate()?;
        let descriptor = ReadDescriptor::find_all(filter.fingerprint()).with_paging(paging);
        self.read_page(descriptor, Some(filter), paging, |entity| entity)
    }

    pub fn find_all_paged_as<P>(
        &self,
        filter: &Filter<T>,
        projection: &Projection<T, P>,
        paging: &PagingOptions,
    ) -> RepoResult<Page<P>>
    where
        P: Clone + Send + Sync + 'static,
    {
        paging.validate()?;
        let descriptor = ReadDescriptor::find_all(filter.fingerprint())
            .with_projection(projection.fingerprint())
            .with_paging(paging);
        self.read_page(descriptor, Some(filter), paging, |entity| projection.apply(&entity))
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    pub fn add(&self, entity: &T) -> RepoResult<()> {
        self.backend.insert(entity)?;
        self.after_write("add", std::slice::from_ref(entity));
        Ok(())
    }

    /// Add entities in order. Stops at the first failure; entities written
    /// before it stay written and the cache is invalidated for them.
    pub fn add_many(&self, entities: &[T]) -> RepoResult<()> {
        self.write_many("add_many", entities, |entity| self.backend.insert(entity))
    }

    pub fn update(&self, entity: &T) -> RepoResult<()> {
        self.backend.save(entity)?;
        self.after_write("update", std::slice::from_ref(entity));
        Ok(())
    }

    pub fn update_many(&self, entities: &[T]) -> RepoResult<()> {
        self.write_many("update_many", entities, |entity| self.backend.save(entity))
    }

    /// Delete an entity. Entities whose key the backend rejects are skipped.
    pub fn delete(&self, entity: &T) -> RepoResult<()> {
        if !self.backend.is_valid_key(&entity.key()) {
            debug!(entity_type = %self.entity_type, "Skipping delete of entity with invalid key");
            return Ok(());
        }
        self.backend.remove(entity)?;
        self.after_write("delete", &[]);
        Ok(())
    }

    pub fn delete_many(&self, entities: &[T]) -> RepoResult<()> {
        let valid: Vec<&T> = entities
            .iter()
            .filter(|entity| self.backend.is_valid_key(&entity.key()))
            .collect();
        let mut written = 0usize;
        for entity in valid {
            if let Err(err) = self.backend.remove(entity) {
                if written > 0 {
                    self.after_write("delete_many", &[]);
                }
                return Err(err);
            }
            written += 1;
        }
        if written > 0 {
            self.after_write("delete_many", &[]);
        }
        Ok(())
    }

    /// Delete the entity stored under `key`, if there is one.
    pub fn delete_by_key(&self, key: &T::Key) -> RepoResult<()> {
        if !self.backend.is_valid_key(key) {
            return Ok(());
        }
        match self.backend.query_by_key(key)? {
            Some(entity) => self.delete(&entity),
            None => Ok(()),
        }
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    /// Serve `descriptor` from cache or run `fetch` and cache its result.
    fn read<V, F>(&self, descriptor: ReadDescriptor, fetch: F) -> RepoResult<(V, Option<u64>)>
    where
        V: Clone + Send + Sync + 'static,
        F: FnOnce() -> RepoResult<(V, Option<u64>)>,
    {
        if let Some(cached) = self.strategy.try_get(&self.entity_type, &descriptor) {
            match cached.downcast::<V>() {
                Some(value) if !descriptor.is_paged() || cached.total_count().is_some() => {
                    self.cache_used.store(true, Ordering::SeqCst);
                    debug!(
                        entity_type = %self.entity_type,
                        operation = %descriptor.operation,
                        "Read served from cache"
                    );
                    return Ok((value, cached.total_count()));
                }
                _ => warn!(
                    entity_type = %self.entity_type,
                    operation = %descriptor.operation,
                    expected = type_name::<V>(),
                    "Cached read unusable, reading from storage"
                ),
            }
        }

        self.cache_used.store(false, Ordering::SeqCst);
        let generation = self.strategy.generation(&self.entity_type);
        let (value, total) = fetch()?;
        let entry = CacheEntry::new(value.clone(), total).with_generation(generation);
        self.strategy.store(&self.entity_type, &descriptor, entry);
        debug!(
            entity_type = %self.entity_type,
            operation = %descriptor.operation,
            strategy = self.strategy.name(),
            "Read served from storage"
        );
        Ok((value, total))
    }

    fn get_with<P, F>(
        &self,
        key: &T::Key,
        descriptor: ReadDescriptor,
        map: F,
    ) -> RepoResult<Option<P>>
    where
        P: Clone + Send + Sync + 'static,
        F: Fn(T) -> P,
    {
        if !self.backend.is_valid_key(key) {
            self.cache_used.store(false, Ordering::SeqCst);
            return Ok(None);
        }
        self.read(descriptor, || Ok((self.backend.query_by_key(key)?.map(map), None)))
            .map(|(found, _)| found)
    }

    fn find_with<P, F>(
        &self,
        descriptor: ReadDescriptor,
        filter: &Filter<T>,
        map: F,
    ) -> RepoResult<Option<P>>
    where
        P: Clone + Send + Sync + 'static,
        F: Fn(T) -> P,
    {
        self.read(descriptor, || {
            let found = self
                .backend
                .query_all()?
                .into_iter()
                .find(|entity| filter.matches(entity))
                .map(map);
            Ok((found, None))
        })
        .map(|(found, _)| found)
    }

    fn read_many<P, F>(
        &self,
        descriptor: ReadDescriptor,
        filter: Option<&Filter<T>>,
        paging: Option<&PagingOptions>,
        map: F,
    ) -> RepoResult<(Vec<P>, Option<u64>)>
    where
        P: Clone + Send + Sync + 'static,
        F: Fn(T) -> P,
    {
        self.read(descriptor, || {
            let output = apply_query(self.backend.query_all()?, filter, paging);
            let items = output.items.into_iter().map(map).collect();
            Ok((items, paging.map(|_| output.total_items)))
        })
    }

    fn read_page<P, F>(
        &self,
        descriptor: ReadDescriptor,
        filter: Option<&Filter<T>>,
        paging: &PagingOptions,
        map: F,
    ) -> RepoResult<Page<P>>
    where
        P: Clone + Send + Sync + 'static,
        F: Fn(T) -> P,
    {
        let (items, total) = self.read_many(descriptor, filter, Some(paging), map)?;
        Ok(Page::new(items, paging, total.unwrap_or(0)))
    }

    fn write_many<F>(&self, op: &'static str, entities: &[T], write: F) -> RepoResult<()>
    where
        F: Fn(&T) -> RepoResult<()>,
    {
        for (written, entity) in entities.iter().enumerate() {
            if let Err(err) = write(entity) {
                if written > 0 {
                    self.after_write(op, &entities[..written]);
                }
                return Err(err);
            }
        }
        if !entities.is_empty() {
            self.after_write(op, entities);
        }
        Ok(())
    }

    /// Invalidate the entity type, then prime get-by-key entries for
    /// `written` when the strategy asks for write-through.
    fn after_write(&self, op: &'static str, written: &[T]) {
        self.strategy.invalidate(&self.entity_type);
        debug!(entity_type = %self.entity_type, op, "Invalidated after write");

        if !self.strategy.write_through() {
            return;
        }
        let generation = self.strategy.generation(&self.entity_type);
        for entity in written {
            let key = entity.key();
            self.strategy.store(
                &self.entity_type,
                &ReadDescriptor::get_by_key(&key),
                CacheEntry::new(Some(entity.clone()), None).with_generation(generation),
            );
        }
    }
}

impl<T: Entity, B: StorageBackend<T>> fmt::Debug for Repository<T, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("entity_type", &self.entity_type)
            .field("strategy", &self.strategy.name())
            .field("cache_used", &self.cache_used())
            .finish_non_exhaustive()
    }
}
