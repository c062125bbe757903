//! repocache Storage - Backends, Read Cache and Repository
//!
//! Defines the storage backend contract and a [`Repository`] façade that
//! serves reads through a pluggable caching strategy. Writes go to the
//! backend first; a successful write invalidates every cached read of the
//! written entity type.

pub mod backend;
pub mod cache;
mod lock;
pub mod memory;
pub mod repository;

pub use backend::StorageBackend;
pub use memory::InMemoryBackend;
pub use repository::Repository;

// Re-export cache types for callers wiring strategies by hand
pub use cache::{
    CacheEntry, CacheKey, CacheStats, CacheStore, CachedRead, CachingStrategy, FingerprintBuilder,
    InMemoryCacheStore, NoCachingStrategy, ReadDescriptor, ReadOperation, StandardCachingStrategy,
};
