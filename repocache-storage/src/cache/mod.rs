//! Read caching for repositories.
//!
//! - [`fingerprint`]: deterministic, type-scoped cache keys
//! - [`store`]: keyed storage of cached results with prefix removal
//! - [`strategy`]: when to serve from cache and when to invalidate

pub mod fingerprint;
pub mod store;
pub mod strategy;

pub use fingerprint::{CacheKey, FingerprintBuilder, ReadDescriptor, ReadOperation};
pub use store::{CacheEntry, CacheStats, CacheStore, InMemoryCacheStore};
pub use strategy::{CachedRead, CachingStrategy, NoCachingStrategy, StandardCachingStrategy};
