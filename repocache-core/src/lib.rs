//! repocache Core - Entity and Query Types
//!
//! Pure data structures shared by every repocache crate: the entity
//! contract, filter/projection/paging descriptors with canonical
//! fingerprints, the error hierarchy and cache configuration.
//! This crate contains no caching or storage logic.

pub mod config;
pub mod error;
pub mod filter;
pub mod identity;
pub mod paging;
pub mod query;

pub use config::{CacheConfig, KEY_SEPARATOR};
pub use error::{ConfigError, RepoError, RepoResult, StorageError, ValidationError};
pub use filter::{lookup_field, Filter, FilterExpr, FilterOperator, Projection};
pub use identity::{Entity, EntityTypeTag, RecordKey};
pub use paging::{Page, PagingOptions, SortDirection, SortExpr};
pub use query::{apply_query, QueryOutput};
