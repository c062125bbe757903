//! Identity types for repository entities

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;

/// Key type of an entity.
///
/// The `Display` form doubles as the key fingerprint, so two keys that
/// compare equal must render identically.
pub trait RecordKey:
    Clone
    + Eq
    + Ord
    + Hash
    + fmt::Debug
    + fmt::Display
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> RecordKey for K where
    K: Clone
        + Eq
        + Ord
        + Hash
        + fmt::Debug
        + fmt::Display
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Opaque identifier scoping cache keys and invalidation to one entity kind.
///
/// Assigned once per repository and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityTypeTag(String);

impl EntityTypeTag {
    /// Create a tag from an explicit name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Tag derived from the fully qualified Rust type name.
    pub fn of<T: ?Sized>() -> Self {
        Self(std::any::type_name::<T>().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityTypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityTypeTag {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// An entity that can be stored behind a repository.
///
/// Implementations must be `Serialize` so filter expressions, projections
/// and sorting can inspect field values without reflection.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Primary key type.
    type Key: RecordKey;

    /// Primary key of this instance.
    fn key(&self) -> Self::Key;

    /// Tag used to scope cached reads of this entity kind.
    fn entity_type() -> EntityTypeTag {
        EntityTypeTag::of::<Self>()
    }
}
