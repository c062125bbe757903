//! Deterministic cache keys for read operations.
//!
//! A [`CacheKey`] can only be produced by [`FingerprintBuilder::build`],
//! which always scopes it to an entity type. Type-wide invalidation is then
//! a plain prefix removal over the store.
//!
//! # Key Format
//!
//! ```text
//! <ns>|<tag>|<body>
//! body = <op>|<key-or-predicate>|<projection>|<paging>     (readable)
//!      | sha256-hex(readable body)                          (hashed)
//! ```
//!
//! Every variable component is written as `<byte-len>:<text>`, or as the
//! placeholder `_` when empty. A length-prefixed component can never be
//! confused with the placeholder or run into its neighbour, so distinct
//! descriptors never share a key and no tag prefix is a prefix of another
//! tag's keys.

use std::fmt;

use repocache_core::{CacheConfig, EntityTypeTag, PagingOptions, KEY_SEPARATOR};
use sha2::{Digest, Sha256};

/// Stand-in for an empty or absent component.
const PLACEHOLDER: &str = "_";

/// Kind of read being cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadOperation {
    GetByKey,
    FindOne,
    FindAll,
    GetAll,
}

impl ReadOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetByKey => "get",
            Self::FindOne => "find",
            Self::FindAll => "find_all",
            Self::GetAll => "get_all",
        }
    }
}

impl fmt::Display for ReadOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that distinguishes one read from another.
///
/// Only used to derive a [`CacheKey`]; it is not retained by the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReadDescriptor {
    pub operation: ReadOperation,
    /// Key fingerprint for `GetByKey`, predicate fingerprint for finds.
    pub key_or_predicate: String,
    /// Empty when no projection was requested.
    pub projection: String,
    /// Empty when no paging was requested.
    pub paging: String,
}

impl ReadDescriptor {
    pub fn new(operation: ReadOperation) -> Self {
        Self {
            operation,
            key_or_predicate: String::new(),
            projection: String::new(),
            paging: String::new(),
        }
    }

    pub fn get_by_key(key: &impl fmt::Display) -> Self {
        Self {
            key_or_predicate: key.to_string(),
            ..Self::new(ReadOperation::GetByKey)
        }
    }

    pub fn get_all() -> Self {
        Self::new(ReadOperation::GetAll)
    }

    pub fn find_one(predicate: impl Into<String>) -> Self {
        Self {
            key_or_predicate: predicate.into(),
            ..Self::new(ReadOperation::FindOne)
        }
    }

    pub fn find_all(predicate: impl Into<String>) -> Self {
        Self {
            key_or_predicate: predicate.into(),
            ..Self::new(ReadOperation::FindAll)
        }
    }

    pub fn with_projection(mut self, projection: impl Into<String>) -> Self {
        self.projection = projection.into();
        self
    }

    pub fn with_paging(mut self, paging: &PagingOptions) -> Self {
        self.paging = paging.fingerprint();
        self
    }

    /// Whether the read asked for a page (and therefore a total count).
    pub fn is_paged(&self) -> bool {
        !self.paging.is_empty()
    }
}

/// Opaque cache key scoped to one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    /// Private - keys come from [`FingerprintBuilder::build`] only.
    inner: String,
}

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Whether this key belongs to the given type prefix.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.inner.starts_with(prefix)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}

/// Builds cache keys from entity-type tags and read descriptors.
///
/// Pure: the output depends only on the namespace, the hashing flag and
/// the textual content of the inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintBuilder {
    namespace: String,
    hash_keys: bool,
}

impl Default for FingerprintBuilder {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl FingerprintBuilder {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            hash_keys: true,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            namespace: config.namespace.clone(),
            hash_keys: config.hash_keys,
        }
    }

    /// Keep the descriptor readable instead of hashing it.
    pub fn with_hash_keys(mut self, enabled: bool) -> Self {
        self.hash_keys = enabled;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Build the key for one read of one entity type.
    pub fn build(&self, entity_type: &EntityTypeTag, descriptor: &ReadDescriptor) -> CacheKey {
        let body = [
            encode_component(descriptor.operation.as_str()),
            encode_component(&descriptor.key_or_predicate),
            encode_component(&descriptor.projection),
            encode_component(&descriptor.paging),
        ]
        .join(&KEY_SEPARATOR.to_string());

        let body = if self.hash_keys {
            hex::encode(Sha256::digest(body.as_bytes()))
        } else {
            body
        };

        let mut inner = self.type_prefix(entity_type);
        inner.push_str(&body);
        CacheKey { inner }
    }

    /// Prefix shared by every key of `entity_type`.
    pub fn type_prefix(&self, entity_type: &EntityTypeTag) -> String {
        format!(
            "{ns}{sep}{tag}{sep}",
            ns = encode_component(&self.namespace),
            tag = encode_component(entity_type.as_str()),
            sep = KEY_SEPARATOR,
        )
    }
}

fn encode_component(value: &str) -> String {
    if value.is_empty() {
        PLACEHOLDER.to_string()
    } else {
        format!("{}:{}", value.len(), value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repocache_core::{FilterExpr, SortExpr};

    fn tag() -> EntityTypeTag {
        EntityTypeTag::new("Contact")
    }

    fn readable() -> FingerprintBuilder {
        FingerprintBuilder::new("test").with_hash_keys(false)
    }

    #[test]
    fn test_same_descriptor_same_key() {
        let builder = FingerprintBuilder::new("test");
        let a = ReadDescriptor::find_all(FilterExpr::gte("id", 2).fingerprint())
            .with_projection("fields:[\"name\"]")
            .with_paging(&PagingOptions::sorted(1, 1, "name"));
        let b = ReadDescriptor::find_all(FilterExpr::gte("id", 2).fingerprint())
            .with_projection("fields:[\"name\"]")
            .with_paging(&PagingOptions::sorted(1, 1, "name"));
        assert_eq!(builder.build(&tag(), &a), builder.build(&tag(), &b));
    }

    #[test]
    fn test_each_field_changes_the_key() {
        let builder = FingerprintBuilder::new("test");
        let base = ReadDescriptor::find_all("p").with_projection("x");
        let variants = [
            base.clone(),
            ReadDescriptor {
                operation: ReadOperation::FindOne,
                ..base.clone()
            },
            ReadDescriptor::find_all("q").with_projection("x"),
            ReadDescriptor::find_all("p").with_projection("y"),
            base.clone().with_paging(&PagingOptions::new(1, 10)),
            base.clone().with_paging(&PagingOptions::new(2, 10)),
            base.clone()
                .with_paging(&PagingOptions::new(1, 10).with_sort(SortExpr::descending("name"))),
        ];
        let keys: Vec<CacheKey> = variants.iter().map(|d| builder.build(&tag(), d)).collect();
        for (i, a) in keys.iter().enumerate() {
            for b in keys.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_entity_type_scopes_the_key() {
        let builder = FingerprintBuilder::new("test");
        let descriptor = ReadDescriptor::get_all();
        let a = builder.build(&EntityTypeTag::new("Contact"), &descriptor);
        let b = builder.build(&EntityTypeTag::new("ContactX"), &descriptor);
        assert_ne!(a, b);
        assert!(a.has_prefix(&builder.type_prefix(&EntityTypeTag::new("Contact"))));
        assert!(!b.has_prefix(&builder.type_prefix(&EntityTypeTag::new("Contact"))));
    }

    #[test]
    fn test_empty_components_use_placeholder() {
        let key = readable().build(&EntityTypeTag::new(""), &ReadDescriptor::get_all());
        assert_eq!(key.as_str(), "4:test|_|7:get_all|_|_|_");
    }

    #[test]
    fn test_blank_tags_do_not_share_keys() {
        let builder = readable();
        let descriptor = ReadDescriptor::get_all();
        let empty = builder.build(&EntityTypeTag::new(""), &descriptor);
        let space = builder.build(&EntityTypeTag::new(" "), &descriptor);
        let spaces = builder.build(&EntityTypeTag::new("  "), &descriptor);
        assert_eq!(space.as_str(), "4:test|1: |7:get_all|_|_|_");
        assert_ne!(empty, space);
        assert_ne!(space, spaces);
        assert!(!space.has_prefix(&builder.type_prefix(&EntityTypeTag::new("  "))));
    }

    #[test]
    fn test_components_cannot_bleed_into_each_other() {
        let builder = readable();
        let a = ReadDescriptor::find_all("a|1:b").with_projection("");
        let b = ReadDescriptor::find_all("a").with_projection("b");
        assert_ne!(builder.build(&tag(), &a), builder.build(&tag(), &b));
    }

    #[test]
    fn test_placeholder_text_is_not_empty() {
        let builder = readable();
        let literal = ReadDescriptor::find_all("_");
        let empty = ReadDescriptor::find_all("");
        assert_ne!(builder.build(&tag(), &literal), builder.build(&tag(), &empty));
    }

    #[test]
    fn test_hashed_key_keeps_readable_prefix() {
        let builder = FingerprintBuilder::new("test");
        let key = builder.build(&tag(), &ReadDescriptor::get_by_key(&7));
        let prefix = builder.type_prefix(&tag());
        assert!(key.has_prefix(&prefix));
        assert_eq!(key.as_str().len(), prefix.len() + 64);
    }

    #[test]
    fn test_namespace_separates_builders() {
        let descriptor = ReadDescriptor::get_all();
        let a = FingerprintBuilder::new("a").build(&tag(), &descriptor);
        let b = FingerprintBuilder::new("b").build(&tag(), &descriptor);
        assert_ne!(a, b);
    }

    #[test]
    fn test_is_paged() {
        assert!(!ReadDescriptor::get_all().is_paged());
        assert!(ReadDescriptor::get_all()
            .with_paging(&PagingOptions::new(1, 1))
            .is_paged());
    }
}
