//! repocache Test Utilities
//!
//! Shared test infrastructure for the repocache workspace:
//! - Sample entities with numeric and UUID keys
//! - Backends that fail on demand
//! - Proptest generators for filters, paging and read descriptors
//! - Fixtures and assertions for common scenarios

pub use repocache_core::{
    CacheConfig, ConfigError, Entity, EntityTypeTag, Filter, FilterExpr, FilterOperator, Page,
    PagingOptions, Projection, RepoError, RepoResult, SortDirection, SortExpr, StorageError,
    ValidationError,
};
pub use repocache_storage::{
    CacheStore, CachingStrategy, InMemoryBackend, InMemoryCacheStore, NoCachingStrategy,
    ReadDescriptor, ReadOperation, Repository, StandardCachingStrategy, StorageBackend,
};

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use uuid::Uuid;

// ============================================================================
// SAMPLE ENTITIES
// ============================================================================

/// Address-book entry keyed by a numeric id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub contact_id: u64,
    pub name: String,
    pub email: Option<String>,
}

impl Contact {
    pub fn new(contact_id: u64, name: impl Into<String>) -> Self {
        Self {
            contact_id,
            name: name.into(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

impl Entity for Contact {
    type Key = u64;

    fn key(&self) -> u64 {
        self.contact_id
    }

    fn entity_type() -> EntityTypeTag {
        EntityTypeTag::new("Contact")
    }
}

/// Free-text note keyed by a UUID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub note_id: Uuid,
    pub title: String,
    pub body: String,
}

impl Note {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            note_id: Uuid::now_v7(),
            title: title.into(),
            body: body.into(),
        }
    }
}

impl Entity for Note {
    type Key = Uuid;

    fn key(&self) -> Uuid {
        self.note_id
    }

    fn entity_type() -> EntityTypeTag {
        EntityTypeTag::new("Note")
    }
}

// ============================================================================
// MOCK BACKENDS
// ============================================================================

/// In-memory backend that can be told to fail reads or writes.
///
/// Failures are reported as [`StorageError::Backend`] and leave the stored
/// data untouched.
#[derive(Debug)]
pub struct FailingBackend<T: Entity> {
    inner: InMemoryBackend<T>,
    fail_reads: AtomicBool,
    /// Writes allowed before every further write fails.
    writes_left: AtomicUsize,
}

impl<T: Entity> FailingBackend<T> {
    pub fn new(inner: InMemoryBackend<T>) -> Self {
        Self {
            inner,
            fail_reads: AtomicBool::new(false),
            writes_left: AtomicUsize::new(usize::MAX),
        }
    }

    pub fn with_entities(entities: impl IntoIterator<Item = T>) -> Self {
        Self::new(InMemoryBackend::with_entities(entities))
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        let left = if fail { 0 } else { usize::MAX };
        self.writes_left.store(left, Ordering::SeqCst);
    }

    /// Let `count` more writes through, then fail the rest.
    pub fn fail_writes_after(&self, count: usize) {
        self.writes_left.store(count, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &InMemoryBackend<T> {
        &self.inner
    }

    fn check_read(&self) -> RepoResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Backend {
                reason: "injected read failure".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn check_write(&self) -> RepoResult<()> {
        let allowed = self
            .writes_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok();
        if !allowed {
            return Err(StorageError::Backend {
                reason: "injected write failure".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl<T: Entity> StorageBackend<T> for FailingBackend<T> {
    fn query_all(&self) -> RepoResult<Vec<T>> {
        self.check_read()?;
        self.inner.query_all()
    }

    fn query_by_key(&self, key: &T::Key) -> RepoResult<Option<T>> {
        self.check_read()?;
        self.inner.query_by_key(key)
    }

    fn insert(&self, entity: &T) -> RepoResult<()> {
        self.check_write()?;
        self.inner.insert(entity)
    }

    fn remove(&self, entity: &T) -> RepoResult<()> {
        self.check_write()?;
        self.inner.remove(entity)
    }

    fn save(&self, entity: &T) -> RepoResult<()> {
        self.check_write()?;
        self.inner.save(entity)
    }
}

// ============================================================================
// LOGGING
// ============================================================================

/// Install a test-friendly tracing subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for query descriptors and sample entities.

    use super::*;
    use proptest::prelude::*;
    use serde_json::Value;

    pub fn arb_contact() -> impl Strategy<Value = Contact> {
        (1u64..1000, "[A-Z][a-z]{1,8}", proptest::option::of("[a-z]{1,6}@example\\.com"))
            .prop_map(|(contact_id, name, email)| Contact {
                contact_id,
                name,
                email,
            })
    }

    pub fn arb_filter_operator() -> impl Strategy<Value = FilterOperator> {
        prop_oneof![
            Just(FilterOperator::Eq),
            Just(FilterOperator::Ne),
            Just(FilterOperator::Gt),
            Just(FilterOperator::Lt),
            Just(FilterOperator::Gte),
            Just(FilterOperator::Lte),
            Just(FilterOperator::Contains),
        ]
    }

    pub fn arb_json_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            (-100i64..100).prop_map(Value::from),
            "[a-z]{0,6}".prop_map(Value::from),
        ]
    }

    /// Comparison leaf over the fields of [`Contact`].
    pub fn arb_compare_expr() -> impl Strategy<Value = FilterExpr> {
        (
            prop_oneof![Just("contact_id"), Just("name"), Just("email")],
            arb_filter_operator(),
            arb_json_scalar(),
        )
            .prop_map(|(field, operator, value)| FilterExpr::new(field, operator, value))
    }

    /// Nested filter expressions up to depth 3.
    pub fn arb_filter_expr() -> impl Strategy<Value = FilterExpr> {
        let leaf = prop_oneof![Just(FilterExpr::All), arb_compare_expr()];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 1..4)
                    .prop_map(|clauses| FilterExpr::And { clauses }),
                prop::collection::vec(inner.clone(), 1..4)
                    .prop_map(|clauses| FilterExpr::Or { clauses }),
                inner.prop_map(FilterExpr::negate),
            ]
        })
    }

    pub fn arb_sort_direction() -> impl Strategy<Value = SortDirection> {
        prop_oneof![Just(SortDirection::Ascending), Just(SortDirection::Descending)]
    }

    /// Always-valid paging requests.
    pub fn arb_paging() -> impl Strategy<Value = PagingOptions> {
        (
            1u32..6,
            1u32..6,
            proptest::option::of((
                prop_oneof![Just("contact_id"), Just("name")],
                arb_sort_direction(),
            )),
        )
            .prop_map(|(page_number, page_size, sort)| {
                let paging = PagingOptions::new(page_number, page_size);
                match sort {
                    Some((field, direction)) => paging.with_sort(SortExpr {
                        field: field.to_string(),
                        direction,
                    }),
                    None => paging,
                }
            })
    }

    pub fn arb_read_operation() -> impl Strategy<Value = ReadOperation> {
        prop_oneof![
            Just(ReadOperation::GetByKey),
            Just(ReadOperation::FindOne),
            Just(ReadOperation::FindAll),
            Just(ReadOperation::GetAll),
        ]
    }

    /// Descriptors built the way the repository builds them.
    pub fn arb_read_descriptor() -> impl Strategy<Value = ReadDescriptor> {
        (
            arb_read_operation(),
            arb_filter_expr(),
            proptest::option::of("[a-z]{1,5}"),
            proptest::option::of(arb_paging()),
        )
            .prop_map(|(operation, filter, projection, paging)| {
                let mut descriptor = match operation {
                    ReadOperation::GetByKey => {
                        ReadDescriptor::get_by_key(&filter.fingerprint().len())
                    }
                    ReadOperation::GetAll => ReadDescriptor::get_all(),
                    ReadOperation::FindOne => ReadDescriptor::find_one(filter.fingerprint()),
                    ReadOperation::FindAll => ReadDescriptor::find_all(filter.fingerprint()),
                };
                if let Some(projection) = projection {
                    descriptor = descriptor.with_projection(format!("fields:[\"{}\"]", projection));
                }
                if let Some(paging) = paging {
                    descriptor = descriptor.with_paging(&paging);
                }
                descriptor
            })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built data sets for common repository scenarios.

    use super::*;

    /// Four contacts with ids 1 to 4, names out of id order.
    pub fn four_contacts() -> Vec<Contact> {
        vec![
            Contact::new(1, "Test User 1").with_email("one@example.com"),
            Contact::new(2, "Test User 2"),
            Contact::new(3, "Test User 3").with_email("three@example.com"),
            Contact::new(4, "Test User 4"),
        ]
    }

    /// Contact repository over an in-memory backend seeded with `contacts`.
    pub fn contact_repository(
        contacts: Vec<Contact>,
    ) -> Repository<Contact, InMemoryBackend<Contact>> {
        Repository::new(InMemoryBackend::with_entities(contacts))
    }

    /// Config with readable keys, handy when inspecting the store.
    pub fn readable_config() -> CacheConfig {
        CacheConfig::default()
            .with_namespace("test")
            .with_hash_keys(false)
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for repository results.

    use super::*;

    /// Assert that a RepoResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &RepoResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a RepoResult is a storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &RepoResult<T>) {
        match result {
            Err(RepoError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert that a RepoResult is a paging validation error.
    #[track_caller]
    pub fn assert_invalid_paging<T: std::fmt::Debug>(result: &RepoResult<T>) {
        match result {
            Err(RepoError::Validation(ValidationError::InvalidPaging { .. })) => {}
            other => panic!("Expected InvalidPaging error, got: {:?}", other),
        }
    }

    /// Assert the last read on `repo` was served from cache.
    #[track_caller]
    pub fn assert_cached<T: Entity, B: StorageBackend<T>>(repo: &Repository<T, B>) {
        assert!(repo.cache_used(), "Expected the last read to be served from cache");
    }

    /// Assert the last read on `repo` went to storage.
    #[track_caller]
    pub fn assert_not_cached<T: Entity, B: StorageBackend<T>>(repo: &Repository<T, B>) {
        assert!(!repo.cache_used(), "Expected the last read to go to storage");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failing_backend_write_budget() {
        let backend = FailingBackend::with_entities(Vec::<Contact>::new());
        backend.fail_writes_after(1);
        assert!(backend.insert(&Contact::new(1, "a")).is_ok());
        assert!(backend.insert(&Contact::new(2, "b")).is_err());
        assert_eq!(backend.inner().len(), 1);

        backend.fail_writes(false);
        assert!(backend.insert(&Contact::new(2, "b")).is_ok());
    }

    #[test]
    fn test_failing_backend_reads() {
        let backend = FailingBackend::with_entities(fixtures::four_contacts());
        backend.fail_reads(true);
        assert!(backend.query_all().is_err());
        backend.fail_reads(false);
        assert_eq!(backend.query_all().unwrap().len(), 4);
    }

    #[test]
    fn test_note_keys_are_unique() {
        let a = Note::new("a", "x");
        let b = Note::new("a", "x");
        assert_ne!(a.key(), b.key());
    }
}
