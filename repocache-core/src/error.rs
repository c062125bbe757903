//! Error types for repository operations

use crate::EntityTypeTag;
use thiserror::Error;

/// Storage backend errors.
///
/// These are produced by backends and pass through the repository
/// unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Insert failed for {entity_type}: {reason}")]
    InsertFailed {
        entity_type: EntityTypeTag,
        reason: String,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Backend error: {reason}")]
    Backend { reason: String },
}

/// Validation errors for read and write arguments.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid paging {field}: {reason}")]
    InvalidPaging { field: &'static str, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Master error type for all repository errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepoError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for repository operations.
pub type RepoResult<T> = Result<T, RepoError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_insert_failed() {
        let err = StorageError::InsertFailed {
            entity_type: EntityTypeTag::new("Contact"),
            reason: "already exists".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Insert failed"));
        assert!(msg.contains("already exists"));
    }

    #[test]
    fn test_validation_error_display_invalid_paging() {
        let err = ValidationError::InvalidPaging {
            field: "page_size",
            reason: "must be >= 1".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("page_size"));
        assert!(msg.contains("must be >= 1"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "namespace",
            reason: "must not be empty".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("namespace"));
        assert!(msg.contains("must not be empty"));
    }

    #[test]
    fn test_repo_error_from_variants() {
        let storage = RepoError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, RepoError::Storage(_)));

        let validation = RepoError::from(ValidationError::InvalidPaging {
            field: "page_number",
            reason: "must be >= 1".to_string(),
        });
        assert!(matches!(validation, RepoError::Validation(_)));

        let config = RepoError::from(ConfigError::Parse {
            reason: "eof".to_string(),
        });
        assert!(matches!(config, RepoError::Config(_)));
    }

    #[test]
    fn test_storage_error_display_lock_poisoned() {
        let err = StorageError::LockPoisoned;
        let msg = format!("{}", err);
        assert!(msg.contains("lock poisoned"));
    }
}
