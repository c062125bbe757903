//! Cache configuration.
//!
//! Loaded from a TOML document, from `REPOCACHE_*` environment
//! variables, or built in code. Every field has a default.

use crate::{ConfigError, RepoResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_NAMESPACE: &str = "repocache";

/// Separator reserved by the cache key encoding.
pub const KEY_SEPARATOR: char = '|';

/// Configuration for the standard caching strategy and its store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// When false the standard strategy never serves or stores reads.
    pub enabled: bool,
    /// Leading component of every cache key.
    pub namespace: String,
    /// LRU capacity of the in-memory store. 0 means unbounded.
    pub max_entries: usize,
    /// Optional lifetime of a cached read, in seconds.
    pub entry_ttl_secs: Option<u64>,
    /// Hash the descriptor part of each key with SHA-256.
    pub hash_keys: bool,
    /// Prime the get-by-key entry of an entity after add/update.
    pub write_through: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: DEFAULT_NAMESPACE.to_string(),
            max_entries: 0,
            entry_ttl_secs: None,
            hash_keys: true,
            write_through: false,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// A config whose strategy passes every read through to storage.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl_secs = Some(ttl.as_secs());
        self
    }

    pub fn with_hash_keys(mut self, enabled: bool) -> Self {
        self.hash_keys = enabled;
        self
    }

    pub fn with_write_through(mut self, enabled: bool) -> Self {
        self.write_through = enabled;
        self
    }

    pub fn entry_ttl(&self) -> Option<Duration> {
        self.entry_ttl_secs.map(Duration::from_secs)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> RepoResult<Self> {
        let config: CacheConfig = toml::from_str(source).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_path(path: &Path) -> RepoResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Create CacheConfig from environment variables.
    ///
    /// Environment variables:
    /// - `REPOCACHE_ENABLED`: "true" or "false" (default: true)
    /// - `REPOCACHE_NAMESPACE`: key namespace (default: "repocache")
    /// - `REPOCACHE_MAX_ENTRIES`: LRU capacity, 0 = unbounded (default: 0)
    /// - `REPOCACHE_ENTRY_TTL_SECS`: entry lifetime in seconds (default: none)
    /// - `REPOCACHE_HASH_KEYS`: "true" or "false" (default: true)
    /// - `REPOCACHE_WRITE_THROUGH`: "true" or "false" (default: false)
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let enabled = lookup("REPOCACHE_ENABLED")
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(defaults.enabled);

        let namespace = lookup("REPOCACHE_NAMESPACE")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.namespace);

        let max_entries = lookup("REPOCACHE_MAX_ENTRIES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_entries);

        let entry_ttl_secs = lookup("REPOCACHE_ENTRY_TTL_SECS")
            .and_then(|s| s.parse().ok())
            .or(defaults.entry_ttl_secs);

        let hash_keys = lookup("REPOCACHE_HASH_KEYS")
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(defaults.hash_keys);

        let write_through = lookup("REPOCACHE_WRITE_THROUGH")
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(defaults.write_through);

        Self {
            enabled,
            namespace,
            max_entries,
            entry_ttl_secs,
            hash_keys,
            write_through,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "namespace",
                reason: "must not be empty".to_string(),
            });
        }
        if self.namespace.contains(KEY_SEPARATOR) {
            return Err(ConfigError::InvalidValue {
                field: "namespace",
                reason: format!("must not contain '{}'", KEY_SEPARATOR),
            });
        }
        if self.entry_ttl_secs == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "entry_ttl_secs",
                reason: "must be > 0 when set".to_string(),
            });
        }
        Ok(())
    }
}
