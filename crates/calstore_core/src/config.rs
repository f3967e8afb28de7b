//! Store configuration.
//!
//! # Responsibility
//! - Describe where the key-value data lives and how connections behave.
//! - Validate limits before any connection is opened.
//!
//! # Invariants
//! - Every field has a usable default; an empty JSON object is a valid config.
//! - Timeouts and retry counts are strictly positive after `validate()`.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_POOL_SIZE: u32 = 4;
const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_CAS_RETRIES: u32 = 8;

/// Errors raised while loading or validating [`StoreConfig`].
#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid store config: {err}"),
            Self::Invalid(message) => write!(f, "invalid store config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Settings for opening a `CollectionStore` over SQLite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Database file. `None` keeps everything in memory.
    pub db_path: Option<PathBuf>,
    /// Upper bound on pooled connections. Forced to 1 for in-memory stores.
    pub pool_size: u32,
    /// Longest wait for a free pooled connection.
    pub acquire_timeout_ms: u64,
    /// Longest wait on a SQLite lock held by another connection.
    pub busy_timeout_ms: u64,
    /// Extra compare-and-swap attempts after a property write conflict.
    pub max_cas_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            pool_size: DEFAULT_POOL_SIZE,
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            max_cas_retries: DEFAULT_MAX_CAS_RETRIES,
        }
    }
}

impl StoreConfig {
    /// In-memory config with default limits.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// File-backed config with default limits.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Parses and validates a JSON config document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects limits that would make the store unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("pool_size must be at least 1".into()));
        }
        if self.acquire_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "acquire_timeout_ms must be positive".into(),
            ));
        }
        if self.busy_timeout_ms == 0 {
            return Err(ConfigError::Invalid("busy_timeout_ms must be positive".into()));
        }
        if self.max_cas_retries == 0 {
            return Err(ConfigError::Invalid(
                "max_cas_retries must be at least 1".into(),
            ));
        }
        if let Some(path) = &self.db_path {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid("db_path cannot be empty".into()));
            }
        }
        Ok(())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
