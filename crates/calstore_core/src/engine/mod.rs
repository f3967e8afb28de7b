//! Key-value engine contract and its implementations.
//!
//! # Responsibility
//! - Define the minimal byte-level contract the collection store needs.
//! - Isolate SQL and locking details from store orchestration.
//!
//! # Invariants
//! - Every successful write stamps the written keys with a version taken from
//!   one engine-wide monotonic clock; stamps are never reused.
//! - `apply_batch` and `compare_and_swap` are atomic: either every effect is
//!   visible to other callers or none is.
//! - `get_many` reads every key from one consistent snapshot.
//! - `scan_prefix` returns keys in byte order.

use crate::db::DbError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryKvEngine;
pub use sqlite::SqliteKvEngine;

/// Version stamp attached to each stored value.
pub type Version = i64;

pub type EngineResult<T> = Result<T, EngineError>;

/// Failure to reach or use the backing key-value engine.
#[derive(Debug)]
pub enum EngineError {
    /// SQLite bootstrap, query or pool failure.
    Db(DbError),
    /// Backend refused the call for a reason outside SQLite.
    Unavailable(String),
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Unavailable(message) => write!(f, "key-value engine unavailable: {message}"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Unavailable(_) => None,
        }
    }
}

impl From<DbError> for EngineError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// One mutation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl WriteOp {
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// Byte-level key-value storage used by `CollectionStore`.
///
/// Implementations must be shareable across threads; each call is one
/// self-contained round trip with no state kept between calls.
pub trait KvEngine: Send + Sync {
    /// Loads the value stored under `key`.
    fn get(&self, key: &str) -> EngineResult<Option<Vec<u8>>>;
    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &[u8]) -> EngineResult<()>;
    /// Removes `key`. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> EngineResult<()>;
    /// Returns whether `key` currently holds a value.
    fn exists(&self, key: &str) -> EngineResult<bool>;
    /// Loads several values at once, in `keys` order.
    ///
    /// No write may land between the individual lookups.
    fn get_many(&self, keys: &[&str]) -> EngineResult<Vec<Option<Vec<u8>>>>;
    /// Loads the value and its version stamp.
    fn get_versioned(&self, key: &str) -> EngineResult<Option<(Vec<u8>, Version)>>;
    /// Writes `value` only if the current stamp equals `expected`.
    ///
    /// `expected = None` means "only if the key is absent". Returns `false`
    /// without writing when the precondition does not hold.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Version>,
        value: &[u8],
    ) -> EngineResult<bool>;
    /// Applies every operation atomically, in order.
    fn apply_batch(&self, ops: &[WriteOp]) -> EngineResult<()>;
    /// Lists keys starting with `prefix`, sorted.
    fn scan_prefix(&self, prefix: &str) -> EngineResult<Vec<String>>;
}
