//! Collection store over a key-value engine.
//!
//! # Responsibility
//! - Map resource paths to content, modification time and property sets.
//! - Translate each operation into one engine round trip (or one atomic
//!   batch) and name the failure policy of every operation.
//!
//! # Invariants
//! - Content and timestamp are written and removed together, atomically.
//! - Plain content reads never fail: engine errors degrade to empty content.
//!   Every other operation propagates engine errors.
//! - `is_node` and `is_leaf` are mutually exclusive; the trailing `/` of the
//!   path is the only discriminator.

use super::properties_guard::PropertiesGuard;
use crate::config::{ConfigError, StoreConfig};
use crate::engine::{EngineError, KvEngine, SqliteKvEngine, Version, WriteOp};
use crate::model::path::{is_derived_key, PathError, ResourcePath, SEPARATOR};
use crate::model::properties::{decode_properties, PropertyMap};
use crate::model::record::ResourceRecord;
use crate::model::timestamp::{decode_timestamp, encode_timestamp, format_http_date, now_seconds};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by `CollectionStore` operations.
#[derive(Debug)]
pub enum StoreError {
    /// The key-value engine could not be reached or failed the call.
    EngineUnavailable(EngineError),
    /// Stored property blob is not a JSON object of strings.
    MalformedProperties { path: ResourcePath, reason: String },
    /// Property write-back kept losing compare-and-swap races.
    ConflictOnWrite { path: ResourcePath, attempts: u32 },
    InvalidPath(PathError),
    /// Stored data exists but cannot be interpreted.
    InvalidData(String),
    Config(ConfigError),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EngineUnavailable(err) => write!(f, "{err}"),
            Self::MalformedProperties { path, reason } => {
                write!(f, "malformed properties for `{path}`: {reason}")
            }
            Self::ConflictOnWrite { path, attempts } => write!(
                f,
                "properties for `{path}` changed concurrently; gave up after {attempts} attempts"
            ),
            Self::InvalidPath(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid stored data: {message}"),
            Self::Config(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::EngineUnavailable(err) => Some(err),
            Self::MalformedProperties { .. } => None,
            Self::ConflictOnWrite { .. } => None,
            Self::InvalidPath(err) => Some(err),
            Self::InvalidData(_) => None,
            Self::Config(err) => Some(err),
        }
    }
}

impl From<EngineError> for StoreError {
    fn from(value: EngineError) -> Self {
        Self::EngineUnavailable(value)
    }
}

impl From<PathError> for StoreError {
    fn from(value: PathError) -> Self {
        Self::InvalidPath(value)
    }
}

impl From<ConfigError> for StoreError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

/// Calendar/contact collection storage over any [`KvEngine`].
///
/// The store keeps no per-path state; share it across threads behind an
/// `Arc` and let the engine arbitrate concurrent callers.
pub struct CollectionStore<E: KvEngine> {
    engine: E,
    max_cas_retries: u32,
}

impl CollectionStore<SqliteKvEngine> {
    /// Opens a SQLite-backed store described by `config`.
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let engine = SqliteKvEngine::open(config)?;
        info!(
            "event=store_open module=store status=ok mode={} pool_size={} max_cas_retries={}",
            if config.db_path.is_some() { "file" } else { "memory" },
            engine.pool().max_size(),
            config.max_cas_retries
        );
        Ok(Self::with_config(engine, config))
    }
}

impl<E: KvEngine> CollectionStore<E> {
    /// Creates a store with default retry limits.
    pub fn new(engine: E) -> Self {
        Self::with_config(engine, &StoreConfig::default())
    }

    /// Creates a store taking limits from `config`.
    pub fn with_config(engine: E, config: &StoreConfig) -> Self {
        Self {
            engine,
            max_cas_retries: config.max_cas_retries,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn max_cas_retries(&self) -> u32 {
        self.max_cas_retries
    }

    /// Stores `content` under `path` and stamps it with the current time.
    ///
    /// Content and timestamp land in one atomic batch. Overwriting is the
    /// normal update path.
    pub fn save(&self, path: &ResourcePath, content: impl AsRef<[u8]>) -> StoreResult<()> {
        let started_at = Instant::now();
        let content = content.as_ref();
        let ops = [
            WriteOp::put(path.content_key(), content),
            WriteOp::put(path.modified_key(), encode_timestamp(Utc::now())),
        ];

        match self.engine.apply_batch(&ops) {
            Ok(()) => {
                debug!(
                    "event=resource_save module=store status=ok path={} bytes={} duration_ms={}",
                    path,
                    content.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=resource_save module=store status=error path={} error={}",
                    path, err
                );
                Err(err.into())
            }
        }
    }

    /// Removes content, timestamp and properties of `path` atomically.
    ///
    /// Deleting a missing path succeeds and changes nothing.
    pub fn delete(&self, path: &ResourcePath) -> StoreResult<()> {
        let ops = [
            WriteOp::delete(path.content_key()),
            WriteOp::delete(path.modified_key()),
            WriteOp::delete(path.props_key()),
        ];

        match self.engine.apply_batch(&ops) {
            Ok(()) => {
                debug!("event=resource_delete module=store status=ok path={path}");
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=resource_delete module=store status=error path={} error={}",
                    path, err
                );
                Err(err.into())
            }
        }
    }

    /// Returns stored content, or empty bytes when absent.
    ///
    /// Engine failures are logged and reported as empty content; callers that
    /// must tell "empty" from "unreachable" should use [`Self::record`].
    pub fn read(&self, path: &ResourcePath) -> Vec<u8> {
        match self.engine.get(path.content_key()) {
            Ok(content) => content.unwrap_or_default(),
            Err(err) => {
                warn!(
                    "event=resource_read module=store status=degraded path={} error={}",
                    path, err
                );
                Vec::new()
            }
        }
    }

    /// [`Self::read`] decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self, path: &ResourcePath) -> String {
        String::from_utf8_lossy(&self.read(path)).into_owned()
    }

    /// Loads content and timestamp, propagating engine errors.
    ///
    /// Both keys come from one engine read, so the pair always belongs to the
    /// same `save`.
    pub fn record(&self, path: &ResourcePath) -> StoreResult<Option<ResourceRecord>> {
        let modified_key = path.modified_key();
        let mut values = self
            .engine
            .get_many(&[path.content_key(), &modified_key])?
            .into_iter();
        let (Some(content), raw_timestamp) = (values.next().flatten(), values.next().flatten())
        else {
            return Ok(None);
        };
        let recorded = raw_timestamp
            .map(|raw| parse_timestamp(&modified_key, &raw))
            .transpose()?;
        Ok(Some(ResourceRecord {
            path: path.clone(),
            content,
            last_modified: recorded.unwrap_or_else(now_seconds),
            timestamp_recorded: recorded.is_some(),
        }))
    }

    /// Modification time of `path`, second precision.
    ///
    /// Falls back to the current time when no timestamp was ever recorded.
    pub fn last_modified_at(&self, path: &ResourcePath) -> StoreResult<DateTime<Utc>> {
        Ok(self.recorded_timestamp(path)?.unwrap_or_else(now_seconds))
    }

    /// Modification time of `path` as an HTTP-date string.
    pub fn last_modified(&self, path: &ResourcePath) -> StoreResult<String> {
        Ok(format_http_date(self.last_modified_at(path)?))
    }

    /// Whether any content is stored under `path`.
    pub fn exists(&self, path: &ResourcePath) -> StoreResult<bool> {
        Ok(self.engine.exists(path.content_key())?)
    }

    /// Whether `path` is a stored node (collection).
    pub fn is_node(&self, path: &ResourcePath) -> StoreResult<bool> {
        Ok(path.is_node() && self.exists(path)?)
    }

    /// Whether `path` is a stored leaf resource.
    pub fn is_leaf(&self, path: &ResourcePath) -> StoreResult<bool> {
        Ok(!path.is_node() && self.exists(path)?)
    }

    /// Immediate children of node `path`, sorted.
    ///
    /// Child nodes are reported even when only deeper resources exist under
    /// them. Leaves have no children.
    pub fn children(&self, path: &ResourcePath) -> StoreResult<Vec<ResourcePath>> {
        if !path.is_node() {
            return Ok(Vec::new());
        }

        let prefix = path.as_str();
        let mut children = BTreeSet::new();
        for key in self.engine.scan_prefix(prefix)? {
            if is_derived_key(&key) {
                continue;
            }
            let rest = &key[prefix.len()..];
            if rest.is_empty() {
                continue;
            }
            let child = match rest.find(SEPARATOR) {
                Some(cut) => &key[..prefix.len() + cut + 1],
                None => key.as_str(),
            };
            match ResourcePath::parse(child) {
                Ok(child) => {
                    children.insert(child);
                }
                Err(err) => {
                    debug!(
                        "event=resource_children module=store status=skip key={} reason={}",
                        key, err
                    );
                }
            }
        }

        Ok(children.into_iter().collect())
    }

    /// Acquires the property set of `path` for reading and editing.
    ///
    /// The returned guard writes the set back when released or dropped.
    /// A stored blob that is not a JSON object of strings is an error.
    pub fn properties(&self, path: &ResourcePath) -> StoreResult<PropertiesGuard<'_, E>> {
        let (properties, version) = self.load_properties(path)?;
        debug!(
            "event=properties_acquire module=store status=ok path={} entries={}",
            path,
            properties.len()
        );
        Ok(PropertiesGuard::new(self, path.clone(), properties, version))
    }

    /// Runs `edit` on the property set of `path` and writes the result back.
    pub fn with_properties<R>(
        &self,
        path: &ResourcePath,
        edit: impl FnOnce(&mut PropertyMap) -> R,
    ) -> StoreResult<R> {
        let mut guard = self.properties(path)?;
        let result = edit(&mut *guard);
        guard.release()?;
        Ok(result)
    }

    pub(crate) fn load_properties(
        &self,
        path: &ResourcePath,
    ) -> StoreResult<(PropertyMap, Option<Version>)> {
        match self.engine.get_versioned(&path.props_key())? {
            None => Ok((PropertyMap::new(), None)),
            Some((raw, version)) => match decode_properties(&raw) {
                Ok(properties) => Ok((properties, Some(version))),
                Err(reason) => {
                    error!(
                        "event=properties_load module=store status=error path={} error_code=malformed_properties",
                        path
                    );
                    Err(StoreError::MalformedProperties {
                        path: path.clone(),
                        reason,
                    })
                }
            },
        }
    }

    fn recorded_timestamp(&self, path: &ResourcePath) -> StoreResult<Option<DateTime<Utc>>> {
        let key = path.modified_key();
        self.engine
            .get(&key)?
            .map(|raw| parse_timestamp(&key, &raw))
            .transpose()
    }
}

fn parse_timestamp(key: &str, raw: &[u8]) -> StoreResult<DateTime<Utc>> {
    decode_timestamp(raw)
        .ok_or_else(|| StoreError::InvalidData(format!("unparsable timestamp under `{key}`")))
}
