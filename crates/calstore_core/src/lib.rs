//! Key-value storage for calendar and contact collections.
//! Maps resource paths to content, modification times and property sets.

pub mod config;
pub mod db;
pub mod engine;
pub mod logging;
pub mod model;
pub mod store;

pub use config::{ConfigError, StoreConfig};
pub use engine::{
    EngineError, EngineResult, KvEngine, MemoryKvEngine, SqliteKvEngine, Version, WriteOp,
};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::path::{PathError, ResourcePath};
pub use model::properties::PropertyMap;
pub use model::record::ResourceRecord;
pub use store::collection_store::{CollectionStore, StoreError, StoreResult};
pub use store::properties_guard::PropertiesGuard;

/// Minimal health-check API for smoke tests.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
