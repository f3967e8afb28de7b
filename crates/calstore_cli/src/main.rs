//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `calstore_core` linkage and run one store round trip.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Set `CALSTORE_LOG_DIR` to an absolute directory to capture core logs, and
//! `CALSTORE_DB` to run against a database file instead of memory.

use calstore_core::{CollectionStore, ResourcePath, StoreConfig};
use std::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("calstore_core ping={}", calstore_core::ping());
    println!("calstore_core version={}", calstore_core::core_version());

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("calstore smoke failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    if let Ok(log_dir) = std::env::var("CALSTORE_LOG_DIR") {
        calstore_core::init_logging(calstore_core::default_log_level(), &log_dir)?;
    }

    let config = match std::env::var("CALSTORE_DB") {
        Ok(path) => StoreConfig::with_db_path(path),
        Err(_) => StoreConfig::in_memory(),
    };
    let store = CollectionStore::open(&config)?;

    let collection = ResourcePath::parse("/smoke/")?;
    let item = ResourcePath::parse("/smoke/probe.ics")?;
    store.save(&collection, "")?;
    store.save(&item, "BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n")?;
    store.with_properties(&collection, |props| {
        props.insert("D:displayname".to_string(), "Smoke".to_string());
    })?;

    println!("read_bytes={}", store.read(&item).len());
    println!("last_modified={}", store.last_modified(&item)?);
    println!("children={}", store.children(&collection)?.len());

    store.delete(&item)?;
    store.delete(&collection)?;
    println!("exists_after_delete={}", store.exists(&item)?);
    Ok(())
}
