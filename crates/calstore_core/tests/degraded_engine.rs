use calstore_core::db::{ConnectionPool, DbError, DbSource};
use calstore_core::{
    CollectionStore, EngineError, EngineResult, KvEngine, ResourcePath, SqliteKvEngine,
    StoreError, Version, WriteOp,
};
use std::error::Error;
use std::time::Duration;

/// Engine whose backend is permanently unreachable.
struct Unreachable;

fn down<T>() -> EngineResult<T> {
    Err(EngineError::Unavailable("connection refused".to_string()))
}

impl KvEngine for Unreachable {
    fn get(&self, _key: &str) -> EngineResult<Option<Vec<u8>>> {
        down()
    }

    fn set(&self, _key: &str, _value: &[u8]) -> EngineResult<()> {
        down()
    }

    fn delete(&self, _key: &str) -> EngineResult<()> {
        down()
    }

    fn exists(&self, _key: &str) -> EngineResult<bool> {
        down()
    }

    fn get_many(&self, _keys: &[&str]) -> EngineResult<Vec<Option<Vec<u8>>>> {
        down()
    }

    fn get_versioned(&self, _key: &str) -> EngineResult<Option<(Vec<u8>, Version)>> {
        down()
    }

    fn compare_and_swap(
        &self,
        _key: &str,
        _expected: Option<Version>,
        _value: &[u8],
    ) -> EngineResult<bool> {
        down()
    }

    fn apply_batch(&self, _ops: &[WriteOp]) -> EngineResult<()> {
        down()
    }

    fn scan_prefix(&self, _prefix: &str) -> EngineResult<Vec<String>> {
        down()
    }
}

fn item() -> ResourcePath {
    ResourcePath::parse("/cal/1.ics").unwrap()
}

#[test]
fn read_degrades_to_empty_content() {
    let store = CollectionStore::new(Unreachable);
    assert!(store.read(&item()).is_empty());
    assert_eq!(store.text(&item()), "");
}

#[test]
fn writes_and_queries_propagate_engine_failure() {
    let store = CollectionStore::new(Unreachable);

    let unavailable = |result: Result<(), StoreError>| {
        matches!(
            result,
            Err(StoreError::EngineUnavailable(EngineError::Unavailable(_)))
        )
    };

    assert!(unavailable(store.save(&item(), "x")));
    assert!(unavailable(store.delete(&item())));
    assert!(unavailable(store.properties(&item()).map(|_| ())));
    assert!(unavailable(store.with_properties(&item(), |_| ())));
    assert!(unavailable(store.last_modified(&item()).map(|_| ())));
    assert!(unavailable(store.exists(&item()).map(|_| ())));
    assert!(unavailable(store.children(&ResourcePath::root()).map(|_| ())));
    assert!(unavailable(store.record(&item()).map(|_| ())));
}

#[test]
fn engine_error_keeps_source_chain() {
    let store = CollectionStore::new(Unreachable);
    let err = store.save(&item(), "x").unwrap_err();

    assert!(err.to_string().contains("connection refused"));
    assert!(err.source().is_some());
}

#[test]
fn pool_exhaustion_degrades_reads_and_fails_writes() {
    let pool = ConnectionPool::new(
        DbSource::Memory,
        1,
        Duration::from_millis(20),
        Duration::from_millis(20),
    )
    .unwrap();
    let store = CollectionStore::new(SqliteKvEngine::new(pool));
    store.save(&item(), "stored").unwrap();

    let held = store.engine().pool().get().unwrap();

    assert!(store.read(&item()).is_empty());
    let err = store.save(&item(), "new").unwrap_err();
    assert!(matches!(
        err,
        StoreError::EngineUnavailable(EngineError::Db(DbError::PoolTimeout { .. }))
    ));

    drop(held);
    assert_eq!(store.text(&item()), "stored");
}
