use calstore_core::{
    CollectionStore, EngineResult, KvEngine, MemoryKvEngine, PropertyMap, ResourcePath,
    StoreConfig, StoreError, Version, WriteOp,
};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Barrier;
use std::thread;

fn path(value: &str) -> ResourcePath {
    ResourcePath::parse(value).unwrap()
}

fn map(pairs: &[(&str, &str)]) -> PropertyMap {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[test]
fn written_mapping_reads_back_equal() {
    let store = CollectionStore::open(&StoreConfig::in_memory()).unwrap();
    let node = path("/alice/cal/");
    let expected = map(&[
        ("D:displayname", "Work"),
        ("C:calendar-description", "Team meetings"),
        ("ICAL:calendar-color", "#0000ffff"),
    ]);

    let mut props = store.properties(&node).unwrap();
    assert!(props.is_empty());
    props.extend(expected.clone());
    props.release().unwrap();

    let loaded = store.properties(&node).unwrap();
    assert_eq!(*loaded, expected);
}

#[test]
fn with_properties_returns_closure_result() {
    let store = CollectionStore::new(MemoryKvEngine::new());
    let node = path("/cal/");

    let previous = store
        .with_properties(&node, |props| props.insert("tag".into(), "VCALENDAR".into()))
        .unwrap();
    assert_eq!(previous, None);

    let previous = store
        .with_properties(&node, |props| props.insert("tag".into(), "VADDRESSBOOK".into()))
        .unwrap();
    assert_eq!(previous.as_deref(), Some("VCALENDAR"));
}

#[test]
fn removing_keys_is_persisted() {
    let store = CollectionStore::new(MemoryKvEngine::new());
    let node = path("/cal/");
    store
        .with_properties(&node, |props| {
            props.insert("a".into(), "1".into());
            props.insert("b".into(), "2".into());
        })
        .unwrap();

    store
        .with_properties(&node, |props| {
            props.remove("a");
        })
        .unwrap();

    assert_eq!(*store.properties(&node).unwrap(), map(&[("b", "2")]));
}

#[test]
fn release_writes_exactly_once_even_when_unmodified() {
    let store = CollectionStore::new(MemoryKvEngine::new());
    let item = path("/cal/1.ics");
    store.save(&item, "x").unwrap();
    let (_, saved_at) = store
        .engine()
        .get_versioned(item.content_key())
        .unwrap()
        .unwrap();

    let props = store.properties(&item).unwrap();
    assert!(!props.is_modified());
    props.release().unwrap();

    let (blob, version) = store
        .engine()
        .get_versioned(&item.props_key())
        .unwrap()
        .unwrap();
    assert_eq!(blob, b"{}");
    assert_eq!(version, saved_at + 1, "one acquisition, one write");
}

#[test]
fn dropped_guard_writes_back() {
    let store = CollectionStore::new(MemoryKvEngine::new());
    let node = path("/cal/");

    {
        let mut props = store.properties(&node).unwrap();
        props.insert("owner".into(), "alice".into());
    }

    assert_eq!(*store.properties(&node).unwrap(), map(&[("owner", "alice")]));
}

#[test]
fn guard_writes_back_when_holder_panics() {
    let store = CollectionStore::new(MemoryKvEngine::new());
    let node = path("/cal/");

    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
        let mut props = store.properties(&node).unwrap();
        props.insert("partial".into(), "yes".into());
        panic!("handler failed mid-edit");
    }));
    assert!(outcome.is_err());

    assert_eq!(*store.properties(&node).unwrap(), map(&[("partial", "yes")]));
}

#[test]
fn malformed_blob_fails_acquisition_and_is_left_untouched() {
    let store = CollectionStore::new(MemoryKvEngine::new());
    let node = path("/cal/");
    store.engine().set(&node.props_key(), b"{not json").unwrap();

    let err = store.properties(&node).err().expect("malformed blob must fail");
    match err {
        StoreError::MalformedProperties { path, .. } => assert_eq!(path, node),
        other => panic!("unexpected error: {other}"),
    }

    let result = store.with_properties(&node, |props| props.clear());
    assert!(matches!(result, Err(StoreError::MalformedProperties { .. })));
    assert_eq!(
        store.engine().get(&node.props_key()).unwrap(),
        Some(b"{not json".to_vec())
    );
}

#[test]
fn non_string_values_are_malformed() {
    let store = CollectionStore::new(MemoryKvEngine::new());
    let node = path("/cal/");
    store.engine().set(&node.props_key(), br#"{"size": 3}"#).unwrap();

    assert!(matches!(
        store.properties(&node).err(),
        Some(StoreError::MalformedProperties { .. })
    ));
}

fn concurrent_writers_keep_both_keys<E: KvEngine>(store: &CollectionStore<E>) {
    let item = path("/cal/shared.ics");
    store.save(&item, "BEGIN:VCALENDAR").unwrap();
    store
        .with_properties(&item, |props| {
            props.insert("base".into(), "kept".into());
        })
        .unwrap();

    let barrier = Barrier::new(2);
    thread::scope(|scope| {
        for writer in ["alice", "bob"] {
            let barrier = &barrier;
            let item = &item;
            scope.spawn(move || {
                let mut props = store.properties(item).unwrap();
                // Both holders load the same version before either writes.
                barrier.wait();
                props.insert(format!("X-EDITED-BY-{writer}"), writer.to_string());
                props.release().unwrap();
            });
        }
    });

    let final_props = store.properties(&item).unwrap();
    assert_eq!(
        *final_props,
        map(&[
            ("X-EDITED-BY-alice", "alice"),
            ("X-EDITED-BY-bob", "bob"),
            ("base", "kept"),
        ])
    );
}

#[test]
fn concurrent_acquisitions_merge_under_memory_engine() {
    concurrent_writers_keep_both_keys(&CollectionStore::new(MemoryKvEngine::new()));
}

#[test]
fn concurrent_acquisitions_merge_under_sqlite_engine() {
    let dir = tempfile::tempdir().unwrap();
    let store = CollectionStore::open(&StoreConfig::with_db_path(dir.path().join("props.db")))
        .unwrap();
    concurrent_writers_keep_both_keys(&store);
}

#[test]
fn concurrent_edits_of_same_key_resolve_to_one_writer() {
    let store = CollectionStore::new(MemoryKvEngine::new());
    let node = path("/cal/");
    let barrier = Barrier::new(2);

    thread::scope(|scope| {
        for color in ["red", "blue"] {
            let store = &store;
            let node = &node;
            let barrier = &barrier;
            scope.spawn(move || {
                let mut props = store.properties(node).unwrap();
                barrier.wait();
                props.insert("color".into(), color.into());
                props.release().unwrap();
            });
        }
    });

    let final_props = store.properties(&node).unwrap();
    let color = final_props.get("color").cloned().unwrap();
    assert!(color == "red" || color == "blue");
    assert_eq!(final_props.len(), 1);
}

/// Delegates to memory storage but loses every compare-and-swap race.
struct AlwaysConflicting {
    inner: MemoryKvEngine,
    cas_calls: AtomicU32,
}

impl KvEngine for AlwaysConflicting {
    fn get(&self, key: &str) -> EngineResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> EngineResult<()> {
        self.inner.set(key, value)
    }

    fn delete(&self, key: &str) -> EngineResult<()> {
        self.inner.delete(key)
    }

    fn exists(&self, key: &str) -> EngineResult<bool> {
        self.inner.exists(key)
    }

    fn get_many(&self, keys: &[&str]) -> EngineResult<Vec<Option<Vec<u8>>>> {
        self.inner.get_many(keys)
    }

    fn get_versioned(&self, key: &str) -> EngineResult<Option<(Vec<u8>, Version)>> {
        self.inner.get_versioned(key)
    }

    fn compare_and_swap(
        &self,
        _key: &str,
        _expected: Option<Version>,
        _value: &[u8],
    ) -> EngineResult<bool> {
        self.cas_calls.fetch_add(1, Ordering::SeqCst);
        Ok(false)
    }

    fn apply_batch(&self, ops: &[WriteOp]) -> EngineResult<()> {
        self.inner.apply_batch(ops)
    }

    fn scan_prefix(&self, prefix: &str) -> EngineResult<Vec<String>> {
        self.inner.scan_prefix(prefix)
    }
}

#[test]
fn exhausted_retries_surface_conflict() {
    let engine = AlwaysConflicting {
        inner: MemoryKvEngine::new(),
        cas_calls: AtomicU32::new(0),
    };
    let config = StoreConfig {
        max_cas_retries: 2,
        ..StoreConfig::default()
    };
    let store = CollectionStore::with_config(engine, &config);
    let node = path("/cal/");

    let mut props = store.properties(&node).unwrap();
    props.insert("k".into(), "v".into());
    let err = props.release().unwrap_err();

    match err {
        StoreError::ConflictOnWrite { path, attempts } => {
            assert_eq!(path, node);
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.engine().cas_calls.load(Ordering::SeqCst), 3);
}

#[test]
fn guard_released_after_delete_recreates_property_key() {
    let store = CollectionStore::new(MemoryKvEngine::new());
    let item = path("/cal/1.ics");
    store.save(&item, "x").unwrap();

    let mut props = store.properties(&item).unwrap();
    props.insert("etag".into(), "\"1\"".into());
    store.delete(&item).unwrap();
    props.release().unwrap();

    assert!(!store.exists(&item).unwrap());
    assert_eq!(*store.properties(&item).unwrap(), map(&[("etag", "\"1\"")]));
}
