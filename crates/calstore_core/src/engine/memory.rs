//! In-memory implementation of `KvEngine`.

use super::{EngineResult, KvEngine, Version, WriteOp};
use parking_lot::Mutex;
use std::collections::BTreeMap;

struct MemoryState {
    entries: BTreeMap<String, (Vec<u8>, Version)>,
    clock: Version,
}

impl MemoryState {
    fn tick(&mut self) -> Version {
        self.clock += 1;
        self.clock
    }
}

/// Ordered map behind a single lock.
///
/// Useful for tests and single-process embedding. The one lock makes every
/// call, batches included, trivially atomic.
pub struct MemoryKvEngine {
    state: Mutex<MemoryState>,
}

impl MemoryKvEngine {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                entries: BTreeMap::new(),
                clock: 0,
            }),
        }
    }

    /// Number of stored keys, derived keys included.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryKvEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl KvEngine for MemoryKvEngine {
    fn get(&self, key: &str) -> EngineResult<Option<Vec<u8>>> {
        let state = self.state.lock();
        Ok(state.entries.get(key).map(|(value, _)| value.clone()))
    }

    fn set(&self, key: &str, value: &[u8]) -> EngineResult<()> {
        let mut state = self.state.lock();
        let stamp = state.tick();
        state
            .entries
            .insert(key.to_string(), (value.to_vec(), stamp));
        Ok(())
    }

    fn delete(&self, key: &str) -> EngineResult<()> {
        self.state.lock().entries.remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> EngineResult<bool> {
        Ok(self.state.lock().entries.contains_key(key))
    }

    fn get_many(&self, keys: &[&str]) -> EngineResult<Vec<Option<Vec<u8>>>> {
        let state = self.state.lock();
        Ok(keys
            .iter()
            .map(|key| state.entries.get(*key).map(|(value, _)| value.clone()))
            .collect())
    }

    fn get_versioned(&self, key: &str) -> EngineResult<Option<(Vec<u8>, Version)>> {
        let state = self.state.lock();
        Ok(state.entries.get(key).cloned())
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Version>,
        value: &[u8],
    ) -> EngineResult<bool> {
        let mut state = self.state.lock();
        let current = state.entries.get(key).map(|(_, version)| *version);
        if current != expected {
            return Ok(false);
        }
        let stamp = state.tick();
        state
            .entries
            .insert(key.to_string(), (value.to_vec(), stamp));
        Ok(true)
    }

    fn apply_batch(&self, ops: &[WriteOp]) -> EngineResult<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock();
        let stamp = state.tick();
        for op in ops {
            match op {
                WriteOp::Put { key, value } => {
                    state.entries.insert(key.clone(), (value.clone(), stamp));
                }
                WriteOp::Delete { key } => {
                    state.entries.remove(key);
                }
            }
        }
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> EngineResult<Vec<String>> {
        let state = self.state.lock();
        Ok(state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}
