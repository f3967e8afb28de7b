//! Scoped property set acquisition.
//!
//! # Responsibility
//! - Hand out a mutable property map for one resource.
//! - Write it back exactly once when the scope ends, whichever way it ends.
//!
//! # Invariants
//! - Write-back is a compare-and-swap against the version read at
//!   acquisition. On conflict, the holder's own edits are replayed onto the
//!   newer stored set, so concurrent holders never erase each other's keys.
//! - Attempts are bounded by `1 + max_cas_retries`; exhaustion surfaces
//!   `StoreError::ConflictOnWrite`.
//! - Dropping an unreleased guard still writes back; failures there can only
//!   be logged.

use super::collection_store::{CollectionStore, StoreError, StoreResult};
use crate::engine::{KvEngine, Version};
use crate::model::path::ResourcePath;
use crate::model::properties::{encode_properties, PropertyChanges, PropertyMap};
use log::{debug, error, warn};
use std::ops::{Deref, DerefMut};

/// Mutable view of one resource's property set.
///
/// Derefs to [`PropertyMap`]. Call [`PropertiesGuard::release`] to observe
/// the write-back result; otherwise it happens on drop.
pub struct PropertiesGuard<'store, E: KvEngine> {
    store: &'store CollectionStore<E>,
    path: ResourcePath,
    snapshot: PropertyMap,
    current: PropertyMap,
    version: Option<Version>,
    released: bool,
}

impl<'store, E: KvEngine> PropertiesGuard<'store, E> {
    pub(crate) fn new(
        store: &'store CollectionStore<E>,
        path: ResourcePath,
        properties: PropertyMap,
        version: Option<Version>,
    ) -> Self {
        Self {
            store,
            path,
            snapshot: properties.clone(),
            current: properties,
            version,
            released: false,
        }
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// Whether the map differs from what was loaded.
    pub fn is_modified(&self) -> bool {
        self.snapshot != self.current
    }

    /// Ends the scope and writes the property set back.
    pub fn release(mut self) -> StoreResult<()> {
        self.write_back()
    }

    fn write_back(&mut self) -> StoreResult<()> {
        self.released = true;
        let key = self.path.props_key();
        let changes = PropertyChanges::between(&self.snapshot, &self.current);
        let attempts = self.store.max_cas_retries().saturating_add(1);
        let mut target = self.current.clone();
        let mut expected = self.version;

        for attempt in 1..=attempts {
            let blob = encode_properties(&target)
                .map_err(|err| StoreError::InvalidData(err.to_string()))?;
            if self
                .store
                .engine()
                .compare_and_swap(&key, expected, &blob)?
            {
                debug!(
                    "event=properties_release module=store status=ok path={} attempt={} entries={} modified={}",
                    self.path,
                    attempt,
                    target.len(),
                    !changes.is_empty()
                );
                return Ok(());
            }

            warn!(
                "event=properties_release module=store status=conflict path={} attempt={}",
                self.path, attempt
            );
            let (stored, version) = self.store.load_properties(&self.path)?;
            target = changes.apply_to(stored);
            expected = version;
        }

        error!(
            "event=properties_release module=store status=error path={} error_code=cas_exhausted attempts={}",
            self.path, attempts
        );
        Err(StoreError::ConflictOnWrite {
            path: self.path.clone(),
            attempts,
        })
    }
}

impl<E: KvEngine> Deref for PropertiesGuard<'_, E> {
    type Target = PropertyMap;

    fn deref(&self) -> &PropertyMap {
        &self.current
    }
}

impl<E: KvEngine> DerefMut for PropertiesGuard<'_, E> {
    fn deref_mut(&mut self) -> &mut PropertyMap {
        &mut self.current
    }
}

impl<E: KvEngine> Drop for PropertiesGuard<'_, E> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.write_back() {
            error!(
                "event=properties_release module=store status=error path={} trigger=drop error={}",
                self.path, err
            );
        }
    }
}
