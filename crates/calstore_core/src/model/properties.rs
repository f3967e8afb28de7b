//! Property set wire format and change tracking.
//!
//! # Responsibility
//! - Encode/decode property sets as UTF-8 JSON objects of strings.
//! - Compute a caller's edits relative to a snapshot and replay them onto a
//!   newer stored version after a write conflict.
//!
//! # Invariants
//! - Decoding never silently drops data: anything other than a JSON object
//!   with string values is an error.

use std::collections::BTreeMap;

/// Property set attached to one resource.
pub type PropertyMap = BTreeMap<String, String>;

/// Serializes a property set to its stored JSON form.
pub fn encode_properties(properties: &PropertyMap) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(properties)
}

/// Parses a stored property blob.
///
/// Returns a human-readable reason when the blob is not UTF-8 JSON or not an
/// object of string values.
pub fn decode_properties(raw: &[u8]) -> Result<PropertyMap, String> {
    let text = std::str::from_utf8(raw).map_err(|err| format!("not UTF-8: {err}"))?;
    serde_json::from_str::<PropertyMap>(text).map_err(|err| err.to_string())
}

/// Edits made to a property set since it was loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyChanges {
    upserts: BTreeMap<String, String>,
    removals: Vec<String>,
}

impl PropertyChanges {
    /// Diffs `current` against the `base` it was derived from.
    pub fn between(base: &PropertyMap, current: &PropertyMap) -> Self {
        let upserts = current
            .iter()
            .filter(|(key, value)| base.get(*key) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let removals = base
            .keys()
            .filter(|key| !current.contains_key(*key))
            .cloned()
            .collect();
        Self { upserts, removals }
    }

    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }

    /// Replays these edits onto `target`; edited keys win over `target`.
    pub fn apply_to(&self, mut target: PropertyMap) -> PropertyMap {
        for key in &self.removals {
            target.remove(key);
        }
        for (key, value) in &self.upserts {
            target.insert(key.clone(), value.clone());
        }
        target
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_properties, encode_properties, PropertyChanges, PropertyMap};

    fn map(pairs: &[(&str, &str)]) -> PropertyMap {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn decode_rejects_non_object_and_non_string_values() {
        assert!(decode_properties(b"{not json").is_err());
        assert!(decode_properties(b"[1, 2]").is_err());
        assert!(decode_properties(br#"{"tag": 3}"#).is_err());
        assert!(decode_properties(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn encode_produces_json_object() {
        let blob = encode_properties(&map(&[("D:displayname", "Work")])).unwrap();
        assert_eq!(blob, br#"{"D:displayname":"Work"}"#.to_vec());
        assert_eq!(decode_properties(&blob).unwrap(), map(&[("D:displayname", "Work")]));
    }

    #[test]
    fn changes_replay_onto_concurrent_version() {
        let base = map(&[("color", "red"), ("stale", "1")]);
        let mine = map(&[("color", "blue"), ("mine", "x")]);
        let theirs = map(&[("color", "red"), ("stale", "1"), ("theirs", "y")]);

        let changes = PropertyChanges::between(&base, &mine);
        assert!(!changes.is_empty());

        let merged = changes.apply_to(theirs);
        assert_eq!(
            merged,
            map(&[("color", "blue"), ("mine", "x"), ("theirs", "y")])
        );
    }

    #[test]
    fn unchanged_map_has_no_changes() {
        let base = map(&[("a", "1")]);
        assert!(PropertyChanges::between(&base, &base.clone()).is_empty());
    }
}
