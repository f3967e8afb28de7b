//! Resource record read model.

use super::path::ResourcePath;
use chrono::{DateTime, Utc};

/// Content and modification time of one stored resource.
///
/// `timestamp_recorded` is `false` when the timestamp key was missing and
/// `last_modified` is the read-time fallback rather than a real write time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub path: ResourcePath,
    pub content: Vec<u8>,
    pub last_modified: DateTime<Utc>,
    pub timestamp_recorded: bool,
}

impl ResourceRecord {
    /// Content decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}
