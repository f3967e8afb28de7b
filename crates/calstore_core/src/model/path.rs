//! Resource path model.
//!
//! # Responsibility
//! - Validate slash-delimited resource paths.
//! - Derive the content, timestamp and property keys of a resource.
//!
//! # Invariants
//! - Paths start with `/` and contain no empty segment.
//! - A trailing `/` marks a node; every other valid path is a leaf.
//! - Paths never end in a derived-key suffix, so a derived key can never be
//!   mistaken for a resource.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Separator between path segments; a trailing one marks a node.
pub const SEPARATOR: char = '/';
/// Suffix of the key holding a resource's property set.
pub const PROPS_SUFFIX: &str = ".props";
/// Suffix of the key holding a resource's modification time.
pub const MODIFIED_SUFFIX: &str = ":modified";

/// Reasons a string is not a valid [`ResourcePath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    Empty,
    NotAbsolute(String),
    EmptySegment(String),
    ReservedSuffix(String),
}

impl Display for PathError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "resource path cannot be empty"),
            Self::NotAbsolute(path) => write!(f, "resource path must start with `/`: `{path}`"),
            Self::EmptySegment(path) => {
                write!(f, "resource path contains an empty segment: `{path}`")
            }
            Self::ReservedSuffix(path) => {
                write!(f, "resource path ends in a reserved suffix: `{path}`")
            }
        }
    }
}

impl Error for PathError {}

/// Validated path of a node or leaf resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourcePath(String);

impl ResourcePath {
    /// The root node `/`.
    pub fn root() -> Self {
        Self(SEPARATOR.to_string())
    }

    /// Validates `value` as a resource path.
    pub fn parse(value: impl Into<String>) -> Result<Self, PathError> {
        let value = value.into();
        if value.is_empty() {
            return Err(PathError::Empty);
        }
        let Some(body) = value.strip_prefix(SEPARATOR) else {
            return Err(PathError::NotAbsolute(value));
        };
        if is_derived_key(&value) {
            return Err(PathError::ReservedSuffix(value));
        }

        let body = body.strip_suffix(SEPARATOR).unwrap_or(body);
        if body.is_empty() {
            return if value.len() == 1 {
                Ok(Self(value))
            } else {
                Err(PathError::EmptySegment(value))
            };
        }
        if body.split(SEPARATOR).any(str::is_empty) {
            return Err(PathError::EmptySegment(value));
        }

        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this path names a node (collection) rather than a leaf.
    pub fn is_node(&self) -> bool {
        self.0.ends_with(SEPARATOR)
    }

    /// Key holding the resource content.
    pub fn content_key(&self) -> &str {
        &self.0
    }

    /// Key holding the last-modified timestamp.
    pub fn modified_key(&self) -> String {
        format!("{}{MODIFIED_SUFFIX}", self.0)
    }

    /// Key holding the JSON property set.
    pub fn props_key(&self) -> String {
        format!("{}{PROPS_SUFFIX}", self.0)
    }

    /// Node directly containing this path. `None` for the root.
    pub fn parent(&self) -> Option<ResourcePath> {
        let trimmed = self.0.strip_suffix(SEPARATOR).unwrap_or(&self.0);
        let cut = trimmed.rfind(SEPARATOR)?;
        Some(Self(self.0[..=cut].to_string()))
    }

    /// Last segment, without the node marker. Empty for the root.
    pub fn name(&self) -> &str {
        let trimmed = self.0.strip_suffix(SEPARATOR).unwrap_or(&self.0);
        trimmed
            .rfind(SEPARATOR)
            .map_or(trimmed, |cut| &trimmed[cut + 1..])
    }
}

impl Display for ResourcePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourcePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ResourcePath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for ResourcePath {
    type Error = PathError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ResourcePath> for String {
    fn from(value: ResourcePath) -> Self {
        value.0
    }
}

/// Whether `key` is a timestamp or property key rather than content.
pub fn is_derived_key(key: &str) -> bool {
    key.ends_with(PROPS_SUFFIX) || key.ends_with(MODIFIED_SUFFIX)
}
