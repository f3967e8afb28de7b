//! Storage-facing data model for calendar and contact collections.
//!
//! # Responsibility
//! - Define resource paths and the keys derived from them.
//! - Define the wire formats of property sets and modification timestamps.
//!
//! # Invariants
//! - A path is a node (trailing `/`) or a leaf, never both.
//! - Derived keys (`.props`, `:modified`) are never valid resource paths.

pub mod path;
pub mod properties;
pub mod record;
pub mod timestamp;
