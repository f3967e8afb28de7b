//! Collection store: the public storage surface for calendar/contact data.
//!
//! # Responsibility
//! - Orchestrate engine calls into resource-level operations.
//! - Own the scoped property acquisition and its conflict policy.

pub mod collection_store;
pub mod properties_guard;
