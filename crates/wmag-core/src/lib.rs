// crates/wmag-core/src/lib.rs
// ============================================================================
// Crate: wmag-core
// ============================================================================
//! Canonical data model, identifiers, canonical JSON, and the tamper-evident
//! event hash chain shared by every other crate in the workspace.
//!
//! Nothing in this crate talks to a database, a clock's wall time (beyond the
//! [`time::Clock`] abstraction), or the network. It exists so that
//! `wmag-policy`, `wmag-registry`, `wmag-store`, `wmag-executor`, and
//! `wmag-pipeline` all agree on the same `Run`, `Event`, `Plan`, and registry
//! document shapes without depending on each other.

#![forbid(unsafe_code)]

pub mod error;
pub mod hashchain;
pub mod hashing;
pub mod identifiers;
pub mod model;
pub mod time;

pub use error::CoreError;
pub use hashing::HashDigest;
