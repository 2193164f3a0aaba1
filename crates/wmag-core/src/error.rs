// crates/wmag-core/src/error.rs
// ============================================================================
// Module: Core Errors
// Description: Error type shared by the canonical hashing and hash chain
// modules.
// ============================================================================

use thiserror::Error;

use crate::identifiers::Kid;

/// Errors raised by `wmag-core`'s canonicalization and hash chain primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Canonical JSON serialization failed.
    #[error("failed to canonicalize value: {source}")]
    Canonicalize {
        /// Underlying serialization error.
        #[source]
        source: serde_json::Error,
    },

    /// No audit key is marked active in an [`crate::hashchain::AuditKeyRegistry`].
    #[error("audit key registry has no active key")]
    NoActiveKey,

    /// More than one audit key is marked active.
    #[error("audit key registry has {count} active keys, exactly one is required")]
    MultipleActiveKeys {
        /// Number of keys found active.
        count: usize,
    },

    /// A referenced key id is not present in the registry.
    #[error("audit key {kid} not found")]
    UnknownKey {
        /// The key id that was looked up.
        kid: Kid,
    },

    /// Hash chain verification found a broken link.
    #[error("hash chain broken at seq {seq}: expected prev_hash {expected}, found {found}")]
    ChainBroken {
        /// Sequence number of the offending event.
        seq: u64,
        /// The prev_hash value the chain expected.
        expected: String,
        /// The prev_hash value actually stored.
        found: String,
    },

    /// Hash chain verification found a tampered event.
    #[error("hash mismatch at seq {seq}: event payload does not match its recorded hash")]
    HashMismatch {
        /// Sequence number of the offending event.
        seq: u64,
    },
}
