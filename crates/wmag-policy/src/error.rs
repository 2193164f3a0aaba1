// crates/wmag-policy/src/error.rs
// ============================================================================
// Module: Policy Errors
// ============================================================================

use thiserror::Error;
use wmag_core::identifiers::PolicyId;

/// Errors raised while validating or evaluating policy documents.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    /// A policy's condition tree exceeds the maximum nesting depth.
    #[error("policy {policy_id} condition tree exceeds max nesting depth of {max}")]
    NestingTooDeep {
        /// The offending policy.
        policy_id: PolicyId,
        /// The configured maximum.
        max: u32,
    },
}
