// crates/wmag-store/src/error.rs
// ============================================================================
// Module: Store Errors
// Grounded on: decision-gate-core::interfaces::StoreError's variant taxonomy
// (Io / Corrupt / VersionMismatch / Invalid / Store), extended with the
// domain-specific NotFound/Conflict cases wmag's broader surface needs
// (jobs, approvals, budgets, rate limits) that a single run-state store
// does not.
// ============================================================================

use thiserror::Error;
use wmag_core::identifiers::ApprovalId;
use wmag_core::identifiers::JobId;
use wmag_core::identifiers::RunId;

/// Errors raised by a [`crate::Store`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O or connection error.
    #[error("store io error: {0}")]
    Io(String),
    /// Stored data failed an integrity check (e.g. hash chain verification).
    #[error("store corruption: {0}")]
    Corrupt(String),
    /// Stored data does not match the expected schema version.
    #[error("store version mismatch: {0}")]
    VersionMismatch(String),
    /// Stored or supplied data is invalid.
    #[error("store invalid data: {0}")]
    Invalid(String),
    /// Run not found.
    #[error("run {0} not found")]
    RunNotFound(RunId),
    /// Approval not found.
    #[error("approval {0} not found")]
    ApprovalNotFound(ApprovalId),
    /// Job not found.
    #[error("job {0} not found")]
    JobNotFound(JobId),
    /// A write conflicted with a concurrent writer (e.g. two workers racing
    /// to append the same sequence number, or claim the same job).
    #[error("store write conflict: {0}")]
    Conflict(String),
    /// Backend-specific error with no more specific variant.
    #[error("store error: {0}")]
    Backend(String),
}
