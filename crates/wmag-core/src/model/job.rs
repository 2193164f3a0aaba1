// crates/wmag-core/src/model/job.rs
// ============================================================================
// Module: Job
// Description: A unit of work claimed by a worker: advancing a run by one
// phase, or dispatching a single step.
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::identifiers::JobId;
use crate::identifiers::RunId;
use crate::identifiers::TenantId;
use crate::time::Timestamp;

/// Lifecycle state of a [`Job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Queued, not yet claimed by a worker.
    Queued,
    /// Claimed by a worker and currently being processed.
    Claimed,
    /// Finished, successfully or not; the run's own event log records the
    /// outcome, the job row only tracks queue lifecycle.
    Done,
}

/// A queued unit of work advancing a run.
///
/// # Invariants
/// - At most one worker holds a `Claimed` job at a time (enforced by the
///   store's claim operation, which is a single atomic update).
/// - `visible_at` gates re-delivery after a claim lease expires without the
///   job reaching `Done`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier.
    pub job_id: JobId,
    /// Run this job advances.
    pub run_id: RunId,
    /// Tenant the run belongs to, denormalized for concurrency-cap queries.
    pub tenant_id: TenantId,
    /// Current state.
    pub state: JobState,
    /// Earliest time this job may be claimed or reclaimed.
    pub visible_at: Timestamp,
    /// Number of times this job has been claimed, including the current
    /// claim if any.
    pub claim_count: u32,
}
