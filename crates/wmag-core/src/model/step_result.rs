// crates/wmag-core/src/model/step_result.rs
// ============================================================================
// Module: StepResult
// Description: Outcome of a single executor step invocation, cached under
// its idempotency key.
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::identifiers::IdemKey;
use crate::identifiers::PolicyId;
use crate::identifiers::StepId;
use crate::time::Timestamp;

/// A step invocation's terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The step's action reported success.
    Succeeded,
    /// The step's action reported a non-retryable failure.
    Failed,
    /// The step was denied by policy before dispatch.
    Denied,
}

/// The cached outcome of a step invocation, keyed by its idempotency key.
///
/// # Invariants
/// - A given `idem_key` is written at most once; the executor treats a
///   cache hit as authoritative regardless of the current action schema
///   version (schema evolution is expressed via a new `action_id`/version,
///   which naturally produces a new `idem_key`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Step this result belongs to.
    pub step_id: StepId,
    /// Idempotency key this result is cached under.
    pub idem_key: IdemKey,
    /// Terminal status.
    pub status: StepStatus,
    /// Action-specific output, present when `status == Succeeded`.
    pub output: Option<serde_json::Value>,
    /// Error detail, present when `status != Succeeded`.
    pub error: Option<String>,
    /// Retry class assigned to a failure, when applicable.
    pub retry_class: Option<String>,
    /// Number of attempts made before reaching this terminal status.
    pub attempts: u32,
    /// Every exec-phase policy id that matched while gating this step,
    /// regardless of effect. Checked against `must_reference_policy_id`
    /// obligations.
    #[serde(default)]
    pub policy_ids: Vec<PolicyId>,
    /// When this result was recorded.
    pub recorded_at: Timestamp,
}
