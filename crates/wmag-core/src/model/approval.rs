// crates/wmag-core/src/model/approval.rs
// ============================================================================
// Module: Approval
// Description: A pending or decided human approval gate raised by a policy
// obligation.
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::identifiers::ApprovalId;
use crate::identifiers::RunId;
use crate::identifiers::StepId;
use crate::identifiers::UserId;
use crate::time::Timestamp;

/// Whether an approval was granted or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    /// The step(s) gated by this approval may proceed.
    Approved,
    /// The step(s) gated by this approval must not proceed; the run fails.
    Rejected,
}

/// Lifecycle state of an [`Approval`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ApprovalState {
    /// Awaiting a decision from an eligible approver.
    Pending,
    /// A decision has been recorded.
    Decided {
        /// The decision recorded.
        decision: ApprovalDecision,
        /// Who decided it.
        decided_by: UserId,
        /// When the decision was recorded.
        decided_at: Timestamp,
    },
}

/// A human approval gate raised by a `require_approval` obligation.
///
/// # Invariants
/// - Once `state` transitions to `Decided`, it never changes again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    /// Approval identifier.
    pub approval_id: ApprovalId,
    /// Run this approval gates.
    pub run_id: RunId,
    /// Step this approval gates, if scoped to a single step rather than the
    /// whole run.
    pub step_id: Option<StepId>,
    /// Roles eligible to decide this approval.
    pub eligible_roles: Vec<String>,
    /// Current state.
    pub state: ApprovalState,
    /// When the approval was raised.
    pub created_at: Timestamp,
}

impl Approval {
    /// Returns whether this approval is still awaiting a decision.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self.state, ApprovalState::Pending)
    }
}
