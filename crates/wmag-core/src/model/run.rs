// crates/wmag-core/src/model/run.rs
// ============================================================================
// Module: Run
// Description: The top-level aggregate tracking a mission's lifecycle through
// the phase pipeline.
// Grounded on: decision-gate-core::core::state::RunState / RunStatus.
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::identifiers::OrgId;
use crate::identifiers::PlanId;
use crate::identifiers::RunId;
use crate::identifiers::TaskId;
use crate::identifiers::TenantId;
use crate::identifiers::UserId;
use crate::time::Timestamp;

/// Phase a run currently occupies in the pipeline state machine.
///
/// # Invariants
/// - Transitions are strictly forward (no phase is revisited) except that
///   `InputRequired` returns control to `GateApproval` or `ExecuteSteps`
///   depending on which phase requested the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Mission accepted, not yet processed.
    Submitted,
    /// Task normalization and registry resolution in progress.
    IngestTask,
    /// Context pack assembly in progress.
    LoadContext,
    /// World node selection in progress.
    SelectWorldNodes,
    /// Plan generation in progress.
    Plan,
    /// Policy evaluation of the generated plan in progress.
    GateApproval,
    /// Waiting on a human or external decision.
    InputRequired,
    /// Deterministic step execution in progress.
    ExecuteSteps,
    /// Result synthesis in progress.
    Synthesize,
    /// Terminal: run completed successfully.
    Completed,
    /// Terminal: run failed.
    Failed,
    /// Terminal: run was canceled by an operator.
    Canceled,
}

impl RunPhase {
    /// Returns whether this phase is terminal (no further transitions occur).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Maps this internal phase onto the coarser external `Run.state`
    /// taxonomy callers across the API boundary observe: `submitted`,
    /// `working`, `input-required`, `completed`, `failed`, `canceled`.
    #[must_use]
    pub const fn observable_state(self) -> &'static str {
        match self {
            Self::Submitted | Self::IngestTask => "submitted",
            Self::LoadContext
            | Self::SelectWorldNodes
            | Self::Plan
            | Self::GateApproval
            | Self::ExecuteSteps
            | Self::Synthesize => "working",
            Self::InputRequired => "input-required",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

/// The top-level run aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique run identifier.
    pub run_id: RunId,
    /// Task identifier assigned at submission.
    pub task_id: TaskId,
    /// Tenant that owns this run.
    pub tenant_id: TenantId,
    /// Organization the tenant belongs to.
    pub org_id: OrgId,
    /// Principal who submitted the mission.
    pub submitted_by: UserId,
    /// Current phase.
    pub phase: RunPhase,
    /// Plan identifier, once a plan has been produced.
    pub plan_id: Option<PlanId>,
    /// Cumulative budget units consumed by this run so far.
    pub budget_used: u64,
    /// When the run was created.
    pub created_at: Timestamp,
    /// When the run's phase was last updated.
    pub updated_at: Timestamp,
}

impl Run {
    /// Debits `amount` budget units, saturating rather than overflowing.
    ///
    /// # Invariants
    /// - P5 (budget never legitimately approaches `u64::MAX`) means
    ///   saturation is a defensive bound, not a normal code path.
    pub fn debit_budget(&mut self, amount: u64) {
        self.budget_used = self.budget_used.saturating_add(amount);
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]
mod tests {
    use super::*;

    #[test]
    fn terminal_phases_are_exactly_completed_failed_canceled() {
        assert!(RunPhase::Completed.is_terminal());
        assert!(RunPhase::Failed.is_terminal());
        assert!(RunPhase::Canceled.is_terminal());
        assert!(!RunPhase::ExecuteSteps.is_terminal());
        assert!(!RunPhase::Submitted.is_terminal());
    }

    #[test]
    fn observable_state_collapses_internal_phases_into_the_external_taxonomy() {
        assert_eq!(RunPhase::Submitted.observable_state(), "submitted");
        assert_eq!(RunPhase::IngestTask.observable_state(), "submitted");
        assert_eq!(RunPhase::LoadContext.observable_state(), "working");
        assert_eq!(RunPhase::GateApproval.observable_state(), "working");
        assert_eq!(RunPhase::InputRequired.observable_state(), "input-required");
        assert_eq!(RunPhase::Completed.observable_state(), "completed");
        assert_eq!(RunPhase::Failed.observable_state(), "failed");
        assert_eq!(RunPhase::Canceled.observable_state(), "canceled");
    }

    #[test]
    fn debit_budget_saturates_instead_of_overflowing() {
        let mut run = Run {
            run_id: RunId::new("r1"),
            task_id: TaskId::new("t1"),
            tenant_id: TenantId::new("tn1"),
            org_id: OrgId::new("o1"),
            submitted_by: UserId::new("u1"),
            phase: RunPhase::Submitted,
            plan_id: None,
            budget_used: u64::MAX - 1,
            created_at: Timestamp::from_millis(0),
            updated_at: Timestamp::from_millis(0),
        };
        run.debit_budget(10);
        assert_eq!(run.budget_used, u64::MAX);
    }
}
