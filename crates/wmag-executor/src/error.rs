// crates/wmag-executor/src/error.rs
// ============================================================================
// Module: Executor Errors
// Description: The taxonomy a step invocation fails into (spec.md §7),
// surfaced as a thiserror enum so the pipeline can translate a failure into
// a terminal `step_result` artifact without matching on strings.
// ============================================================================

use thiserror::Error;
use wmag_core::identifiers::PolicyId;
use wmag_core::model::budget::BudgetMetric;
use wmag_store::StoreError;

/// Errors raised while executing a single step.
///
/// Each variant's `Display` is the human-readable detail recorded on the
/// resulting `StepResult::error`; [`ExecutorError::retry_class`] gives the
/// taxonomy class name recorded as `StepResult::retry_class`.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The step's bound input failed validation against the action's
    /// `schema_in`. Never retried.
    #[error("step input invalid: {0}")]
    InvalidInput(String),

    /// The exec-phase policy gate denied this step.
    #[error("policy denied step: {reason}")]
    PolicyDenied {
        /// The policy that produced the denial, if one matched.
        policy_id: Option<PolicyId>,
        /// Human-readable denial reason.
        reason: String,
    },

    /// No idempotency key could be derived for a side-effect action.
    #[error("could not derive an idempotency key: {0}")]
    Idempotency(String),

    /// Debiting this step's cost would exceed the run's per-metric budget.
    #[error("budget exceeded for {metric:?}: used {used}, requested {requested}, limit {limit}")]
    BudgetExceeded {
        /// Which metric's ceiling was hit.
        metric: BudgetMetric,
        /// Units already consumed by the run for `metric`.
        used: u64,
        /// Units this step would additionally consume.
        requested: u64,
        /// The run's configured limit.
        limit: u64,
    },

    /// The tool invocation failed after exhausting its retry budget (or its
    /// class was non-retryable).
    #[error("step failed after {attempts} attempt(s): {message}")]
    ToolFailed {
        /// Attempts made before giving up.
        attempts: u32,
        /// Taxonomy class of the final failure.
        class: &'static str,
        /// Human-readable detail from the last failure.
        message: String,
    },

    /// A `Store` operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ExecutorError {
    /// Returns the spec.md §7 taxonomy class name for this error, used as
    /// `StepResult::retry_class` and in `tracing` fields.
    #[must_use]
    pub const fn retry_class(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::PolicyDenied { .. } => "policy_denied",
            Self::Idempotency(_) => "idempotency",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::ToolFailed { class, .. } => class,
            Self::Store(_) => "internal",
        }
    }
}
