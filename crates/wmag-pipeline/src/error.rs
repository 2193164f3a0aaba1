// crates/wmag-pipeline/src/error.rs
// ============================================================================
// Module: Pipeline Errors
// Description: Failures raised while submitting or advancing a run, plus the
// kernel-wide error convergence spec.md §7 describes at the pipeline/worker/
// server boundary.
// Grounded on: wmag-executor::error::ExecutorError's one-error-enum-per-
// collaborator layering, extended upward with the pipeline's own
// reconstruction/validation failure modes.
// ============================================================================

use thiserror::Error;
use wmag_adapters::ContextError;
use wmag_adapters::PlannerError;
use wmag_core::CoreError;
use wmag_core::identifiers::ActionId;
use wmag_core::identifiers::ApprovalId;
use wmag_core::identifiers::RunId;
use wmag_core::identifiers::ToolId;
use wmag_core::model::plan::PlanError;
use wmag_executor::ExecutorError;
use wmag_registry::RegistryError;
use wmag_store::StoreError;

/// Errors raised while submitting a mission or advancing a run by one phase
/// transition or step dispatch.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// `advance` was called for a run that does not exist.
    #[error("run {0} not found")]
    RunNotFound(RunId),

    /// `submit` was called with a run id that already exists.
    #[error("run {0} already exists")]
    DuplicateRun(RunId),

    /// Reconstructing state from the event log found a phase whose
    /// prerequisite artifact was never recorded, which indicates a store
    /// corruption or a programmer error in the phase ordering.
    #[error("required artifact missing from reconstructed state: {0}")]
    MissingArtifact(&'static str),

    /// `GateApproval` raised an approval that could not be found during a
    /// later `InputRequired` poll.
    #[error("approval {0} not found")]
    MissingApproval(ApprovalId),

    /// A plan step references an action absent from the effective registry.
    #[error("plan references unknown action {0}")]
    UnknownAction(ActionId),

    /// A registry action references a tool absent from the effective
    /// registry.
    #[error("action references unknown tool {0}")]
    UnknownTool(ToolId),

    /// The planner produced a plan whose step graph fails validation.
    #[error("plan failed validation: {0}")]
    InvalidPlan(#[from] PlanError),

    /// An artifact or verdict body could not be serialized or deserialized.
    #[error("failed to (de)serialize artifact: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A `Store` operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A hash chain or canonicalization operation failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A step invocation failed outside the executor's own terminal
    /// `StepResult` handling (e.g. a `Store` failure reached through it).
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// `LoadContext` failed to assemble a context pack.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// `Plan` failed to produce a plan.
    #[error(transparent)]
    Planner(#[from] PlannerError),
}

/// The kernel-wide error type the worker and server boundaries convert into
/// their own transport-specific responses (an HTTP status, a CLI exit code).
/// Every crate-local error enum in the workspace converges here rather than
/// each boundary matching on every collaborator's error type directly.
#[derive(Debug, Error)]
pub enum KernelError {
    /// A pipeline submit/advance failure.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A `Store` operation failed outside the pipeline (e.g. a direct
    /// `list_runs` call from the HTTP layer).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Loading or merging a registry layer failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A hash chain or canonicalization operation failed outside the
    /// pipeline (e.g. `wmag-cli verify`).
    #[error(transparent)]
    Core(#[from] CoreError),
}
