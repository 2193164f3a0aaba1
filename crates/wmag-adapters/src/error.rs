// crates/wmag-adapters/src/error.rs
// ============================================================================
// Module: Adapter Errors
// Grounded on: decision-gate-core::interfaces's one-error-enum-per-trait
// convention (EvidenceError, DispatchError, ArtifactError).
// ============================================================================

use thiserror::Error;

/// Errors raised by a [`crate::ContextProvider`].
#[derive(Debug, Error)]
pub enum ContextError {
    /// The context provider could not be reached or failed internally.
    #[error("context provider error: {0}")]
    Provider(String),
}

/// Errors raised by a [`crate::PlannerAdapter`].
#[derive(Debug, Error)]
pub enum PlannerError {
    /// The planner could not produce a plan at all.
    #[error("planner error: {0}")]
    Planner(String),
    /// The planner produced a plan that fails structural validation.
    #[error("planner produced an invalid plan: {0}")]
    InvalidPlan(String),
}

/// Retry classification attached to a [`ToolError`], matching the
/// registry's `retry_classes` taxonomy by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolRetryClass {
    /// Transient network failure talking to the tool.
    TransientNetwork,
    /// The tool reported a rate limit.
    RateLimited,
    /// The call timed out.
    Timeout,
    /// The tool reported a conflicting concurrent mutation.
    Conflict,
    /// The target resource does not exist.
    NotFound,
    /// An internal tool error with no more specific classification.
    Internal,
    /// Authentication or authorization failure calling the tool.
    Auth,
    /// The action's input failed the tool's own validation.
    InvalidInput,
}

impl ToolRetryClass {
    /// Returns the registry retry-class name this classification maps to.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TransientNetwork => "transient_network",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::Internal => "internal",
            Self::Auth => "auth",
            Self::InvalidInput => "invalid_input",
        }
    }
}

/// Errors raised by a [`crate::ToolAdapter`].
#[derive(Debug, Error)]
#[error("tool error ({class}): {message}")]
pub struct ToolError {
    /// Retry classification, used by the executor to pick a backoff policy.
    pub class: ToolRetryClass,
    /// Human-readable detail.
    pub message: String,
}

impl std::fmt::Display for ToolRetryClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
