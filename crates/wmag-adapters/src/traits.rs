// crates/wmag-adapters/src/traits.rs
// ============================================================================
// Module: Adapter Traits
// Description: The three external collaborator seams the pipeline dispatches
// through: context assembly, plan generation, and tool invocation. None of
// these carry authentication, JSON-schema validation, or an LLM planner
// themselves; those remain the concrete adapter's responsibility.
// Grounded on: decision-gate-core::interfaces::{EvidenceProvider, Dispatcher}
// trait shapes (plain methods returning a domain Result, no generics).
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use wmag_core::identifiers::OrgId;
use wmag_core::identifiers::TaskId;
use wmag_core::identifiers::TenantId;
use wmag_core::identifiers::UserId;
use wmag_core::model::plan::Plan;
use wmag_core::model::registry_doc::Action;
use wmag_core::model::registry_doc::RegistryDocument;
use wmag_core::model::registry_doc::Tool;

use crate::error::ContextError;
use crate::error::PlannerError;
use crate::error::ToolError;

/// The normalized description of a submitted mission, assembled by
/// `IngestTask` from the raw submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Task identifier.
    pub task_id: TaskId,
    /// Tenant that owns the mission.
    pub tenant_id: TenantId,
    /// Organization the tenant belongs to.
    pub org_id: OrgId,
    /// Submitting principal.
    pub submitted_by: UserId,
    /// Free-text mission goal.
    pub goal: String,
    /// Mission-specific parameters, opaque to the kernel.
    pub params: serde_json::Value,
}

/// Assembles the context pack a planner needs: relevant world nodes,
/// prior run history, or any other background the submitter did not
/// explicitly supply.
#[async_trait::async_trait]
pub trait ContextProvider: Send + Sync {
    /// Builds a context pack for `task`.
    ///
    /// # Errors
    /// Returns [`ContextError`] if the context cannot be assembled.
    async fn load_context(&self, task: &TaskDescriptor) -> Result<serde_json::Value, ContextError>;
}

/// Produces a validated [`Plan`] for a task, given its context pack and the
/// registry document in effect.
#[async_trait::async_trait]
pub trait PlannerAdapter: Send + Sync {
    /// Produces a plan for `task`.
    ///
    /// # Errors
    /// Returns [`PlannerError`] if planning fails or produces a structurally
    /// invalid plan.
    async fn plan(
        &self,
        task: &TaskDescriptor,
        context_pack: &serde_json::Value,
        registry: &RegistryDocument,
    ) -> Result<Plan, PlannerError>;
}

/// Dispatches a single step's action to its concrete tool.
#[async_trait::async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Invokes `action` on `tool` with `input`, returning the action's
    /// output on success.
    ///
    /// # Errors
    /// Returns [`ToolError`] with a retry classification on failure.
    async fn invoke(&self, tool: &Tool, action: &Action, input: &serde_json::Value) -> Result<serde_json::Value, ToolError>;
}
