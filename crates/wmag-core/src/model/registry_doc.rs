// crates/wmag-core/src/model/registry_doc.rs
// ============================================================================
// Module: Registry Document
// Description: The layered configuration document (base/org/tenant/user)
// describing tools, actions, roles, policies, and limits available to a run.
// Grounded on: decision-gate-core::interfaces::DataShapeRegistry and the
// teacher's layered-document conventions; merge mechanics live in
// wmag-registry, not here.
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::identifiers::ActionId;
use crate::identifiers::PolicyId;
use crate::identifiers::RoleId;
use crate::identifiers::ToolId;
use crate::model::policy_doc::Policy;

/// A concrete side-effecting tool a registry action may invoke.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Tool identifier.
    pub tool_id: ToolId,
    /// Human-readable description, shown to operators.
    pub description: String,
    /// Transport-specific connection info, opaque to the kernel.
    pub connection: serde_json::Value,
}

/// Which idempotency strategy an [`Action`] derives its step cache key with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStrategy {
    /// Hash `action_id`, the (optionally field-projected) args, and the
    /// tenant id together.
    Hash,
    /// Require the caller to supply `args.idempotency_key` directly.
    ExplicitKey,
}

/// An action's idempotency key derivation rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Idempotency {
    /// Strategy used to derive the step's idempotency key.
    pub strategy: IdempotencyStrategy,
    /// For `strategy: hash`, the args fields to project before hashing.
    /// `None` hashes the full args value.
    #[serde(default)]
    pub fields: Option<Vec<String>>,
}

/// An action's authorization requirements.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Security {
    /// Roles permitted to invoke this action. Empty means any role.
    #[serde(default)]
    pub allowed_roles: Vec<String>,
    /// Whether this action requires a human approval regardless of any
    /// policy match.
    #[serde(default)]
    pub requires_approval: bool,
}

/// A registry action: the unit a [`crate::model::plan::Step`] invokes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Action identifier.
    pub action_id: ActionId,
    /// Version string; bumping this naturally changes derived idempotency
    /// keys, which is how schema evolution is meant to be handled.
    pub version: String,
    /// Tool this action dispatches to.
    pub tool_id: ToolId,
    /// JSON Schema describing valid step input.
    pub schema_in: serde_json::Value,
    /// JSON Schema describing valid step output.
    pub schema_out: serde_json::Value,
    /// Whether invoking this action has an observable side effect outside
    /// the kernel. Side-effect actions must derive an idempotency key before
    /// dispatch.
    pub side_effect: bool,
    /// Retry class applied to failures from this action by default.
    pub default_retry_class: String,
    /// Idempotency key derivation rule for this action.
    pub idempotency: Idempotency,
    /// Authorization requirements for this action.
    pub security: Security,
}

/// A named collection of permissions grantable to a submitting principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    /// Role identifier.
    pub role_id: RoleId,
    /// Human-readable description.
    pub description: String,
}

/// Concrete numeric limits enforced by the executor and rate limiter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Limits {
    /// Maximum budget units a single run may consume.
    pub max_budget_per_run: u64,
    /// Maximum concurrent steps a single run may execute.
    pub max_concurrent_steps: u32,
    /// Maximum concurrent runs a single tenant may have in flight.
    pub max_concurrent_runs_per_tenant: u32,
    /// Fixed rate-limit window length, in seconds.
    pub rate_limit_window_s: u64,
    /// Maximum requests per tenant within one rate-limit window.
    pub rate_limit_max_per_window: u64,
}

/// A single retry-class entry in the registry's retry taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retry class name, referenced by [`Action::default_retry_class`] and
    /// by individual step failures.
    pub class: String,
    /// Whether failures in this class are retryable at all.
    pub retryable: bool,
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Base backoff, in milliseconds, before jitter.
    pub base_backoff_ms: u64,
    /// Multiplicative backoff factor applied per attempt.
    pub backoff_factor: f64,
    /// Backoff cap, in milliseconds.
    pub backoff_cap_ms: u64,
}

/// The fully layered registry document in effect for a run: the result of
/// merging base, org, tenant, and user layers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryDocument {
    /// Tools keyed by id for deterministic iteration.
    pub tools: Vec<Tool>,
    /// Actions keyed by id for deterministic iteration.
    pub actions: Vec<Action>,
    /// Roles keyed by id for deterministic iteration.
    pub roles: Vec<Role>,
    /// Policies, evaluated in `priority` order by [`crate::model::policy_doc`].
    pub policies: Vec<Policy>,
    /// Effective numeric limits after layering.
    pub limits: Limits,
    /// Retry taxonomy entries, keyed by `class`.
    pub retry_classes: Vec<RetryConfig>,
}

impl RegistryDocument {
    /// Looks up an action by id.
    #[must_use]
    pub fn action(&self, id: &ActionId) -> Option<&Action> {
        self.actions.iter().find(|a| &a.action_id == id)
    }

    /// Looks up a tool by id.
    #[must_use]
    pub fn tool(&self, id: &ToolId) -> Option<&Tool> {
        self.tools.iter().find(|t| &t.tool_id == id)
    }

    /// Looks up a retry class by name.
    #[must_use]
    pub fn retry_class(&self, class: &str) -> Option<&RetryConfig> {
        self.retry_classes.iter().find(|r| r.class == class)
    }

    /// Looks up a policy by id. Exposed for operator tooling
    /// (e.g. `wmag-cli verify`); evaluation walks `policies` directly.
    #[must_use]
    pub fn policy(&self, id: &PolicyId) -> Option<&Policy> {
        self.policies.iter().find(|p| &p.policy_id == id)
    }
}
