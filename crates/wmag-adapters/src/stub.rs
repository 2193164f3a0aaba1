// crates/wmag-adapters/src/stub.rs
// ============================================================================
// Module: Stub Adapters
// Description: Minimal in-process implementations of the adapter traits,
// used by wmag-cli's default configuration and the kernel's own integration
// tests. Real deployments supply their own ContextProvider/PlannerAdapter/
// ToolAdapter wired to an LLM planner and concrete tool transports.
// ============================================================================

use tracing::debug;
use wmag_core::identifiers::PlanId;
use wmag_core::identifiers::StepId;
use wmag_core::model::plan::Plan;
use wmag_core::model::plan::Step;
use wmag_core::model::registry_doc::Action;
use wmag_core::model::registry_doc::RegistryDocument;
use wmag_core::model::registry_doc::Tool;

use crate::error::ContextError;
use crate::error::PlannerError;
use crate::error::ToolError;
use crate::traits::ContextProvider;
use crate::traits::PlannerAdapter;
use crate::traits::TaskDescriptor;
use crate::traits::ToolAdapter;

/// A [`ContextProvider`] that returns an empty context pack.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyContextProvider;

#[async_trait::async_trait]
impl ContextProvider for EmptyContextProvider {
    async fn load_context(&self, task: &TaskDescriptor) -> Result<serde_json::Value, ContextError> {
        debug!(task_id = %task.task_id, "loading empty context pack");
        Ok(serde_json::json!({}))
    }
}

/// A [`PlannerAdapter`] that produces a single-step plan invoking the first
/// action in the registry, passing the mission's raw `params` through as
/// the step's input. Useful for exercising the pipeline end-to-end without
/// a real planner.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstActionPlannerAdapter;

#[async_trait::async_trait]
impl PlannerAdapter for FirstActionPlannerAdapter {
    async fn plan(
        &self,
        task: &TaskDescriptor,
        _context_pack: &serde_json::Value,
        registry: &RegistryDocument,
    ) -> Result<Plan, PlannerError> {
        let action = registry
            .actions
            .first()
            .ok_or_else(|| PlannerError::Planner("registry has no actions to plan against".to_string()))?;
        let plan = Plan {
            plan_id: PlanId::new(format!("plan-{}", task.task_id)),
            steps: vec![Step {
                step_id: StepId::new("step-1"),
                action_id: action.action_id.clone(),
                depends_on: Vec::new(),
                input: task.params.clone(),
                cost_units: None,
                continue_on_error: false,
            }],
            requires_approval: false,
        };
        plan.validate().map_err(|err| PlannerError::InvalidPlan(err.to_string()))?;
        Ok(plan)
    }
}

/// A [`ToolAdapter`] that echoes its input back as output, simulating a
/// no-op tool for tests and local development.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoToolAdapter;

#[async_trait::async_trait]
impl ToolAdapter for EchoToolAdapter {
    async fn invoke(&self, tool: &Tool, action: &Action, input: &serde_json::Value) -> Result<serde_json::Value, ToolError> {
        debug!(tool_id = %tool.tool_id, action_id = %action.action_id, "echoing input as output");
        Ok(input.clone())
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
    use wmag_core::identifiers::ActionId;
    use wmag_core::identifiers::OrgId;
    use wmag_core::identifiers::TaskId;
    use wmag_core::identifiers::TenantId;
    use wmag_core::identifiers::ToolId;
    use wmag_core::identifiers::UserId;
    use wmag_core::model::registry_doc::Idempotency;
    use wmag_core::model::registry_doc::IdempotencyStrategy;
    use wmag_core::model::registry_doc::Limits;
    use wmag_core::model::registry_doc::Security;

    use super::*;

    fn task() -> TaskDescriptor {
        TaskDescriptor {
            task_id: TaskId::new("t1"),
            tenant_id: TenantId::new("tn1"),
            org_id: OrgId::new("o1"),
            submitted_by: UserId::new("u1"),
            goal: "do the thing".to_string(),
            params: serde_json::json!({"x": 1}),
        }
    }

    #[tokio::test]
    async fn empty_context_provider_returns_empty_object() {
        let ctx = EmptyContextProvider.load_context(&task()).await.expect("context");
        assert_eq!(ctx, serde_json::json!({}));
    }

    #[tokio::test]
    async fn first_action_planner_produces_single_valid_step() {
        let registry = RegistryDocument {
            actions: vec![Action {
                action_id: ActionId::new("noop"),
                version: "1".to_string(),
                tool_id: ToolId::new("noop-tool"),
                schema_in: serde_json::json!({}),
                schema_out: serde_json::json!({}),
                side_effect: false,
                default_retry_class: "internal".to_string(),
                idempotency: Idempotency { strategy: IdempotencyStrategy::Hash, fields: None },
                security: Security::default(),
            }],
            limits: Limits::default(),
            ..Default::default()
        };
        let plan = FirstActionPlannerAdapter.plan(&task(), &serde_json::json!({}), &registry).await.expect("plan");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].action_id, ActionId::new("noop"));
    }

    #[tokio::test]
    async fn first_action_planner_errors_on_empty_registry() {
        let registry = RegistryDocument::default();
        let err = FirstActionPlannerAdapter.plan(&task(), &serde_json::json!({}), &registry).await.expect_err("should error");
        assert!(matches!(err, PlannerError::Planner(_)));
    }

    #[tokio::test]
    async fn echo_tool_adapter_returns_input_unchanged() {
        let tool = Tool { tool_id: ToolId::new("t"), description: String::new(), connection: serde_json::json!({}) };
        let action = Action {
            action_id: ActionId::new("a"),
            version: "1".to_string(),
            tool_id: ToolId::new("t"),
            schema_in: serde_json::json!({}),
            schema_out: serde_json::json!({}),
            side_effect: false,
            default_retry_class: "internal".to_string(),
            idempotency: Idempotency { strategy: IdempotencyStrategy::Hash, fields: None },
            security: Security::default(),
        };
        let input = serde_json::json!({"hello": "world"});
        let output = EchoToolAdapter.invoke(&tool, &action, &input).await.expect("invoke");
        assert_eq!(output, input);
    }
}
