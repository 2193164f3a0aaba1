// crates/wmag-pipeline/src/plan_eval.rs
// ============================================================================
// Module: Plan-Phase Policy Evaluation
// Description: Evaluates every step in a freshly planned run against the
// registry's `plan`-phase policies, combining the per-step verdicts into one
// plan-level decision: whether the plan is allowed at all, whether it
// requires a human approval, and which steps carry a per-step budget cap.
// Grounded on: wmag-executor::executor's exec-phase gate (same `evaluate`
// call, same obligation match), generalized from "gate one step" to "gate
// every step a plan contains" since `GateApproval` decides for the whole
// plan up front rather than step by step during execution.
// ============================================================================

use std::collections::HashMap;
use std::collections::HashSet;

use serde::Serialize;
use wmag_core::identifiers::PolicyId;
use wmag_core::identifiers::StepId;
use wmag_core::model::plan::Plan;
use wmag_core::model::policy_doc::Obligation;
use wmag_core::model::registry_doc::RegistryDocument;
use wmag_policy::EvalContext;
use wmag_policy::evaluate;

use crate::error::PipelineError;

/// The policy name of the `GateApproval` phase, as referenced by
/// [`wmag_core::model::policy_doc::Policy::phase`].
const PLAN_PHASE: &str = "plan";

/// The combined outcome of evaluating every step of a plan against the
/// registry's `plan`-phase policies.
#[derive(Debug, Clone, Serialize)]
pub struct PlanEvaluation {
    /// Whether every step in the plan is allowed to proceed. Sticky: one
    /// denied step denies the whole plan, matching the per-step deny-sticky
    /// rule `wmag_policy::evaluate` applies within a single evaluation.
    pub allow: bool,
    /// The `deny_reason` of the last-matching denying policy across every
    /// step, if any carried one, surfaced in the run's `Failed` status
    /// detail when the plan is denied.
    pub deny_reason: Option<String>,
    /// Whether any step's matched policies required approval, or the plan
    /// itself declared `requires_approval`.
    pub require_approval: bool,
    /// Roles eligible to decide the approval, the union of every matched
    /// `require_approval` obligation's `approver_roles`. Empty means no
    /// policy restricted eligibility, so any role may decide it.
    pub eligible_approver_roles: Vec<String>,
    /// Every obligation matched across every step, in per-step evaluation
    /// order, flattened for the `must_emit_artifact` check at `Synthesize`.
    pub obligations: Vec<Obligation>,
    /// Every policy id that matched for any step, deduplicated.
    pub matched_policy_ids: Vec<PolicyId>,
    /// Per-step `set_cost_units` overrides from the step's combined verdict,
    /// applied by `ExecuteSteps` in place of the step's own `cost_units`.
    pub step_cost_overrides: HashMap<StepId, u64>,
}

/// Evaluates `plan` against `registry`'s `plan`-phase policies, one step at a
/// time, and combines the result.
///
/// # Errors
/// Returns [`PipelineError::UnknownAction`] or [`PipelineError::UnknownTool`]
/// if a step references an action or tool absent from `registry`.
pub(crate) fn evaluate_plan_policies(
    plan: &Plan,
    registry: &RegistryDocument,
    principal_roles: &HashSet<String>,
) -> Result<PlanEvaluation, PipelineError> {
    let mut allow = true;
    let mut deny_reason: Option<String> = None;
    let mut require_approval = plan.requires_approval;
    let mut eligible_approver_roles: Vec<String> = Vec::new();
    let mut obligations = Vec::new();
    let mut matched_policy_ids: Vec<PolicyId> = Vec::new();
    let mut step_cost_overrides = HashMap::new();

    for step in &plan.steps {
        let action = registry
            .action(&step.action_id)
            .ok_or_else(|| PipelineError::UnknownAction(step.action_id.clone()))?;
        let tool = registry
            .tool(&action.tool_id)
            .ok_or_else(|| PipelineError::UnknownTool(action.tool_id.clone()))?;

        let ctx = EvalContext {
            principal_roles,
            action_id: action.action_id.as_str(),
            tool_id: tool.tool_id.as_str(),
        };
        let verdict = evaluate(&registry.policies, PLAN_PHASE, &ctx);

        if !verdict.allow {
            allow = false;
            if verdict.deny_reason.is_some() {
                deny_reason = verdict.deny_reason.clone();
            }
        }
        if verdict.require_approval {
            require_approval = true;
        }
        if let Some(cost_units) = verdict.effective_cost_units {
            step_cost_overrides.insert(step.step_id.clone(), cost_units);
        }
        for id in verdict.matched_policy_ids {
            if !matched_policy_ids.contains(&id) {
                matched_policy_ids.push(id);
            }
        }
        for obligation in verdict.obligations {
            match &obligation {
                Obligation::RequireApproval { approver_roles } => {
                    for role in approver_roles {
                        if !eligible_approver_roles.contains(role) {
                            eligible_approver_roles.push(role.clone());
                        }
                    }
                }
                Obligation::AuditLog { .. }
                | Obligation::MustEmitArtifact { .. }
                | Obligation::MustReferencePolicyId { .. } => {}
            }
            obligations.push(obligation);
        }
    }

    Ok(PlanEvaluation {
        allow,
        deny_reason,
        require_approval,
        eligible_approver_roles,
        obligations,
        matched_policy_ids,
        step_cost_overrides,
    })
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
    use std::collections::HashSet;

    use wmag_core::identifiers::ActionId;
    use wmag_core::identifiers::PlanId;
    use wmag_core::identifiers::ToolId;
    use wmag_core::model::plan::Step;
    use wmag_core::model::policy_doc::Condition;
    use wmag_core::model::policy_doc::Effect;
    use wmag_core::model::policy_doc::Policy;
    use wmag_core::model::registry_doc::Action;
    use wmag_core::model::registry_doc::Tool;

    use super::*;

    fn registry_with(policies: Vec<Policy>) -> RegistryDocument {
        RegistryDocument {
            tools: vec![Tool { tool_id: ToolId::new("smtp"), description: String::new(), connection: serde_json::json!({}) }],
            actions: vec![Action {
                action_id: ActionId::new("send_email"),
                version: "1".to_string(),
                tool_id: ToolId::new("smtp"),
                schema_in: serde_json::json!({}),
                schema_out: serde_json::json!({}),
                side_effect: true,
                default_retry_class: "internal".to_string(),
                idempotency: wmag_core::model::registry_doc::Idempotency {
                    strategy: wmag_core::model::registry_doc::IdempotencyStrategy::Hash,
                    fields: None,
                },
                security: wmag_core::model::registry_doc::Security::default(),
            }],
            roles: vec![],
            policies,
            limits: wmag_core::model::registry_doc::Limits::default(),
            retry_classes: vec![],
        }
    }

    fn plan_with_one_step() -> Plan {
        Plan {
            plan_id: PlanId::new("p1"),
            steps: vec![Step {
                step_id: StepId::new("s1"),
                action_id: ActionId::new("send_email"),
                depends_on: vec![],
                input: serde_json::json!({}),
                cost_units: Some(10),
                continue_on_error: false,
            }],
            requires_approval: false,
        }
    }

    #[test]
    fn no_matching_policy_allows_without_approval() {
        let registry = registry_with(vec![]);
        let plan = plan_with_one_step();
        let eval = evaluate_plan_policies(&plan, &registry, &HashSet::new()).expect("evaluate");
        assert!(eval.allow);
        assert!(!eval.require_approval);
    }

    #[test]
    fn matched_deny_denies_the_whole_plan() {
        let registry = registry_with(vec![Policy {
            policy_id: PolicyId::new("deny-email"),
            phase: "plan".to_string(),
            priority: 0,
            when: Condition::ActionGlob { pattern: "send_*".to_string() },
            effect: Effect {
                allow: false,
                deny_reason: Some("email blocked".to_string()),
                set_cost_units: None,
                obligations: vec![],
            },
        }]);
        let plan = plan_with_one_step();
        let eval = evaluate_plan_policies(&plan, &registry, &HashSet::new()).expect("evaluate");
        assert!(!eval.allow);
        assert_eq!(eval.deny_reason.as_deref(), Some("email blocked"));
    }

    #[test]
    fn set_cost_units_obligation_is_recorded_per_step() {
        let registry = registry_with(vec![Policy {
            policy_id: PolicyId::new("cap-email"),
            phase: "plan".to_string(),
            priority: 0,
            when: Condition::ActionGlob { pattern: "*".to_string() },
            effect: Effect { allow: true, deny_reason: None, set_cost_units: Some(3), obligations: vec![] },
        }]);
        let plan = plan_with_one_step();
        let eval = evaluate_plan_policies(&plan, &registry, &HashSet::new()).expect("evaluate");
        assert_eq!(eval.step_cost_overrides.get(&StepId::new("s1")), Some(&3));
    }

    #[test]
    fn require_approval_obligation_collects_approver_roles() {
        let registry = registry_with(vec![Policy {
            policy_id: PolicyId::new("gate-email"),
            phase: "plan".to_string(),
            priority: 0,
            when: Condition::ActionGlob { pattern: "*".to_string() },
            effect: Effect {
                allow: true,
                deny_reason: None,
                set_cost_units: None,
                obligations: vec![Obligation::RequireApproval { approver_roles: vec!["admin".to_string()] }],
            },
        }]);
        let plan = plan_with_one_step();
        let eval = evaluate_plan_policies(&plan, &registry, &HashSet::new()).expect("evaluate");
        assert!(eval.require_approval);
        assert_eq!(eval.eligible_approver_roles, vec!["admin".to_string()]);
    }
}
