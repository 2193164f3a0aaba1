// crates/wmag-policy/src/evaluator.rs
// ============================================================================
// Module: Policy Evaluator
// Description: Evaluates a phase's ordered policy list against an
// evaluation context, producing a single combined Verdict.
// Invariants (spec §4.4, the PolicyEngine contract):
//   - Policies for a phase are selected, then sorted by `priority` descending
//     (highest priority evaluated first).
//   - Effects combine in encounter order: `deny` is sticky (once any matched
//     rule denies, no later allow can override it); `require_approval` is the
//     logical OR across every matched rule; `obligations` accumulate across
//     every matched rule; `matched_policy_ids` records every rule whose
//     `when` matched, regardless of its effect.
//   - If no policy matches, the phase is allowed with no obligations
//     (default-allow), matching the teacher's fail-closed-on-error but
//     default-open-on-no-match evaluation posture.
// Grounded on: decision-gate-core::runtime::comparator's fail-closed
// evaluation pattern, generalized from TriState comparator results to a
// plain bool condition tree since wmag's conditions are never evaluated
// against missing/unknown evidence the way decision-gate's comparators are.
// ============================================================================

use std::cmp::Reverse;
use std::collections::HashSet;

use tracing::debug;
use tracing::trace;
use wmag_core::identifiers::PolicyId;
use wmag_core::model::policy_doc::Condition;
use wmag_core::model::policy_doc::Obligation;
use wmag_core::model::policy_doc::Policy;
use wmag_core::model::policy_doc::MAX_CONDITION_NESTING;

use crate::error::PolicyError;
use crate::glob::glob_match;

/// The facts a [`Condition`] tree is evaluated against.
#[derive(Debug, Clone)]
pub struct EvalContext<'a> {
    /// Roles held by the submitting principal.
    pub principal_roles: &'a HashSet<String>,
    /// Action id of the step under evaluation.
    pub action_id: &'a str,
    /// Tool id the action dispatches to.
    pub tool_id: &'a str,
}

/// The combined outcome of evaluating every policy matching a phase.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Verdict {
    /// Whether the evaluated phase is allowed to proceed. Sticky: once any
    /// matched policy denies, no later matched policy can set this back to
    /// `true`.
    pub allow: bool,
    /// The `deny_reason` of the last-matching policy that denied, if any
    /// carried one. Last-matching wins, mirroring spec.md §4.4's
    /// `set_cost_units` precedent for single-value effect fields.
    pub deny_reason: Option<String>,
    /// Whether any matched policy's obligations required approval.
    pub require_approval: bool,
    /// The `set_cost_units` of the last-matching policy that carried one, if
    /// any. Last-matching wins, per spec.md §4.4's combination rule.
    pub effective_cost_units: Option<u64>,
    /// Obligations accumulated from every matched policy's effect, in
    /// evaluation (descending priority) order.
    pub obligations: Vec<Obligation>,
    /// Every policy id whose `when` matched, regardless of its effect,
    /// in evaluation order.
    pub matched_policy_ids: Vec<PolicyId>,
}

impl Verdict {
    /// Returns the matched policy ids joined for a human-readable denial
    /// reason; empty if nothing matched.
    #[must_use]
    pub fn matched_policy_ids_joined(&self) -> String {
        self.matched_policy_ids
            .iter()
            .map(PolicyId::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Validates every policy's condition tree against [`MAX_CONDITION_NESTING`].
///
/// # Errors
/// Returns the first [`PolicyError::NestingTooDeep`] found.
pub fn validate_policies(policies: &[Policy]) -> Result<(), PolicyError> {
    for policy in policies {
        let depth = policy.when.depth();
        if depth > MAX_CONDITION_NESTING {
            return Err(PolicyError::NestingTooDeep {
                policy_id: policy.policy_id.clone(),
                max: MAX_CONDITION_NESTING,
            });
        }
    }
    Ok(())
}

/// Evaluates `condition` against `ctx`. Composition is a tree so no cycle is
/// possible; unknown condition keys would fail to deserialize upstream and
/// never reach this function.
fn eval_condition(condition: &Condition, ctx: &EvalContext<'_>) -> bool {
    match condition {
        Condition::ActionGlob { pattern } => glob_match(pattern, ctx.action_id),
        Condition::ToolGlob { pattern } => glob_match(pattern, ctx.tool_id),
        Condition::RolesAny { roles } => roles.iter().any(|r| ctx.principal_roles.contains(r)),
        Condition::RolesAll { roles } => roles.iter().all(|r| ctx.principal_roles.contains(r)),
        Condition::All { of } => of.iter().all(|c| eval_condition(c, ctx)),
        Condition::Any { of } => of.iter().any(|c| eval_condition(c, ctx)),
        Condition::Not { of } => !eval_condition(of, ctx),
    }
}

/// Evaluates `policies` restricted to `phase`, combining every matched
/// policy's effect per spec.md §4.4: deny sticky, `require_approval` ORed,
/// obligations and matched ids accumulated across matches in descending
/// `priority` order. Returns a default-allow verdict if nothing matches.
///
/// Callers should validate the registry with [`validate_policies`] once at
/// load time rather than on every evaluation.
#[must_use]
pub fn evaluate(policies: &[Policy], phase: &str, ctx: &EvalContext<'_>) -> Verdict {
    let mut ordered: Vec<&Policy> = policies.iter().filter(|p| p.phase == phase).collect();
    ordered.sort_by_key(|p| Reverse(p.priority));

    let mut verdict = Verdict { allow: true, ..Verdict::default() };

    for policy in ordered {
        trace!(policy_id = %policy.policy_id, phase, "evaluating policy");
        if !eval_condition(&policy.when, ctx) {
            continue;
        }
        debug!(policy_id = %policy.policy_id, phase, allow = policy.effect.allow, "policy matched");
        verdict.matched_policy_ids.push(policy.policy_id.clone());
        if !policy.effect.allow {
            verdict.allow = false;
            if policy.effect.deny_reason.is_some() {
                verdict.deny_reason = policy.effect.deny_reason.clone();
            }
        }
        if policy.effect.set_cost_units.is_some() {
            verdict.effective_cost_units = policy.effect.set_cost_units;
        }
        for obligation in &policy.effect.obligations {
            if matches!(obligation, Obligation::RequireApproval { .. }) {
                verdict.require_approval = true;
            }
            verdict.obligations.push(obligation.clone());
        }
    }

    if verdict.matched_policy_ids.is_empty() {
        debug!(phase, "no policy matched, defaulting to allow");
    }
    verdict
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

    use wmag_core::identifiers::PolicyId;

    use super::*;

    fn ctx<'a>(roles: &'a HashSet<String>, action_id: &'a str, tool_id: &'a str) -> EvalContext<'a> {
        EvalContext { principal_roles: roles, action_id, tool_id }
    }

    fn policy(id: &str, phase: &str, priority: i32, when: Condition, allow: bool) -> Policy {
        Policy {
            policy_id: PolicyId::new(id),
            phase: phase.to_string(),
            priority,
            when,
            effect: Effect { allow, deny_reason: None, set_cost_units: None, obligations: Vec::new() },
        }
    }

    use wmag_core::model::policy_doc::Effect;

    #[test]
    fn no_matching_policy_defaults_to_allow() {
        let roles = HashSet::new();
        let verdict = evaluate(&[], "gate_approval", &ctx(&roles, "deploy.apply", "k8s"));
        assert!(verdict.allow);
        assert!(verdict.matched_policy_ids.is_empty());
    }

    #[test]
    fn deny_is_sticky_regardless_of_evaluation_order() {
        let roles = HashSet::new();
        let policies = vec![
            policy(
                "deny-deploy",
                "gate_approval",
                10,
                Condition::ActionGlob { pattern: "deploy.*".to_string() },
                false,
            ),
            policy(
                "allow-all",
                "gate_approval",
                0,
                Condition::ActionGlob { pattern: "*".to_string() },
                true,
            ),
        ];
        let verdict = evaluate(&policies, "gate_approval", &ctx(&roles, "deploy.apply", "k8s"));
        assert!(!verdict.allow, "a matched deny must win even though a lower-priority allow also matched");
        assert_eq!(
            verdict.matched_policy_ids,
            vec![PolicyId::new("deny-deploy"), PolicyId::new("allow-all")],
            "both matches are recorded in descending-priority evaluation order"
        );
    }

    #[test]
    fn deny_reason_from_the_matched_deny_surfaces_in_the_verdict() {
        let roles = HashSet::new();
        let policies = vec![Policy {
            policy_id: PolicyId::new("deny-email"),
            phase: "exec".to_string(),
            priority: 0,
            when: Condition::ActionGlob { pattern: "send_email".to_string() },
            effect: Effect {
                allow: false,
                deny_reason: Some("blocked".to_string()),
                set_cost_units: None,
                obligations: vec![],
            },
        }];
        let verdict = evaluate(&policies, "exec", &ctx(&roles, "send_email", "smtp"));
        assert!(!verdict.allow);
        assert_eq!(verdict.deny_reason.as_deref(), Some("blocked"));
    }

    #[test]
    fn set_cost_units_from_the_last_matching_policy_surfaces_in_the_verdict() {
        let roles = HashSet::new();
        let policies = vec![
            Policy {
                policy_id: PolicyId::new("cost-low-priority"),
                phase: "exec".to_string(),
                priority: 0,
                when: Condition::ActionGlob { pattern: "*".to_string() },
                effect: Effect { allow: true, deny_reason: None, set_cost_units: Some(5), obligations: vec![] },
            },
            Policy {
                policy_id: PolicyId::new("cost-high-priority"),
                phase: "exec".to_string(),
                priority: 10,
                when: Condition::ActionGlob { pattern: "deploy.*".to_string() },
                effect: Effect { allow: true, deny_reason: None, set_cost_units: Some(20), obligations: vec![] },
            },
        ];
        let verdict = evaluate(&policies, "exec", &ctx(&roles, "deploy.apply", "k8s"));
        assert_eq!(
            verdict.effective_cost_units,
            Some(5),
            "last-matching policy in descending-priority evaluation order wins, so the lower-priority \
             rule evaluated second overrides the higher-priority one"
        );
    }

    #[test]
    fn require_approval_is_logical_or_across_matched_rules() {
        let roles = HashSet::new();
        let policies = vec![
            policy("allow-all", "gate_approval", 10, Condition::ActionGlob { pattern: "*".to_string() }, true),
            Policy {
                policy_id: PolicyId::new("gate-deploy"),
                phase: "gate_approval".to_string(),
                priority: 0,
                when: Condition::ActionGlob { pattern: "deploy.*".to_string() },
                effect: Effect {
                    allow: true,
                    deny_reason: None,
                    set_cost_units: None,
                    obligations: vec![Obligation::RequireApproval { approver_roles: vec!["admin".to_string()] }],
                },
            },
        ];
        let verdict = evaluate(&policies, "gate_approval", &ctx(&roles, "deploy.apply", "k8s"));
        assert!(verdict.allow);
        assert!(verdict.require_approval);
        assert_eq!(verdict.obligations.len(), 1);
    }

    #[test]
    fn roles_any_matches_when_principal_has_one_of_the_roles() {
        let mut roles = HashSet::new();
        roles.insert("operator".to_string());
        let policies = vec![policy(
            "operator-only",
            "execute_steps",
            0,
            Condition::RolesAny { roles: vec!["operator".to_string(), "admin".to_string()] },
            true,
        )];
        let verdict = evaluate(&policies, "execute_steps", &ctx(&roles, "any", "any"));
        assert!(verdict.allow);
        assert_eq!(verdict.matched_policy_ids, vec![PolicyId::new("operator-only")]);
    }

    #[test]
    fn roles_all_requires_every_role() {
        let mut roles = HashSet::new();
        roles.insert("operator".to_string());
        let policies = vec![policy(
            "dual-control",
            "gate_approval",
            0,
            Condition::RolesAll { roles: vec!["operator".to_string(), "admin".to_string()] },
            false,
        )];
        let verdict = evaluate(&policies, "gate_approval", &ctx(&roles, "any", "any"));
        assert!(verdict.allow, "policy should not match since principal lacks admin");
        assert!(verdict.matched_policy_ids.is_empty());
    }

    #[test]
    fn not_inverts_child_condition() {
        let roles = HashSet::new();
        let policies = vec![policy(
            "deny-non-deploy",
            "gate_approval",
            0,
            Condition::Not { of: Box::new(Condition::ActionGlob { pattern: "deploy.*".to_string() }) },
            false,
        )];
        let verdict = evaluate(&policies, "gate_approval", &ctx(&roles, "report.generate", "noop"));
        assert!(!verdict.allow);
    }

    #[test]
    fn validate_policies_rejects_nesting_beyond_max() {
        let mut nested = Condition::ActionGlob { pattern: "*".to_string() };
        for _ in 0..MAX_CONDITION_NESTING {
            nested = Condition::Not { of: Box::new(nested) };
        }
        let policies = vec![policy("too-deep", "gate_approval", 0, nested, true)];
        let err = validate_policies(&policies).expect_err("should reject");
        assert!(matches!(err, PolicyError::NestingTooDeep { .. }));
    }

    #[test]
    fn validate_policies_accepts_tree_at_max_depth() {
        let mut nested = Condition::ActionGlob { pattern: "*".to_string() };
        for _ in 0..(MAX_CONDITION_NESTING - 1) {
            nested = Condition::Not { of: Box::new(nested) };
        }
        let policies = vec![policy("at-max", "gate_approval", 0, nested, true)];
        assert!(validate_policies(&policies).is_ok());
    }
}
