// crates/wmag-core/src/model/policy_doc.rs
// ============================================================================
// Module: Policy Document
// Description: The registry-level representation of a policy: a condition
// tree paired with an effect. Evaluation lives in wmag-policy; this module
// only holds the data shape so wmag-core stays free of evaluation logic.
// Grounded on: ret-logic's Requirement<P> tree shape (decision-gate's
// internal path-only DSL crate), reimplemented here as a plain deserialized
// JSON tree rather than a textual DSL, since policy documents already arrive
// as parsed JSON.
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::identifiers::PolicyId;

/// Maximum nesting depth of a [`Condition`] tree, enforced at registry-load
/// validation time. Mirrors `ret_logic::dsl::MAX_DSL_NESTING`.
pub const MAX_CONDITION_NESTING: u32 = 32;

/// A boolean condition over the run's submitting principal and the action
/// or tool a step targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    /// Matches if the step's action id matches `pattern` (glob syntax:
    /// `*` and `?` only).
    ActionGlob {
        /// Glob pattern matched against the step's action id.
        pattern: String,
    },
    /// Matches if the step's tool id matches `pattern`.
    ToolGlob {
        /// Glob pattern matched against the action's tool id.
        pattern: String,
    },
    /// Matches if the submitting principal holds any of `roles`.
    RolesAny {
        /// Roles; any one present on the principal satisfies this condition.
        roles: Vec<String>,
    },
    /// Matches if the submitting principal holds all of `roles`.
    RolesAll {
        /// Roles; every one must be present on the principal.
        roles: Vec<String>,
    },
    /// Matches if every child condition matches.
    All {
        /// Child conditions, all of which must match.
        of: Vec<Condition>,
    },
    /// Matches if any child condition matches.
    Any {
        /// Child conditions, any of which must match.
        of: Vec<Condition>,
    },
    /// Matches if the child condition does not match.
    Not {
        /// Child condition to negate.
        of: Box<Condition>,
    },
}

impl Condition {
    /// Returns the maximum nesting depth of this condition tree, where a
    /// leaf condition has depth 1.
    #[must_use]
    pub fn depth(&self) -> u32 {
        match self {
            Self::ActionGlob { .. } | Self::ToolGlob { .. } | Self::RolesAny { .. } | Self::RolesAll { .. } => 1,
            Self::All { of } | Self::Any { of } => 1 + of.iter().map(Condition::depth).max().unwrap_or(0),
            Self::Not { of } => 1 + of.depth(),
        }
    }
}

/// An obligation a [`Effect`] may attach, carried out by the pipeline or
/// executor after a policy matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Obligation {
    /// Require a human approval before the matched step(s) may proceed.
    RequireApproval {
        /// Roles eligible to decide the approval.
        approver_roles: Vec<String>,
    },
    /// Record an audit log entry when the matched step(s) execute.
    AuditLog {
        /// Free-text reason recorded alongside the entry.
        reason: String,
    },
    /// Require an artifact of `artifact_type` to appear in the run's event
    /// log before it may reach `Completed`.
    MustEmitArtifact {
        /// The artifact type that must appear.
        artifact_type: crate::model::event::ArtifactType,
    },
    /// Require the matched step's recorded `policy_ids` to include
    /// `policy_id`. Side-effect steps only.
    MustReferencePolicyId {
        /// The policy id that must be referenced.
        policy_id: PolicyId,
    },
}

/// The effect a matching policy produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Effect {
    /// Whether a match allows or denies the matched step(s).
    pub allow: bool,
    /// Human-readable reason surfaced in the `POLICY_DENIED` error message
    /// when this effect denies. Ignored when `allow` is `true`.
    #[serde(default)]
    pub deny_reason: Option<String>,
    /// Overrides the matched step's cost units. Combination rule: the
    /// last-matching policy (in descending-priority evaluation order) wins.
    #[serde(default)]
    pub set_cost_units: Option<u64>,
    /// Obligations attached to this effect, applied regardless of
    /// `allow`/`deny` (e.g. an audit log entry on denial).
    #[serde(default)]
    pub obligations: Vec<Obligation>,
}

/// A single policy: a condition tree, an effect, and evaluation order
/// metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Policy identifier.
    pub policy_id: PolicyId,
    /// Pipeline phase this policy applies to (e.g. `"gate_approval"`).
    pub phase: String,
    /// Evaluation priority; higher values are evaluated first. Every
    /// matching policy's effect is combined (see `wmag_policy::evaluate`),
    /// not just the first match.
    pub priority: i32,
    /// Condition tree gating this policy's effect.
    pub when: Condition,
    /// Effect applied when `when` matches.
    pub effect: Effect,
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
    fn depth_of_leaf_condition_is_one() {
        let c = Condition::ActionGlob { pattern: "*".to_string() };
        assert_eq!(c.depth(), 1);
    }

    #[test]
    fn depth_accumulates_through_nesting() {
        let c = Condition::All {
            of: vec![Condition::Not {
                of: Box::new(Condition::RolesAny { roles: vec!["admin".to_string()] }),
            }],
        };
        assert_eq!(c.depth(), 3);
    }
}
