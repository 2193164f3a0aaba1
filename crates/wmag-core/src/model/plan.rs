// crates/wmag-core/src/model/plan.rs
// ============================================================================
// Module: Plan
// Description: A validated, acyclic step DAG produced by the planner
// adapter and consumed by the executor.
// ============================================================================

use std::collections::HashMap;
use std::collections::HashSet;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::identifiers::ActionId;
use crate::identifiers::PlanId;
use crate::identifiers::StepId;

/// A single node in a [`Plan`]'s step DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Step identifier, unique within the plan.
    pub step_id: StepId,
    /// Registry action this step invokes.
    pub action_id: ActionId,
    /// Step ids that must complete before this step may start.
    pub depends_on: Vec<StepId>,
    /// Action-specific input, validated against the action's `schema_in`
    /// by the executor before dispatch.
    pub input: serde_json::Value,
    /// Cost units this step consumes, overriding the action's default cost
    /// when present.
    #[serde(default)]
    pub cost_units: Option<u64>,
    /// If true, a `Failed` outcome for this step does not fail the run.
    #[serde(default)]
    pub continue_on_error: bool,
}

/// A plan: an ordered, acyclic graph of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Plan identifier.
    pub plan_id: PlanId,
    /// Steps in the plan. Order is not significant; `depends_on` encodes
    /// the execution order.
    pub steps: Vec<Step>,
    /// Whether the plan declares that it must pass a human approval gate
    /// before execution, independent of any policy obligation. GateApproval
    /// requires approval if this is `true` or if a plan-phase policy's
    /// `require_approval` obligation matched.
    #[serde(default)]
    pub requires_approval: bool,
}

/// Errors raised while validating a [`Plan`]'s step graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    /// Two steps share the same `step_id`.
    #[error("duplicate step id: {0}")]
    DuplicateStepId(StepId),
    /// A step depends on a `step_id` that does not exist in the plan.
    #[error("step {step} depends on unknown step {depends_on}")]
    UnknownDependency {
        /// The step with the dangling dependency.
        step: StepId,
        /// The missing dependency.
        depends_on: StepId,
    },
    /// The dependency graph contains a cycle.
    #[error("step dependency graph contains a cycle reachable from {0}")]
    CycleDetected(StepId),
}

impl Plan {
    /// Validates that the plan's step graph has no duplicate ids, no
    /// dangling dependencies, and no cycles.
    ///
    /// # Errors
    /// Returns the first [`PlanError`] encountered.
    pub fn validate(&self) -> Result<(), PlanError> {
        let mut by_id: HashMap<&StepId, &Step> = HashMap::new();
        for step in &self.steps {
            if by_id.insert(&step.step_id, step).is_some() {
                return Err(PlanError::DuplicateStepId(step.step_id.clone()));
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if !by_id.contains_key(dep) {
                    return Err(PlanError::UnknownDependency {
                        step: step.step_id.clone(),
                        depends_on: dep.clone(),
                    });
                }
            }
        }

        let mut visiting: HashSet<&StepId> = HashSet::new();
        let mut visited: HashSet<&StepId> = HashSet::new();
        for step in &self.steps {
            self.visit(&step.step_id, &by_id, &mut visiting, &mut visited)?;
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        step_id: &'a StepId,
        by_id: &HashMap<&'a StepId, &'a Step>,
        visiting: &mut HashSet<&'a StepId>,
        visited: &mut HashSet<&'a StepId>,
    ) -> Result<(), PlanError> {
        if visited.contains(step_id) {
            return Ok(());
        }
        if !visiting.insert(step_id) {
            return Err(PlanError::CycleDetected(step_id.clone()));
        }
        if let Some(step) = by_id.get(step_id) {
            for dep in &step.depends_on {
                self.visit(dep, by_id, visiting, visited)?;
            }
        }
        visiting.remove(step_id);
        visited.insert(step_id);
        Ok(())
    }

    /// Returns the steps in a valid topological execution order.
    ///
    /// # Errors
    /// Propagates [`Plan::validate`] failures; callers should validate
    /// before ordering.
    pub fn topological_order(&self) -> Result<Vec<&Step>, PlanError> {
        self.validate()?;
        let by_id: HashMap<&StepId, &Step> =
            self.steps.iter().map(|s| (&s.step_id, s)).collect();
        let mut order = Vec::with_capacity(self.steps.len());
        let mut visited: HashSet<&StepId> = HashSet::new();
        for step in &self.steps {
            self.topo_visit(&step.step_id, &by_id, &mut visited, &mut order);
        }
        Ok(order)
    }

    fn topo_visit<'a>(
        &'a self,
        step_id: &'a StepId,
        by_id: &HashMap<&'a StepId, &'a Step>,
        visited: &mut HashSet<&'a StepId>,
        order: &mut Vec<&'a Step>,
    ) {
        if !visited.insert(step_id) {
            return;
        }
        if let Some(step) = by_id.get(step_id) {
            for dep in &step.depends_on {
                self.topo_visit(dep, by_id, visited, order);
            }
            order.push(step);
        }
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

    fn step(id: &str, deps: &[&str]) -> Step {
        Step {
            step_id: StepId::new(id),
            action_id: ActionId::new("noop"),
            depends_on: deps.iter().map(|d| StepId::new(*d)).collect(),
            input: serde_json::json!({}),
            cost_units: None,
            continue_on_error: false,
        }
    }

    #[test]
    fn validate_accepts_acyclic_dag() {
        let plan = Plan {
            plan_id: PlanId::new("p1"),
            steps: vec![step("a", &[]), step("b", &["a"]), step("c", &["a", "b"])],
            requires_approval: false,
        };
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn validate_rejects_duplicate_step_ids() {
        let plan = Plan {
            plan_id: PlanId::new("p1"),
            steps: vec![step("a", &[]), step("a", &[])],
            requires_approval: false,
        };
        assert_eq!(
            plan.validate().unwrap_err(),
            PlanError::DuplicateStepId(StepId::new("a"))
        );
    }

    #[test]
    fn validate_rejects_unknown_dependency() {
        let plan = Plan {
            plan_id: PlanId::new("p1"),
            steps: vec![step("a", &["ghost"])],
            requires_approval: false,
        };
        assert_eq!(
            plan.validate().unwrap_err(),
            PlanError::UnknownDependency {
                step: StepId::new("a"),
                depends_on: StepId::new("ghost"),
            }
        );
    }

    #[test]
    fn validate_rejects_cycle() {
        let plan = Plan {
            plan_id: PlanId::new("p1"),
            steps: vec![step("a", &["b"]), step("b", &["a"])],
            requires_approval: false,
        };
        assert!(matches!(
            plan.validate().unwrap_err(),
            PlanError::CycleDetected(_)
        ));
    }

    #[test]
    fn topological_order_respects_dependencies() {
        let plan = Plan {
            plan_id: PlanId::new("p1"),
            steps: vec![step("c", &["a", "b"]), step("b", &["a"]), step("a", &[])],
            requires_approval: false,
        };
        let order: Vec<&str> = plan
            .topological_order()
            .expect("valid plan")
            .into_iter()
            .map(|s| s.step_id.as_str())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }
}
