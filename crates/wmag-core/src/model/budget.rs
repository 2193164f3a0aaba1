// crates/wmag-core/src/model/budget.rs
// ============================================================================
// Module: Budget
// Description: Per-run, per-metric budget accounting. The Run aggregate
// carries a display-only cost_units mirror (see model::run::Run::budget_used);
// this module holds the store-facing counter row, tracked independently for
// `tool_calls`, `llm_calls`, and `cost_units`, and the metric names emitted
// around it.
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::identifiers::RunId;

/// Metric name for budget consumption, emitted as a `tracing` field on
/// every executor attempt.
pub const METRIC_BUDGET_USED: &str = "wmag_run_budget_used";

/// Metric name for budget-exceeded denials, emitted when the executor
/// refuses to dispatch a step over budget.
pub const METRIC_BUDGET_EXCEEDED: &str = "wmag_run_budget_exceeded_total";

/// One of the three independently-ceilinged quantities a run's budget
/// tracks. Each metric shares the same numeric `limit` on
/// [`BudgetCounter`]; the registry's `Limits` names only a single scalar
/// ceiling, applied to all three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetMetric {
    /// Number of tool invocations dispatched.
    ToolCalls,
    /// Number of planner (LLM) calls made.
    LlmCalls,
    /// Cost units consumed, after any policy `set_cost_units` override.
    CostUnits,
}

/// A run's persisted budget counter row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetCounter {
    /// Run this counter tracks.
    pub run_id: RunId,
    /// Tool invocations dispatched so far.
    pub tool_calls: u64,
    /// Planner (LLM) calls made so far.
    pub llm_calls: u64,
    /// Cost units consumed so far.
    pub cost_units: u64,
    /// Ceiling shared by all three metrics, from the effective registry's
    /// `Limits::max_budget_per_run`.
    pub limit: u64,
}

impl BudgetCounter {
    /// Returns this counter's current value for `metric`.
    #[must_use]
    pub fn value(&self, metric: BudgetMetric) -> u64 {
        match metric {
            BudgetMetric::ToolCalls => self.tool_calls,
            BudgetMetric::LlmCalls => self.llm_calls,
            BudgetMetric::CostUnits => self.cost_units,
        }
    }

    /// Returns whether debiting `amount` more units of `metric` would
    /// exceed `limit`.
    #[must_use]
    pub fn would_exceed(&self, metric: BudgetMetric, amount: u64) -> bool {
        self.value(metric).saturating_add(amount) > self.limit
    }
}
