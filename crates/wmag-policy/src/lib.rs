// crates/wmag-policy/src/lib.rs
// ============================================================================
// Crate: wmag-policy
// ============================================================================
//! Data-driven policy DSL engine: evaluates a phase's condition trees against
//! a run's submitting principal and the action/tool a step targets, producing
//! an allow/deny [`evaluator::Verdict`] with attached obligations.
//!
//! This crate owns evaluation only. The condition tree's data shape lives in
//! `wmag_core::model::policy_doc` so that `wmag-registry` can deserialize and
//! merge policy documents without depending on the evaluator.

#![forbid(unsafe_code)]

pub mod error;
pub mod evaluator;
pub mod glob;

pub use error::PolicyError;
pub use evaluator::evaluate;
pub use evaluator::validate_policies;
pub use evaluator::EvalContext;
pub use evaluator::Verdict;
