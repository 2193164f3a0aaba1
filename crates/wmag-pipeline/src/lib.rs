// crates/wmag-pipeline/src/lib.rs
// ============================================================================
// Crate: wmag-pipeline
// ============================================================================
//! Drives a submitted mission through the kernel's phase state machine one
//! transition or step dispatch at a time ([`Pipeline::advance`]), recovering
//! all in-memory state from the event log on every call so a worker may stop
//! and resume a run freely ([`reconstruct::reconstruct_state`]).

#![forbid(unsafe_code)]

pub mod error;
pub mod pipeline;
pub mod plan_eval;
pub mod reconstruct;

pub use error::KernelError;
pub use error::PipelineError;
pub use pipeline::AdvanceOutcome;
pub use pipeline::Pipeline;
pub use plan_eval::PlanEvaluation;
pub use reconstruct::ReconstructedState;
