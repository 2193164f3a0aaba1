// crates/wmag-worker/src/lib.rs
// ============================================================================
// Crate: wmag-worker
// ============================================================================
//! A pool of job-claiming workers driving [`wmag_pipeline::Pipeline`] runs
//! to completion, failure, or an approval wait, under an in-process tenant
//! concurrency cap and the registry's step-dispatch rate limit.

#![forbid(unsafe_code)]

pub mod error;
pub mod worker;

pub use error::WorkerError;
pub use worker::DEFAULT_POLL_INTERVAL;
pub use worker::WorkerPool;
pub use worker::WorkerPoolConfig;
