// crates/wmag-worker/src/error.rs
// ============================================================================
// Module: Worker Errors
// ============================================================================

use thiserror::Error;

/// Errors raised while driving a claimed job through the pipeline.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The pipeline failed to advance the run.
    #[error(transparent)]
    Pipeline(#[from] wmag_pipeline::PipelineError),

    /// The store failed outside of a pipeline call (claiming or completing
    /// a job, incrementing a rate window).
    #[error(transparent)]
    Store(#[from] wmag_store::StoreError),
}
