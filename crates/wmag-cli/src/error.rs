// crates/wmag-cli/src/error.rs
// ============================================================================
// Module: CLI Errors
// Grounded on: decision-gate-cli's one top-level error enum converting every
// collaborator crate's error into a single exit path, simplified to this
// workspace's smaller set of collaborators.
// ============================================================================

use thiserror::Error;

/// Errors raised by a `wmag` subcommand.
#[derive(Debug, Error)]
pub enum CliError {
    /// Loading or validating configuration failed.
    #[error(transparent)]
    Config(#[from] wmag_config::ConfigError),

    /// A registry merge/validation failed.
    #[error(transparent)]
    Registry(#[from] wmag_registry::RegistryError),

    /// A hash chain or canonicalization operation failed.
    #[error(transparent)]
    Core(#[from] wmag_core::CoreError),

    /// A `Store` operation failed.
    #[error(transparent)]
    Store(#[from] wmag_store::StoreError),

    /// A pipeline submit/advance/approval-decision call failed.
    #[error(transparent)]
    Pipeline(#[from] wmag_pipeline::PipelineError),

    /// Subscribing to a run's event stream failed.
    #[error(transparent)]
    Streamer(#[from] wmag_streamer::StreamerError),

    /// A run identifier named on the command line does not exist.
    #[error("run {0} not found")]
    RunNotFound(String),

    /// An `--decision` value was neither `approved` nor `denied`.
    #[error("unknown decision {0:?}, expected 'approved' or 'denied'")]
    UnknownDecision(String),

    /// A response body could not be serialized for printing.
    #[error("failed to serialize output: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Writing output to stdout failed.
    #[error("failed to write output: {0}")]
    Io(#[from] std::io::Error),
}
