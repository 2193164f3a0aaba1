// crates/wmag-registry/src/error.rs
// ============================================================================
// Module: Registry Errors
// ============================================================================

use thiserror::Error;

/// Errors raised while loading, merging, or validating registry documents.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A layer's document failed to parse as JSON.
    #[error("layer {layer} is not valid JSON: {source}")]
    InvalidJson {
        /// Which layer failed (`"base"`, `"org"`, `"tenant"`, `"user"`).
        layer: &'static str,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The merged document failed to deserialize into the typed registry
    /// document shape.
    #[error("merged registry document does not match the expected shape: {source}")]
    InvalidShape {
        /// Underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },

    /// A policy in the merged document failed validation.
    #[error(transparent)]
    Policy(#[from] wmag_policy::PolicyError),
}
