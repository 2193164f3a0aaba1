// crates/wmag-server/src/error.rs
// ============================================================================
// Module: Server Errors
// Description: Converts kernel-wide errors into HTTP responses. Mirrors the
// status/body mapping decision-gate-mcp::server's `tool_error_response`
// performs for `ToolError`, adapted from JSON-RPC error codes to plain HTTP
// status codes for this crate's REST surface.
// ============================================================================

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use serde::Serialize;
use thiserror::Error;
use wmag_pipeline::KernelError;
use wmag_pipeline::PipelineError;
use wmag_store::StoreError;

/// Errors raised by an HTTP handler, convertible into a JSON error response.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A kernel operation (pipeline, store, registry, hash chain) failed.
    #[error(transparent)]
    Kernel(#[from] KernelError),

    /// Loading or validating configuration failed.
    #[error(transparent)]
    Config(#[from] wmag_config::ConfigError),

    /// A required header was absent.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// The request body failed validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Kernel(KernelError::Pipeline(PipelineError::RunNotFound(_) | PipelineError::MissingApproval(_)))
            | Self::Kernel(KernelError::Store(StoreError::RunNotFound(_) | StoreError::ApprovalNotFound(_) | StoreError::JobNotFound(_))) => {
                StatusCode::NOT_FOUND
            }
            Self::Kernel(KernelError::Pipeline(PipelineError::DuplicateRun(_)))
            | Self::Kernel(KernelError::Store(StoreError::Conflict(_))) => StatusCode::CONFLICT,
            Self::Kernel(KernelError::Pipeline(
                PipelineError::UnknownAction(_) | PipelineError::UnknownTool(_) | PipelineError::InvalidPlan(_),
            ))
            | Self::Kernel(KernelError::Registry(_))
            | Self::InvalidRequest(_)
            | Self::MissingHeader(_) => StatusCode::BAD_REQUEST,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Kernel(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(error = %self, %status, "request failed");
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}
