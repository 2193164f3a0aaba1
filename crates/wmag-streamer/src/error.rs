// crates/wmag-streamer/src/error.rs
// ============================================================================
// Module: Streamer Errors
// ============================================================================

use thiserror::Error;
use wmag_store::StoreError;

/// Errors raised while subscribing to or replaying a run's event stream.
#[derive(Debug, Error)]
pub enum StreamerError {
    /// The backing store failed to produce the replay backlog.
    #[error(transparent)]
    Store(#[from] StoreError),
}
