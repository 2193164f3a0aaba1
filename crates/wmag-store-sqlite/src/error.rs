// crates/wmag-store-sqlite/src/error.rs
// ============================================================================
// Module: SQLite Store Errors
// Grounded on: decision-gate-store-sqlite::store::SqliteStoreError and its
// `From<SqliteStoreError> for StoreError` conversion pattern.
// ============================================================================

use thiserror::Error;
use wmag_store::StoreError;

/// Errors specific to the `SQLite` backend, before being folded into the
/// backend-agnostic [`StoreError`] at the `Store` trait boundary.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Underlying `SQLite` engine error.
    #[error("sqlite db error: {0}")]
    Db(#[from] rusqlite::Error),
    /// Row payload failed to (de)serialize as JSON.
    #[error("sqlite row payload invalid: {0}")]
    Json(#[from] serde_json::Error),
    /// Store configuration was invalid.
    #[error("sqlite store config invalid: {0}")]
    Invalid(String),
    /// A write conflicted with a concurrent writer.
    #[error("sqlite store write conflict: {0}")]
    Conflict(String),
    /// A lookup found no matching row.
    #[error("sqlite store row not found: {0}")]
    NotFound(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Db(err) => Self::Io(err.to_string()),
            SqliteStoreError::Json(err) => Self::Corrupt(err.to_string()),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
            SqliteStoreError::Conflict(message) => Self::Conflict(message),
            SqliteStoreError::NotFound(message) => Self::Backend(message),
        }
    }
}
