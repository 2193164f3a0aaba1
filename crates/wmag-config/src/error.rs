// crates/wmag-config/src/error.rs
// ============================================================================
// Module: Config Errors
// Grounded on: decision-gate-config::config's fail-closed `ConfigError`
// enum (missing/invalid env var, out-of-range limit, unreadable file).
// ============================================================================

use thiserror::Error;

/// Errors raised while loading or validating [`crate::KernelConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable was present but could not be parsed as the
    /// type its setting requires.
    #[error("environment variable {name} has an invalid value: {value}")]
    InvalidEnvVar {
        /// The variable name.
        name: &'static str,
        /// The raw value that failed to parse.
        value: String,
    },

    /// A numeric setting fell outside its documented valid range.
    #[error("{name} must be {constraint}, got {value}")]
    OutOfRange {
        /// The setting name.
        name: &'static str,
        /// The violated constraint, for the error message.
        constraint: &'static str,
        /// The offending value.
        value: u64,
    },

    /// `REGISTRY_PATH` was not set; it is the one required setting, since
    /// the kernel has no built-in default registry document.
    #[error("REGISTRY_PATH must be set to a base registry document")]
    MissingRegistryPath,

    /// A registry layer file could not be read.
    #[error("failed to read registry layer {path}: {source}")]
    ReadRegistryLayer {
        /// The path that could not be read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A registry layer file was not valid JSON.
    #[error("registry layer {path} is not valid JSON: {source}")]
    InvalidRegistryLayer {
        /// The path that failed to parse.
        path: String,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// `AUDIT_KEYS_JSON` was not valid JSON or did not match the expected
    /// `[{kid, secret, active}]` shape.
    #[error("AUDIT_KEYS_JSON is invalid: {0}")]
    InvalidAuditKeysJson(serde_json::Error),

    /// Neither `AUDIT_KEYS_JSON` nor `AUDIT_SECRET` was set; the kernel has
    /// no default audit key, since one always signing with a well-known
    /// secret would defeat the hash chain's purpose.
    #[error("one of AUDIT_KEYS_JSON or AUDIT_SECRET must be set")]
    MissingAuditKeys,

    /// `USE_POSTGRES=true` was set, but this build carries no Postgres
    /// backend (only `wmag-store-sqlite` and the in-memory `EphemeralStore`
    /// are wired in); see `DESIGN.md`.
    #[error("USE_POSTGRES=true is not supported by this build; unset it or use DATABASE_URL as a SQLite path")]
    PostgresUnsupported,

    /// Building the requested `SQLite` store failed.
    #[error(transparent)]
    Sqlite(#[from] wmag_store_sqlite::SqliteStoreError),

    /// Validating the audit key registry's single-active-key invariant
    /// failed.
    #[error(transparent)]
    Core(#[from] wmag_core::CoreError),
}
