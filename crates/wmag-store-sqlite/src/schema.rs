// crates/wmag-store-sqlite/src/schema.rs
// ============================================================================
// Module: Schema
// Description: Table definitions for the SQLite backend. Each table stores
// one canonical JSON blob per row alongside the indexed columns needed for
// lookups, following decision-gate-store-sqlite's snapshot-per-row
// convention rather than fully normalizing the data model into columns.
// ============================================================================

use rusqlite::Connection;

use crate::error::SqliteStoreError;

/// Current schema version. Bump and add a migration branch in
/// [`apply_schema`] if the table shapes below ever change incompatibly.
pub const SCHEMA_VERSION: i64 = 2;

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS runs (
    run_id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_runs_tenant ON runs(tenant_id, updated_at DESC);

CREATE TABLE IF NOT EXISTS run_events (
    run_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    body TEXT NOT NULL,
    PRIMARY KEY (run_id, seq)
);

CREATE TABLE IF NOT EXISTS run_snapshots (
    run_id TEXT NOT NULL,
    phase TEXT NOT NULL,
    seq INTEGER NOT NULL,
    body TEXT NOT NULL,
    PRIMARY KEY (run_id, seq)
);

CREATE TABLE IF NOT EXISTS step_cache (
    idem_key TEXT PRIMARY KEY,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS approvals (
    approval_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_approvals_run ON approvals(run_id);

CREATE TABLE IF NOT EXISTS jobs (
    job_id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    state TEXT NOT NULL,
    visible_at INTEGER NOT NULL,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_jobs_claimable ON jobs(state, visible_at);

CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS budget (
    run_id TEXT PRIMARY KEY,
    tool_calls INTEGER NOT NULL,
    llm_calls INTEGER NOT NULL,
    cost_units INTEGER NOT NULL,
    budget_limit INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS rate_limits (
    tenant_id TEXT NOT NULL,
    scope TEXT NOT NULL,
    window_start INTEGER NOT NULL,
    count INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, scope, window_start)
);

CREATE TABLE IF NOT EXISTS audit_keys (
    tenant_id TEXT PRIMARY KEY,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL,
    action TEXT NOT NULL,
    recorded_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_log_tenant ON audit_log(tenant_id, recorded_at);

CREATE TABLE IF NOT EXISTS list_runs_mv (
    tenant_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    body TEXT NOT NULL,
    PRIMARY KEY (tenant_id, run_id)
);
";

/// Applies pragmas appropriate for a writer connection: WAL journaling,
/// full synchronous durability, and a busy timeout so concurrent readers
/// never see `SQLITE_BUSY` under normal load.
pub fn configure_writer(conn: &Connection, busy_timeout_ms: u64) -> Result<(), SqliteStoreError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "FULL")?;
    conn.busy_timeout(std::time::Duration::from_millis(busy_timeout_ms))?;
    Ok(())
}

/// Applies pragmas appropriate for a read-only connection in the pool.
pub fn configure_reader(conn: &Connection, busy_timeout_ms: u64) -> Result<(), SqliteStoreError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(std::time::Duration::from_millis(busy_timeout_ms))?;
    Ok(())
}

/// Creates every table if it does not already exist and records the schema
/// version.
pub fn apply_schema(conn: &Connection) -> Result<(), SqliteStoreError> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT INTO schema_meta(key, value) VALUES ('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        rusqlite::params![SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}
