// crates/wmag-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Store
// Description: Durable Store backend: one serialized writer connection plus
// a round-robin pool of read-only connections for read path isolation,
// running under WAL.
// Grounded on: decision-gate-store-sqlite::store::SqliteRunStateStore's
// write_connection/read_connections/read_cursor shape, simplified to a
// direct Mutex<Connection> writer rather than a batching write-gateway
// thread, since the kernel's write volume per run is far lower than the
// teacher's schema-registry workload that motivated batching.
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;
use serde::Serialize;
use wmag_core::hashchain::AuditKeyRegistry;
use wmag_core::identifiers::ApprovalId;
use wmag_core::identifiers::IdemKey;
use wmag_core::identifiers::JobId;
use wmag_core::identifiers::RunId;
use wmag_core::identifiers::Seq;
use wmag_core::identifiers::TenantId;
use wmag_core::identifiers::UserId;
use wmag_core::model::approval::Approval;
use wmag_core::model::approval::ApprovalDecision;
use wmag_core::model::approval::ApprovalState;
use wmag_core::model::budget::BudgetCounter;
use wmag_core::model::budget::BudgetMetric;
use wmag_core::model::event::Event;
use wmag_core::model::job::Job;
use wmag_core::model::job::JobState;
use wmag_core::model::rate_window::RateWindow;
use wmag_core::model::rate_window::RateWindowKey;
use wmag_core::model::run::Run;
use wmag_core::model::step_result::StepResult;
use wmag_core::time::Timestamp;
use wmag_store::Store;
use wmag_store::StoreError;

use crate::error::SqliteStoreError;
use crate::schema;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_READ_POOL_SIZE: usize = 4;

/// Configuration for [`SqliteStore::open`].
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout, in milliseconds, applied to every connection.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Number of read-only connections in the read pool.
    #[serde(default = "default_read_pool_size")]
    pub read_pool_size: usize,
}

const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

const fn default_read_pool_size() -> usize {
    DEFAULT_READ_POOL_SIZE
}

impl SqliteStoreConfig {
    /// Builds a config pointing at `path` with default timeouts and pool
    /// size.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            read_pool_size: DEFAULT_READ_POOL_SIZE,
        }
    }
}

/// `SQLite`-backed [`Store`] implementation.
///
/// # Invariants
/// - All writes go through `write_connection`, serialized by its `Mutex`.
/// - Reads are served from `read_connections`, selected round-robin, so a
///   long-running read never blocks the writer under WAL.
pub struct SqliteStore {
    write_connection: Mutex<Connection>,
    read_connections: Vec<Mutex<Connection>>,
    read_cursor: AtomicUsize,
}

impl SqliteStore {
    /// Opens (creating if necessary) the database at `config.path`,
    /// applies pragmas, and creates the schema.
    ///
    /// # Errors
    /// Returns [`SqliteStoreError`] if the database cannot be opened or the
    /// schema cannot be created.
    pub fn open(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        if config.read_pool_size == 0 {
            return Err(SqliteStoreError::Invalid("read_pool_size must be greater than zero".to_string()));
        }
        let write_connection = open_connection(&config.path)?;
        schema::configure_writer(&write_connection, config.busy_timeout_ms)?;
        schema::apply_schema(&write_connection)?;

        let mut read_connections = Vec::with_capacity(config.read_pool_size);
        for _ in 0..config.read_pool_size {
            let reader = open_connection(&config.path)?;
            schema::configure_reader(&reader, config.busy_timeout_ms)?;
            read_connections.push(Mutex::new(reader));
        }

        Ok(Self {
            write_connection: Mutex::new(write_connection),
            read_connections,
            read_cursor: AtomicUsize::new(0),
        })
    }

    fn with_writer<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, SqliteStoreError>,
    ) -> Result<T, SqliteStoreError> {
        let conn = self.write_connection.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&conn)
    }

    fn with_reader<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, SqliteStoreError>,
    ) -> Result<T, SqliteStoreError> {
        let index = self.read_cursor.fetch_add(1, Ordering::Relaxed) % self.read_connections.len();
        let conn = self.read_connections[index]
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&conn)
    }

    /// Refreshes the `list_runs_mv` materialized projection from the
    /// authoritative `runs` table. Intended to be called periodically by a
    /// background task using exponential backoff
    /// (`mv_refresh_interval_s` doubling to `mv_refresh_max_backoff_s`),
    /// never from inside another transaction.
    ///
    /// # Errors
    /// Returns [`SqliteStoreError`] on backend failure.
    pub fn refresh_list_runs_mv(&self) -> Result<(), SqliteStoreError> {
        self.with_writer(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO list_runs_mv (tenant_id, run_id, updated_at, body)
                 SELECT tenant_id, run_id, updated_at, body FROM runs",
                [],
            )?;
            Ok(())
        })
    }
}

fn open_connection(path: &Path) -> Result<Connection, SqliteStoreError> {
    Connection::open(path).map_err(SqliteStoreError::from)
}

fn load_json<T: for<'de> Deserialize<'de>>(text: String) -> Result<T, SqliteStoreError> {
    serde_json::from_str(&text).map_err(SqliteStoreError::from)
}

fn dump_json<T: Serialize>(value: &T) -> Result<String, SqliteStoreError> {
    serde_json::to_string(value).map_err(SqliteStoreError::from)
}

impl Store for SqliteStore {
    fn append_event(&self, event: &Event) -> Result<(), StoreError> {
        self.with_writer(|conn| {
            let last: Option<i64> = conn
                .query_row(
                    "SELECT MAX(seq) FROM run_events WHERE run_id = ?1",
                    params![event.run_id.as_str()],
                    |row| row.get::<_, Option<i64>>(0),
                )
                .optional()?
                .flatten();
            let expected = last.map_or(Seq::FIRST, |s| Seq::new(s as u64).next());
            if event.seq != expected {
                return Err(SqliteStoreError::Conflict(format!(
                    "expected seq {expected}, got {}",
                    event.seq
                )));
            }
            let body = dump_json(event)?;
            conn.execute(
                "INSERT INTO run_events (run_id, seq, body) VALUES (?1, ?2, ?3)",
                params![event.run_id.as_str(), event.seq.get() as i64, body],
            )?;
            Ok(())
        })
        .map_err(StoreError::from)
    }

    fn get_events(&self, run_id: &RunId, from_seq: Seq) -> Result<Vec<Event>, StoreError> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT body FROM run_events WHERE run_id = ?1 AND seq >= ?2 ORDER BY seq ASC",
            )?;
            let rows = stmt.query_map(params![run_id.as_str(), from_seq.get() as i64], |row| {
                row.get::<_, String>(0)
            })?;
            let mut events = Vec::new();
            for row in rows {
                events.push(load_json(row?)?);
            }
            Ok(events)
        })
        .map_err(StoreError::from)
    }

    fn load_run(&self, run_id: &RunId) -> Result<Option<Run>, StoreError> {
        self.with_reader(|conn| {
            let body: Option<String> = conn
                .query_row("SELECT body FROM runs WHERE run_id = ?1", params![run_id.as_str()], |row| {
                    row.get(0)
                })
                .optional()?;
            body.map(load_json).transpose()
        })
        .map_err(StoreError::from)
    }

    fn save_run(&self, run: &Run) -> Result<(), StoreError> {
        self.with_writer(|conn| {
            let body = dump_json(run)?;
            conn.execute(
                "INSERT INTO runs (run_id, tenant_id, updated_at, body) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(run_id) DO UPDATE SET tenant_id = excluded.tenant_id,
                    updated_at = excluded.updated_at, body = excluded.body",
                params![run.run_id.as_str(), run.tenant_id.as_str(), run.updated_at.as_millis() as i64, body],
            )?;
            Ok(())
        })
        .map_err(StoreError::from)
    }

    fn list_runs(&self, tenant_id: &TenantId) -> Result<Vec<Run>, StoreError> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT body FROM list_runs_mv WHERE tenant_id = ?1 ORDER BY updated_at DESC",
            )?;
            let rows = stmt.query_map(params![tenant_id.as_str()], |row| row.get::<_, String>(0))?;
            let mut runs = Vec::new();
            for row in rows {
                runs.push(load_json(row?)?);
            }
            Ok(runs)
        })
        .map_err(StoreError::from)
    }

    fn cache_get(&self, idem_key: &IdemKey) -> Result<Option<StepResult>, StoreError> {
        self.with_reader(|conn| {
            let body: Option<String> = conn
                .query_row("SELECT body FROM step_cache WHERE idem_key = ?1", params![idem_key.as_str()], |row| {
                    row.get(0)
                })
                .optional()?;
            body.map(load_json).transpose()
        })
        .map_err(StoreError::from)
    }

    fn cache_put(&self, result: &StepResult) -> Result<(), StoreError> {
        self.with_writer(|conn| {
            let body = dump_json(result)?;
            conn.execute(
                "INSERT OR IGNORE INTO step_cache (idem_key, body) VALUES (?1, ?2)",
                params![result.idem_key.as_str(), body],
            )?;
            Ok(())
        })
        .map_err(StoreError::from)
    }

    fn create_approval(&self, approval: &Approval) -> Result<(), StoreError> {
        self.with_writer(|conn| {
            let body = dump_json(approval)?;
            conn.execute(
                "INSERT INTO approvals (approval_id, run_id, body) VALUES (?1, ?2, ?3)",
                params![approval.approval_id.as_str(), approval.run_id.as_str(), body],
            )?;
            Ok(())
        })
        .map_err(StoreError::from)
    }

    fn get_approval(&self, approval_id: &ApprovalId) -> Result<Option<Approval>, StoreError> {
        self.with_reader(|conn| {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM approvals WHERE approval_id = ?1",
                    params![approval_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            body.map(load_json).transpose()
        })
        .map_err(StoreError::from)
    }

    fn decide_approval(
        &self,
        approval_id: &ApprovalId,
        decision: ApprovalDecision,
        decided_by: UserId,
        now: Timestamp,
    ) -> Result<Approval, StoreError> {
        self.with_writer(|conn| {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM approvals WHERE approval_id = ?1",
                    params![approval_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(body) = body else {
                return Err(SqliteStoreError::NotFound(format!("approval {approval_id}")));
            };
            let mut approval: Approval = load_json(body)?;
            if !approval.is_pending() {
                return Err(SqliteStoreError::Conflict(format!("approval {approval_id} already decided")));
            }
            approval.state = ApprovalState::Decided { decision, decided_by, decided_at: now };
            let new_body = dump_json(&approval)?;
            conn.execute(
                "UPDATE approvals SET body = ?2 WHERE approval_id = ?1",
                params![approval_id.as_str(), new_body],
            )?;
            Ok(approval)
        })
        .map_err(StoreError::from)
    }

    fn enqueue_job(&self, job: &Job) -> Result<(), StoreError> {
        self.with_writer(|conn| {
            let body = dump_json(job)?;
            conn.execute(
                "INSERT INTO jobs (job_id, tenant_id, state, visible_at, body) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![job.job_id.as_str(), job.tenant_id.as_str(), "queued", job.visible_at.as_millis() as i64, body],
            )?;
            Ok(())
        })
        .map_err(StoreError::from)
    }

    fn claim_job(&self, now: Timestamp) -> Result<Option<Job>, StoreError> {
        self.with_writer(|conn| {
            let row: Option<(String, String)> = conn
                .query_row(
                    "SELECT job_id, body FROM jobs WHERE state = 'queued' AND visible_at <= ?1
                     ORDER BY visible_at ASC LIMIT 1",
                    params![now.as_millis() as i64],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((job_id, body)) = row else {
                return Ok(None);
            };
            let mut job: Job = load_json(body)?;
            job.state = JobState::Claimed;
            job.claim_count += 1;
            let new_body = dump_json(&job)?;
            conn.execute(
                "UPDATE jobs SET state = 'claimed', body = ?2 WHERE job_id = ?1",
                params![job_id, new_body],
            )?;
            Ok(Some(job))
        })
        .map_err(StoreError::from)
    }

    fn complete_job(&self, job_id: &JobId) -> Result<(), StoreError> {
        self.with_writer(|conn| {
            let body: Option<String> = conn
                .query_row("SELECT body FROM jobs WHERE job_id = ?1", params![job_id.as_str()], |row| {
                    row.get(0)
                })
                .optional()?;
            let Some(body) = body else {
                return Err(SqliteStoreError::NotFound(format!("job {job_id}")));
            };
            let mut job: Job = load_json(body)?;
            job.state = JobState::Done;
            let new_body = dump_json(&job)?;
            conn.execute(
                "UPDATE jobs SET state = 'done', body = ?2 WHERE job_id = ?1",
                params![job_id.as_str(), new_body],
            )?;
            Ok(())
        })
        .map_err(StoreError::from)
    }

    fn budget_get(&self, run_id: &RunId, limit: u64) -> Result<BudgetCounter, StoreError> {
        self.with_writer(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO budget (run_id, tool_calls, llm_calls, cost_units, budget_limit)
                 VALUES (?1, 0, 0, 0, ?2)",
                params![run_id.as_str(), limit as i64],
            )?;
            let (tool_calls, llm_calls, cost_units, budget_limit): (i64, i64, i64, i64) = conn.query_row(
                "SELECT tool_calls, llm_calls, cost_units, budget_limit FROM budget WHERE run_id = ?1",
                params![run_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;
            Ok(BudgetCounter {
                run_id: run_id.clone(),
                tool_calls: tool_calls as u64,
                llm_calls: llm_calls as u64,
                cost_units: cost_units as u64,
                limit: budget_limit as u64,
            })
        })
        .map_err(StoreError::from)
    }

    fn budget_debit(&self, run_id: &RunId, metric: BudgetMetric, amount: u64) -> Result<BudgetCounter, StoreError> {
        self.with_writer(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO budget (run_id, tool_calls, llm_calls, cost_units, budget_limit)
                 VALUES (?1, 0, 0, 0, ?2)",
                params![run_id.as_str(), i64::MAX],
            )?;
            let update_sql = match metric {
                BudgetMetric::ToolCalls => "UPDATE budget SET tool_calls = tool_calls + ?2 WHERE run_id = ?1",
                BudgetMetric::LlmCalls => "UPDATE budget SET llm_calls = llm_calls + ?2 WHERE run_id = ?1",
                BudgetMetric::CostUnits => "UPDATE budget SET cost_units = cost_units + ?2 WHERE run_id = ?1",
            };
            conn.execute(update_sql, params![run_id.as_str(), amount as i64])?;
            let (tool_calls, llm_calls, cost_units, budget_limit): (i64, i64, i64, i64) = conn.query_row(
                "SELECT tool_calls, llm_calls, cost_units, budget_limit FROM budget WHERE run_id = ?1",
                params![run_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;
            Ok(BudgetCounter {
                run_id: run_id.clone(),
                tool_calls: tool_calls as u64,
                llm_calls: llm_calls as u64,
                cost_units: cost_units as u64,
                limit: budget_limit as u64,
            })
        })
        .map_err(StoreError::from)
    }

    fn rate_window_increment(&self, key: &RateWindowKey) -> Result<RateWindow, StoreError> {
        self.with_writer(|conn| {
            let scope = dump_json(&key.scope)?;
            conn.execute(
                "INSERT INTO rate_limits (tenant_id, scope, window_start, count) VALUES (?1, ?2, ?3, 1)
                 ON CONFLICT(tenant_id, scope, window_start) DO UPDATE SET count = count + 1",
                params![key.tenant_id.as_str(), scope, key.window_start.as_millis() as i64],
            )?;
            let count: i64 = conn.query_row(
                "SELECT count FROM rate_limits WHERE tenant_id = ?1 AND scope = ?2 AND window_start = ?3",
                params![key.tenant_id.as_str(), scope, key.window_start.as_millis() as i64],
                |row| row.get(0),
            )?;
            Ok(RateWindow { key: key.clone(), count: count as u64 })
        })
        .map_err(StoreError::from)
    }

    fn audit_keys(&self, tenant_id: &TenantId) -> Result<AuditKeyRegistry, StoreError> {
        self.with_reader(|conn| {
            let body: Option<String> = conn
                .query_row("SELECT body FROM audit_keys WHERE tenant_id = ?1", params![tenant_id.as_str()], |row| {
                    row.get(0)
                })
                .optional()?;
            let Some(body) = body else {
                return Err(SqliteStoreError::NotFound(format!("audit keys for tenant {tenant_id}")));
            };
            load_json(body)
        })
        .map_err(StoreError::from)
    }

    fn save_audit_keys(&self, tenant_id: &TenantId, registry: &AuditKeyRegistry) -> Result<(), StoreError> {
        self.with_writer(|conn| {
            let body = dump_json(registry)?;
            conn.execute(
                "INSERT INTO audit_keys (tenant_id, body) VALUES (?1, ?2)
                 ON CONFLICT(tenant_id) DO UPDATE SET body = excluded.body",
                params![tenant_id.as_str(), body],
            )?;
            Ok(())
        })
        .map_err(StoreError::from)
    }

    fn append_audit_log(&self, tenant_id: &TenantId, action: &str, now: Timestamp) -> Result<(), StoreError> {
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO audit_log (tenant_id, action, recorded_at) VALUES (?1, ?2, ?3)",
                params![tenant_id.as_str(), action, now.as_millis() as i64],
            )?;
            Ok(())
        })
        .map_err(StoreError::from)
    }

    fn create_session(
        &self,
        session_id: &str,
        tenant_id: &TenantId,
        user_id: &UserId,
        created_at: Timestamp,
        expires_at: Timestamp,
    ) -> Result<(), StoreError> {
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO sessions (session_id, tenant_id, user_id, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![session_id, tenant_id.as_str(), user_id.as_str(), created_at.as_millis() as i64, expires_at.as_millis() as i64],
            )?;
            Ok(())
        })
        .map_err(StoreError::from)
    }

    fn readiness(&self) -> Result<(), StoreError> {
        self.with_reader(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(())).map_err(SqliteStoreError::from)
        })
        .map_err(StoreError::from)
    }
}
