// crates/wmag-store/src/traits.rs
// ============================================================================
// Module: Store Trait
// Description: Backend-agnostic persistence contract for runs, the
// tamper-evident event log, the idempotency cache, approvals, jobs, budgets,
// rate limits, audit keys, and the ambient sessions/audit_log surfaces.
// Grounded on: decision-gate-core::interfaces::RunStateStore (load/save/
// readiness shape) generalized from a single run-state blob into the
// wider set of tables the kernel's Store contract names.
// ============================================================================

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
use wmag_core::model::budget::BudgetCounter;
use wmag_core::model::budget::BudgetMetric;
use wmag_core::model::event::Event;
use wmag_core::model::job::Job;
use wmag_core::model::rate_window::RateWindow;
use wmag_core::model::rate_window::RateWindowKey;
use wmag_core::model::run::Run;
use wmag_core::model::step_result::StepResult;
use wmag_core::time::Timestamp;

use crate::error::StoreError;

/// The persistence contract every backend (`EphemeralStore`, `SqliteStore`)
/// implements.
///
/// # Invariants
/// - `append_event` is the only way events enter a run's log; it assigns no
///   sequence number itself, callers compute the next [`Seq`] from
///   `get_events`'s last entry, matching the pipeline's persist-before-send
///   requirement (the event is durable before `append_event` returns).
/// - `cache_get`/`cache_put` treat a cache hit as authoritative and never
///   compare it against the current action schema (Open Question 2).
/// - `rate_window_increment` operates on fixed windows; `key.window_start`
///   is computed by the caller via [`wmag_core::time::Timestamp::window_start`].
pub trait Store: Send + Sync {
    /// Appends `event` to its run's log. The event's `hash`/`prev_hash` are
    /// expected to already be computed by the caller (the pipeline), since
    /// only it holds the audit key registry needed to sign them.
    ///
    /// # Errors
    /// Returns [`StoreError::Conflict`] if `event.seq` is not exactly one
    /// past the run's current last sequence number.
    fn append_event(&self, event: &Event) -> Result<(), StoreError>;

    /// Returns every event for `run_id` with `seq >= from_seq`, in
    /// ascending sequence order.
    ///
    /// # Errors
    /// Returns [`StoreError`] on backend failure.
    fn get_events(&self, run_id: &RunId, from_seq: Seq) -> Result<Vec<Event>, StoreError>;

    /// Loads a run by id.
    ///
    /// # Errors
    /// Returns [`StoreError`] on backend failure.
    fn load_run(&self, run_id: &RunId) -> Result<Option<Run>, StoreError>;

    /// Inserts or updates a run.
    ///
    /// # Errors
    /// Returns [`StoreError`] on backend failure.
    fn save_run(&self, run: &Run) -> Result<(), StoreError>;

    /// Lists every run for a tenant, most recently updated first.
    ///
    /// # Errors
    /// Returns [`StoreError`] on backend failure.
    fn list_runs(&self, tenant_id: &TenantId) -> Result<Vec<Run>, StoreError>;

    /// Looks up a cached step result by idempotency key.
    ///
    /// # Errors
    /// Returns [`StoreError`] on backend failure.
    fn cache_get(&self, idem_key: &IdemKey) -> Result<Option<StepResult>, StoreError>;

    /// Caches a step result under its idempotency key. A second write for
    /// the same key is a no-op rather than an error, since retried step
    /// dispatch is expected to race benignly with itself.
    ///
    /// # Errors
    /// Returns [`StoreError`] on backend failure.
    fn cache_put(&self, result: &StepResult) -> Result<(), StoreError>;

    /// Creates a new pending approval.
    ///
    /// # Errors
    /// Returns [`StoreError`] on backend failure.
    fn create_approval(&self, approval: &Approval) -> Result<(), StoreError>;

    /// Looks up an approval by id.
    ///
    /// # Errors
    /// Returns [`StoreError`] on backend failure.
    fn get_approval(&self, approval_id: &ApprovalId) -> Result<Option<Approval>, StoreError>;

    /// Records a decision on a pending approval.
    ///
    /// # Errors
    /// Returns [`StoreError::ApprovalNotFound`] if `approval_id` does not
    /// exist, or [`StoreError::Conflict`] if it was already decided.
    fn decide_approval(
        &self,
        approval_id: &ApprovalId,
        decision: ApprovalDecision,
        decided_by: UserId,
        now: Timestamp,
    ) -> Result<Approval, StoreError>;

    /// Enqueues a job.
    ///
    /// # Errors
    /// Returns [`StoreError`] on backend failure.
    fn enqueue_job(&self, job: &Job) -> Result<(), StoreError>;

    /// Atomically claims the single oldest visible queued job, if one
    /// exists. Tenant concurrency caps are enforced by the caller (see
    /// `wmag-worker`), not by the store.
    ///
    /// # Errors
    /// Returns [`StoreError`] on backend failure.
    fn claim_job(&self, now: Timestamp) -> Result<Option<Job>, StoreError>;

    /// Marks a claimed job done.
    ///
    /// # Errors
    /// Returns [`StoreError::JobNotFound`] if `job_id` does not exist.
    fn complete_job(&self, job_id: &JobId) -> Result<(), StoreError>;

    /// Reads a run's budget counter, creating one at `limit` if absent.
    ///
    /// # Errors
    /// Returns [`StoreError`] on backend failure.
    fn budget_get(&self, run_id: &RunId, limit: u64) -> Result<BudgetCounter, StoreError>;

    /// Debits `amount` from a run's `metric` counter and returns the updated
    /// counter.
    ///
    /// # Errors
    /// Returns [`StoreError`] on backend failure.
    fn budget_debit(&self, run_id: &RunId, metric: BudgetMetric, amount: u64) -> Result<BudgetCounter, StoreError>;

    /// Increments the counter for `key`, creating it at zero if absent, and
    /// returns the updated window.
    ///
    /// # Errors
    /// Returns [`StoreError`] on backend failure.
    fn rate_window_increment(&self, key: &RateWindowKey) -> Result<RateWindow, StoreError>;

    /// Loads the audit key registry for a tenant.
    ///
    /// # Errors
    /// Returns [`StoreError`] on backend failure.
    fn audit_keys(&self, tenant_id: &TenantId) -> Result<AuditKeyRegistry, StoreError>;

    /// Persists a tenant's audit key registry after rotation.
    ///
    /// # Errors
    /// Returns [`StoreError`] on backend failure.
    fn save_audit_keys(&self, tenant_id: &TenantId, registry: &AuditKeyRegistry) -> Result<(), StoreError>;

    /// Appends a forensic audit log entry, independent of any run's event
    /// log. Write-only: no kernel logic reads this back.
    ///
    /// # Errors
    /// Returns [`StoreError`] on backend failure.
    fn append_audit_log(&self, tenant_id: &TenantId, action: &str, now: Timestamp) -> Result<(), StoreError>;

    /// Records a session for the external auth collaborator to consult.
    /// Write-only: no kernel logic reads this back.
    ///
    /// # Errors
    /// Returns [`StoreError`] on backend failure.
    fn create_session(
        &self,
        session_id: &str,
        tenant_id: &TenantId,
        user_id: &UserId,
        created_at: Timestamp,
        expires_at: Timestamp,
    ) -> Result<(), StoreError>;

    /// Reports store readiness for liveness/readiness probes. Backends that
    /// cannot cheaply check readiness may rely on the default `Ok(())`.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the store is unavailable.
    fn readiness(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
