// crates/wmag-store/src/ephemeral.rs
// ============================================================================
// Module: Ephemeral Store
// Description: In-memory Store implementation guarded by a single Mutex per
// table, used for tests, local development, and as the reference semantics
// the SQLite backend's own test suite checks itself against.
// Grounded on: the teacher's general "guard shared state behind a Mutex,
// return a cloned snapshot" convention for in-process test doubles.
// ============================================================================

use std::collections::HashMap;
use std::sync::Mutex;

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

use crate::error::StoreError;
use crate::traits::Store;

#[derive(Default)]
struct Tables {
    events: HashMap<RunId, Vec<Event>>,
    runs: HashMap<RunId, Run>,
    cache: HashMap<IdemKey, StepResult>,
    approvals: HashMap<ApprovalId, Approval>,
    jobs: HashMap<JobId, Job>,
    budgets: HashMap<RunId, BudgetCounter>,
    rate_windows: HashMap<RateWindowKey, RateWindow>,
    audit_keys: HashMap<TenantId, AuditKeyRegistry>,
    audit_log: Vec<(TenantId, String, Timestamp)>,
    sessions: Vec<(String, TenantId, UserId, Timestamp, Timestamp)>,
}

/// An in-memory [`Store`] implementation.
pub struct EphemeralStore {
    tables: Mutex<Tables>,
}

impl Default for EphemeralStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EphemeralStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self { tables: Mutex::new(Tables::default()) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Store for EphemeralStore {
    fn append_event(&self, event: &Event) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let log = tables.events.entry(event.run_id.clone()).or_default();
        let expected = log.last().map_or(Seq::FIRST, |last| last.seq.next());
        if event.seq != expected {
            return Err(StoreError::Conflict(format!(
                "expected seq {expected}, got {}",
                event.seq
            )));
        }
        log.push(event.clone());
        Ok(())
    }

    fn get_events(&self, run_id: &RunId, from_seq: Seq) -> Result<Vec<Event>, StoreError> {
        let tables = self.lock();
        Ok(tables
            .events
            .get(run_id)
            .map(|log| log.iter().filter(|e| e.seq >= from_seq).cloned().collect())
            .unwrap_or_default())
    }

    fn load_run(&self, run_id: &RunId) -> Result<Option<Run>, StoreError> {
        Ok(self.lock().runs.get(run_id).cloned())
    }

    fn save_run(&self, run: &Run) -> Result<(), StoreError> {
        self.lock().runs.insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    fn list_runs(&self, tenant_id: &TenantId) -> Result<Vec<Run>, StoreError> {
        let tables = self.lock();
        let mut runs: Vec<Run> = tables
            .runs
            .values()
            .filter(|r| &r.tenant_id == tenant_id)
            .cloned()
            .collect();
        runs.sort_by_key(|r| std::cmp::Reverse(r.updated_at));
        Ok(runs)
    }

    fn cache_get(&self, idem_key: &IdemKey) -> Result<Option<StepResult>, StoreError> {
        Ok(self.lock().cache.get(idem_key).cloned())
    }

    fn cache_put(&self, result: &StepResult) -> Result<(), StoreError> {
        let mut tables = self.lock();
        tables.cache.entry(result.idem_key.clone()).or_insert_with(|| result.clone());
        Ok(())
    }

    fn create_approval(&self, approval: &Approval) -> Result<(), StoreError> {
        self.lock().approvals.insert(approval.approval_id.clone(), approval.clone());
        Ok(())
    }

    fn get_approval(&self, approval_id: &ApprovalId) -> Result<Option<Approval>, StoreError> {
        Ok(self.lock().approvals.get(approval_id).cloned())
    }

    fn decide_approval(
        &self,
        approval_id: &ApprovalId,
        decision: ApprovalDecision,
        decided_by: UserId,
        now: Timestamp,
    ) -> Result<Approval, StoreError> {
        let mut tables = self.lock();
        let approval = tables
            .approvals
            .get_mut(approval_id)
            .ok_or_else(|| StoreError::ApprovalNotFound(approval_id.clone()))?;
        if !approval.is_pending() {
            return Err(StoreError::Conflict(format!("approval {approval_id} already decided")));
        }
        approval.state = ApprovalState::Decided { decision, decided_by, decided_at: now };
        Ok(approval.clone())
    }

    fn enqueue_job(&self, job: &Job) -> Result<(), StoreError> {
        self.lock().jobs.insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    fn claim_job(&self, now: Timestamp) -> Result<Option<Job>, StoreError> {
        let mut tables = self.lock();
        let mut candidates: Vec<&mut Job> = tables
            .jobs
            .values_mut()
            .filter(|j| j.state == JobState::Queued && j.visible_at <= now)
            .collect();
        candidates.sort_by_key(|j| j.visible_at);
        let Some(job) = candidates.into_iter().next() else {
            return Ok(None);
        };
        job.state = JobState::Claimed;
        job.claim_count += 1;
        Ok(Some(job.clone()))
    }

    fn complete_job(&self, job_id: &JobId) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let job = tables.jobs.get_mut(job_id).ok_or_else(|| StoreError::JobNotFound(job_id.clone()))?;
        job.state = JobState::Done;
        Ok(())
    }

    fn budget_get(&self, run_id: &RunId, limit: u64) -> Result<BudgetCounter, StoreError> {
        let mut tables = self.lock();
        let counter = tables.budgets.entry(run_id.clone()).or_insert_with(|| BudgetCounter {
            run_id: run_id.clone(),
            tool_calls: 0,
            llm_calls: 0,
            cost_units: 0,
            limit,
        });
        Ok(counter.clone())
    }

    fn budget_debit(&self, run_id: &RunId, metric: BudgetMetric, amount: u64) -> Result<BudgetCounter, StoreError> {
        let mut tables = self.lock();
        let counter = tables.budgets.entry(run_id.clone()).or_insert_with(|| BudgetCounter {
            run_id: run_id.clone(),
            tool_calls: 0,
            llm_calls: 0,
            cost_units: 0,
            limit: u64::MAX,
        });
        match metric {
            BudgetMetric::ToolCalls => counter.tool_calls = counter.tool_calls.saturating_add(amount),
            BudgetMetric::LlmCalls => counter.llm_calls = counter.llm_calls.saturating_add(amount),
            BudgetMetric::CostUnits => counter.cost_units = counter.cost_units.saturating_add(amount),
        }
        Ok(counter.clone())
    }

    fn rate_window_increment(&self, key: &RateWindowKey) -> Result<RateWindow, StoreError> {
        let mut tables = self.lock();
        let window = tables
            .rate_windows
            .entry(key.clone())
            .or_insert_with(|| RateWindow { key: key.clone(), count: 0 });
        window.count = window.count.saturating_add(1);
        Ok(window.clone())
    }

    fn audit_keys(&self, tenant_id: &TenantId) -> Result<AuditKeyRegistry, StoreError> {
        self.lock()
            .audit_keys
            .get(tenant_id)
            .cloned()
            .ok_or_else(|| StoreError::Invalid(format!("no audit keys registered for tenant {tenant_id}")))
    }

    fn save_audit_keys(&self, tenant_id: &TenantId, registry: &AuditKeyRegistry) -> Result<(), StoreError> {
        self.lock().audit_keys.insert(tenant_id.clone(), registry.clone());
        Ok(())
    }

    fn append_audit_log(&self, tenant_id: &TenantId, action: &str, now: Timestamp) -> Result<(), StoreError> {
        self.lock().audit_log.push((tenant_id.clone(), action.to_string(), now));
        Ok(())
    }

    fn create_session(
        &self,
        session_id: &str,
        tenant_id: &TenantId,
        user_id: &UserId,
        created_at: Timestamp,
        expires_at: Timestamp,
    ) -> Result<(), StoreError> {
        self.lock()
            .sessions
            .push((session_id.to_string(), tenant_id.clone(), user_id.clone(), created_at, expires_at));
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]
mod tests {
    use wmag_core::identifiers::TaskId;
    use wmag_core::identifiers::OrgId;
    use wmag_core::model::event::EventPayload;
    use wmag_core::model::run::RunPhase;

    use super::*;

    fn run(run_id: &str, tenant_id: &str) -> Run {
        Run {
            run_id: RunId::new(run_id),
            task_id: TaskId::new("t1"),
            tenant_id: TenantId::new(tenant_id),
            org_id: OrgId::new("o1"),
            submitted_by: UserId::new("u1"),
            phase: RunPhase::Submitted,
            plan_id: None,
            budget_used: 0,
            created_at: Timestamp::from_millis(0),
            updated_at: Timestamp::from_millis(0),
        }
    }

    fn event(run_id: &str, seq: u64) -> Event {
        Event {
            run_id: RunId::new(run_id),
            seq: Seq::new(seq),
            recorded_at: Timestamp::from_millis(0),
            payload: EventPayload::StatusUpdate { phase: RunPhase::Submitted, detail: None },
            prev_hash: None,
            hash: wmag_core::hashing::hash_bytes(b"test"),
            signed_by: wmag_core::identifiers::Kid::new("k1"),
        }
    }

    #[test]
    fn append_event_rejects_out_of_order_sequence() {
        let store = EphemeralStore::new();
        store.append_event(&event("r1", 1)).expect("first append");
        let err = store.append_event(&event("r1", 3)).expect_err("should reject");
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn get_events_filters_by_from_seq() {
        let store = EphemeralStore::new();
        store.append_event(&event("r1", 1)).expect("append 1");
        store.append_event(&event("r1", 2)).expect("append 2");
        store.append_event(&event("r1", 3)).expect("append 3");
        let events = store.get_events(&RunId::new("r1"), Seq::new(2)).expect("get");
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn save_and_load_run_round_trips() {
        let store = EphemeralStore::new();
        store.save_run(&run("r1", "t1")).expect("save");
        let loaded = store.load_run(&RunId::new("r1")).expect("load").expect("present");
        assert_eq!(loaded.run_id, RunId::new("r1"));
    }

    #[test]
    fn list_runs_filters_by_tenant() {
        let store = EphemeralStore::new();
        store.save_run(&run("r1", "t1")).expect("save r1");
        store.save_run(&run("r2", "t2")).expect("save r2");
        let runs = store.list_runs(&TenantId::new("t1")).expect("list");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, RunId::new("r1"));
    }

    #[test]
    fn cache_put_is_idempotent_on_repeated_writes() {
        let store = EphemeralStore::new();
        let result = StepResult {
            step_id: wmag_core::identifiers::StepId::new("s1"),
            idem_key: wmag_core::identifiers::IdemKey::new("k1"),
            status: wmag_core::model::step_result::StepStatus::Succeeded,
            output: Some(serde_json::json!({"ok": true})),
            error: None,
            retry_class: None,
            attempts: 1,
            policy_ids: vec![],
            recorded_at: Timestamp::from_millis(0),
        };
        store.cache_put(&result).expect("put 1");
        let mut second = result.clone();
        second.attempts = 99;
        store.cache_put(&second).expect("put 2");
        let cached = store.cache_get(&result.idem_key).expect("get").expect("present");
        assert_eq!(cached.attempts, 1);
    }

    #[test]
    fn decide_approval_rejects_double_decision() {
        let store = EphemeralStore::new();
        let approval = Approval {
            approval_id: ApprovalId::new("a1"),
            run_id: RunId::new("r1"),
            step_id: None,
            eligible_roles: vec!["admin".to_string()],
            state: wmag_core::model::approval::ApprovalState::Pending,
            created_at: Timestamp::from_millis(0),
        };
        store.create_approval(&approval).expect("create");
        store
            .decide_approval(&approval.approval_id, ApprovalDecision::Approved, UserId::new("u1"), Timestamp::from_millis(1))
            .expect("first decision");
        let err = store
            .decide_approval(&approval.approval_id, ApprovalDecision::Approved, UserId::new("u1"), Timestamp::from_millis(2))
            .expect_err("should reject second decision");
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn claim_job_only_returns_visible_queued_jobs() {
        let store = EphemeralStore::new();
        let job = Job {
            job_id: JobId::new("j1"),
            run_id: RunId::new("r1"),
            tenant_id: TenantId::new("t1"),
            state: JobState::Queued,
            visible_at: Timestamp::from_millis(100),
            claim_count: 0,
        };
        store.enqueue_job(&job).expect("enqueue");
        assert!(store.claim_job(Timestamp::from_millis(50)).expect("too early").is_none());
        let claimed = store.claim_job(Timestamp::from_millis(150)).expect("claim").expect("present");
        assert_eq!(claimed.claim_count, 1);
        assert!(store.claim_job(Timestamp::from_millis(200)).expect("none left").is_none());
    }

    #[test]
    fn budget_debit_saturates_and_accumulates() {
        let store = EphemeralStore::new();
        let run_id = RunId::new("r1");
        store.budget_get(&run_id, 1000).expect("seed");
        let first = store.budget_debit(&run_id, BudgetMetric::CostUnits, 400).expect("debit 1");
        assert_eq!(first.cost_units, 400);
        let second = store.budget_debit(&run_id, BudgetMetric::CostUnits, 400).expect("debit 2");
        assert_eq!(second.cost_units, 800);
    }

    #[test]
    fn budget_metrics_accumulate_independently() {
        let store = EphemeralStore::new();
        let run_id = RunId::new("r1");
        store.budget_get(&run_id, 1000).expect("seed");
        store.budget_debit(&run_id, BudgetMetric::ToolCalls, 1).expect("debit tool call");
        store.budget_debit(&run_id, BudgetMetric::CostUnits, 5).expect("debit cost units");
        let counter = store.budget_debit(&run_id, BudgetMetric::ToolCalls, 1).expect("debit tool call again");
        assert_eq!(counter.tool_calls, 2);
        assert_eq!(counter.cost_units, 5);
        assert_eq!(counter.llm_calls, 0);
    }

    #[test]
    fn rate_window_increment_accumulates_per_key() {
        let store = EphemeralStore::new();
        let key = RateWindowKey {
            tenant_id: TenantId::new("t1"),
            scope: wmag_core::model::rate_window::RateScope::TenantSubmissions,
            window_start: Timestamp::from_millis(0),
        };
        store.rate_window_increment(&key).expect("inc 1");
        let second = store.rate_window_increment(&key).expect("inc 2");
        assert_eq!(second.count, 2);
    }
}
