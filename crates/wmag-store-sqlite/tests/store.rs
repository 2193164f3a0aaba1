// crates/wmag-store-sqlite/tests/store.rs
// ============================================================================
// Integration tests: SQLite Store
// Exercises the durable backend against a temp-directory database file,
// checking it against the same semantics EphemeralStore's unit tests assert.
// ============================================================================

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only panic-based assertions are permitted."
)]

use tempfile::tempdir;
use wmag_core::hashchain::AuditKey;
use wmag_core::hashchain::AuditKeyRegistry;
use wmag_core::identifiers::IdemKey;
use wmag_core::identifiers::JobId;
use wmag_core::identifiers::Kid;
use wmag_core::identifiers::OrgId;
use wmag_core::identifiers::RunId;
use wmag_core::identifiers::Seq;
use wmag_core::identifiers::StepId;
use wmag_core::identifiers::TaskId;
use wmag_core::identifiers::TenantId;
use wmag_core::identifiers::UserId;
use wmag_core::model::event::Event;
use wmag_core::model::event::EventPayload;
use wmag_core::model::budget::BudgetMetric;
use wmag_core::model::job::Job;
use wmag_core::model::job::JobState;
use wmag_core::model::run::Run;
use wmag_core::model::run::RunPhase;
use wmag_core::model::step_result::StepResult;
use wmag_core::model::step_result::StepStatus;
use wmag_core::time::Timestamp;
use wmag_store::Store;
use wmag_store::StoreError;
use wmag_store_sqlite::SqliteStore;
use wmag_store_sqlite::SqliteStoreConfig;

fn open_store() -> (tempfile::TempDir, SqliteStore) {
    let dir = tempdir().expect("tempdir");
    let config = SqliteStoreConfig::new(dir.path().join("wmag.db"));
    let store = SqliteStore::open(config).expect("open store");
    (dir, store)
}

fn sample_run(run_id: &str, tenant_id: &str) -> Run {
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

fn sample_event(run_id: &str, seq: u64) -> Event {
    Event {
        run_id: RunId::new(run_id),
        seq: Seq::new(seq),
        recorded_at: Timestamp::from_millis(0),
        payload: EventPayload::StatusUpdate { phase: RunPhase::Submitted, detail: None },
        prev_hash: None,
        hash: wmag_core::hashing::hash_bytes(b"test"),
        signed_by: Kid::new("k1"),
    }
}

#[test]
fn run_round_trips_through_sqlite() {
    let (_dir, store) = open_store();
    store.save_run(&sample_run("r1", "t1")).expect("save");
    let loaded = store.load_run(&RunId::new("r1")).expect("load").expect("present");
    assert_eq!(loaded.run_id, RunId::new("r1"));
    assert_eq!(loaded.tenant_id, TenantId::new("t1"));
}

#[test]
fn save_run_upserts_existing_row() {
    let (_dir, store) = open_store();
    let mut run = sample_run("r1", "t1");
    store.save_run(&run).expect("save 1");
    run.phase = RunPhase::Completed;
    store.save_run(&run).expect("save 2");
    let loaded = store.load_run(&RunId::new("r1")).expect("load").expect("present");
    assert_eq!(loaded.phase, RunPhase::Completed);
}

#[test]
fn events_append_in_order_and_reject_gaps() {
    let (_dir, store) = open_store();
    store.append_event(&sample_event("r1", 1)).expect("append 1");
    store.append_event(&sample_event("r1", 2)).expect("append 2");
    let err = store.append_event(&sample_event("r1", 4)).expect_err("should reject gap");
    assert!(matches!(err, StoreError::Conflict(_)));

    let events = store.get_events(&RunId::new("r1"), Seq::new(1)).expect("get events");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].seq, Seq::new(1));
    assert_eq!(events[1].seq, Seq::new(2));
}

#[test]
fn list_runs_reads_from_materialized_view_after_refresh() {
    let (_dir, store) = open_store();
    store.save_run(&sample_run("r1", "t1")).expect("save r1");
    store.save_run(&sample_run("r2", "t2")).expect("save r2");
    store.refresh_list_runs_mv().expect("refresh");

    let runs = store.list_runs(&TenantId::new("t1")).expect("list");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, RunId::new("r1"));
}

#[test]
fn step_cache_put_is_idempotent() {
    let (_dir, store) = open_store();
    let result = StepResult {
        step_id: StepId::new("s1"),
        idem_key: IdemKey::new("k1"),
        status: StepStatus::Succeeded,
        output: Some(serde_json::json!({"ok": true})),
        error: None,
        retry_class: None,
        attempts: 1,
        policy_ids: vec![],
        recorded_at: Timestamp::from_millis(0),
    };
    store.cache_put(&result).expect("put 1");
    let mut second = result.clone();
    second.attempts = 42;
    store.cache_put(&second).expect("put 2");
    let cached = store.cache_get(&result.idem_key).expect("get").expect("present");
    assert_eq!(cached.attempts, 1);
}

#[test]
fn job_claim_transitions_queued_to_claimed() {
    let (_dir, store) = open_store();
    let job = Job {
        job_id: JobId::new("j1"),
        run_id: RunId::new("r1"),
        tenant_id: TenantId::new("t1"),
        state: JobState::Queued,
        visible_at: Timestamp::from_millis(0),
        claim_count: 0,
    };
    store.enqueue_job(&job).expect("enqueue");
    let claimed = store.claim_job(Timestamp::from_millis(100)).expect("claim").expect("present");
    assert_eq!(claimed.claim_count, 1);
    assert!(store.claim_job(Timestamp::from_millis(100)).expect("none left").is_none());
    store.complete_job(&job.job_id).expect("complete");
}

#[test]
fn budget_debit_accumulates_across_calls() {
    let (_dir, store) = open_store();
    let run_id = RunId::new("r1");
    store.budget_get(&run_id, 1_000).expect("seed");
    store.budget_debit(&run_id, BudgetMetric::CostUnits, 300).expect("debit 1");
    let counter = store.budget_debit(&run_id, BudgetMetric::CostUnits, 300).expect("debit 2");
    assert_eq!(counter.cost_units, 600);
    assert_eq!(counter.limit, 1_000);
}

#[test]
fn budget_debit_tracks_metrics_independently() {
    let (_dir, store) = open_store();
    let run_id = RunId::new("r1");
    store.budget_get(&run_id, 1_000).expect("seed");
    store.budget_debit(&run_id, BudgetMetric::ToolCalls, 1).expect("debit tool call");
    let counter = store.budget_debit(&run_id, BudgetMetric::CostUnits, 7).expect("debit cost units");
    assert_eq!(counter.tool_calls, 1);
    assert_eq!(counter.cost_units, 7);
    assert_eq!(counter.llm_calls, 0);
}

#[test]
fn audit_key_registry_round_trips() {
    let (_dir, store) = open_store();
    let tenant_id = TenantId::new("t1");
    let registry = AuditKeyRegistry::new(vec![AuditKey {
        kid: Kid::new("k1"),
        secret: b"secret".to_vec(),
        active: true,
        created_at: Timestamp::from_millis(0),
        retired_at: None,
    }])
    .expect("valid registry");
    store.save_audit_keys(&tenant_id, &registry).expect("save");
    let loaded = store.audit_keys(&tenant_id).expect("load");
    assert_eq!(loaded.active_key().expect("active").kid, Kid::new("k1"));
}

#[test]
fn readiness_reports_ok_for_open_database() {
    let (_dir, store) = open_store();
    store.readiness().expect("ready");
}
