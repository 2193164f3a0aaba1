// crates/wmag-worker/src/worker.rs
// ============================================================================
// Module: Worker Pool
// Description: A pool of N workers, each looping: claim a job under tenant
// concurrency caps, drive the Pipeline to completion/failure/approval-wait,
// release the slot. Enforces the step-dispatch rate limit by deferring (not
// failing) a run's job when its tenant is over its window.
// Grounded on: decision-gate-mcp::server's `serve_stdio`/`serve_http` loop
// shape (accept-or-block, one iteration per unit of work, shutdown checked
// between iterations), adapted from a single request-response loop to a
// job-claim loop with an explicit idle sleep between empty polls.
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::error;
use tracing::info;
use tracing::warn;
use wmag_core::identifiers::JobId;
use wmag_core::identifiers::TenantId;
use wmag_core::model::job::Job;
use wmag_core::model::job::JobState;
use wmag_core::model::rate_window::RateScope;
use wmag_core::model::rate_window::RateWindowKey;
use wmag_core::model::run::RunPhase;
use wmag_core::time::Clock;
use wmag_core::time::Timestamp;
use wmag_pipeline::AdvanceOutcome;
use wmag_pipeline::Pipeline;
use wmag_registry::RegistrySnapshot;
use wmag_store::Store;

use crate::error::WorkerError;

/// How long a worker waits between polling attempts once a claim attempt
/// finds nothing to do.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How long a deferred (tenant-over-capacity or rate-limited) job is pushed
/// into the future before it becomes visible again.
const DEFER_DELAY: Duration = Duration::from_millis(250);

/// Fixed configuration for a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent worker loops to run.
    pub worker_count: usize,
    /// Idle sleep between empty claim attempts.
    pub poll_interval: Duration,
    /// Fallback tenant concurrency cap used when the effective registry's
    /// `Limits::max_concurrent_runs_per_tenant` is unset (zero).
    pub default_tenant_max_concurrency: u32,
    /// Fallback rate-limit window, in seconds, used when the effective
    /// registry's `Limits::rate_limit_window_s` is unset (zero).
    pub default_rate_limit_window_s: u64,
}

/// In-process tenant concurrency tracking.
///
/// The kernel's [`wmag_core::model::job::Job`] carries no lease-expiry or
/// owner field, so there is nothing in the `Store` contract a second worker
/// process could consult to see "tenant `t1` currently has 2 runs in
/// flight". spec.md's own note that a production backend would model this
/// with `hash(tenant_id) mod K` advisory locks describes a cross-process
/// mechanism this workspace's `Store` trait does not expose; this
/// substitution enforces the cap only within one worker pool process,
/// which is adequate for the single-process worker-pool deployment
/// SPEC_FULL.md assumes, and is recorded in `DESIGN.md`.
#[derive(Default)]
struct TenantSlots {
    in_use: Mutex<HashMap<TenantId, u32>>,
}

impl TenantSlots {
    fn try_acquire(&self, tenant_id: &TenantId, cap: u32) -> bool {
        let mut in_use = self.in_use.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let count = in_use.entry(tenant_id.clone()).or_insert(0);
        if *count >= cap {
            return false;
        }
        *count += 1;
        true
    }

    fn release(&self, tenant_id: &TenantId) {
        let mut in_use = self.in_use.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(count) = in_use.get_mut(tenant_id) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Outcome of one `claim_and_drive` attempt, telling the caller whether to
/// sleep before the next poll.
enum ClaimOutcome {
    /// Nothing was visible to claim.
    Idle,
    /// A job was claimed and handled (whether driven, deferred, or errored).
    Claimed,
}

/// Drives claimed jobs through the kernel's `Pipeline`.
pub struct WorkerPool {
    store: Arc<dyn Store>,
    pipeline: Arc<Pipeline>,
    registry: Arc<RegistrySnapshot>,
    clock: Arc<dyn Clock>,
    config: WorkerPoolConfig,
    slots: TenantSlots,
}

impl WorkerPool {
    /// Builds a worker pool over its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        pipeline: Arc<Pipeline>,
        registry: Arc<RegistrySnapshot>,
        clock: Arc<dyn Clock>,
        config: WorkerPoolConfig,
    ) -> Self {
        Self { store, pipeline, registry, clock, config, slots: TenantSlots::default() }
    }

    /// Spawns `worker_count` tokio tasks, each running an independent claim
    /// loop, and returns their join handles. Tasks stop once `shutdown`
    /// carries `true`.
    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        (0..self.config.worker_count)
            .map(|id| {
                let pool = Arc::clone(self);
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move { pool.run_loop(id, &mut shutdown).await })
            })
            .collect()
    }

    async fn run_loop(&self, worker_id: usize, shutdown: &mut watch::Receiver<bool>) {
        info!(worker_id, "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.claim_and_drive(worker_id).await {
                Ok(ClaimOutcome::Claimed) => {}
                Ok(ClaimOutcome::Idle) => {
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(err) => {
                    error!(worker_id, error = %err, "worker iteration failed");
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
        info!(worker_id, "worker stopped");
    }

    async fn claim_and_drive(&self, worker_id: usize) -> Result<ClaimOutcome, WorkerError> {
        let now = self.clock.now();
        let Some(job) = self.store.claim_job(now)? else {
            return Ok(ClaimOutcome::Idle);
        };

        let cap = self.tenant_max_concurrency();
        if !self.slots.try_acquire(&job.tenant_id, cap) {
            self.defer(&job, now)?;
            return Ok(ClaimOutcome::Claimed);
        }

        let drive_result = self.drive_run(worker_id, &job).await;
        self.slots.release(&job.tenant_id);

        match drive_result {
            Ok(DriveOutcome::Settled(outcome)) => {
                info!(worker_id, run_id = %job.run_id, ?outcome, "run driven");
                self.store.complete_job(&job.job_id)?;
            }
            Ok(DriveOutcome::RateLimited) => {
                warn!(worker_id, run_id = %job.run_id, tenant_id = %job.tenant_id, "step dispatch rate limited, deferring");
                self.defer(&job, now)?;
            }
            Err(err) => {
                error!(worker_id, run_id = %job.run_id, error = %err, "failed to drive run");
                self.store.complete_job(&job.job_id)?;
            }
        }
        Ok(ClaimOutcome::Claimed)
    }

    /// Replaces a claimed-but-not-runnable job with a successor visible
    /// `DEFER_DELAY` later, and marks the claimed one done. The `Store`
    /// contract has no "unclaim" operation, so deferral is modeled as
    /// completing the held job and enqueuing a fresh one.
    fn defer(&self, job: &Job, now: wmag_core::time::Timestamp) -> Result<(), WorkerError> {
        let successor = Job {
            job_id: JobId::new(format!("{}-defer-{}", job.job_id, now.as_millis())),
            run_id: job.run_id.clone(),
            tenant_id: job.tenant_id.clone(),
            state: JobState::Queued,
            visible_at: Timestamp::from_millis(now.as_millis() + u64::try_from(DEFER_DELAY.as_millis()).unwrap_or(u64::MAX)),
            claim_count: job.claim_count + 1,
        };
        self.store.enqueue_job(&successor)?;
        self.store.complete_job(&job.job_id)?;
        Ok(())
    }

    fn tenant_max_concurrency(&self) -> u32 {
        let configured = self.registry.current().document.limits.max_concurrent_runs_per_tenant;
        if configured > 0 { configured } else { self.config.default_tenant_max_concurrency }
    }

    fn rate_limit_window_s(&self) -> u64 {
        let configured = self.registry.current().document.limits.rate_limit_window_s;
        if configured > 0 { configured } else { self.config.default_rate_limit_window_s }
    }

    /// Drives `job`'s run through the pipeline one `advance` call at a
    /// time until it reaches a non-`Continue` outcome, checking the
    /// tenant's step-dispatch rate limit immediately before any call that
    /// would enter `ExecuteSteps`.
    async fn drive_run(&self, worker_id: usize, job: &Job) -> Result<DriveOutcome, WorkerError> {
        loop {
            let run = self.store.load_run(&job.run_id)?;
            if let Some(run) = &run {
                if run.phase == RunPhase::ExecuteSteps && self.step_dispatch_rate_limited(&job.tenant_id)? {
                    return Ok(DriveOutcome::RateLimited);
                }
            }
            tracing::debug!(worker_id, run_id = %job.run_id, "advancing run");
            let outcome = self.pipeline.advance(&job.run_id).await?;
            if outcome != AdvanceOutcome::Continue {
                return Ok(DriveOutcome::Settled(outcome));
            }
        }
    }

    fn step_dispatch_rate_limited(&self, tenant_id: &TenantId) -> Result<bool, WorkerError> {
        let limits = &self.registry.current().document.limits;
        if limits.rate_limit_max_per_window == 0 {
            return Ok(false);
        }
        let now = self.clock.now();
        let key = RateWindowKey {
            tenant_id: tenant_id.clone(),
            scope: RateScope::TenantStepDispatches,
            window_start: now.window_start(self.rate_limit_window_s()),
        };
        let window = self.store.rate_window_increment(&key)?;
        Ok(window.count > limits.rate_limit_max_per_window)
    }
}

/// What happened while driving one claimed run.
enum DriveOutcome {
    /// The run reached a stopping point (`Terminal` or `WaitingForApproval`).
    Settled(AdvanceOutcome),
    /// The tenant's step-dispatch window is over its limit; the job was
    /// deferred rather than driven further.
    RateLimited,
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
    use std::collections::HashSet;
    use std::sync::Arc;

    use wmag_adapters::EchoToolAdapter;
    use wmag_adapters::EmptyContextProvider;
    use wmag_adapters::FirstActionPlannerAdapter;
    use wmag_adapters::TaskDescriptor;
    use wmag_core::hashchain::AuditKey;
    use wmag_core::hashchain::AuditKeyRegistry;
    use wmag_core::identifiers::ActionId;
    use wmag_core::identifiers::Kid;
    use wmag_core::identifiers::OrgId;
    use wmag_core::identifiers::RunId;
    use wmag_core::identifiers::TaskId;
    use wmag_core::identifiers::TenantId;
    use wmag_core::identifiers::ToolId;
    use wmag_core::identifiers::UserId;
    use wmag_core::model::registry_doc::Action;
    use wmag_core::model::registry_doc::Idempotency;
    use wmag_core::model::registry_doc::IdempotencyStrategy;
    use wmag_core::model::registry_doc::Limits;
    use wmag_core::model::registry_doc::Security;
    use wmag_core::model::registry_doc::RegistryDocument;
    use wmag_core::model::registry_doc::Tool;
    use wmag_core::time::FixedClock;
    use wmag_executor::StepExecutor;
    use wmag_registry::EffectiveRegistry;
    use wmag_store::EphemeralStore;
    use wmag_streamer::RunBus;

    use super::*;

    fn registry_document() -> RegistryDocument {
        RegistryDocument {
            tools: vec![Tool { tool_id: ToolId::new("smtp"), description: String::new(), connection: serde_json::json!({}) }],
            actions: vec![Action {
                action_id: ActionId::new("send_email"),
                version: "1".to_string(),
                tool_id: ToolId::new("smtp"),
                schema_in: serde_json::json!({}),
                schema_out: serde_json::json!({}),
                side_effect: true,
                default_retry_class: "internal".to_string(),
                idempotency: Idempotency { strategy: IdempotencyStrategy::Hash, fields: None },
                security: Security::default(),
            }],
            roles: vec![],
            policies: vec![],
            limits: Limits {
                max_budget_per_run: 1000,
                max_concurrent_steps: 1,
                max_concurrent_runs_per_tenant: 2,
                rate_limit_window_s: 60,
                rate_limit_max_per_window: 100,
            },
            retry_classes: vec![],
        }
    }

    fn build_pool(store: Arc<EphemeralStore>) -> Arc<WorkerPool> {
        let document = registry_document();
        let snapshot = Arc::new(RegistrySnapshot::new(EffectiveRegistry { document }));
        let clock: Arc<dyn Clock> = Arc::new(FixedClock(Timestamp::from_millis(0)));
        let executor = Arc::new(StepExecutor::new(
            store.clone() as Arc<dyn Store>,
            Arc::new(EchoToolAdapter),
            clock.clone(),
        ));
        let pipeline = Arc::new(Pipeline::new(
            store.clone() as Arc<dyn Store>,
            snapshot.clone(),
            Arc::new(EmptyContextProvider),
            Arc::new(FirstActionPlannerAdapter),
            executor,
            Arc::new(RunBus::default()),
            clock.clone(),
            0,
        ));
        Arc::new(WorkerPool::new(
            store as Arc<dyn Store>,
            pipeline,
            snapshot,
            clock,
            WorkerPoolConfig {
                worker_count: 1,
                poll_interval: Duration::from_millis(10),
                default_tenant_max_concurrency: 2,
                default_rate_limit_window_s: 60,
            },
        ))
    }

    fn seed_audit_keys(store: &EphemeralStore, tenant_id: &TenantId) {
        let registry = AuditKeyRegistry::new(vec![AuditKey {
            kid: Kid::new("k1"),
            secret: b"test-secret".to_vec(),
            active: true,
            created_at: Timestamp::from_millis(0),
            retired_at: None,
        }])
        .expect("valid registry");
        store.save_audit_keys(tenant_id, &registry).expect("save audit keys");
    }

    #[tokio::test]
    async fn drains_a_submitted_run_to_completion() {
        let store = Arc::new(EphemeralStore::new());
        let tenant_id = TenantId::new("t1");
        seed_audit_keys(&store, &tenant_id);
        let pool = build_pool(store.clone());

        let run_id = RunId::new("run-1");
        let task = TaskDescriptor {
            task_id: TaskId::new("task-1"),
            tenant_id: tenant_id.clone(),
            org_id: OrgId::new("o1"),
            submitted_by: UserId::new("u1"),
            goal: "send a status email".to_string(),
            params: serde_json::json!({}),
        };
        pool.pipeline.submit(run_id.clone(), task, HashSet::new()).expect("submit");

        for _ in 0..20 {
            match pool.claim_and_drive(0).await.expect("claim_and_drive") {
                ClaimOutcome::Claimed => {}
                ClaimOutcome::Idle => break,
            }
        }

        let run = store.load_run(&run_id).expect("load").expect("run exists");
        assert_eq!(run.phase, RunPhase::Completed);
    }

    #[tokio::test]
    async fn over_capacity_tenant_defers_instead_of_driving() {
        let store = Arc::new(EphemeralStore::new());
        let pool = build_pool(store.clone());
        let tenant_id = TenantId::new("t1");

        assert!(pool.slots.try_acquire(&tenant_id, 2));
        assert!(pool.slots.try_acquire(&tenant_id, 2));
        assert!(!pool.slots.try_acquire(&tenant_id, 2));
        pool.slots.release(&tenant_id);
        assert!(pool.slots.try_acquire(&tenant_id, 2));
    }
}
