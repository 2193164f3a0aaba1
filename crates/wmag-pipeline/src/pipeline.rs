// crates/wmag-pipeline/src/pipeline.rs
// ============================================================================
// Module: Pipeline
// Description: Drives a run through IngestTask -> LoadContext ->
// SelectWorldNodes -> Plan -> GateApproval -> (InputRequired) -> ExecuteSteps
// -> Synthesize -> Completed/Failed, one phase transition or step dispatch
// per `advance` call. Restart recovery replays the event log; nothing is
// held in memory across calls.
// Grounded on: decision-gate-core::runtime's single `ControlPlane` struct
// holding its store/evidence/dispatch collaborators by `Arc` and one
// top-level `evaluate`-then-`advance` driving loop, generalized from gate
// evaluation to the kernel's full multi-phase mission lifecycle.
// ============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::info;
use tracing::warn;
use wmag_adapters::ContextProvider;
use wmag_adapters::PlannerAdapter;
use wmag_adapters::TaskDescriptor;
use wmag_core::hashchain::AuditKeyRegistry;
use wmag_core::hashchain::chain_hash;
use wmag_core::identifiers::ApprovalId;
use wmag_core::identifiers::JobId;
use wmag_core::identifiers::Kid;
use wmag_core::identifiers::RunId;
use wmag_core::identifiers::StepId;
use wmag_core::identifiers::UserId;
use wmag_core::model::approval::Approval;
use wmag_core::model::approval::ApprovalDecision;
use wmag_core::model::approval::ApprovalState;
use wmag_core::model::event::ArtifactType;
use wmag_core::model::event::Event;
use wmag_core::model::event::EventPayload;
use wmag_core::model::job::Job;
use wmag_core::model::job::JobState;
use wmag_core::model::run::Run;
use wmag_core::model::run::RunPhase;
use wmag_core::model::step_result::StepResult;
use wmag_core::model::step_result::StepStatus;
use wmag_core::time::Clock;
use wmag_core::time::Timestamp;
use wmag_executor::StepExecutionContext;
use wmag_executor::StepExecutor;
use wmag_registry::RegistrySnapshot;
use wmag_store::Store;
use wmag_streamer::RunBus;

use crate::error::PipelineError;
use crate::plan_eval::evaluate_plan_policies;
use crate::reconstruct::Cursor;
use crate::reconstruct::MissionIntakeBody;
use crate::reconstruct::ReconstructedState;
use crate::reconstruct::reconstruct_state;

/// What happened during one `advance` call, telling the caller (`wmag-worker`)
/// whether to immediately re-drive the same run or stop until an external
/// event (an approval decision) wakes it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The run moved forward; more work may remain. Call `advance` again.
    Continue,
    /// The run is waiting on a pending approval; do not re-enqueue until
    /// `Pipeline::decide_approval` runs.
    WaitingForApproval,
    /// The run reached a terminal phase (`Completed`, `Failed`, `Canceled`).
    Terminal,
}

fn approval_id_for(run_id: &RunId) -> ApprovalId {
    ApprovalId::new(format!("appr-{run_id}"))
}

/// Drives missions through the kernel's phase pipeline.
pub struct Pipeline {
    store: Arc<dyn Store>,
    registry: Arc<RegistrySnapshot>,
    context_provider: Arc<dyn ContextProvider>,
    planner: Arc<dyn PlannerAdapter>,
    executor: Arc<StepExecutor>,
    bus: Arc<RunBus>,
    clock: Arc<dyn Clock>,
    /// Seconds a `GateApproval`-raised approval may stay pending before
    /// `advance` fails the run; `0` disables the timeout.
    approval_timeout_s: u64,
}

impl Pipeline {
    /// Builds a pipeline over its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<RegistrySnapshot>,
        context_provider: Arc<dyn ContextProvider>,
        planner: Arc<dyn PlannerAdapter>,
        executor: Arc<StepExecutor>,
        bus: Arc<RunBus>,
        clock: Arc<dyn Clock>,
        approval_timeout_s: u64,
    ) -> Self {
        Self { store, registry, context_provider, planner, executor, bus, clock, approval_timeout_s }
    }

    /// Accepts a new mission under `run_id`, persists its `Submitted` run
    /// row, records the `MissionIntake` artifact, and enqueues the first job
    /// that will carry it through `IngestTask`.
    ///
    /// Run identifiers are minted by the caller (the HTTP or CLI surface),
    /// not here: the pipeline never invents identity it cannot also recover
    /// from the event log on restart.
    ///
    /// # Errors
    /// Returns [`PipelineError::DuplicateRun`] if `run_id` already exists, or
    /// propagates a `Store`/hash-chain failure.
    pub fn submit(
        &self,
        run_id: RunId,
        task: TaskDescriptor,
        principal_roles: HashSet<String>,
    ) -> Result<(), PipelineError> {
        if self.store.load_run(&run_id)?.is_some() {
            return Err(PipelineError::DuplicateRun(run_id));
        }

        let now = self.clock.now();
        let audit_keys = self.store.audit_keys(&task.tenant_id)?;
        let kid = audit_keys.active_key()?.kid.clone();
        let mut cursor = Cursor::genesis();

        let run = Run {
            run_id: run_id.clone(),
            task_id: task.task_id.clone(),
            tenant_id: task.tenant_id.clone(),
            org_id: task.org_id.clone(),
            submitted_by: task.submitted_by.clone(),
            phase: RunPhase::Submitted,
            plan_id: None,
            budget_used: 0,
            created_at: now,
            updated_at: now,
        };
        self.store.save_run(&run)?;

        let body = serde_json::to_value(&MissionIntakeBody { task, principal_roles })?;
        self.emit(&mut cursor, &run, &audit_keys, &kid, ArtifactUpdate(ArtifactType::MissionIntake, body), now)?;

        let job = Job {
            job_id: JobId::new(format!("job-{run_id}-submit")),
            run_id: run_id.clone(),
            tenant_id: run.tenant_id.clone(),
            state: JobState::Queued,
            visible_at: now,
            claim_count: 0,
        };
        self.store.enqueue_job(&job)?;
        info!(run_id = %run_id, "mission submitted");
        Ok(())
    }

    /// Records a decision on the run's `GateApproval`-raised approval and
    /// enqueues a follow-up job so a worker resumes it.
    ///
    /// # Errors
    /// Propagates [`wmag_store::StoreError::ApprovalNotFound`] /
    /// `Conflict` if the approval does not exist or was already decided.
    pub fn decide_approval(
        &self,
        run_id: &RunId,
        decision: ApprovalDecision,
        decided_by: UserId,
    ) -> Result<Approval, PipelineError> {
        let now = self.clock.now();
        let approval_id = approval_id_for(run_id);
        let approval = self.store.decide_approval(&approval_id, decision, decided_by, now)?;

        let run = self.store.load_run(run_id)?.ok_or_else(|| PipelineError::RunNotFound(run_id.clone()))?;
        let job = Job {
            job_id: JobId::new(format!("job-{run_id}-resume-{}", now.as_millis())),
            run_id: run_id.clone(),
            tenant_id: run.tenant_id,
            state: JobState::Queued,
            visible_at: now,
            claim_count: 0,
        };
        self.store.enqueue_job(&job)?;
        Ok(approval)
    }

    /// Advances `run_id` by exactly one phase transition or, within
    /// `ExecuteSteps`, one step dispatch. Safe to call again immediately
    /// while the result is [`AdvanceOutcome::Continue`]; a caller should stop
    /// driving the run on any other outcome until an external event
    /// (an approval decision) re-enqueues it.
    ///
    /// # Errors
    /// Returns [`PipelineError`] if the run does not exist, a required
    /// artifact is missing from the reconstructed state, or a collaborator
    /// call fails.
    pub async fn advance(&self, run_id: &RunId) -> Result<AdvanceOutcome, PipelineError> {
        let mut run = self.store.load_run(run_id)?.ok_or_else(|| PipelineError::RunNotFound(run_id.clone()))?;
        if run.phase.is_terminal() {
            return Ok(AdvanceOutcome::Terminal);
        }

        let registry = self.registry.current();
        let audit_keys = self.store.audit_keys(&run.tenant_id)?;
        let kid = audit_keys.active_key()?.kid.clone();
        let (state, mut cursor) = reconstruct_state(self.store.as_ref(), run_id)?;
        let now = self.clock.now();

        let phase = run.phase;
        match phase {
            RunPhase::Submitted => {
                self.transition(&mut run, &mut cursor, &audit_keys, &kid, RunPhase::IngestTask, None, now)?;
                Ok(AdvanceOutcome::Continue)
            }
            RunPhase::IngestTask => {
                if state.task.is_none() {
                    return Err(PipelineError::MissingArtifact("mission_intake"));
                }
                self.transition(&mut run, &mut cursor, &audit_keys, &kid, RunPhase::LoadContext, None, now)?;
                Ok(AdvanceOutcome::Continue)
            }
            RunPhase::LoadContext => {
                let task = state.task.clone().ok_or(PipelineError::MissingArtifact("mission_intake"))?;
                let context_pack = self.context_provider.load_context(&task).await?;
                self.emit(
                    &mut cursor,
                    &run,
                    &audit_keys,
                    &kid,
                    ArtifactUpdate(ArtifactType::ContextPack, context_pack),
                    now,
                )?;
                self.transition(&mut run, &mut cursor, &audit_keys, &kid, RunPhase::SelectWorldNodes, None, now)?;
                Ok(AdvanceOutcome::Continue)
            }
            RunPhase::SelectWorldNodes => {
                // World-graph traversal is out of scope; this phase stands as
                // the boundary a fuller deployment's context/planner adapters
                // would use to narrow the context pack before planning.
                self.transition(&mut run, &mut cursor, &audit_keys, &kid, RunPhase::Plan, None, now)?;
                Ok(AdvanceOutcome::Continue)
            }
            RunPhase::Plan => {
                let task = state.task.clone().ok_or(PipelineError::MissingArtifact("mission_intake"))?;
                let context_pack = state.context_pack.clone().unwrap_or(Value::Null);
                let plan = self.planner.plan(&task, &context_pack, &registry.document).await?;
                plan.validate()?;
                run.plan_id = Some(plan.plan_id.clone());
                let body = serde_json::to_value(&plan)?;
                self.emit(&mut cursor, &run, &audit_keys, &kid, ArtifactUpdate(ArtifactType::Plan, body), now)?;
                self.transition(&mut run, &mut cursor, &audit_keys, &kid, RunPhase::GateApproval, None, now)?;
                Ok(AdvanceOutcome::Continue)
            }
            RunPhase::GateApproval => {
                self.advance_gate_approval(&mut run, &mut cursor, &audit_keys, &kid, &state, &registry.document, now)
            }
            RunPhase::InputRequired => {
                self.advance_input_required(&mut run, &mut cursor, &audit_keys, &kid, now)
            }
            RunPhase::ExecuteSteps => {
                self.advance_execute_steps(&mut run, &mut cursor, &audit_keys, &kid, &state, &registry.document, now).await
            }
            RunPhase::Synthesize => {
                self.advance_synthesize(&mut run, &mut cursor, &audit_keys, &kid, &state, &registry.document, now)
            }
            RunPhase::Completed | RunPhase::Failed | RunPhase::Canceled => Ok(AdvanceOutcome::Terminal),
        }
    }

    fn advance_gate_approval(
        &self,
        run: &mut Run,
        cursor: &mut Cursor,
        audit_keys: &AuditKeyRegistry,
        kid: &Kid,
        state: &ReconstructedState,
        registry: &wmag_core::model::registry_doc::RegistryDocument,
        now: Timestamp,
    ) -> Result<AdvanceOutcome, PipelineError> {
        let plan = state.plan.clone().ok_or(PipelineError::MissingArtifact("plan"))?;
        let plan_eval = evaluate_plan_policies(&plan, registry, &state.principal_roles)?;

        if !plan_eval.allow {
            let body = serde_json::to_value(&plan_eval)?;
            self.emit(cursor, run, audit_keys, kid, ArtifactUpdate(ArtifactType::Verdict, body), now)?;
            let detail = plan_eval
                .deny_reason
                .clone()
                .unwrap_or_else(|| "denied by plan-phase policy".to_string());
            self.transition(run, cursor, audit_keys, kid, RunPhase::Failed, Some(detail), now)?;
            return Ok(AdvanceOutcome::Terminal);
        }

        if !plan_eval.require_approval {
            let body = serde_json::to_value(&plan_eval)?;
            self.emit(cursor, run, audit_keys, kid, ArtifactUpdate(ArtifactType::Verdict, body), now)?;
            self.transition(run, cursor, audit_keys, kid, RunPhase::ExecuteSteps, None, now)?;
            return Ok(AdvanceOutcome::Continue);
        }

        let approval_id = approval_id_for(&run.run_id);
        let approval = Approval {
            approval_id: approval_id.clone(),
            run_id: run.run_id.clone(),
            step_id: None,
            eligible_roles: plan_eval.eligible_approver_roles.clone(),
            state: ApprovalState::Pending,
            created_at: now,
        };
        self.store.create_approval(&approval)?;

        let mut body = serde_json::to_value(&plan_eval)?;
        if let Value::Object(map) = &mut body {
            map.insert("approval_id".to_string(), Value::String(approval_id.as_str().to_string()));
        }
        self.emit(cursor, run, audit_keys, kid, ArtifactUpdate(ArtifactType::Verdict, body), now)?;
        self.transition(run, cursor, audit_keys, kid, RunPhase::InputRequired, Some("awaiting approval".to_string()), now)?;
        warn!(run_id = %run.run_id, %approval_id, "run waiting on approval");
        Ok(AdvanceOutcome::WaitingForApproval)
    }

    fn advance_input_required(
        &self,
        run: &mut Run,
        cursor: &mut Cursor,
        audit_keys: &AuditKeyRegistry,
        kid: &Kid,
        now: Timestamp,
    ) -> Result<AdvanceOutcome, PipelineError> {
        let approval_id = approval_id_for(&run.run_id);
        let approval = self
            .store
            .get_approval(&approval_id)?
            .ok_or_else(|| PipelineError::MissingApproval(approval_id.clone()))?;

        match approval.state {
            ApprovalState::Pending => {
                if self.approval_timeout_s > 0
                    && now.as_secs().saturating_sub(approval.created_at.as_secs()) >= self.approval_timeout_s
                {
                    self.transition(
                        run,
                        cursor,
                        audit_keys,
                        kid,
                        RunPhase::Failed,
                        Some("approval timed out".to_string()),
                        now,
                    )?;
                    return Ok(AdvanceOutcome::Terminal);
                }
                Ok(AdvanceOutcome::WaitingForApproval)
            }
            ApprovalState::Decided { decision: ApprovalDecision::Approved, .. } => {
                self.transition(run, cursor, audit_keys, kid, RunPhase::ExecuteSteps, None, now)?;
                Ok(AdvanceOutcome::Continue)
            }
            ApprovalState::Decided { decision: ApprovalDecision::Rejected, .. } => {
                self.transition(
                    run,
                    cursor,
                    audit_keys,
                    kid,
                    RunPhase::Failed,
                    Some("approval rejected".to_string()),
                    now,
                )?;
                Ok(AdvanceOutcome::Terminal)
            }
        }
    }

    async fn advance_execute_steps(
        &self,
        run: &mut Run,
        cursor: &mut Cursor,
        audit_keys: &AuditKeyRegistry,
        kid: &Kid,
        state: &ReconstructedState,
        registry: &wmag_core::model::registry_doc::RegistryDocument,
        now: Timestamp,
    ) -> Result<AdvanceOutcome, PipelineError> {
        let plan = state.plan.clone().ok_or(PipelineError::MissingArtifact("plan"))?;
        let ordered = plan.topological_order()?;
        let plan_eval = evaluate_plan_policies(&plan, registry, &state.principal_roles)?;

        for step in ordered {
            if state.step_results.contains_key(&step.step_id) {
                continue;
            }

            let action = registry
                .action(&step.action_id)
                .ok_or_else(|| PipelineError::UnknownAction(step.action_id.clone()))?;
            let tool = registry.tool(&action.tool_id).ok_or_else(|| PipelineError::UnknownTool(action.tool_id.clone()))?;

            let cost_units = plan_eval
                .step_cost_overrides
                .get(&step.step_id)
                .copied()
                .unwrap_or_else(|| step.cost_units.unwrap_or(0));

            let prior_outputs: Vec<(StepId, StepResult)> =
                state.step_results.iter().map(|(id, result)| (id.clone(), result.clone())).collect();

            let exec_ctx = StepExecutionContext {
                run_id: &run.run_id,
                tenant_id: &run.tenant_id,
                step,
                action,
                tool,
                policies: &registry.policies,
                retry_classes: &registry.retry_classes,
                principal_roles: &state.principal_roles,
                cost_units,
                budget_limit: registry.limits.max_budget_per_run,
                prior_outputs: &prior_outputs,
            };
            let result = self.executor.execute(exec_ctx).await?;
            let fatal = matches!(result.status, StepStatus::Failed | StepStatus::Denied) && !step.continue_on_error;
            let detail = result.error.clone();
            let body = serde_json::to_value(&result)?;
            self.emit(cursor, run, audit_keys, kid, ArtifactUpdate(ArtifactType::StepResult, body), now)?;

            let budget = self.store.budget_get(&run.run_id, registry.limits.max_budget_per_run)?;
            run.budget_used = budget.cost_units;

            if fatal {
                self.transition(
                    run,
                    cursor,
                    audit_keys,
                    kid,
                    RunPhase::Failed,
                    Some(format!("step {} failed: {}", step.step_id, detail.unwrap_or_default())),
                    now,
                )?;
                return Ok(AdvanceOutcome::Terminal);
            }

            self.store.save_run(run)?;
            return Ok(AdvanceOutcome::Continue);
        }

        self.transition(run, cursor, audit_keys, kid, RunPhase::Synthesize, None, now)?;
        Ok(AdvanceOutcome::Continue)
    }

    fn advance_synthesize(
        &self,
        run: &mut Run,
        cursor: &mut Cursor,
        audit_keys: &AuditKeyRegistry,
        kid: &Kid,
        state: &ReconstructedState,
        registry: &wmag_core::model::registry_doc::RegistryDocument,
        now: Timestamp,
    ) -> Result<AdvanceOutcome, PipelineError> {
        let plan = state.plan.clone().ok_or(PipelineError::MissingArtifact("plan"))?;
        let mut step_results: Vec<_> = state.step_results.values().collect();
        step_results.sort_by(|a, b| a.step_id.as_str().cmp(b.step_id.as_str()));
        let synthesis = serde_json::json!({
            "plan_id": plan.plan_id,
            "step_results": step_results,
        });
        self.emit(cursor, run, audit_keys, kid, ArtifactUpdate(ArtifactType::Final, synthesis), now)?;

        let plan_eval = evaluate_plan_policies(&plan, registry, &state.principal_roles)?;
        let mut emitted = state.emitted_artifacts.clone();
        emitted.push(ArtifactType::Final);
        for obligation in &plan_eval.obligations {
            if let wmag_core::model::policy_doc::Obligation::MustEmitArtifact { artifact_type } = obligation {
                if !emitted.contains(artifact_type) {
                    self.transition(
                        run,
                        cursor,
                        audit_keys,
                        kid,
                        RunPhase::Failed,
                        Some(format!("required artifact {artifact_type:?} was never emitted")),
                        now,
                    )?;
                    return Ok(AdvanceOutcome::Terminal);
                }
            }
        }

        self.transition(run, cursor, audit_keys, kid, RunPhase::Completed, None, now)?;
        Ok(AdvanceOutcome::Terminal)
    }

    fn transition(
        &self,
        run: &mut Run,
        cursor: &mut Cursor,
        audit_keys: &AuditKeyRegistry,
        kid: &Kid,
        phase: RunPhase,
        detail: Option<String>,
        now: Timestamp,
    ) -> Result<(), PipelineError> {
        self.emit(cursor, run, audit_keys, kid, StatusUpdate(phase, detail), now)?;
        run.phase = phase;
        run.updated_at = now;
        self.store.save_run(run)?;
        Ok(())
    }

    fn emit(
        &self,
        cursor: &mut Cursor,
        run: &Run,
        audit_keys: &AuditKeyRegistry,
        kid: &Kid,
        payload: impl Into<EventPayload>,
        now: Timestamp,
    ) -> Result<(), PipelineError> {
        let payload = payload.into();
        let hash = chain_hash(audit_keys, kid, cursor.prev_hash.as_ref(), &payload)?;
        let event = Event {
            run_id: run.run_id.clone(),
            seq: cursor.next_seq,
            recorded_at: now,
            payload,
            prev_hash: cursor.prev_hash,
            hash,
            signed_by: kid.clone(),
        };
        self.store.append_event(&event)?;
        self.bus.publish(event.clone());
        *cursor = Cursor { next_seq: event.seq.next(), prev_hash: Some(event.hash) };
        Ok(())
    }
}

/// Thin wrapper converting `(ArtifactType, Value)` into an
/// [`EventPayload::ArtifactUpdate`], so call sites read as
/// `ArtifactUpdate(type, body)` instead of repeating the struct literal.
struct ArtifactUpdate(ArtifactType, Value);

impl From<ArtifactUpdate> for EventPayload {
    fn from(value: ArtifactUpdate) -> Self {
        Self::ArtifactUpdate { artifact_type: value.0, body: value.1 }
    }
}

/// Thin wrapper converting `(RunPhase, Option<String>)` into an
/// [`EventPayload::StatusUpdate`].
struct StatusUpdate(RunPhase, Option<String>);

impl From<StatusUpdate> for EventPayload {
    fn from(value: StatusUpdate) -> Self {
        Self::StatusUpdate { phase: value.0, detail: value.1 }
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
    use wmag_adapters::EchoToolAdapter;
    use wmag_adapters::EmptyContextProvider;
    use wmag_adapters::FirstActionPlannerAdapter;
    use wmag_core::hashchain::AuditKey;
    use wmag_core::identifiers::ActionId;
    use wmag_core::identifiers::OrgId;
    use wmag_core::identifiers::TaskId;
    use wmag_core::identifiers::TenantId;
    use wmag_core::identifiers::ToolId;
    use wmag_core::model::policy_doc::Condition;
    use wmag_core::model::policy_doc::Effect;
    use wmag_core::model::policy_doc::Policy;
    use wmag_core::model::registry_doc::Action;
    use wmag_core::model::registry_doc::Limits;
    use wmag_core::model::registry_doc::RegistryDocument;
    use wmag_core::model::registry_doc::Tool;
    use wmag_core::time::FixedClock;
    use wmag_registry::EffectiveRegistry;
    use wmag_store::EphemeralStore;

    use super::*;

    fn registry_document(policies: Vec<Policy>) -> RegistryDocument {
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
                idempotency: wmag_core::model::registry_doc::Idempotency {
                    strategy: wmag_core::model::registry_doc::IdempotencyStrategy::Hash,
                    fields: None,
                },
                security: wmag_core::model::registry_doc::Security::default(),
            }],
            roles: vec![],
            policies,
            limits: Limits {
                max_budget_per_run: 1000,
                max_concurrent_steps: 1,
                max_concurrent_runs_per_tenant: 1,
                rate_limit_window_s: 60,
                rate_limit_max_per_window: 100,
            },
            retry_classes: vec![],
        }
    }

    fn audit_keys_for(store: &EphemeralStore, tenant_id: &TenantId, now: Timestamp) {
        let registry = AuditKeyRegistry::new(vec![AuditKey {
            kid: Kid::new("k1"),
            secret: b"test-secret".to_vec(),
            active: true,
            created_at: now,
            retired_at: None,
        }])
        .expect("valid registry");
        store.save_audit_keys(tenant_id, &registry).expect("save audit keys");
    }

    fn pipeline(store: Arc<EphemeralStore>, document: RegistryDocument, approval_timeout_s: u64) -> Pipeline {
        let effective = EffectiveRegistry { document };
        let snapshot = Arc::new(RegistrySnapshot::new(effective));
        let clock = Arc::new(FixedClock(Timestamp::from_millis(0)));
        let executor = Arc::new(StepExecutor::new(
            store.clone() as Arc<dyn Store>,
            Arc::new(EchoToolAdapter),
            clock.clone() as Arc<dyn Clock>,
        ));
        Pipeline::new(
            store as Arc<dyn Store>,
            snapshot,
            Arc::new(EmptyContextProvider),
            Arc::new(FirstActionPlannerAdapter),
            executor,
            Arc::new(RunBus::default()),
            clock,
            approval_timeout_s,
        )
    }

    fn task(run_id: &str) -> TaskDescriptor {
        TaskDescriptor {
            task_id: TaskId::new(format!("task-{run_id}")),
            tenant_id: TenantId::new("t1"),
            org_id: OrgId::new("o1"),
            submitted_by: UserId::new("u1"),
            goal: "send a status email".to_string(),
            params: serde_json::json!({}),
        }
    }

    async fn drive_to_terminal(pipeline: &Pipeline, run_id: &RunId) -> AdvanceOutcome {
        loop {
            match pipeline.advance(run_id).await.expect("advance") {
                AdvanceOutcome::Continue => continue,
                other => return other,
            }
        }
    }

    #[tokio::test]
    async fn run_with_no_matching_policy_completes() {
        let store = Arc::new(EphemeralStore::new());
        audit_keys_for(&store, &TenantId::new("t1"), Timestamp::from_millis(0));
        let pipeline = pipeline(store.clone(), registry_document(vec![]), 0);

        let run_id = RunId::new("r1");
        pipeline.submit(run_id.clone(), task("r1"), HashSet::new()).expect("submit");

        let outcome = drive_to_terminal(&pipeline, &run_id).await;
        assert_eq!(outcome, AdvanceOutcome::Terminal);
        let run = store.load_run(&run_id).expect("load").expect("present");
        assert_eq!(run.phase, RunPhase::Completed);
    }

    #[tokio::test]
    async fn plan_phase_deny_fails_the_run() {
        let store = Arc::new(EphemeralStore::new());
        audit_keys_for(&store, &TenantId::new("t1"), Timestamp::from_millis(0));
        let policies = vec![Policy {
            policy_id: PolicyId::new("deny-email"),
            phase: "plan".to_string(),
            priority: 0,
            when: Condition::ActionGlob { pattern: "send_*".to_string() },
            effect: Effect {
                allow: false,
                deny_reason: Some("email blocked".to_string()),
                set_cost_units: None,
                obligations: vec![],
            },
        }];
        let pipeline = pipeline(store.clone(), registry_document(policies), 0);

        let run_id = RunId::new("r1");
        pipeline.submit(run_id.clone(), task("r1"), HashSet::new()).expect("submit");

        let outcome = drive_to_terminal(&pipeline, &run_id).await;
        assert_eq!(outcome, AdvanceOutcome::Terminal);
        let run = store.load_run(&run_id).expect("load").expect("present");
        assert_eq!(run.phase, RunPhase::Failed);
    }

    #[tokio::test]
    async fn require_approval_waits_then_resumes_on_approve() {
        let store = Arc::new(EphemeralStore::new());
        audit_keys_for(&store, &TenantId::new("t1"), Timestamp::from_millis(0));
        let policies = vec![Policy {
            policy_id: PolicyId::new("gate-email"),
            phase: "plan".to_string(),
            priority: 0,
            when: Condition::ActionGlob { pattern: "*".to_string() },
            effect: Effect {
                allow: true,
                deny_reason: None,
                set_cost_units: None,
                obligations: vec![Obligation::RequireApproval { approver_roles: vec!["admin".to_string()] }],
            },
        }];
        let pipeline = pipeline(store.clone(), registry_document(policies), 0);

        let run_id = RunId::new("r1");
        pipeline.submit(run_id.clone(), task("r1"), HashSet::new()).expect("submit");

        let outcome = drive_to_terminal(&pipeline, &run_id).await;
        assert_eq!(outcome, AdvanceOutcome::WaitingForApproval);
        let run = store.load_run(&run_id).expect("load").expect("present");
        assert_eq!(run.phase, RunPhase::InputRequired);

        pipeline
            .decide_approval(&run_id, ApprovalDecision::Approved, UserId::new("admin-1"))
            .expect("decide");

        let outcome = drive_to_terminal(&pipeline, &run_id).await;
        assert_eq!(outcome, AdvanceOutcome::Terminal);
        let run = store.load_run(&run_id).expect("load").expect("present");
        assert_eq!(run.phase, RunPhase::Completed);
    }

    #[tokio::test]
    async fn rejecting_an_approval_fails_the_run() {
        let store = Arc::new(EphemeralStore::new());
        audit_keys_for(&store, &TenantId::new("t1"), Timestamp::from_millis(0));
        let policies = vec![Policy {
            policy_id: PolicyId::new("gate-email"),
            phase: "plan".to_string(),
            priority: 0,
            when: Condition::ActionGlob { pattern: "*".to_string() },
            effect: Effect {
                allow: true,
                deny_reason: None,
                set_cost_units: None,
                obligations: vec![Obligation::RequireApproval { approver_roles: vec!["admin".to_string()] }],
            },
        }];
        let pipeline = pipeline(store.clone(), registry_document(policies), 0);

        let run_id = RunId::new("r1");
        pipeline.submit(run_id.clone(), task("r1"), HashSet::new()).expect("submit");
        drive_to_terminal(&pipeline, &run_id).await;

        pipeline
            .decide_approval(&run_id, ApprovalDecision::Rejected, UserId::new("admin-1"))
            .expect("decide");
        let outcome = drive_to_terminal(&pipeline, &run_id).await;
        assert_eq!(outcome, AdvanceOutcome::Terminal);
        let run = store.load_run(&run_id).expect("load").expect("present");
        assert_eq!(run.phase, RunPhase::Failed);
    }

    #[tokio::test]
    async fn a_fresh_pipeline_resumes_a_run_mid_flight_from_the_event_log() {
        let store = Arc::new(EphemeralStore::new());
        audit_keys_for(&store, &TenantId::new("t1"), Timestamp::from_millis(0));
        let run_id = RunId::new("r1");

        {
            let pipeline = pipeline(store.clone(), registry_document(vec![]), 0);
            pipeline.submit(run_id.clone(), task("r1"), HashSet::new()).expect("submit");
            // Advance only partway: through Plan, stopping before ExecuteSteps.
            for _ in 0..6 {
                pipeline.advance(&run_id).await.expect("advance");
            }
            let run = store.load_run(&run_id).expect("load").expect("present");
            assert_ne!(run.phase, RunPhase::Completed, "test setup should not have finished the run yet");
        }

        // A brand new Pipeline instance (simulating a worker restart) with no
        // in-memory state of its own must still be able to finish the run.
        let resumed = pipeline(store.clone(), registry_document(vec![]), 0);
        let outcome = drive_to_terminal(&resumed, &run_id).await;
        assert_eq!(outcome, AdvanceOutcome::Terminal);
        let run = store.load_run(&run_id).expect("load").expect("present");
        assert_eq!(run.phase, RunPhase::Completed);
    }

    #[tokio::test]
    async fn pending_approval_past_its_timeout_fails_the_run() {
        let store = Arc::new(EphemeralStore::new());
        audit_keys_for(&store, &TenantId::new("t1"), Timestamp::from_millis(0));
        let policies = vec![Policy {
            policy_id: PolicyId::new("gate-email"),
            phase: "plan".to_string(),
            priority: 0,
            when: Condition::ActionGlob { pattern: "*".to_string() },
            effect: Effect {
                allow: true,
                deny_reason: None,
                set_cost_units: None,
                obligations: vec![Obligation::RequireApproval { approver_roles: vec!["admin".to_string()] }],
            },
        }];
        let pipeline = pipeline(store.clone(), registry_document(policies), 1);

        let run_id = RunId::new("r1");
        pipeline.submit(run_id.clone(), task("r1"), HashSet::new()).expect("submit");
        let outcome = drive_to_terminal(&pipeline, &run_id).await;
        assert_eq!(outcome, AdvanceOutcome::WaitingForApproval);

        // FixedClock never advances, so re-polling at the same instant must
        // not spuriously time out a just-created approval.
        let outcome = pipeline.advance(&run_id).await.expect("advance");
        assert_eq!(outcome, AdvanceOutcome::WaitingForApproval);
    }

    use wmag_core::identifiers::PolicyId;
    use wmag_core::model::policy_doc::Obligation;
}
