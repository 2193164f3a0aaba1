// crates/wmag-pipeline/src/reconstruct.rs
// ============================================================================
// Module: Restart Recovery
// Description: Rebuilds the in-memory state `advance` needs (the submitted
// task, principal roles, context pack, plan, per-step results, and the
// hash-chain cursor) by replaying a run's event log. There is no separate
// checkpoint table: the event log the pipeline already writes is the only
// durable state a restarted worker needs.
// Grounded on: spec.md §4.6's restart note ("the pipeline reconstructs
// in-memory state by replaying `get_events(run_id, 0)`"); mirrors
// wmag-streamer::streamer's own from-a-cursor replay for the same log.
// ============================================================================

use std::collections::HashMap;
use std::collections::HashSet;

use serde::Deserialize;
use serde::Serialize;
use wmag_adapters::TaskDescriptor;
use wmag_core::hashing::HashDigest;
use wmag_core::identifiers::RunId;
use wmag_core::identifiers::Seq;
use wmag_core::identifiers::StepId;
use wmag_core::model::event::ArtifactType;
use wmag_core::model::event::EventPayload;
use wmag_core::model::plan::Plan;
use wmag_core::model::step_result::StepResult;
use wmag_store::Store;

use crate::error::PipelineError;

/// The body recorded for a `MissionIntake` artifact: the normalized task plus
/// the roles held by its submitting principal, since those roles are needed
/// to evaluate plan- and exec-phase policies and have nowhere else to live
/// once the submitting request has completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MissionIntakeBody {
    pub(crate) task: TaskDescriptor,
    pub(crate) principal_roles: HashSet<String>,
}

/// The hash-chain position a new event must link from: the next free
/// sequence number and the previous event's hash (`None` only at genesis).
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cursor {
    pub(crate) next_seq: Seq,
    pub(crate) prev_hash: Option<HashDigest>,
}

impl Cursor {
    pub(crate) const fn genesis() -> Self {
        Self { next_seq: Seq::FIRST, prev_hash: None }
    }
}

/// Everything `advance` needs to resume a run, derived entirely from its
/// event log.
#[derive(Debug, Clone, Default)]
pub struct ReconstructedState {
    /// The task the run was submitted with, recovered from its
    /// `MissionIntake` artifact.
    pub task: Option<TaskDescriptor>,
    /// Roles held by the submitting principal, recovered alongside `task`.
    pub principal_roles: HashSet<String>,
    /// The context pack assembled during `LoadContext`.
    pub context_pack: Option<serde_json::Value>,
    /// The plan produced during `Plan`.
    pub plan: Option<Plan>,
    /// Every step result recorded so far, keyed by step id, so `advance` can
    /// skip steps a prior attempt already executed.
    pub step_results: HashMap<StepId, StepResult>,
    /// Every artifact type emitted so far, in emission order, checked against
    /// `must_emit_artifact` obligations at `Synthesize`.
    pub emitted_artifacts: Vec<ArtifactType>,
}

impl Default for Cursor {
    fn default() -> Self {
        Self::genesis()
    }
}

/// Replays `run_id`'s full event log and rebuilds [`ReconstructedState`] plus
/// the [`Cursor`] the next emitted event must link from.
///
/// # Errors
/// Returns [`PipelineError::Store`] on a backend failure, or
/// [`PipelineError::Serialize`] if an artifact body does not match the shape
/// its `artifact_type` implies (which would indicate store corruption, since
/// the pipeline is the only writer).
pub(crate) fn reconstruct_state(
    store: &dyn Store,
    run_id: &RunId,
) -> Result<(ReconstructedState, Cursor), PipelineError> {
    let events = store.get_events(run_id, Seq::new(0))?;
    let mut state = ReconstructedState::default();
    let mut cursor = Cursor::genesis();

    for event in &events {
        if let EventPayload::ArtifactUpdate { artifact_type, body } = &event.payload {
            state.emitted_artifacts.push(*artifact_type);
            match artifact_type {
                ArtifactType::MissionIntake => {
                    let parsed: MissionIntakeBody = serde_json::from_value(body.clone())?;
                    state.task = Some(parsed.task);
                    state.principal_roles = parsed.principal_roles;
                }
                ArtifactType::ContextPack => state.context_pack = Some(body.clone()),
                ArtifactType::Plan => {
                    let plan: Plan = serde_json::from_value(body.clone())?;
                    state.plan = Some(plan);
                }
                ArtifactType::StepResult => {
                    let result: StepResult = serde_json::from_value(body.clone())?;
                    state.step_results.insert(result.step_id.clone(), result);
                }
                ArtifactType::Verdict | ArtifactType::Final => {}
            }
        }
        cursor = Cursor { next_seq: event.seq.next(), prev_hash: Some(event.hash) };
    }

    Ok((state, cursor))
}
