// crates/wmag-core/src/model/event.rs
// ============================================================================
// Module: Event
// Description: The unit of the per-run tamper-evident log. Every phase
// transition, artifact, and decision is recorded as an Event.
// Grounded on: decision-gate-core::core::state (GateTraceEntry / EvalRecord /
// DecisionRecord union shape), generalized into a single tagged payload enum.
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::hashing::HashDigest;
use crate::identifiers::Kid;
use crate::identifiers::RunId;
use crate::identifiers::Seq;
use crate::model::run::RunPhase;
use crate::time::Timestamp;

/// Discriminates the kind of artifact an [`EventPayload::ArtifactUpdate`]
/// carries, so consumers can filter the stream without deserializing the
/// full artifact body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    /// The original task descriptor a run was submitted with, recorded
    /// during `IngestTask` so later restarts can reconstruct it without
    /// re-deriving it from any downstream artifact.
    MissionIntake,
    /// A context pack assembled during `LoadContext`.
    ContextPack,
    /// A plan produced during `Plan`.
    Plan,
    /// A policy verdict produced during `GateApproval`.
    Verdict,
    /// A single step's result produced during `ExecuteSteps`.
    StepResult,
    /// The final synthesized output produced during `Synthesize`.
    Final,
}

/// The payload carried by an [`Event`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// A phase transition, recording the run's new phase.
    StatusUpdate {
        /// The phase the run transitioned into.
        phase: RunPhase,
        /// Optional human-readable detail (e.g. a failure reason).
        detail: Option<String>,
    },
    /// A new or updated artifact attached to the run.
    ArtifactUpdate {
        /// The kind of artifact.
        artifact_type: ArtifactType,
        /// Canonical JSON body of the artifact.
        body: serde_json::Value,
    },
}

/// A single, hash-chained entry in a run's event log.
///
/// # Invariants
/// - `seq` is strictly increasing within a run, starting at 1.
/// - `hash` is `chain_hash(registry, kid, prev_hash, payload)` for this
///   event's `payload`, `prev_hash`, and signing `kid` (see
///   [`crate::hashchain`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Run this event belongs to.
    pub run_id: RunId,
    /// Monotonic sequence number within the run.
    pub seq: Seq,
    /// When the event was recorded.
    pub recorded_at: Timestamp,
    /// The event's content.
    pub payload: EventPayload,
    /// Hash of the immediately preceding event in this run, or `None` for
    /// the first event.
    pub prev_hash: Option<HashDigest>,
    /// This event's own chain hash.
    pub hash: HashDigest,
    /// Audit key id that produced `hash`.
    pub signed_by: Kid,
}
