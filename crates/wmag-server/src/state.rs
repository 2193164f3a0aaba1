// crates/wmag-server/src/state.rs
// ============================================================================
// Module: Server State
// Description: Shared collaborators every handler needs, plus the raw
// registry layers kept around so `PUT /registry` can rebuild and swap the
// effective document without re-reading files from disk.
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use wmag_config::RegistryLayers;
use wmag_core::hashchain::AuditKeyRegistry;
use wmag_core::time::Clock;
use wmag_pipeline::Pipeline;
use wmag_registry::RegistrySnapshot;
use wmag_store::Store;
use wmag_streamer::Streamer;

/// Shared application state, cloned cheaply (every field is an `Arc`) into
/// each handler via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Drives mission submission and resumption.
    pub pipeline: Arc<Pipeline>,
    /// Direct store access for read-only projections (`list_runs`,
    /// `get_events`, `/verify`, audit key lookups) the pipeline itself does
    /// not expose.
    pub store: Arc<dyn Store>,
    /// Current merged registry document, swappable by `PUT /registry`.
    pub registry: Arc<RegistrySnapshot>,
    /// The raw layers `registry` was last built from, kept so a `PUT
    /// /registry` replacing only the base layer does not need to re-read
    /// `REGISTRY_LAYERS_DIR` from disk.
    pub registry_layers: Arc<Mutex<RegistryLayers>>,
    /// Replay-then-tail subscription builder for `GET
    /// /runs/{run_id}/subscribe`.
    pub streamer: Arc<Streamer>,
    /// Clock used to mint run/task identifiers; the kernel's own clock, not
    /// a fresh `SystemClock`, so tests can inject a `FixedClock`.
    pub clock: Arc<dyn Clock>,
    /// The audit keys configured at startup (`AUDIT_KEYS_JSON` /
    /// `AUDIT_SECRET`), seeded into a tenant's `Store` row the first time a
    /// mission from that tenant is submitted. The `Store` contract scopes
    /// audit keys per tenant (so a future deployment can rotate one
    /// tenant's keys independently), but this workspace's `KernelConfig`
    /// has only one configured set; see `submit_mission`.
    pub default_audit_keys: Arc<AuditKeyRegistry>,
    id_counter: Arc<AtomicU64>,
}

impl AppState {
    /// Builds server state over its collaborators.
    #[must_use]
    pub fn new(
        pipeline: Arc<Pipeline>,
        store: Arc<dyn Store>,
        registry: Arc<RegistrySnapshot>,
        registry_layers: RegistryLayers,
        streamer: Arc<Streamer>,
        clock: Arc<dyn Clock>,
        default_audit_keys: Arc<AuditKeyRegistry>,
    ) -> Self {
        Self {
            pipeline,
            store,
            registry,
            registry_layers: Arc::new(Mutex::new(registry_layers)),
            streamer,
            clock,
            default_audit_keys,
            id_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Mints a locally-unique suffix for identifiers, combined with the
    /// current timestamp by callers. Not globally unique across process
    /// restarts; sufficient for this workspace's single-process deployment
    /// (see `wmag-worker`'s tenant-slot doc comment for the same caveat).
    pub fn next_id(&self) -> u64 {
        self.id_counter.fetch_add(1, Ordering::Relaxed)
    }
}
