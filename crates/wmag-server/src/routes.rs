// crates/wmag-server/src/routes.rs
// ============================================================================
// Module: HTTP Routes
// Description: Thin axum handlers over the kernel crates, one per spec.md §6
// route plus the added /healthz and /readyz probes.
// Grounded on: decision-gate-mcp::server's `Router::new().route(...)
// .with_state(state)` composition and `axum::serve` bind loop, adapted from
// a single JSON-RPC endpoint to a small REST surface.
// ============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::response::Sse;
use axum::response::sse::Event as SseEvent;
use axum::routing::get;
use axum::routing::patch;
use axum::routing::post;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tokio_stream::StreamExt;
use wmag_adapters::TaskDescriptor;
use wmag_core::hashchain::verify_chain_hash;
use wmag_core::identifiers::OrgId;
use wmag_core::identifiers::RunId;
use wmag_core::identifiers::Seq;
use wmag_core::identifiers::TaskId;
use wmag_core::identifiers::TenantId;
use wmag_core::identifiers::UserId;
use wmag_core::model::approval::ApprovalDecision;
use wmag_core::model::event::Event;
use wmag_core::model::run::Run;
use wmag_registry::EffectiveRegistry;
use wmag_streamer::Frame;

use crate::error::ServerError;
use crate::state::AppState;

const TENANT_HEADER: &str = "x-tenant-id";
const ORG_HEADER: &str = "x-org-id";
const USER_HEADER: &str = "x-user-id";
const ROLES_HEADER: &str = "x-roles";
const DEFAULT_ORG: &str = "default";
const DEFAULT_USER: &str = "anonymous";
const DEFAULT_LIST_LIMIT: usize = 50;

/// Builds the full router over `state`.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/missions", post(submit_mission))
        .route("/runs", get(list_runs))
        .route("/runs/{run_id}", patch(patch_run))
        .route("/runs/{run_id}/subscribe", get(subscribe_run))
        .route("/runs/{run_id}/approve", post(approve_run))
        .route("/runs/{run_id}/verify", get(verify_run))
        .route("/runs/{run_id}/events", get(run_events))
        .route("/runs/{run_id}/export", get(export_run))
        .route("/registry", get(get_registry).put(put_registry))
        .route("/registry/effective", get(get_registry_effective))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn tenant_id(headers: &HeaderMap, body_tenant: Option<&str>) -> Result<TenantId, ServerError> {
    body_tenant
        .or_else(|| header_str(headers, TENANT_HEADER))
        .map(TenantId::new)
        .ok_or(ServerError::MissingHeader(TENANT_HEADER))
}

fn principal_roles(headers: &HeaderMap) -> HashSet<String> {
    header_str(headers, ROLES_HEADER)
        .map(|roles| roles.split(',').map(str::trim).filter(|r| !r.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

// ----------------------------------------------------------------------
// POST /missions
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MissionRequest {
    tenant_id: Option<String>,
    user_message: String,
    title: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Serialize)]
struct MissionResponse {
    task_id: String,
    run_id: String,
}

async fn submit_mission(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<MissionRequest>,
) -> Result<Json<MissionResponse>, ServerError> {
    let tenant_id = tenant_id(&headers, body.tenant_id.as_deref())?;
    let org_id = header_str(&headers, ORG_HEADER).unwrap_or(DEFAULT_ORG);
    let submitted_by = header_str(&headers, USER_HEADER).unwrap_or(DEFAULT_USER);

    let now = state.clock.now();
    let suffix = state.next_id();
    let task_id = TaskId::new(format!("task-{}-{suffix}", now.as_millis()));
    let run_id = RunId::new(format!("run-{}-{suffix}", now.as_millis()));

    if state.store.audit_keys(&tenant_id).is_err() {
        state
            .store
            .save_audit_keys(&tenant_id, &state.default_audit_keys)
            .map_err(wmag_pipeline::KernelError::from)?;
    }

    let task = TaskDescriptor {
        task_id: task_id.clone(),
        tenant_id,
        org_id: OrgId::new(org_id),
        submitted_by: UserId::new(submitted_by),
        goal: body.user_message,
        params: serde_json::json!({"title": body.title, "tags": body.tags}),
    };

    state.pipeline.submit(run_id.clone(), task, principal_roles(&headers)).map_err(wmag_pipeline::KernelError::from)?;

    Ok(Json(MissionResponse { task_id: task_id.as_str().to_string(), run_id: run_id.as_str().to_string() }))
}

// ----------------------------------------------------------------------
// GET /runs
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ListRunsQuery {
    /// Accepted per spec.md §6 but not applied: the already-built `Store`
    /// schema carries no free-text index over run content to query against.
    query: Option<String>,
    state: Option<String>,
    /// Accepted but not applied, for the same reason as `query`: `Run`
    /// carries no persisted tag column.
    tag: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn list_runs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListRunsQuery>,
) -> Result<Json<Vec<Run>>, ServerError> {
    let tenant_id = tenant_id(&headers, None)?;
    if params.query.is_some() || params.tag.is_some() {
        tracing::debug!("ignoring unsupported query/tag run filters");
    }
    let mut runs = state.store.list_runs(&tenant_id).map_err(wmag_pipeline::KernelError::from)?;
    if let Some(wanted) = params.state.as_deref() {
        runs.retain(|run| run.phase.observable_state() == wanted);
    }
    let offset = params.offset.unwrap_or(0);
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let page = runs.into_iter().skip(offset).take(limit).collect();
    Ok(Json(page))
}

// ----------------------------------------------------------------------
// PATCH /runs/{run_id}
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PatchRunRequest {
    #[serde(default)]
    #[allow(dead_code, reason = "accepted for contract parity; see handler doc comment")]
    title: Option<String>,
    #[serde(default)]
    #[allow(dead_code, reason = "accepted for contract parity; see handler doc comment")]
    tags: Option<Vec<String>>,
}

/// Accepts a metadata patch and returns the current run unchanged.
///
/// `Run` carries no title/tags columns in this workspace's `Store` schema
/// (see `DESIGN.md`), so there is nothing yet to persist the patch into;
/// the endpoint still validates the run exists, matching the contract's
/// shape for a future metadata table.
async fn patch_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(_body): Json<PatchRunRequest>,
) -> Result<Json<Run>, ServerError> {
    let run_id = RunId::new(run_id);
    let run = state
        .store
        .load_run(&run_id)
        .map_err(wmag_pipeline::KernelError::from)?
        .ok_or_else(|| wmag_pipeline::KernelError::from(wmag_pipeline::PipelineError::RunNotFound(run_id)))?;
    Ok(Json(run))
}

// ----------------------------------------------------------------------
// GET /runs/{run_id}/subscribe
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SubscribeQuery {
    since_seq: Option<u64>,
    /// Accepted per spec.md §6's contract; this workspace's server has no
    /// authentication layer to check it against (stub tenant resolution
    /// reads a header instead, see `SPEC_FULL.md` §6).
    #[allow(dead_code, reason = "accepted for contract parity; no auth layer validates it")]
    access_token: Option<String>,
}

async fn subscribe_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Query(params): Query<SubscribeQuery>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<SseEvent, std::convert::Infallible>>>, ServerError> {
    let run_id = RunId::new(run_id);
    let since_seq = Seq::new(params.since_seq.unwrap_or(0));
    let streamer = Arc::clone(&state.streamer);
    let frames =
        streamer.subscribe(run_id, since_seq).map_err(|err| wmag_pipeline::KernelError::from(wmag_pipeline::PipelineError::Store(wmag_store::StoreError::Backend(err.to_string()))))?;

    let events = frames.map(|frame| {
        Ok(match frame {
            Frame::Event(event) => SseEvent::default().json_data(&event).unwrap_or_else(|_| SseEvent::default().data("serialization error")),
            Frame::Heartbeat => SseEvent::default().comment("heartbeat"),
        })
    });

    Ok(Sse::new(events))
}

// ----------------------------------------------------------------------
// POST /runs/{run_id}/approve
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApproveRequest {
    decision: String,
    by: Option<String>,
    #[serde(default)]
    #[allow(dead_code, reason = "accepted for contract parity; not persisted separately from the decision")]
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct OkResponse {
    ok: bool,
}

async fn approve_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(body): Json<ApproveRequest>,
) -> Result<Json<OkResponse>, ServerError> {
    let decision = match body.decision.as_str() {
        "approved" => ApprovalDecision::Approved,
        "denied" | "rejected" => ApprovalDecision::Rejected,
        other => return Err(ServerError::InvalidRequest(format!("unknown decision: {other}"))),
    };
    let decided_by = UserId::new(body.by.unwrap_or_else(|| DEFAULT_USER.to_string()));
    state
        .pipeline
        .decide_approval(&RunId::new(run_id), decision, decided_by)
        .map_err(wmag_pipeline::KernelError::from)?;
    Ok(Json(OkResponse { ok: true }))
}

// ----------------------------------------------------------------------
// GET /runs/{run_id}/verify
// ----------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct VerifyResponse {
    ok: bool,
    broken_at: Option<u64>,
}

async fn verify_run(State(state): State<AppState>, Path(run_id): Path<String>) -> Result<Json<VerifyResponse>, ServerError> {
    let run_id = RunId::new(run_id);
    let run = state
        .store
        .load_run(&run_id)
        .map_err(wmag_pipeline::KernelError::from)?
        .ok_or_else(|| wmag_pipeline::KernelError::from(wmag_pipeline::PipelineError::RunNotFound(run_id.clone())))?;
    let audit_keys = state.store.audit_keys(&run.tenant_id).map_err(wmag_pipeline::KernelError::from)?;
    let events = state.store.get_events(&run_id, Seq::new(0)).map_err(wmag_pipeline::KernelError::from)?;

    let mut expected_seq = Seq::FIRST;
    let mut expected_prev = None;
    for event in &events {
        if event.seq != expected_seq || event.prev_hash != expected_prev {
            return Ok(Json(VerifyResponse { ok: false, broken_at: Some(event.seq.get()) }));
        }
        let verified = verify_chain_hash(&audit_keys, &event.signed_by, event.prev_hash.as_ref(), &event.payload, &event.hash)
            .map_err(wmag_pipeline::KernelError::from)?;
        if !verified {
            return Ok(Json(VerifyResponse { ok: false, broken_at: Some(event.seq.get()) }));
        }
        expected_prev = Some(event.hash);
        expected_seq = expected_seq.next();
    }
    Ok(Json(VerifyResponse { ok: true, broken_at: None }))
}

// ----------------------------------------------------------------------
// GET /runs/{run_id}/events
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct EventsQuery {
    since_seq: Option<u64>,
}

async fn run_events(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Query(params): Query<EventsQuery>,
) -> Result<Json<Vec<Event>>, ServerError> {
    let since_seq = Seq::new(params.since_seq.unwrap_or(0)).next();
    let events = state
        .store
        .get_events(&RunId::new(run_id), since_seq)
        .map_err(wmag_pipeline::KernelError::from)?;
    Ok(Json(events))
}

// ----------------------------------------------------------------------
// GET /runs/{run_id}/export
// ----------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ExportResponse {
    run: Run,
    events: Vec<Event>,
}

async fn export_run(State(state): State<AppState>, Path(run_id): Path<String>) -> Result<Json<ExportResponse>, ServerError> {
    let run_id = RunId::new(run_id);
    let run = state
        .store
        .load_run(&run_id)
        .map_err(wmag_pipeline::KernelError::from)?
        .ok_or_else(|| wmag_pipeline::KernelError::from(wmag_pipeline::PipelineError::RunNotFound(run_id.clone())))?;
    let events = state.store.get_events(&run_id, Seq::new(0)).map_err(wmag_pipeline::KernelError::from)?;
    Ok(Json(ExportResponse { run, events }))
}

// ----------------------------------------------------------------------
// GET/PUT /registry, GET /registry/effective
// ----------------------------------------------------------------------

async fn get_registry(State(state): State<AppState>) -> Json<Value> {
    let layers = state.registry_layers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    Json(layers.base.clone())
}

async fn get_registry_effective(State(state): State<AppState>) -> Json<Value> {
    let document = &state.registry.current().document;
    Json(serde_json::to_value(document).unwrap_or(Value::Null))
}

async fn put_registry(State(state): State<AppState>, Json(new_base): Json<Value>) -> Result<Json<Value>, ServerError> {
    let (org, tenant, user) = {
        let mut layers = state.registry_layers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        layers.base = new_base;
        (layers.org.clone(), layers.tenant.clone(), layers.user.clone())
    };
    let base = state.registry_layers.lock().unwrap_or_else(std::sync::PoisonError::into_inner).base.clone();
    let effective = EffectiveRegistry::build(Some(&base), org.as_ref(), tenant.as_ref(), user.as_ref())
        .map_err(wmag_pipeline::KernelError::from)?;
    let document = serde_json::to_value(&effective.document).unwrap_or(Value::Null);
    state.registry.swap(effective);
    Ok(Json(document))
}

// ----------------------------------------------------------------------
// GET /healthz, GET /readyz
// ----------------------------------------------------------------------

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.readiness() {
        Ok(()) => (axum::http::StatusCode::OK, Json(serde_json::json!({"status": "ready"}))),
        Err(err) => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "not_ready", "error": err.to_string()})),
        ),
    }
}
