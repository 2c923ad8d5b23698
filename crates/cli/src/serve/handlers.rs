//! HTTP route handlers.
//!
//! Request bodies are taken as raw bytes and decoded per endpoint, so
//! malformed JSON and missing fields both get the `{"error": ...}` shape
//! used for every other failure.

use std::str::FromStr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use stagewise_core::WorkflowType;
use stagewise_engine::{EngineError, ErrorKind};
use time::OffsetDateTime;

use super::json_error;
use super::state::AppState;

type Shared = State<Arc<AppState>>;

// ──────────────────────────────────────────────
// Plumbing
// ──────────────────────────────────────────────

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::InvalidTransition => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::SinkFailure => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn engine_error(e: EngineError) -> Response {
    let kind = e.kind();
    let body = json!({
        "error": e.to_string(),
        "kind": kind,
    });
    (status_for(kind), Json(body)).into_response()
}

fn respond<T: serde::Serialize>(status: StatusCode, result: Result<T, EngineError>) -> Response {
    match result {
        Ok(value) => (status, Json(value)).into_response(),
        Err(e) => engine_error(e),
    }
}

fn body<T: DeserializeOwned>(raw: &[u8]) -> Result<T, Response> {
    serde_json::from_slice(raw).map_err(|e| {
        json_error(StatusCode::BAD_REQUEST, &format!("invalid request body: {}", e))
    })
}

fn workflow(name: &str) -> Result<WorkflowType, Response> {
    WorkflowType::from_str(name).map_err(|e| engine_error(e.into()))
}

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> Response {
    json_error(StatusCode::NOT_FOUND, "not found")
}

// ──────────────────────────────────────────────
// Catalog
// ──────────────────────────────────────────────

/// GET /health
pub(crate) async fn handle_health(State(state): Shared) -> Response {
    let response = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_timers": state.engine.timers().active_count(),
    });
    (StatusCode::OK, Json(response)).into_response()
}

/// GET /workflows
pub(crate) async fn handle_list_workflows(State(state): Shared) -> Response {
    let workflows: Vec<Value> = WorkflowType::ALL
        .iter()
        .map(|&w| {
            json!({
                "workflow": w,
                "total_stages": state.engine.catalog().total_stages(w),
                "first_stage": state.engine.catalog().first_stage(w).id,
            })
        })
        .collect();
    (StatusCode::OK, Json(json!({ "workflows": workflows }))).into_response()
}

/// GET /workflows/{workflow}/stages
pub(crate) async fn handle_list_stages(
    State(state): Shared,
    Path(name): Path<String>,
) -> Response {
    let workflow = match workflow(&name) {
        Ok(w) => w,
        Err(response) => return response,
    };
    let stages = state.engine.catalog().stages_for(workflow);
    (
        StatusCode::OK,
        Json(json!({ "workflow": workflow, "stages": stages })),
    )
        .into_response()
}

// ──────────────────────────────────────────────
// Entities
// ──────────────────────────────────────────────

#[derive(Deserialize)]
pub(crate) struct ListQuery {
    workflow: Option<String>,
}

/// GET /entities
pub(crate) async fn handle_list_entities(
    State(state): Shared,
    Query(query): Query<ListQuery>,
) -> Response {
    let filter = match query.workflow.as_deref().map(workflow).transpose() {
        Ok(f) => f,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        state
            .engine
            .list(filter)
            .await
            .map(|entities| json!({ "entities": entities })),
    )
}

#[derive(Deserialize)]
struct CreateRequest {
    entity_id: String,
    workflow: String,
}

/// POST /entities
pub(crate) async fn handle_create_entity(
    State(state): Shared,
    raw: Bytes,
) -> Response {
    let req: CreateRequest = match body(&raw) {
        Ok(r) => r,
        Err(response) => return response,
    };
    if req.entity_id.trim().is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "'entity_id' must not be empty");
    }
    let workflow = match workflow(&req.workflow) {
        Ok(w) => w,
        Err(response) => return response,
    };
    respond(
        StatusCode::CREATED,
        state.engine.create(&req.entity_id, workflow).await,
    )
}

/// GET /entities/{id}
pub(crate) async fn handle_get_entity(State(state): Shared, Path(id): Path<String>) -> Response {
    respond(StatusCode::OK, state.engine.snapshot(&id).await)
}

/// GET /entities/{id}/progress
pub(crate) async fn handle_progress(State(state): Shared, Path(id): Path<String>) -> Response {
    respond(StatusCode::OK, state.engine.progress(&id).await)
}

// ──────────────────────────────────────────────
// Transitions
// ──────────────────────────────────────────────

#[derive(Deserialize)]
struct AdvanceRequest {
    from_stage: String,
    #[serde(default)]
    reason: Option<String>,
}

/// POST /entities/{id}/advance
pub(crate) async fn handle_advance(
    State(state): Shared,
    Path(id): Path<String>,
    raw: Bytes,
) -> Response {
    let req: AdvanceRequest = match body(&raw) {
        Ok(r) => r,
        Err(response) => return response,
    };
    let reason = req.reason.as_deref().unwrap_or("api");
    respond(
        StatusCode::OK,
        state.engine.advance(&id, &req.from_stage, reason).await,
    )
}

#[derive(Deserialize)]
struct RevertRequest {
    to_stage: String,
}

/// POST /entities/{id}/revert
pub(crate) async fn handle_revert(
    State(state): Shared,
    Path(id): Path<String>,
    raw: Bytes,
) -> Response {
    let req: RevertRequest = match body(&raw) {
        Ok(r) => r,
        Err(response) => return response,
    };
    respond(StatusCode::OK, state.engine.revert(&id, &req.to_stage).await)
}

#[derive(Deserialize)]
struct SkipRequest {
    stage: String,
    #[serde(default)]
    reason: Option<String>,
}

/// POST /entities/{id}/skip
pub(crate) async fn handle_skip(
    State(state): Shared,
    Path(id): Path<String>,
    raw: Bytes,
) -> Response {
    let req: SkipRequest = match body(&raw) {
        Ok(r) => r,
        Err(response) => return response,
    };
    let reason = req.reason.as_deref().unwrap_or("api");
    respond(
        StatusCode::OK,
        state.engine.skip(&id, &req.stage, reason).await,
    )
}

#[derive(Deserialize)]
struct ConfirmRequest {
    stage: String,
}

/// POST /entities/{id}/confirm
pub(crate) async fn handle_confirm(
    State(state): Shared,
    Path(id): Path<String>,
    raw: Bytes,
) -> Response {
    let req: ConfirmRequest = match body(&raw) {
        Ok(r) => r,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        state.triggers.manual.confirm(&id, &req.stage).await,
    )
}

/// GET /entities/{id}/decision
pub(crate) async fn handle_decision_options(
    State(state): Shared,
    Path(id): Path<String>,
) -> Response {
    respond(
        StatusCode::OK,
        state
            .triggers
            .decision
            .options(&id)
            .await
            .map(|options| json!({ "options": options })),
    )
}

#[derive(Deserialize)]
struct DecisionRequest {
    stage: String,
    option: String,
}

/// POST /entities/{id}/decision
pub(crate) async fn handle_decision(
    State(state): Shared,
    Path(id): Path<String>,
    raw: Bytes,
) -> Response {
    let req: DecisionRequest = match body(&raw) {
        Ok(r) => r,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        state
            .triggers
            .decision
            .choose(&id, &req.stage, &req.option)
            .await,
    )
}

// ──────────────────────────────────────────────
// Artifacts and checklists
// ──────────────────────────────────────────────

#[derive(Deserialize)]
struct UploadRequest {
    slot: String,
    file_name: String,
    content_base64: String,
}

/// POST /entities/{id}/artifacts
pub(crate) async fn handle_upload(
    State(state): Shared,
    Path(id): Path<String>,
    raw: Bytes,
) -> Response {
    let req: UploadRequest = match body(&raw) {
        Ok(r) => r,
        Err(response) => return response,
    };
    let bytes = match BASE64.decode(req.content_base64.as_bytes()) {
        Ok(b) => b,
        Err(e) => {
            return json_error(
                StatusCode::BAD_REQUEST,
                &format!("'content_base64' is not valid base64: {}", e),
            )
        }
    };
    let result = state
        .triggers
        .upload
        .uploaded(&id, &req.slot, &req.file_name, &bytes)
        .await
        .map(|(outcome, artifact)| {
            json!({
                "transition": outcome,
                "artifact": artifact,
            })
        });
    respond(StatusCode::OK, result)
}

/// DELETE /entities/{id}/artifacts/{slot}
pub(crate) async fn handle_delete_artifact(
    State(state): Shared,
    Path((id, slot)): Path<(String, String)>,
) -> Response {
    respond(
        StatusCode::OK,
        state.triggers.upload.deleted(&id, &slot).await,
    )
}

#[derive(Deserialize)]
struct ChecklistRequest {
    checked: bool,
}

/// PUT /entities/{id}/checklist/{stage}/{item}
pub(crate) async fn handle_checklist(
    State(state): Shared,
    Path((id, stage, item)): Path<(String, String, String)>,
    raw: Bytes,
) -> Response {
    let req: ChecklistRequest = match body(&raw) {
        Ok(r) => r,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        state
            .engine
            .set_checklist_item(&id, &stage, &item, req.checked)
            .await,
    )
}

// ──────────────────────────────────────────────
// Deal outcome
// ──────────────────────────────────────────────

/// GET /entities/{id}/outcome
pub(crate) async fn handle_get_outcome(State(state): Shared, Path(id): Path<String>) -> Response {
    respond(
        StatusCode::OK,
        state
            .engine
            .outcome(&id)
            .await
            .map(|outcome| json!({ "outcome": outcome })),
    )
}

#[derive(Deserialize)]
struct WonRequest {
    #[serde(with = "rust_decimal::serde::str")]
    final_value: Decimal,
}

/// POST /entities/{id}/outcome/won
pub(crate) async fn handle_outcome_won(
    State(state): Shared,
    Path(id): Path<String>,
    raw: Bytes,
) -> Response {
    let req: WonRequest = match body(&raw) {
        Ok(r) => r,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        state.engine.confirm_won(&id, req.final_value).await,
    )
}

#[derive(Deserialize)]
struct LostRequest {
    reason: String,
    #[serde(default)]
    details: String,
}

/// POST /entities/{id}/outcome/lost
pub(crate) async fn handle_outcome_lost(
    State(state): Shared,
    Path(id): Path<String>,
    raw: Bytes,
) -> Response {
    let req: LostRequest = match body(&raw) {
        Ok(r) => r,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        state
            .engine
            .confirm_lost(&id, &req.reason, &req.details)
            .await,
    )
}

/// POST /entities/{id}/outcome/reset
pub(crate) async fn handle_outcome_reset(
    State(state): Shared,
    Path(id): Path<String>,
) -> Response {
    respond(StatusCode::OK, state.engine.reset_outcome(&id).await)
}

// ──────────────────────────────────────────────
// External sync
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SyncRequest {
    entity_id: String,
    external_stage: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    timestamp: Option<OffsetDateTime>,
}

/// POST /sync
pub(crate) async fn handle_sync(State(state): Shared, raw: Bytes) -> Response {
    let req: SyncRequest = match body(&raw) {
        Ok(r) => r,
        Err(response) => return response,
    };
    let observed_at = req.timestamp.unwrap_or_else(|| state.engine.now());
    respond(
        StatusCode::OK,
        state
            .triggers
            .sync
            .receive(&req.entity_id, &req.external_stage, observed_at)
            .await,
    )
}
