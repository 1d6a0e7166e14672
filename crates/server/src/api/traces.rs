//! Trace lifecycle API — start a trace, append a turn, submit a HITL
//! response, and read back the current Trace state.
//!
//! - `POST /v1/traces`              — start a new Trace
//! - `POST /v1/traces/:id/turns`    — append a Turn to an existing Trace
//! - `POST /v1/traces/:id/hitl`     — resolve a pending HITL request
//! - `GET  /v1/traces/:id`          — read the current Trace

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use uuid::Uuid;

use ao_domain::error::Error;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StartTraceRequest {
    pub client_id: String,
    pub goal: String,
}

#[derive(Debug, Deserialize)]
pub struct AddTurnRequest {
    pub goal: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitHitlRequest {
    pub request_id: Uuid,
    pub input: String,
}

fn error_response(e: &Error) -> (StatusCode, Json<serde_json::Value>) {
    let status = match e {
        Error::TraceNotFound(_) | Error::ToolResultNotFound(_) => StatusCode::NOT_FOUND,
        Error::NoPendingHitl(_) | Error::InvariantViolation(_) => StatusCode::CONFLICT,
        Error::MaxTurnsReached => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": e.to_string() })))
}

pub async fn start_trace(
    State(state): State<AppState>,
    Json(body): Json<StartTraceRequest>,
) -> impl IntoResponse {
    match state.tasks.start(body.client_id, body.goal).await {
        Ok(trace_id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "trace_id": trace_id })),
        )
            .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

pub async fn add_turn(
    State(state): State<AppState>,
    Path(trace_id): Path<Uuid>,
    Json(body): Json<AddTurnRequest>,
) -> impl IntoResponse {
    match state.tasks.add_turn(trace_id, body.goal).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "trace_id": trace_id }))).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

pub async fn submit_hitl(
    State(state): State<AppState>,
    Path(trace_id): Path<Uuid>,
    Json(body): Json<SubmitHitlRequest>,
) -> impl IntoResponse {
    match state
        .tasks
        .submit_hitl(trace_id, body.request_id, &body.input)
        .await
    {
        Ok(outcome) => Json(serde_json::json!({ "ok": outcome.ok })).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

pub async fn get_trace(
    State(state): State<AppState>,
    Path(trace_id): Path<Uuid>,
) -> impl IntoResponse {
    match state.tasks.get_trace(trace_id).await {
        Ok(trace) => Json(serde_json::json!(trace)).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}
