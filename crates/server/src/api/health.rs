use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

/// `GET /healthz` — liveness probe. Reports provider readiness so an
/// orchestrator can distinguish "up but unconfigured" from "up and ready".
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "providers_configured": !state.config.llm.providers.is_empty(),
    }))
}
