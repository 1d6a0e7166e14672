pub mod health;
pub mod traces;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(health::health))
        .route("/v1/traces", post(traces::start_trace))
        .route("/v1/traces/:id", get(traces::get_trace))
        .route("/v1/traces/:id/turns", post(traces::add_turn))
        .route("/v1/traces/:id/hitl", post(traces::submit_hitl))
        .route("/v1/ws/:client_id", get(crate::ws::upgrade))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
