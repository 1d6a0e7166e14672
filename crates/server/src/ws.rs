//! `GET /v1/ws/:client_id` — the event fan-out channel (C5). One socket per
//! client; server-push-only (the spec's WS channel carries no inbound
//! protocol). Grounded in the teacher's node WebSocket handler
//! (`gateway/nodes/ws.rs`): upgrade, split the socket, and pump a bounded
//! channel into the sink until the peer disconnects.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};

use crate::state::AppState;

pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, client_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, client_id: String) {
    let mut rx = state.events.subscribe(&client_id);
    let (mut sink, mut stream) = socket.split();

    tracing::info!(client_id = %client_id, "ws client connected");

    // Reader task: this channel is server-push-only, so inbound frames are
    // only consulted for liveness (close/ping). A dedicated task lets the
    // writer half keep pumping events while we wait on either side to end.
    let reader = tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    while let Some(envelope) = rx.recv().await {
        let Ok(json) = serde_json::to_string(&envelope) else {
            continue;
        };
        if sink.send(Message::Text(json)).await.is_err() {
            break;
        }
    }

    reader.abort();
    tracing::info!(client_id = %client_id, "ws client disconnected");
}
