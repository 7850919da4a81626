//! WebSocket handler for the live event stream
//!
//! Forwards every `LogEvent` (status lines, statistics, payments,
//! discoveries, run state) to connected clients as JSON text frames.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use super::health::AppState;

/// WebSocket upgrade handler
///
/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.orchestrator.subscribe();

    let send_task = tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "WebSocket client lagging, events dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let msg = match serde_json::to_string(&event) {
                Ok(json) => Message::Text(json),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize event");
                    continue;
                }
            };

            if sender.send(msg).await.is_err() {
                // Client disconnected
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                tracing::debug!("Client requested close");
                break;
            }
        }
    });

    tokio::select! {
        _ = send_task => {
            tracing::debug!("Send task finished");
        }
        _ = recv_task => {
            tracing::debug!("Receive task finished");
        }
    }

    tracing::debug!("WebSocket connection closed");
}
