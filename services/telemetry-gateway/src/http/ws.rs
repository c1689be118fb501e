//! WebSocket handler for real-time updates to browser clients

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tracing::{debug, info};

use super::AppState;

const PONG: &str = r#"{"type":"pong"}"#;

/// Handle WebSocket upgrade request
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscription = state.broadcaster.subscribe();
    let id = subscription.id();

    info!("WebSocket client connected as subscriber {}", id);

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else {
                    // Broadcaster closed
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                };
                let json = match serde_json::to_string(event.as_ref()) {
                    Ok(json) => json,
                    Err(e) => {
                        debug!("Failed to encode event {}: {}", event.sequence, e);
                        continue;
                    }
                };
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if is_ping(&text) && sender.send(Message::Text(PONG.to_string())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!("WebSocket error from subscriber {}: {}", id, e);
                    break;
                }
                // Protocol-level pings are answered by axum
                Some(Ok(_)) => {}
            },
        }
    }

    state.broadcaster.unsubscribe(id);
    info!("WebSocket client {} disconnected", id);
}

fn is_ping(text: &str) -> bool {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|msg| msg.get("type").and_then(Value::as_str).map(|t| t == "ping"))
        .unwrap_or(false)
}
