//! WebSocket handler — streams one task's lifecycle events to the client.
//!
//! The socket subscribes to the hub on upgrade, so a client that connects
//! late still receives the buffered backlog first. Text frames from the
//! client are keep-alives and are acknowledged in place; they never reach
//! the hub.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path as AxumPath, State};
use axum::response::IntoResponse;
use std::sync::Arc;
use tracing::{debug, info};

use super::AppState;

pub(super) async fn handler_ws(
    ws: WebSocketUpgrade,
    AxumPath(task_id): AxumPath<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_loop(socket, state, task_id))
}

fn ack(text: &str) -> String {
    serde_json::json!({"type": "ack", "received": text}).to_string()
}

async fn ws_loop(mut socket: WebSocket, state: Arc<AppState>, task_id: String) {
    let hub = state.registry.hub().clone();
    let mut sub = hub.subscribe(&task_id);
    state.metrics.subscribers_connected.inc();
    info!(task_id = %task_id, subscriber = sub.id, "websocket subscriber connected");

    loop {
        tokio::select! {
            event = sub.rx.recv() => {
                match event {
                    Some(event) => {
                        if socket.send(Message::Text(event.to_json().into())).await.is_err() {
                            break;
                        }
                    }
                    // The hub dropped us (queue overflowed).
                    None => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if socket.send(Message::Text(ack(text.as_str()).into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    hub.disconnect(sub.id);
    state.metrics.subscribers_connected.dec();
    debug!(task_id = %task_id, subscriber = sub.id, "websocket subscriber disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_echoes_payload() {
        let v: serde_json::Value = serde_json::from_str(&ack("ping")).unwrap();
        assert_eq!(v["type"], "ack");
        assert_eq!(v["received"], "ping");
    }
}
