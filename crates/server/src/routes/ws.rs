// crates/server/src/routes/ws.rs
//! GET /ws: the push channel.
//!
//! The server opens with `request_auth`; the client answers with
//! `authenticate`. Until a token verifies, the connection is in no owner
//! scope and is closed once the auth grace period runs out. A failed
//! authentication closes the connection.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::notify::{ClientMessage, ServerMessage};
use crate::state::AppState;

/// How long the forwarder may take to flush after the reader stops.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn send(tx: &mpsc::UnboundedSender<String>, message: &ServerMessage) {
    match serde_json::to_string(message) {
        Ok(json) => {
            let _ = tx.send(json);
        }
        Err(e) => warn!(error = %e, "failed to serialize push message"),
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let registry = Arc::clone(state.bus.registry());

    // Everything sent to this client goes through one queue, bus events included.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let conn_id = registry.register(tx.clone());
    debug!(conn_id, "push connection opened");

    let forward_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(Message::Text(msg.into())).await.is_err() {
                return;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });
    let forward_abort = forward_task.abort_handle();

    send(&tx, &ServerMessage::request_auth());
    let deadline = tokio::time::Instant::now() + state.auth_grace;

    loop {
        let next = if registry.owner_of(conn_id).is_some() {
            stream.next().await
        } else {
            match tokio::time::timeout_at(deadline, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    info!(conn_id, "push connection did not authenticate in time");
                    break;
                }
            }
        };
        let Some(Ok(msg)) = next else { break };

        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Authenticate { token }) => match state.auth.verify(&token) {
                    Ok(owner_id) => {
                        let previous = registry.bind(conn_id, owner_id);
                        send(
                            &tx,
                            &ServerMessage::auth_response(true, "Authentication successful."),
                        );
                        info!(conn_id, owner_id, previous = ?previous, "push connection authenticated");
                    }
                    Err(e) => {
                        warn!(conn_id, error = %e, "push authentication failed");
                        send(&tx, &ServerMessage::auth_response(false, e.to_string()));
                        break;
                    }
                },
                Err(_) => debug!(conn_id, "ignoring unrecognised push message"),
            },
            Message::Close(_) => break,
            // Pong is handled automatically by axum
            _ => {}
        }
    }

    // Cleanup
    registry.unregister(conn_id);
    drop(tx);
    if tokio::time::timeout(FLUSH_TIMEOUT, forward_task).await.is_err() {
        forward_abort.abort();
    }
    debug!(conn_id, "push connection closed");
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(ws_handler))
}
