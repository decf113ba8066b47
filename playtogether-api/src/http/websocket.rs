//! WebSocket relay endpoints
//!
//! Each socket gets a fresh peer id and a bounded outbound queue drained by a
//! writer task. Inbound text frames are validated here and forwarded to the
//! session driver; malformed frames are answered with an `error` frame and
//! the socket stays open.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use playtogether_core::models::PeerId;
use playtogether_core::protocol::{ClientMessage, ServerMessage};
use playtogether_core::service::EndpointRole;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{auth::AdminAuth, AppState};
use crate::impls::DriverEvent;

/// Watcher endpoint.
pub async fn watcher_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    upgrade(state, ws, EndpointRole::Watcher)
}

/// Broadcaster endpoint, behind the admin gate.
pub async fn broadcaster_handler(
    _admin: AdminAuth,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade(state, ws, EndpointRole::Broadcaster)
}

fn upgrade(state: AppState, ws: WebSocketUpgrade, role: EndpointRole) -> impl IntoResponse {
    ws.max_message_size(state.config.relay.max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state, role))
}

async fn handle_socket(socket: WebSocket, state: AppState, role: EndpointRole) {
    let peer_id = PeerId::new();
    info!(peer_id = %peer_id, ?role, "WebSocket connection established");

    // Bounded so a slow client cannot grow the queue without limit
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.config.relay.outbound_buffer.max(1));
    let (mut sink, mut stream) = socket.split();

    let writer_peer = peer_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    error!(peer_id = %writer_peer, error = %e, "Failed to encode frame");
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                debug!(peer_id = %writer_peer, error = %e, "WebSocket send failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let connected = state.session.send(DriverEvent::Connected {
        peer_id: peer_id.clone(),
        role,
        sender: tx.clone(),
    });
    if !connected {
        warn!(peer_id = %peer_id, "Session driver stopped, closing connection");
        drop(tx);
        let _ = writer.await;
        return;
    }

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(peer_id = %peer_id, error = %e, "WebSocket receive failed");
                break;
            }
        };

        match ClientMessage::parse(text.as_str()) {
            Ok(message) => {
                let event = DriverEvent::Frame {
                    peer_id: peer_id.clone(),
                    message,
                };
                if !state.session.send(event) {
                    break;
                }
            }
            Err(e) => {
                debug!(peer_id = %peer_id, error = %e, "Malformed frame");
                let _ = tx.try_send(ServerMessage::error(e.to_string()));
            }
        }
    }

    state.session.send(DriverEvent::Disconnected {
        peer_id: peer_id.clone(),
    });
    // The driver drops its sender on disconnect; ours goes here so the writer drains and exits.
    drop(tx);
    let _ = writer.await;

    info!(peer_id = %peer_id, "WebSocket connection closed");
}
