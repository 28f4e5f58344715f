//! Manages the WebSocket connection lifecycle for a tutoring session.

use super::{handler::SessionProtocolHandler, protocol::ServerFrame};
use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Main handler for an individual WebSocket connection.
///
/// Frames are processed one at a time, so replies go out in the order their
/// frames arrived.
#[instrument(name = "ws_connection", skip_all, fields(connection_id, session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id: u32 = rand::random();
    tracing::Span::current().record("connection_id", connection_id);
    info!("New WebSocket connection");

    let (mut socket_tx, mut socket_rx) = socket.split();
    let mut handler = SessionProtocolHandler::new(state);

    while let Some(msg_result) = socket_rx.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let Some(frame) = handler.handle_text(text.as_str()).await else {
                    continue;
                };
                if let Err(e) = send_frame(&mut socket_tx, frame).await {
                    error!(error = ?e, "Failed to send frame, closing connection");
                    break;
                }
            }
            Ok(Message::Binary(_)) => warn!("Ignoring binary frame"),
            Ok(Message::Close(_)) => {
                info!("Client sent close frame");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Err(e) => {
                error!(error = ?e, "Error receiving from client WebSocket");
                break;
            }
        }
    }

    info!(session_id = ?handler.session_id(), "WebSocket connection closed");
}

/// Serializes and sends a `ServerFrame` to the client.
async fn send_frame(socket_tx: &mut SplitSink<WebSocket, Message>, frame: ServerFrame) -> Result<()> {
    let serialized = serde_json::to_string(&frame)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
