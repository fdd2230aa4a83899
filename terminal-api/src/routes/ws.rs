//! WebSocket route handler
//!
//! Handles WebSocket upgrade and bridges the socket to the chart
//! connection handler.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use terminal_core::ServerMessage;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::AppState;

/// Create WebSocket routes
pub fn routes() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}

/// WebSocket upgrade handler
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("WebSocket upgrade request received");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Channels bridging between axum and the connection handler
    let (text_tx, text_rx) = tokio::sync::mpsc::channel::<String>(100);
    let (response_tx, mut response_rx) = tokio::sync::mpsc::channel::<ServerMessage>(100);

    // Task: Forward text frames from the socket to the handler
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if text_tx.send(text.to_string()).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                // axum answers pings itself
                _ => {}
            }
        }
    });

    // Task: Serialize handler output onto the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = response_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to serialize message: {}", e);
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    state
        .ws_state
        .handle_connection(ReceiverStream::new(text_rx), response_tx)
        .await;

    // Clean up tasks
    recv_task.abort();
    send_task.abort();
}
