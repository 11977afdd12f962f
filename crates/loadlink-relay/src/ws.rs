//! WebSocket endpoint.
//!
//! A connection is unclassified until its first frame names a role; any
//! other first frame closes it. After that, frames are routed through
//! [`AppState::handle_message`] and fan-out from the hub is written back.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::messages::{ClientRole, Hello};
use crate::state::AppState;

/// Create the WebSocket router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(ws_handler))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Text of a data frame; binary frames are accepted if they are UTF-8.
fn frame_text(message: &Message) -> Option<&str> {
    match message {
        Message::Text(text) => Some(text.as_str()),
        Message::Binary(bytes) => std::str::from_utf8(bytes).ok(),
        _ => None,
    }
}

/// Wait for the classification frame. `None` means the connection must close.
async fn classify(receiver: &mut SplitStream<WebSocket>) -> Option<ClientRole> {
    while let Some(result) = receiver.next().await {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                warn!("WebSocket receive error: {}", e);
                return None;
            }
        };
        if matches!(message, Message::Close(_)) {
            return None;
        }
        let Some(text) = frame_text(&message) else {
            // Control frames do not count as the first message.
            continue;
        };

        info!("Initial message: {}", text);
        return match Hello::parse(text) {
            Ok(hello) => {
                info!("{} connected", hello.role);
                Some(hello.role)
            }
            Err(e) => {
                info!(reason = e.kind(), "{}, closing", e);
                None
            }
        };
    }
    None
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    info!("New WebSocket connection");

    let Some(role) = classify(&mut receiver).await else {
        let _ = sender.send(Message::Close(None)).await;
        return;
    };

    let (id, mut rx) = state.hub.register(role).await;

    // Forward fan-out frames to the client
    let mut send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Route frames from the client
    let recv_state = Arc::clone(&state);
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(message) => {
                    if let Some(text) = frame_text(&message) {
                        recv_state.handle_message(role, text).await;
                    } else {
                        debug!("Ignoring control frame");
                    }
                }
                Err(e) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    // Wait for either task to finish, then abort the other
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        },
        _ = &mut recv_task => {
            send_task.abort();
        },
    }

    state.hub.unregister(role, id).await;
    info!("{} disconnected", role);
}
