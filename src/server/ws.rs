//! WebSocket handler for a session's realtime channel
//!
//! The client is attached before the upgrade so an unknown session gets a
//! plain 404. Outbound messages come from the channel handle (replay first,
//! then live). Inbound text frames are parsed as decisions and queued for
//! the session machine; anything malformed is answered on this socket only.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::{IntoResponse, Response},
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::api::ApiError;
use super::ServerAppState;
use crate::channel::{ChannelHandle, ClientMessage, ServerMessage};
use crate::models::Decision;

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// GET /ws/sessions/:session_id
pub async fn session_ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<ServerAppState>,
) -> Response {
    let handle = match state.registry.attach(&session_id).await {
        Ok(handle) => handle,
        Err(e) => return ApiError::from(e).into_response(),
    };

    ws.on_upgrade(move |socket| handle_session_socket(socket, handle))
        .into_response()
}

async fn handle_session_socket(socket: WebSocket, mut handle: ChannelHandle) {
    let session_id = handle.session_id().to_string();
    let channel = handle.channel().clone();
    let (ws_sender, mut ws_receiver) = socket.split();
    let ws_sender: WsSender = Arc::new(Mutex::new(ws_sender));

    log::info!("[SessionWs] Client connected to {}", session_id);

    // Task: forward channel messages to the socket. Owns the handle, so
    // ending the task detaches the client.
    let sender = ws_sender.clone();
    let mut output_task = tokio::spawn(async move {
        while let Some(message) = handle.recv().await {
            if !send_message(&sender, &message).await {
                return;
            }
        }
        // Session reached a terminal state
        let _ = sender.lock().await.send(Message::Close(None)).await;
    });

    let inbound = async {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => {
                        let decision = Decision::from(message);
                        log::debug!(
                            "[SessionWs] {} decision received for {}",
                            decision.kind(),
                            session_id
                        );
                        if let Err(e) = channel.submit(decision) {
                            log::warn!("[SessionWs] Decision for {} rejected: {}", session_id, e);
                            send_message(&ws_sender, &ServerMessage::advisory(e.to_string()))
                                .await;
                        }
                    }
                    Err(e) => {
                        log::warn!("[SessionWs] Invalid message for {}: {}", session_id, e);
                        send_message(
                            &ws_sender,
                            &ServerMessage::advisory(format!("Invalid message: {}", e)),
                        )
                        .await;
                    }
                },
                Ok(Message::Close(_)) => {
                    log::info!("[SessionWs] Client requested close: {}", session_id);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    log::warn!("[SessionWs] Socket error for {}: {}", session_id, e);
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = inbound => output_task.abort(),
        _ = &mut output_task => {}
    }

    log::info!("[SessionWs] Client disconnected from {}", session_id);
}

/// Serialize and send one message; false once the socket is gone
async fn send_message(sender: &WsSender, message: &ServerMessage) -> bool {
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            log::error!("[SessionWs] Failed to serialize {}: {}", message.type_name(), e);
            return true;
        }
    };
    sender.lock().await.send(Message::Text(text.into())).await.is_ok()
}
