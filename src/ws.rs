use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::{user_id_from_claims, validate_access_token};
use crate::errors::AppError;
use crate::gateway::ConnectionId;
use crate::models::{RoomPayload, WsClientMessage, WsServerMessage};
use crate::AppState;

/// Query params for WebSocket upgrade. The token travels as a query param.
/// since WebSocket doesn't support custom headers in browsers.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: String,
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(auth): Query<WsAuthQuery>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    // Authenticate before upgrading
    let claims = validate_access_token(&auth.token, &state.config)?;
    let user_id = user_id_from_claims(&claims)?;

    let open = state.gateway.user_connection_count(user_id);
    if open >= state.config.max_ws_connections_per_user as usize {
        return Err(AppError::InvalidArgument(format!(
            "Maximum {} connections per user exceeded",
            state.config.max_ws_connections_per_user
        )));
    }

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user_id, state)))
}

/// Handles an individual WebSocket connection.
async fn handle_socket(socket: WebSocket, user_id: Uuid, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    // Everything addressed to this connection goes through this channel
    let (tx, mut rx) = mpsc::unbounded_channel::<WsServerMessage>();
    let (conn_id, first_connection) = state.gateway.connect(user_id, tx.clone());

    tracing::info!(%conn_id, %user_id, "WebSocket connected");

    if first_connection {
        set_presence(&state, user_id, true).await;
    }

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!("Failed to serialize WS message: {}", e);
                    continue;
                }
            };
            if ws_sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let state_clone = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_stream.next().await {
            match msg {
                Message::Text(text) => {
                    handle_client_message(&text, conn_id, user_id, &state_clone, &tx).await;
                }
                Message::Close(_) => break,
                Message::Ping(_) => {} // axum auto-responds with pong
                _ => {}
            }
        }
    });

    // Wait for either task to finish (connection closed)
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    if let Some((_, was_last)) = state.gateway.disconnect(conn_id) {
        if was_last {
            set_presence(&state, user_id, false).await;
        }
    }

    tracing::info!(%conn_id, %user_id, "WebSocket disconnected");
}

async fn set_presence(state: &AppState, user_id: Uuid, online: bool) {
    if let Err(e) = state.store.set_user_presence(user_id, online).await {
        tracing::warn!(%user_id, online, "Failed to update presence: {}", e);
    }
}

/// Process an incoming client frame.
async fn handle_client_message(
    text: &str,
    conn_id: ConnectionId,
    user_id: Uuid,
    state: &AppState,
    reply_tx: &mpsc::UnboundedSender<WsServerMessage>,
) {
    let client_msg: WsClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            let _ = reply_tx.send(WsServerMessage::Error {
                message: format!("Invalid message format: {}", e),
            });
            return;
        }
    };

    match client_msg {
        WsClientMessage::JoinChat { chat_id } => {
            handle_join(conn_id, user_id, chat_id, state, reply_tx).await;
        }
        WsClientMessage::LeaveChat { chat_id } => {
            state.gateway.leave(conn_id, chat_id);
            let _ = reply_tx.send(WsServerMessage::Left { chat_id });
        }
        WsClientMessage::SendMessage(payload) => {
            if ensure_joined(conn_id, &payload, state, reply_tx) {
                state.gateway.relay_message(conn_id, payload);
            }
        }
        WsClientMessage::Typing(payload) => {
            if ensure_joined(conn_id, &payload, state, reply_tx) {
                state.gateway.relay_typing(conn_id, payload, true);
            }
        }
        WsClientMessage::StopTyping(payload) => {
            if ensure_joined(conn_id, &payload, state, reply_tx) {
                state.gateway.relay_typing(conn_id, payload, false);
            }
        }
        WsClientMessage::Ping => {
            let _ = reply_tx.send(WsServerMessage::Pong);
        }
    }
}

async fn handle_join(
    conn_id: ConnectionId,
    user_id: Uuid,
    chat_id: Uuid,
    state: &AppState,
    reply_tx: &mpsc::UnboundedSender<WsServerMessage>,
) {
    if state.config.ws_verify_membership {
        match state.chats.is_member(chat_id, user_id).await {
            Ok(true) => {}
            Ok(false) => {
                let _ = reply_tx.send(WsServerMessage::Error {
                    message: AppError::chat_not_accessible().to_string(),
                });
                return;
            }
            Err(e) => {
                tracing::error!(%chat_id, %user_id, "Membership check failed: {}", e);
                let _ = reply_tx.send(WsServerMessage::Error {
                    message: "Failed to join chat".into(),
                });
                return;
            }
        }
    }

    state.gateway.join(conn_id, chat_id);
    tracing::debug!(%conn_id, %user_id, %chat_id, "Joined chat room");
    let _ = reply_tx.send(WsServerMessage::Joined { chat_id });
}

/// With membership verification on, relays only go to rooms this connection
/// has joined (and joining was checked).
fn ensure_joined(
    conn_id: ConnectionId,
    payload: &RoomPayload,
    state: &AppState,
    reply_tx: &mpsc::UnboundedSender<WsServerMessage>,
) -> bool {
    if !state.config.ws_verify_membership || state.gateway.is_joined(conn_id, payload.chat_id) {
        return true;
    }
    let _ = reply_tx.send(WsServerMessage::Error {
        message: "Join the chat before sending to it".into(),
    });
    false
}
