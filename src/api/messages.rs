use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::errors::AppResult;
use crate::middleware::{ApiJson, ApiPath, AuthUser};
use crate::models::*;
use crate::AppState;

/// POST /api/messages
pub async fn send_message(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<MessageResponse>)> {
    let message = state.messages.send(user_id, req.into()).await?;

    // Persisted is sent; the room fanout is best-effort on top
    if state.config.fanout_on_send {
        publish_to_room(&state, user_id, &message);
    }

    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /api/messages/:chat_id
/// Full history, oldest first. Marks everything received as read.
pub async fn all_messages(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(chat_id): ApiPath<Uuid>,
) -> AppResult<Json<Vec<MessageResponse>>> {
    Ok(Json(state.messages.get_messages(user_id, chat_id).await?))
}

/// DELETE /api/messages/:message_id
pub async fn delete_message(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(message_id): ApiPath<Uuid>,
) -> AppResult<Json<DeleteMessageResponse>> {
    let outcome = state.messages.delete(user_id, message_id).await?;
    Ok(Json(DeleteMessageResponse {
        message: "Message deleted successfully".into(),
        message_id: outcome.message_id,
        latest_message_id: outcome.latest_message_id,
    }))
}

/// PUT /api/messages/status/:chat_id
pub async fn update_message_status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(chat_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<UpdateStatusRequest>,
) -> AppResult<Json<StatusUpdateResponse>> {
    let count = state.messages.update_status(user_id, chat_id, req.status).await?;
    Ok(Json(StatusUpdateResponse {
        message: "Message status updated".into(),
        count,
    }))
}

/// POST /api/messages/forward
pub async fn forward_message(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(req): ApiJson<ForwardMessageRequest>,
) -> AppResult<(StatusCode, Json<ForwardResponse>)> {
    let forwarded = state
        .messages
        .forward(user_id, req.message_id, req.chat_ids)
        .await?;

    if state.config.fanout_on_send {
        for message in &forwarded {
            publish_to_room(&state, user_id, message);
        }
    }

    Ok((
        StatusCode::CREATED,
        Json(ForwardResponse {
            message: "Message forwarded successfully".into(),
            count: forwarded.len(),
            forwarded_messages: forwarded,
        }),
    ))
}

fn publish_to_room(state: &AppState, sender: Uuid, message: &MessageResponse) {
    let delivered = state.gateway.publish(
        message.chat_id,
        WsServerMessage::ReceiveMessage(RoomPayload::from_message(message)),
        Some(sender),
    );
    tracing::debug!(chat_id = %message.chat_id, message_id = %message.id, delivered, "Message fanned out");
}
