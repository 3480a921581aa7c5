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

/// POST /api/chats
/// Open the direct chat with another user, creating it on first contact.
pub async fn access_chat(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(req): ApiJson<AccessChatRequest>,
) -> AppResult<(StatusCode, Json<ChatResponse>)> {
    let (chat, created) = state.chats.access_or_create_direct(user_id, req.user_id).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(chat)))
}

/// GET /api/chats
pub async fn fetch_chats(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<Vec<ChatResponse>>> {
    Ok(Json(state.chats.list_for_user(user_id).await?))
}

/// POST /api/chats/group
pub async fn create_group_chat(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiJson(req): ApiJson<CreateGroupRequest>,
) -> AppResult<(StatusCode, Json<ChatResponse>)> {
    let command = req.into_command()?;
    let chat = state.chats.create_group(user_id, command).await?;
    Ok((StatusCode::CREATED, Json(chat)))
}

/// PUT /api/chats/group/:chat_id
pub async fn rename_group(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(chat_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<RenameGroupRequest>,
) -> AppResult<Json<ChatResponse>> {
    Ok(Json(state.chats.rename_group(user_id, chat_id, req.name).await?))
}

/// PUT /api/chats/group/:chat_id/add
pub async fn add_to_group(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(chat_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<GroupMemberRequest>,
) -> AppResult<Json<ChatResponse>> {
    Ok(Json(state.chats.add_member(user_id, chat_id, req.user_id).await?))
}

/// PUT /api/chats/group/:chat_id/remove
/// Admins remove anyone; members may remove themselves. The removed user's
/// live connections are dropped from the room.
pub async fn remove_from_group(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(chat_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<GroupMemberRequest>,
) -> AppResult<Json<ChatResponse>> {
    let chat = state.chats.remove_member(user_id, chat_id, req.user_id).await?;

    if let Some(removed) = req.user_id {
        let evicted = state.gateway.evict_user(chat_id, removed);
        tracing::debug!(%chat_id, user_id = %removed, evicted, "Removed member evicted from room");
    }

    Ok(Json(chat))
}
