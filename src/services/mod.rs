//! Chat core: membership rules and the message lifecycle, over a [`ChatStore`].
//!
//! Services return populated response DTOs; user references are resolved in
//! one batched lookup per call rather than per message.

pub mod chats;
pub mod messages;

pub use chats::ChatService;
pub use messages::{DeleteOutcome, MessageService};

use std::collections::HashMap;

use uuid::Uuid;

use crate::errors::AppResult;
use crate::models::{
    Chat, ChatResponse, ChatSummary, Message, MessageResponse, ReplyResponse, UserSummary,
};
use crate::store::ChatStore;

async fn user_map(
    store: &dyn ChatStore,
    ids: impl IntoIterator<Item = Uuid>,
) -> AppResult<HashMap<Uuid, UserSummary>> {
    let mut wanted: Vec<Uuid> = ids.into_iter().collect();
    wanted.sort_unstable();
    wanted.dedup();
    if wanted.is_empty() {
        return Ok(HashMap::new());
    }

    let users = store.find_users(&wanted).await?;
    Ok(users.into_iter().map(|u| (u.id, u)).collect())
}

fn message_user_ids(message: &Message) -> impl Iterator<Item = Uuid> + '_ {
    std::iter::once(message.sender_id).chain(message.reply_to.as_ref().map(|r| r.sender_id))
}

fn to_response(
    message: Message,
    users: &HashMap<Uuid, UserSummary>,
    chat: Option<ChatSummary>,
) -> MessageResponse {
    let reply_to = message.reply_to.map(|r| ReplyResponse {
        message_id: r.message_id,
        content: r.content,
        message_type: r.message_type,
        sender_id: r.sender_id,
        sender: users.get(&r.sender_id).cloned(),
    });

    MessageResponse {
        id: message.id,
        chat_id: message.chat_id,
        sender_id: message.sender_id,
        sender: users.get(&message.sender_id).cloned(),
        content: message.content,
        message_type: message.message_type,
        file: message.file,
        reply_to,
        read_by: message.read_by,
        status: message.status,
        is_deleted: message.is_deleted,
        created_at: message.created_at,
        updated_at: message.updated_at,
        chat,
    }
}

/// Resolve senders, reply senders and the owning chat for each message.
/// `chats` supplies the chat summaries; messages whose chat is not among them
/// are returned without one.
pub(crate) async fn populate_messages(
    store: &dyn ChatStore,
    messages: Vec<Message>,
    chats: &[&Chat],
) -> AppResult<Vec<MessageResponse>> {
    let users = user_map(store, messages.iter().flat_map(message_user_ids)).await?;

    Ok(messages
        .into_iter()
        .map(|m| {
            let chat = chats
                .iter()
                .find(|c| c.id == m.chat_id)
                .map(|c| ChatSummary::from(*c));
            to_response(m, &users, chat)
        })
        .collect())
}

/// Resolve members, admin and latest message (with its sender) for each chat.
/// Latest messages are fetched in one batch.
pub(crate) async fn populate_chats(
    store: &dyn ChatStore,
    chats: Vec<Chat>,
) -> AppResult<Vec<ChatResponse>> {
    let latest_ids: Vec<Uuid> = chats.iter().filter_map(|c| c.latest_message_id).collect();
    let latest: HashMap<Uuid, Message> = if latest_ids.is_empty() {
        HashMap::new()
    } else {
        store
            .find_messages(&latest_ids)
            .await?
            .into_iter()
            .map(|m| (m.id, m))
            .collect()
    };
    chat_responses(store, chats, latest).await
}

pub(crate) async fn populate_chat(store: &dyn ChatStore, chat: Chat) -> AppResult<ChatResponse> {
    single(populate_chats(store, vec![chat]).await?)
}

/// Members and admin only. Used for membership mutations, whose requester
/// may no longer be (or never have been) able to read the conversation.
pub(crate) async fn populate_chat_members(
    store: &dyn ChatStore,
    chat: Chat,
) -> AppResult<ChatResponse> {
    single(chat_responses(store, vec![chat], HashMap::new()).await?)
}

async fn chat_responses(
    store: &dyn ChatStore,
    chats: Vec<Chat>,
    mut latest: HashMap<Uuid, Message>,
) -> AppResult<Vec<ChatResponse>> {
    let ids = chats
        .iter()
        .flat_map(|c| c.users.iter().copied().chain(c.group_admin))
        .chain(latest.values().flat_map(message_user_ids))
        .collect::<Vec<_>>();
    let users = user_map(store, ids).await?;

    Ok(chats
        .into_iter()
        .map(|chat| {
            let latest_message = chat
                .latest_message_id
                .and_then(|id| latest.remove(&id))
                .map(|m| to_response(m, &users, None));
            ChatResponse {
                id: chat.id,
                is_group_chat: chat.is_group_chat,
                users: chat
                    .users
                    .iter()
                    .filter_map(|id| users.get(id).cloned())
                    .collect(),
                user_ids: chat.users,
                group_name: chat.group_name,
                group_admin: chat.group_admin.and_then(|id| users.get(&id).cloned()),
                group_admin_id: chat.group_admin,
                group_avatar: chat.group_avatar,
                latest_message,
                created_at: chat.created_at,
                updated_at: chat.updated_at,
            }
        })
        .collect())
}

fn single(mut populated: Vec<ChatResponse>) -> AppResult<ChatResponse> {
    populated
        .pop()
        .ok_or_else(|| anyhow::anyhow!("Chat population returned nothing").into())
}
