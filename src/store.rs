use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::AppResult;
use crate::models::{Chat, Message, MessageStatus, NewGroupChat, NewMessage, UserSummary};

/// Durable storage for users, chats and messages.
///
/// Every mutating method is a single atomic operation on one document
/// (or one batch statement), so callers never read-modify-write shared state.
#[async_trait]
pub trait ChatStore: Send + Sync {
    // ─── Users ─────────────────────────────────────────

    /// Public fields for the given ids. Unknown ids are skipped.
    async fn find_users(&self, ids: &[Uuid]) -> AppResult<Vec<UserSummary>>;

    /// Flip the online flag; going offline also stamps `last_seen`.
    async fn set_user_presence(&self, user_id: Uuid, online: bool) -> AppResult<()>;

    // ─── Chats ─────────────────────────────────────────

    async fn find_chat(&self, chat_id: Uuid) -> AppResult<Option<Chat>>;

    /// The chat, only if `user_id` is currently a member.
    async fn find_member_chat(&self, chat_id: Uuid, user_id: Uuid) -> AppResult<Option<Chat>>;

    /// Find-or-create the direct chat for the unordered pair. Returns the chat
    /// and whether this call created it.
    async fn find_or_create_direct_chat(&self, a: Uuid, b: Uuid) -> AppResult<(Chat, bool)>;

    async fn create_group_chat(&self, group: NewGroupChat) -> AppResult<Chat>;

    /// Chats containing the user, most recently updated first.
    async fn list_chats_for_user(&self, user_id: Uuid) -> AppResult<Vec<Chat>>;

    async fn rename_chat(&self, chat_id: Uuid, name: &str) -> AppResult<Option<Chat>>;

    /// Set-union: adding an existing member is a no-op.
    async fn add_chat_member(&self, chat_id: Uuid, user_id: Uuid) -> AppResult<Option<Chat>>;

    /// Set-removal: removing a non-member is a no-op.
    async fn remove_chat_member(&self, chat_id: Uuid, user_id: Uuid) -> AppResult<Option<Chat>>;

    /// Unconditional pointer update; advances the chat's `updated_at`.
    async fn set_latest_message(&self, chat_id: Uuid, message_id: Option<Uuid>) -> AppResult<()>;

    /// Compare-and-set on the latest pointer. Returns false when the pointer
    /// no longer equals `expected`.
    async fn replace_latest_message(
        &self,
        chat_id: Uuid,
        expected: Uuid,
        replacement: Option<Uuid>,
    ) -> AppResult<bool>;

    // ─── Messages ──────────────────────────────────────

    async fn insert_message(&self, message: NewMessage) -> AppResult<Message>;

    async fn find_message(&self, message_id: Uuid) -> AppResult<Option<Message>>;

    /// Batch lookup, deleted messages included. Unknown ids are skipped.
    async fn find_messages(&self, message_ids: &[Uuid]) -> AppResult<Vec<Message>>;

    /// Non-deleted messages, oldest first.
    async fn list_chat_messages(&self, chat_id: Uuid) -> AppResult<Vec<Message>>;

    /// For every message in the chat not sent by `reader` and not yet read by
    /// them: add `reader` to `read_by` and set status to read. One batch.
    async fn mark_read_by(&self, chat_id: Uuid, reader: Uuid) -> AppResult<u64>;

    /// Batch-advance status on messages not sent by `reader` whose current
    /// status accepts `status`. Reading also adds `reader` to `read_by`.
    async fn update_status(&self, chat_id: Uuid, reader: Uuid, status: MessageStatus)
        -> AppResult<u64>;

    /// Set `is_deleted`. Returns the message as stored afterwards.
    async fn soft_delete_message(&self, message_id: Uuid) -> AppResult<Option<Message>>;

    /// Most recent non-deleted message in the chat.
    async fn latest_visible_message(&self, chat_id: Uuid) -> AppResult<Option<Message>>;
}
