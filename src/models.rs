use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use crate::errors::{AppError, AppResult};

// ─── User ──────────────────────────────────────────────

/// Public user fields. Users are owned by the profile service; the chat core
/// only resolves them for display and flips the presence flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub name: String,
    pub avatar: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

// ─── Message Enums ─────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    File,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::File => "file",
        }
    }
}

impl FromStr for MessageType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageType::Text),
            "file" => Ok(MessageType::File),
            other => Err(AppError::InvalidArgument(format!("Invalid message type: {other}"))),
        }
    }
}

/// Chat-scoped aggregate delivery state. Variant order is the only legal
/// direction of travel: sent → delivered → read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }

    /// Whether a batch update towards `target` applies to a message currently in `self`.
    /// "read" applies to anything not yet read; "delivered" only to plain "sent".
    pub fn accepts(&self, target: MessageStatus) -> bool {
        match target {
            MessageStatus::Read => *self != MessageStatus::Read,
            MessageStatus::Delivered => *self == MessageStatus::Sent,
            MessageStatus::Sent => false,
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            other => Err(AppError::InvalidArgument(format!("Invalid message status: {other}"))),
        }
    }
}

// ─── Chat ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Chat {
    pub id: Uuid,
    pub is_group_chat: bool,
    /// Member set in join order; never contains duplicates.
    pub users: Vec<Uuid>,
    pub latest_message_id: Option<Uuid>,
    pub group_name: Option<String>,
    pub group_admin: Option<Uuid>,
    pub group_avatar: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    pub fn has_member(&self, user_id: Uuid) -> bool {
        self.users.contains(&user_id)
    }

    pub fn is_admin(&self, user_id: Uuid) -> bool {
        self.is_group_chat && self.group_admin == Some(user_id)
    }
}

/// Avatar given to chats created without one.
pub const DEFAULT_CHAT_AVATAR: &str = "https://api.dicebear.com/7.x/avataaars/svg?seed=group";

/// Key of the unordered user pair behind a direct chat.
pub fn direct_key(a: Uuid, b: Uuid) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("{low}:{high}")
}

#[derive(Debug, Clone)]
pub struct NewGroupChat {
    pub name: String,
    pub users: Vec<Uuid>,
    pub admin: Uuid,
    pub avatar: String,
}

// ─── Message ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FileAttachment {
    #[validate(length(min = 1, max = 255, message = "File name must be 1-255 characters"))]
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    #[validate(range(min = 0, message = "File size cannot be negative"))]
    pub size: i64,
    #[validate(length(min = 1, message = "File url is required"))]
    pub url: String,
}

/// Copy of the replied-to message taken at send time. Never refreshed.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplySnapshot {
    pub message_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub sender_id: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub file: Option<FileAttachment>,
    pub reply_to: Option<ReplySnapshot>,
    pub read_by: Vec<Uuid>,
    pub status: MessageStatus,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub file: Option<FileAttachment>,
    pub reply_to: Option<ReplySnapshot>,
}

// ─── Chat Requests ─────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessChatRequest {
    pub user_id: Option<Uuid>,
}

/// `users` arrives either as a JSON array or as a string holding one.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum UserIdList {
    Ids(Vec<Uuid>),
    Encoded(String),
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: Option<String>,
    pub users: Option<UserIdList>,
}

/// Validated group creation input handed to the membership manager.
#[derive(Debug, Clone, Validate)]
pub struct CreateGroupCommand {
    #[validate(length(min = 1, max = 100, message = "Group name must be 1-100 characters"))]
    pub name: String,
    pub members: Vec<Uuid>,
}

impl CreateGroupRequest {
    pub fn into_command(self) -> AppResult<CreateGroupCommand> {
        let name = self.name.map(|n| n.trim().to_string()).unwrap_or_default();
        let users = match self.users {
            Some(users) if !name.is_empty() => users,
            _ => {
                return Err(AppError::InvalidArgument(
                    "Please provide all required fields".into(),
                ))
            }
        };

        let members = match users {
            UserIdList::Ids(ids) => ids,
            UserIdList::Encoded(raw) => serde_json::from_str::<Vec<Uuid>>(&raw).map_err(|e| {
                AppError::InvalidArgument(format!("users must be a list of user ids: {e}"))
            })?,
        };

        let command = CreateGroupCommand { name, members };
        command.validate()?;
        Ok(command)
    }
}

#[derive(Debug, Deserialize)]
pub struct RenameGroupRequest {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMemberRequest {
    pub user_id: Option<Uuid>,
}

// ─── Message Requests ──────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyToRequest {
    pub message_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub chat_id: Option<Uuid>,
    pub content: Option<String>,
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    pub file: Option<FileAttachment>,
    pub reply_to: Option<ReplyToRequest>,
}

#[derive(Debug, Clone)]
pub struct SendMessageCommand {
    pub chat_id: Option<Uuid>,
    pub content: Option<String>,
    pub message_type: MessageType,
    pub file: Option<FileAttachment>,
    pub reply_to: Option<Uuid>,
}

impl From<SendMessageRequest> for SendMessageCommand {
    fn from(req: SendMessageRequest) -> Self {
        Self {
            chat_id: req.chat_id,
            content: req.content,
            message_type: req.message_type,
            file: req.file,
            reply_to: req.reply_to.map(|r| r.message_id),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardMessageRequest {
    pub message_id: Option<Uuid>,
    #[serde(default)]
    pub chat_ids: Vec<Uuid>,
}

// ─── Responses ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: Uuid,
    pub is_group_chat: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    pub user_ids: Vec<Uuid>,
}

impl From<&Chat> for ChatSummary {
    fn from(c: &Chat) -> Self {
        Self {
            id: c.id,
            is_group_chat: c.is_group_chat,
            group_name: c.group_name.clone(),
            user_ids: c.users.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyResponse {
    pub message_id: Uuid,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub sender_id: Uuid,
    pub sender: Option<UserSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub sender: Option<UserSummary>,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileAttachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyResponse>,
    pub read_by: Vec<Uuid>,
    pub status: MessageStatus,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat: Option<ChatSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub id: Uuid,
    pub is_group_chat: bool,
    pub user_ids: Vec<Uuid>,
    pub users: Vec<UserSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_admin: Option<UserSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_admin_id: Option<Uuid>,
    pub group_avatar: String,
    pub latest_message: Option<MessageResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessageResponse {
    pub message: String,
    pub message_id: Uuid,
    pub latest_message_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdateResponse {
    pub message: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardResponse {
    pub message: String,
    pub count: usize,
    pub forwarded_messages: Vec<MessageResponse>,
}

// ─── WebSocket Messages ────────────────────────────────

/// Room-addressed payload. Anything beside `chatId` is relayed untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomPayload {
    #[serde(rename = "chatId")]
    pub chat_id: Uuid,
    #[serde(flatten)]
    pub data: serde_json::Map<String, Value>,
}

impl RoomPayload {
    /// Wrap a persisted message for delivery to the chat room.
    pub fn from_message(message: &MessageResponse) -> Self {
        let data = match serde_json::to_value(message) {
            Ok(Value::Object(mut map)) => {
                map.remove("chatId");
                map
            }
            _ => serde_json::Map::new(),
        };
        Self {
            chat_id: message.chat_id,
            data,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum WsClientMessage {
    /// Subscribe this connection to a chat room
    JoinChat {
        #[serde(rename = "chatId")]
        chat_id: Uuid,
    },
    /// Unsubscribe from a chat room
    LeaveChat {
        #[serde(rename = "chatId")]
        chat_id: Uuid,
    },
    /// Relay a message to the other room members (no persistence)
    SendMessage(RoomPayload),
    Typing(RoomPayload),
    StopTyping(RoomPayload),
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum WsServerMessage {
    Joined {
        #[serde(rename = "chatId")]
        chat_id: Uuid,
    },
    Left {
        #[serde(rename = "chatId")]
        chat_id: Uuid,
    },
    ReceiveMessage(RoomPayload),
    Typing(RoomPayload),
    StopTyping(RoomPayload),
    Pong,
    Error { message: String },
}
