use std::sync::Arc;

use uuid::Uuid;
use validator::Validate;

use super::populate_messages;
use crate::errors::{AppError, AppResult};
use crate::models::{
    Chat, Message, MessageResponse, MessageStatus, MessageType, NewMessage, ReplySnapshot,
    SendMessageCommand,
};
use crate::store::ChatStore;

/// Result of a delete: the chat's latest-message pointer as left afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOutcome {
    pub message_id: Uuid,
    pub chat_id: Uuid,
    pub latest_message_id: Option<Uuid>,
}

/// Message lifecycle manager: send, read receipts, soft delete, status, forward.
#[derive(Clone)]
pub struct MessageService {
    store: Arc<dyn ChatStore>,
}

impl MessageService {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    pub async fn send(&self, sender: Uuid, command: SendMessageCommand) -> AppResult<MessageResponse> {
        let chat_id = command
            .chat_id
            .ok_or_else(|| AppError::InvalidArgument("chatId is required".into()))?;
        let content = command.content.map(|c| c.trim().to_string()).unwrap_or_default();

        let file = match command.message_type {
            MessageType::Text => {
                if content.is_empty() {
                    return Err(AppError::InvalidArgument(
                        "Message content cannot be empty".into(),
                    ));
                }
                None
            }
            MessageType::File => {
                let file = command.file.ok_or_else(|| {
                    AppError::InvalidArgument("File messages require a file".into())
                })?;
                file.validate()?;
                Some(file)
            }
        };

        let chat = self
            .store
            .find_member_chat(chat_id, sender)
            .await?
            .ok_or_else(AppError::chat_not_accessible)?;

        let reply_to = match command.reply_to {
            Some(reply_id) => {
                let original = self
                    .store
                    .find_message(reply_id)
                    .await?
                    .filter(|m| m.chat_id == chat_id && !m.is_deleted)
                    .ok_or_else(|| {
                        AppError::InvalidArgument("Replied message not found in this chat".into())
                    })?;
                Some(ReplySnapshot {
                    message_id: original.id,
                    content: original.content,
                    message_type: original.message_type,
                    sender_id: original.sender_id,
                })
            }
            None => None,
        };

        let message = self
            .store
            .insert_message(NewMessage {
                chat_id,
                sender_id: sender,
                content,
                message_type: command.message_type,
                file,
                reply_to,
            })
            .await?;
        self.store.set_latest_message(chat_id, Some(message.id)).await?;

        let mut populated = populate_messages(self.store.as_ref(), vec![message], &[&chat]).await?;
        populated
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Message population returned nothing").into())
    }

    /// All visible messages of the chat, oldest first. Everything the requester
    /// had not read yet is marked read first, so the result already shows it.
    pub async fn get_messages(&self, requester: Uuid, chat_id: Uuid) -> AppResult<Vec<MessageResponse>> {
        let chat = self
            .store
            .find_member_chat(chat_id, requester)
            .await?
            .ok_or_else(AppError::chat_not_accessible)?;

        let marked = self.store.mark_read_by(chat_id, requester).await?;
        if marked > 0 {
            tracing::debug!(%chat_id, reader = %requester, marked, "Messages marked read");
        }

        let messages = self.store.list_chat_messages(chat_id).await?;
        populate_messages(self.store.as_ref(), messages, &[&chat]).await
    }

    /// Soft delete. The sender may delete their own message; a group admin may
    /// delete any message in the group. Repeating a delete changes nothing.
    pub async fn delete(&self, requester: Uuid, message_id: Uuid) -> AppResult<DeleteOutcome> {
        let message = self
            .store
            .find_message(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Message not found".into()))?;
        let chat = self.store.find_chat(message.chat_id).await?;

        let is_admin = chat.as_ref().is_some_and(|c| c.is_admin(requester));
        if message.sender_id != requester && !is_admin {
            return Err(AppError::Forbidden(
                "You can only delete your own messages".into(),
            ));
        }

        let mut outcome = DeleteOutcome {
            message_id,
            chat_id: message.chat_id,
            latest_message_id: chat.as_ref().and_then(|c| c.latest_message_id),
        };
        if message.is_deleted {
            return Ok(outcome);
        }

        self.store.soft_delete_message(message_id).await?;

        if outcome.latest_message_id == Some(message_id) {
            let replacement = self
                .store
                .latest_visible_message(message.chat_id)
                .await?
                .map(|m| m.id);
            let swapped = self
                .store
                .replace_latest_message(message.chat_id, message_id, replacement)
                .await?;

            outcome.latest_message_id = if swapped {
                replacement
            } else {
                // A concurrent send moved the pointer first
                self.store
                    .find_chat(message.chat_id)
                    .await?
                    .and_then(|c| c.latest_message_id)
            };
        }

        tracing::debug!(%message_id, chat_id = %message.chat_id, by = %requester, "Message deleted");
        Ok(outcome)
    }

    /// Batch status transition for everything the requester received in the
    /// chat. Returns how many messages changed.
    pub async fn update_status(
        &self,
        requester: Uuid,
        chat_id: Uuid,
        status: Option<String>,
    ) -> AppResult<u64> {
        let status: MessageStatus = status
            .ok_or_else(|| AppError::InvalidArgument("Status is required".into()))?
            .parse()?;
        if status == MessageStatus::Sent {
            return Err(AppError::InvalidArgument(
                "Status must be delivered or read".into(),
            ));
        }

        self.store
            .find_member_chat(chat_id, requester)
            .await?
            .ok_or_else(AppError::chat_not_accessible)?;

        self.store.update_status(chat_id, requester, status).await
    }

    /// Copy a message into every target chat the sender belongs to. Targets
    /// the sender is not in are skipped; a failed copy does not undo the others.
    pub async fn forward(
        &self,
        sender: Uuid,
        message_id: Option<Uuid>,
        chat_ids: Vec<Uuid>,
    ) -> AppResult<Vec<MessageResponse>> {
        let message_id =
            message_id.ok_or_else(|| AppError::InvalidArgument("messageId is required".into()))?;
        if chat_ids.is_empty() {
            return Err(AppError::InvalidArgument(
                "At least one target chat is required".into(),
            ));
        }

        let original = self
            .store
            .find_message(message_id)
            .await?
            .filter(|m| !m.is_deleted)
            .ok_or_else(|| AppError::NotFound("Message not found".into()))?;
        if self
            .store
            .find_member_chat(original.chat_id, sender)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound("Message not found".into()));
        }

        let mut targets = Vec::new();
        for chat_id in chat_ids {
            if targets.iter().any(|c: &Chat| c.id == chat_id) {
                continue;
            }
            if let Some(chat) = self.store.find_member_chat(chat_id, sender).await? {
                targets.push(chat);
            }
        }
        if targets.is_empty() {
            return Err(AppError::Forbidden(
                "You are not a member of any of the target chats".into(),
            ));
        }

        let mut forwarded = Vec::with_capacity(targets.len());
        let mut last_error = None;
        for chat in &targets {
            match self.copy_into(sender, chat.id, &original).await {
                Ok(message) => forwarded.push(message),
                Err(e) => {
                    tracing::warn!(chat_id = %chat.id, %message_id, error = %e, "Forward to chat failed");
                    last_error = Some(e);
                }
            }
        }

        if forwarded.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        let chats: Vec<&Chat> = targets.iter().collect();
        populate_messages(self.store.as_ref(), forwarded, &chats).await
    }

    async fn copy_into(
        &self,
        sender: Uuid,
        chat_id: Uuid,
        original: &Message,
    ) -> AppResult<Message> {
        let message = self
            .store
            .insert_message(NewMessage {
                chat_id,
                sender_id: sender,
                content: original.content.clone(),
                message_type: original.message_type,
                file: original.file.clone(),
                reply_to: None,
            })
            .await?;
        self.store.set_latest_message(chat_id, Some(message.id)).await?;
        Ok(message)
    }
}
