use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use uuid::Uuid;

use crate::errors::AppResult;
use crate::models::{
    direct_key, Chat, Message, MessageStatus, NewGroupChat, NewMessage, UserSummary,
    DEFAULT_CHAT_AVATAR,
};
use crate::store::ChatStore;

/// In-memory store for single-instance mode (no database configured).
///
/// Each chat and message lives in its own map entry, and every mutation happens
/// under that entry's shard lock, which gives the same single-document atomicity
/// the database backend provides. Timestamps come from a process-wide monotonic
/// clock so creation order is total.
#[derive(Clone, Default)]
pub struct MemoryStore {
    users: Arc<DashMap<Uuid, UserSummary>>,
    chats: Arc<DashMap<Uuid, Chat>>,
    messages: Arc<DashMap<Uuid, Message>>,
    /// direct_key → chat id; the entry lock serializes first contact per pair
    direct_chats: Arc<DashMap<String, Uuid>>,
    /// chat id → message ids in insertion order
    chat_messages: Arc<DashMap<Uuid, Vec<Uuid>>>,
    clock: Arc<Mutex<DateTime<Utc>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user record (normally owned by the profile service).
    pub fn insert_user(&self, user: UserSummary) {
        self.users.insert(user.id, user);
    }

    pub fn chat_count(&self) -> usize {
        self.chats.len()
    }

    fn now(&self) -> DateTime<Utc> {
        let mut last = self.clock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut now = Utc::now();
        if now <= *last {
            now = *last + Duration::microseconds(1);
        }
        *last = now;
        now
    }

    fn message_ids(&self, chat_id: Uuid) -> Vec<Uuid> {
        self.chat_messages
            .get(&chat_id)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    /// Apply `f` to every message of the chat, counting the ones it changed.
    fn update_chat_messages<F>(&self, chat_id: Uuid, mut f: F) -> u64
    where
        F: FnMut(&mut Message, DateTime<Utc>) -> bool,
    {
        let mut changed = 0;
        for id in self.message_ids(chat_id) {
            let now = self.now();
            if let Some(mut message) = self.messages.get_mut(&id) {
                if f(&mut message, now) {
                    message.updated_at = now;
                    changed += 1;
                }
            }
        }
        changed
    }

    fn mutate_chat<F>(&self, chat_id: Uuid, f: F) -> Option<Chat>
    where
        F: FnOnce(&mut Chat),
    {
        let now = self.now();
        let mut chat = self.chats.get_mut(&chat_id)?;
        f(&mut chat);
        chat.updated_at = now;
        Some(chat.clone())
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn find_users(&self, ids: &[Uuid]) -> AppResult<Vec<UserSummary>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.users.get(id).map(|u| u.clone()))
            .collect())
    }

    async fn set_user_presence(&self, user_id: Uuid, online: bool) -> AppResult<()> {
        let now = self.now();
        if let Some(mut user) = self.users.get_mut(&user_id) {
            user.is_online = online;
            if !online {
                user.last_seen = Some(now);
            }
        }
        Ok(())
    }

    async fn find_chat(&self, chat_id: Uuid) -> AppResult<Option<Chat>> {
        Ok(self.chats.get(&chat_id).map(|c| c.clone()))
    }

    async fn find_member_chat(&self, chat_id: Uuid, user_id: Uuid) -> AppResult<Option<Chat>> {
        Ok(self
            .chats
            .get(&chat_id)
            .filter(|c| c.has_member(user_id))
            .map(|c| c.clone()))
    }

    async fn find_or_create_direct_chat(&self, a: Uuid, b: Uuid) -> AppResult<(Chat, bool)> {
        match self.direct_chats.entry(direct_key(a, b)) {
            Entry::Occupied(entry) => {
                if let Some(chat) = self.chats.get(entry.get()) {
                    return Ok((chat.clone(), false));
                }
                // Index points at a vanished chat; recreate under the same lock
                let chat = self.new_direct_chat(a, b);
                entry.replace_entry(chat.id);
                Ok((chat, true))
            }
            Entry::Vacant(entry) => {
                let chat = self.new_direct_chat(a, b);
                entry.insert(chat.id);
                Ok((chat, true))
            }
        }
    }

    async fn create_group_chat(&self, group: NewGroupChat) -> AppResult<Chat> {
        let now = self.now();
        let mut users: Vec<Uuid> = Vec::with_capacity(group.users.len());
        for id in group.users {
            if !users.contains(&id) {
                users.push(id);
            }
        }

        let chat = Chat {
            id: Uuid::new_v4(),
            is_group_chat: true,
            users,
            latest_message_id: None,
            group_name: Some(group.name),
            group_admin: Some(group.admin),
            group_avatar: group.avatar,
            created_at: now,
            updated_at: now,
        };
        self.chats.insert(chat.id, chat.clone());
        Ok(chat)
    }

    async fn list_chats_for_user(&self, user_id: Uuid) -> AppResult<Vec<Chat>> {
        let mut chats: Vec<Chat> = self
            .chats
            .iter()
            .filter(|c| c.has_member(user_id))
            .map(|c| c.clone())
            .collect();
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(chats)
    }

    async fn rename_chat(&self, chat_id: Uuid, name: &str) -> AppResult<Option<Chat>> {
        Ok(self.mutate_chat(chat_id, |chat| chat.group_name = Some(name.to_string())))
    }

    async fn add_chat_member(&self, chat_id: Uuid, user_id: Uuid) -> AppResult<Option<Chat>> {
        Ok(self.mutate_chat(chat_id, |chat| {
            if !chat.users.contains(&user_id) {
                chat.users.push(user_id);
            }
        }))
    }

    async fn remove_chat_member(&self, chat_id: Uuid, user_id: Uuid) -> AppResult<Option<Chat>> {
        Ok(self.mutate_chat(chat_id, |chat| chat.users.retain(|u| *u != user_id)))
    }

    async fn set_latest_message(&self, chat_id: Uuid, message_id: Option<Uuid>) -> AppResult<()> {
        self.mutate_chat(chat_id, |chat| chat.latest_message_id = message_id);
        Ok(())
    }

    async fn replace_latest_message(
        &self,
        chat_id: Uuid,
        expected: Uuid,
        replacement: Option<Uuid>,
    ) -> AppResult<bool> {
        let now = self.now();
        let Some(mut chat) = self.chats.get_mut(&chat_id) else {
            return Ok(false);
        };
        if chat.latest_message_id != Some(expected) {
            return Ok(false);
        }
        chat.latest_message_id = replacement;
        chat.updated_at = now;
        Ok(true)
    }

    async fn insert_message(&self, new: NewMessage) -> AppResult<Message> {
        let now = self.now();
        let message = Message {
            id: Uuid::new_v4(),
            chat_id: new.chat_id,
            sender_id: new.sender_id,
            content: new.content,
            message_type: new.message_type,
            file: new.file,
            reply_to: new.reply_to,
            read_by: Vec::new(),
            status: MessageStatus::Sent,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        self.messages.insert(message.id, message.clone());
        self.chat_messages
            .entry(message.chat_id)
            .or_default()
            .push(message.id);
        Ok(message)
    }

    async fn find_message(&self, message_id: Uuid) -> AppResult<Option<Message>> {
        Ok(self.messages.get(&message_id).map(|m| m.clone()))
    }

    async fn find_messages(&self, message_ids: &[Uuid]) -> AppResult<Vec<Message>> {
        Ok(message_ids
            .iter()
            .filter_map(|id| self.messages.get(id).map(|m| m.clone()))
            .collect())
    }

    async fn list_chat_messages(&self, chat_id: Uuid) -> AppResult<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .message_ids(chat_id)
            .iter()
            .filter_map(|id| self.messages.get(id).map(|m| m.clone()))
            .filter(|m| !m.is_deleted)
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }

    async fn mark_read_by(&self, chat_id: Uuid, reader: Uuid) -> AppResult<u64> {
        Ok(self.update_chat_messages(chat_id, |message, _| {
            if message.sender_id == reader || message.read_by.contains(&reader) {
                return false;
            }
            message.read_by.push(reader);
            message.status = MessageStatus::Read;
            true
        }))
    }

    async fn update_status(
        &self,
        chat_id: Uuid,
        reader: Uuid,
        status: MessageStatus,
    ) -> AppResult<u64> {
        Ok(self.update_chat_messages(chat_id, |message, _| {
            if message.sender_id == reader || !message.status.accepts(status) {
                return false;
            }
            message.status = status;
            if status == MessageStatus::Read && !message.read_by.contains(&reader) {
                message.read_by.push(reader);
            }
            true
        }))
    }

    async fn soft_delete_message(&self, message_id: Uuid) -> AppResult<Option<Message>> {
        let now = self.now();
        let Some(mut message) = self.messages.get_mut(&message_id) else {
            return Ok(None);
        };
        if !message.is_deleted {
            message.is_deleted = true;
            message.updated_at = now;
        }
        Ok(Some(message.clone()))
    }

    async fn latest_visible_message(&self, chat_id: Uuid) -> AppResult<Option<Message>> {
        Ok(self
            .message_ids(chat_id)
            .iter()
            .filter_map(|id| self.messages.get(id).map(|m| m.clone()))
            .filter(|m| !m.is_deleted)
            .max_by(|a, b| a.created_at.cmp(&b.created_at)))
    }
}

impl MemoryStore {
    fn new_direct_chat(&self, a: Uuid, b: Uuid) -> Chat {
        let now = self.now();
        let chat = Chat {
            id: Uuid::new_v4(),
            is_group_chat: false,
            users: vec![a, b],
            latest_message_id: None,
            group_name: None,
            group_admin: None,
            group_avatar: DEFAULT_CHAT_AVATAR.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.chats.insert(chat.id, chat.clone());
        chat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageType;

    fn text(chat_id: Uuid, sender_id: Uuid, content: &str) -> NewMessage {
        NewMessage {
            chat_id,
            sender_id,
            content: content.into(),
            message_type: MessageType::Text,
            file: None,
            reply_to: None,
        }
    }

    #[tokio::test]
    async fn concurrent_first_contact_creates_one_chat() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            let (x, y) = if i % 2 == 0 { (a, b) } else { (b, a) };
            handles.push(tokio::spawn(async move {
                store.find_or_create_direct_chat(x, y).await.unwrap().0.id
            }));
        }

        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.chat_count(), 1);
    }

    #[tokio::test]
    async fn adding_existing_member_keeps_set_semantics() {
        let store = MemoryStore::new();
        let (admin, a, b) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let chat = store
            .create_group_chat(NewGroupChat {
                name: "g".into(),
                users: vec![a, b, admin, a],
                admin,
                avatar: DEFAULT_CHAT_AVATAR.into(),
            })
            .await
            .unwrap();
        assert_eq!(chat.users, vec![a, b, admin]);

        let after = store.add_chat_member(chat.id, b).await.unwrap().unwrap();
        assert_eq!(after.users.len(), 3);
        assert!(after.updated_at > chat.updated_at);
    }

    #[tokio::test]
    async fn mark_read_skips_own_and_already_read_messages() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (chat, _) = store.find_or_create_direct_chat(a, b).await.unwrap();

        let from_a = store.insert_message(text(chat.id, a, "hi")).await.unwrap();
        let from_b = store.insert_message(text(chat.id, b, "yo")).await.unwrap();

        assert_eq!(store.mark_read_by(chat.id, b).await.unwrap(), 1);
        assert_eq!(store.mark_read_by(chat.id, b).await.unwrap(), 0);

        let read = store.find_message(from_a.id).await.unwrap().unwrap();
        assert_eq!(read.read_by, vec![b]);
        assert_eq!(read.status, MessageStatus::Read);

        let own = store.find_message(from_b.id).await.unwrap().unwrap();
        assert!(own.read_by.is_empty());
        assert_eq!(own.status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn delivered_never_downgrades_read() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (chat, _) = store.find_or_create_direct_chat(a, b).await.unwrap();
        let m = store.insert_message(text(chat.id, a, "x")).await.unwrap();

        assert_eq!(store.update_status(chat.id, b, MessageStatus::Read).await.unwrap(), 1);
        assert_eq!(store.update_status(chat.id, b, MessageStatus::Delivered).await.unwrap(), 0);
        let stored = store.find_message(m.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Read);
    }

    #[tokio::test]
    async fn replace_latest_is_compare_and_set() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (chat, _) = store.find_or_create_direct_chat(a, b).await.unwrap();
        let first = store.insert_message(text(chat.id, a, "1")).await.unwrap();
        let second = store.insert_message(text(chat.id, a, "2")).await.unwrap();
        store.set_latest_message(chat.id, Some(second.id)).await.unwrap();

        assert!(!store
            .replace_latest_message(chat.id, first.id, None)
            .await
            .unwrap());
        assert!(store
            .replace_latest_message(chat.id, second.id, Some(first.id))
            .await
            .unwrap());

        let chat = store.find_chat(chat.id).await.unwrap().unwrap();
        assert_eq!(chat.latest_message_id, Some(first.id));
    }

    #[tokio::test]
    async fn find_messages_skips_unknown_ids_and_keeps_deleted() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (chat, _) = store.find_or_create_direct_chat(a, b).await.unwrap();

        let kept = store.insert_message(text(chat.id, a, "kept")).await.unwrap();
        let gone = store.insert_message(text(chat.id, a, "gone")).await.unwrap();
        store.soft_delete_message(gone.id).await.unwrap();

        let found = store
            .find_messages(&[kept.id, Uuid::new_v4(), gone.id])
            .await
            .unwrap();
        let ids: Vec<Uuid> = found.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![kept.id, gone.id]);
        assert!(found[1].is_deleted);
    }

    #[tokio::test]
    async fn presence_going_offline_stamps_last_seen() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store.insert_user(UserSummary {
            id,
            username: "ana".into(),
            name: "Ana".into(),
            avatar: None,
            is_online: false,
            last_seen: None,
        });

        store.set_user_presence(id, true).await.unwrap();
        assert!(store.find_users(&[id]).await.unwrap()[0].is_online);

        store.set_user_presence(id, false).await.unwrap();
        let user = &store.find_users(&[id]).await.unwrap()[0];
        assert!(!user.is_online);
        assert!(user.last_seen.is_some());
    }
}
