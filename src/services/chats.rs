use std::sync::Arc;

use rand::Rng;
use uuid::Uuid;

use super::{populate_chat, populate_chat_members, populate_chats};
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{Chat, ChatResponse, CreateGroupCommand, NewGroupChat};
use crate::store::ChatStore;

const AVATAR_SEED_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Chat membership manager: creates and resolves chats and enforces the
/// admin/self rules on every membership mutation.
#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn ChatStore>,
    avatar_base_url: String,
    rename_requires_admin: bool,
}

impl ChatService {
    pub fn new(store: Arc<dyn ChatStore>, config: &AppConfig) -> Self {
        Self {
            store,
            avatar_base_url: config.group_avatar_base_url.clone(),
            rename_requires_admin: config.rename_requires_admin,
        }
    }

    /// Find-or-create the direct chat between `requester` and `target`.
    /// The flag is true when this call created it.
    pub async fn access_or_create_direct(
        &self,
        requester: Uuid,
        target: Option<Uuid>,
    ) -> AppResult<(ChatResponse, bool)> {
        let target =
            target.ok_or_else(|| AppError::InvalidArgument("userId param not sent with request".into()))?;
        if target == requester {
            return Err(AppError::InvalidArgument(
                "Cannot start a direct chat with yourself".into(),
            ));
        }

        let (chat, created) = self.store.find_or_create_direct_chat(requester, target).await?;
        if created {
            tracing::debug!(chat_id = %chat.id, %requester, %target, "Direct chat created");
        }
        Ok((populate_chat(self.store.as_ref(), chat).await?, created))
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> AppResult<Vec<ChatResponse>> {
        let chats = self.store.list_chats_for_user(user_id).await?;
        populate_chats(self.store.as_ref(), chats).await
    }

    pub async fn create_group(
        &self,
        creator: Uuid,
        command: CreateGroupCommand,
    ) -> AppResult<ChatResponse> {
        let mut members: Vec<Uuid> = Vec::with_capacity(command.members.len() + 1);
        for id in command.members {
            if id != creator && !members.contains(&id) {
                members.push(id);
            }
        }
        if members.len() < 2 {
            return Err(AppError::InvalidArgument(
                "More than 2 users are required to form a group chat".into(),
            ));
        }
        members.push(creator);

        let chat = self
            .store
            .create_group_chat(NewGroupChat {
                name: command.name,
                users: members,
                admin: creator,
                avatar: self.random_avatar(),
            })
            .await?;

        tracing::info!(chat_id = %chat.id, admin = %creator, members = chat.users.len(), "Group chat created");
        populate_chat(self.store.as_ref(), chat).await
    }

    pub async fn rename_group(
        &self,
        requester: Uuid,
        chat_id: Uuid,
        name: Option<String>,
    ) -> AppResult<ChatResponse> {
        let name = name.map(|n| n.trim().to_string()).unwrap_or_default();
        if name.is_empty() {
            return Err(AppError::InvalidArgument("Group name is required".into()));
        }
        if name.chars().count() > 100 {
            return Err(AppError::InvalidArgument(
                "Group name must be 1-100 characters".into(),
            ));
        }

        let chat = self.group_chat(chat_id).await?;
        if !chat.has_member(requester) && !chat.is_admin(requester) {
            return Err(AppError::chat_not_accessible());
        }
        if self.rename_requires_admin && !chat.is_admin(requester) {
            return Err(AppError::Forbidden("Only admins can rename the group".into()));
        }

        let chat = self
            .store
            .rename_chat(chat_id, &name)
            .await?
            .ok_or_else(|| AppError::NotFound("Chat not found".into()))?;
        populate_chat_members(self.store.as_ref(), chat).await
    }

    pub async fn add_member(
        &self,
        requester: Uuid,
        chat_id: Uuid,
        user_id: Option<Uuid>,
    ) -> AppResult<ChatResponse> {
        let user_id = user_id.ok_or_else(|| AppError::InvalidArgument("userId is required".into()))?;

        let chat = self.group_chat(chat_id).await?;
        if !chat.is_admin(requester) {
            return Err(AppError::Forbidden("Only admins can add someone".into()));
        }

        let chat = self
            .store
            .add_chat_member(chat_id, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Chat not found".into()))?;
        populate_chat_members(self.store.as_ref(), chat).await
    }

    /// Admins may remove anyone; every member may remove themselves.
    pub async fn remove_member(
        &self,
        requester: Uuid,
        chat_id: Uuid,
        user_id: Option<Uuid>,
    ) -> AppResult<ChatResponse> {
        let user_id = user_id.ok_or_else(|| AppError::InvalidArgument("userId is required".into()))?;

        let chat = self.group_chat(chat_id).await?;
        if requester == user_id {
            if !chat.has_member(requester) {
                return Err(AppError::chat_not_accessible());
            }
        } else if !chat.is_admin(requester) {
            return Err(AppError::Forbidden("Only admins can remove someone".into()));
        }

        let chat = self
            .store
            .remove_chat_member(chat_id, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Chat not found".into()))?;
        populate_chat_members(self.store.as_ref(), chat).await
    }

    pub async fn is_member(&self, chat_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        Ok(self.store.find_member_chat(chat_id, user_id).await?.is_some())
    }

    async fn group_chat(&self, chat_id: Uuid) -> AppResult<Chat> {
        let chat = self
            .store
            .find_chat(chat_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Chat not found".into()))?;
        if !chat.is_group_chat {
            return Err(AppError::InvalidArgument("Not a group chat".into()));
        }
        Ok(chat)
    }

    fn random_avatar(&self) -> String {
        let mut rng = rand::thread_rng();
        let seed: String = (0..6)
            .map(|_| AVATAR_SEED_CHARS[rng.gen_range(0..AVATAR_SEED_CHARS.len())] as char)
            .collect();
        format!("{}?seed={seed}", self.avatar_base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;

    fn service() -> ChatService {
        ChatService::new(Arc::new(MemoryStore::new()), &AppConfig::test_default())
    }

    fn group(name: &str, members: Vec<Uuid>) -> CreateGroupCommand {
        CreateGroupCommand {
            name: name.into(),
            members,
        }
    }

    #[tokio::test]
    async fn direct_chat_is_symmetric_and_idempotent() {
        let svc = service();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let (first, created) = svc.access_or_create_direct(a, Some(b)).await.unwrap();
        assert!(created);
        let (again, created_again) = svc.access_or_create_direct(a, Some(b)).await.unwrap();
        let (reverse, created_reverse) = svc.access_or_create_direct(b, Some(a)).await.unwrap();

        assert!(!created_again && !created_reverse);
        assert_eq!(first.id, again.id);
        assert_eq!(first.id, reverse.id);
        assert!(!first.is_group_chat);
        assert_eq!(first.user_ids.len(), 2);
    }

    #[tokio::test]
    async fn direct_chat_needs_a_distinct_target() {
        let svc = service();
        let me = Uuid::new_v4();

        let missing = svc.access_or_create_direct(me, None).await.unwrap_err();
        assert_eq!(missing.kind(), "invalid_argument");
        let selfie = svc.access_or_create_direct(me, Some(me)).await.unwrap_err();
        assert_eq!(selfie.kind(), "invalid_argument");
    }

    #[tokio::test]
    async fn group_appends_creator_as_admin() {
        let svc = service();
        let (d, a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let chat = svc.create_group(d, group("Trip", vec![a, b, c])).await.unwrap();
        assert!(chat.is_group_chat);
        assert_eq!(chat.user_ids, vec![a, b, c, d]);
        assert_eq!(chat.group_admin_id, Some(d));
        assert!(chat.group_avatar.contains("?seed="));
    }

    #[tokio::test]
    async fn group_needs_two_others_after_dedup() {
        let svc = service();
        let (creator, a) = (Uuid::new_v4(), Uuid::new_v4());

        let err = svc
            .create_group(creator, group("Pair", vec![a, a, creator]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[tokio::test]
    async fn non_admin_cannot_remove_others_but_can_leave() {
        let svc = service();
        let (d, a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let chat = svc.create_group(d, group("Team", vec![a, b, c])).await.unwrap();
        assert_eq!(chat.user_ids.len(), 4);

        let err = svc.remove_member(b, chat.id, Some(c)).await.unwrap_err();
        assert_eq!(err.kind(), "forbidden");

        let after = svc.remove_member(b, chat.id, Some(b)).await.unwrap();
        assert_eq!(after.user_ids, vec![a, c, d]);
    }

    #[tokio::test]
    async fn outsider_cannot_leave_a_group_they_are_not_in() {
        let svc = service();
        let (d, a, b, outsider) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let chat = svc.create_group(d, group("Team", vec![a, b])).await.unwrap();

        let err = svc
            .remove_member(outsider, chat.id, Some(outsider))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn membership_changes_do_not_expose_latest_message() {
        let store = Arc::new(MemoryStore::new());
        let svc = ChatService::new(store.clone(), &AppConfig::test_default());
        let (d, a, b) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let chat = svc.create_group(d, group("Team", vec![a, b])).await.unwrap();

        let message = store
            .insert_message(crate::models::NewMessage {
                chat_id: chat.id,
                sender_id: d,
                content: "secret".into(),
                message_type: crate::models::MessageType::Text,
                file: None,
                reply_to: None,
            })
            .await
            .unwrap();
        store.set_latest_message(chat.id, Some(message.id)).await.unwrap();

        let left = svc.remove_member(a, chat.id, Some(a)).await.unwrap();
        assert!(left.latest_message.is_none());
        let renamed = svc.rename_group(d, chat.id, Some("Renamed".into())).await.unwrap();
        assert!(renamed.latest_message.is_none());

        let listed = svc.list_for_user(d).await.unwrap();
        assert_eq!(
            listed[0].latest_message.as_ref().map(|m| m.content.as_str()),
            Some("secret")
        );
    }

    #[tokio::test]
    async fn open_rename_still_needs_membership() {
        let mut config = AppConfig::test_default();
        config.rename_requires_admin = false;
        let svc = ChatService::new(Arc::new(MemoryStore::new()), &config);
        let (d, a, b, outsider) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let chat = svc.create_group(d, group("Old", vec![a, b])).await.unwrap();

        let err = svc
            .rename_group(outsider, chat.id, Some("Mine".into()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn add_member_is_admin_only_and_set_like() {
        let svc = service();
        let (d, a, b, e) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let chat = svc.create_group(d, group("Team", vec![a, b])).await.unwrap();

        let err = svc.add_member(a, chat.id, Some(e)).await.unwrap_err();
        assert_eq!(err.kind(), "forbidden");

        let once = svc.add_member(d, chat.id, Some(e)).await.unwrap();
        let twice = svc.add_member(d, chat.id, Some(e)).await.unwrap();
        assert_eq!(once.user_ids.len(), 4);
        assert_eq!(twice.user_ids.len(), 4);
    }

    #[tokio::test]
    async fn rename_checks_name_admin_and_chat_kind() {
        let svc = service();
        let (d, a, b) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let chat = svc.create_group(d, group("Old", vec![a, b])).await.unwrap();

        let empty = svc.rename_group(d, chat.id, Some("   ".into())).await.unwrap_err();
        assert_eq!(empty.kind(), "invalid_argument");

        let missing = svc
            .rename_group(d, Uuid::new_v4(), Some("New".into()))
            .await
            .unwrap_err();
        assert_eq!(missing.kind(), "not_found");

        let not_admin = svc.rename_group(a, chat.id, Some("New".into())).await.unwrap_err();
        assert_eq!(not_admin.kind(), "forbidden");

        let renamed = svc.rename_group(d, chat.id, Some(" New ".into())).await.unwrap();
        assert_eq!(renamed.group_name.as_deref(), Some("New"));

        let (direct, _) = svc.access_or_create_direct(a, Some(b)).await.unwrap();
        let err = svc.rename_group(a, direct.id, Some("x".into())).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[tokio::test]
    async fn rename_open_to_members_when_configured() {
        let mut config = AppConfig::test_default();
        config.rename_requires_admin = false;
        let svc = ChatService::new(Arc::new(MemoryStore::new()), &config);
        let (d, a, b) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let chat = svc.create_group(d, group("Old", vec![a, b])).await.unwrap();

        let renamed = svc.rename_group(a, chat.id, Some("Mine".into())).await.unwrap();
        assert_eq!(renamed.group_name.as_deref(), Some("Mine"));
    }

    #[tokio::test]
    async fn list_orders_by_last_update() {
        let svc = service();
        let (me, a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let (with_a, _) = svc.access_or_create_direct(me, Some(a)).await.unwrap();
        let team = svc.create_group(me, group("Team", vec![b, c])).await.unwrap();
        let ids: Vec<Uuid> = svc.list_for_user(me).await.unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![team.id, with_a.id]);

        svc.add_member(me, team.id, Some(a)).await.unwrap();
        svc.rename_group(me, team.id, Some("Team 2".into())).await.unwrap();
        assert!(svc.list_for_user(b).await.unwrap().iter().any(|c| c.id == team.id));
        assert!(svc.list_for_user(a).await.unwrap().len() == 2);
    }
}
