pub mod queries;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::AppResult;
use crate::models::{Chat, Message, MessageStatus, NewGroupChat, NewMessage, UserSummary};
use crate::store::ChatStore;

/// Connect to PostgreSQL and apply pending migrations.
pub async fn init_pool(config: &AppConfig) -> anyhow::Result<PgPool> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    tracing::info!("PostgreSQL connected and migrations applied");
    Ok(pool)
}

/// PostgreSQL-backed [`ChatStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ChatStore for PgStore {
    async fn find_users(&self, ids: &[Uuid]) -> AppResult<Vec<UserSummary>> {
        queries::find_users(&self.pool, ids).await
    }

    async fn set_user_presence(&self, user_id: Uuid, online: bool) -> AppResult<()> {
        queries::set_user_presence(&self.pool, user_id, online).await
    }

    async fn find_chat(&self, chat_id: Uuid) -> AppResult<Option<Chat>> {
        queries::find_chat(&self.pool, chat_id).await
    }

    async fn find_member_chat(&self, chat_id: Uuid, user_id: Uuid) -> AppResult<Option<Chat>> {
        queries::find_member_chat(&self.pool, chat_id, user_id).await
    }

    async fn find_or_create_direct_chat(&self, a: Uuid, b: Uuid) -> AppResult<(Chat, bool)> {
        queries::find_or_create_direct_chat(&self.pool, a, b).await
    }

    async fn create_group_chat(&self, group: NewGroupChat) -> AppResult<Chat> {
        queries::create_group_chat(&self.pool, group).await
    }

    async fn list_chats_for_user(&self, user_id: Uuid) -> AppResult<Vec<Chat>> {
        queries::list_chats_for_user(&self.pool, user_id).await
    }

    async fn rename_chat(&self, chat_id: Uuid, name: &str) -> AppResult<Option<Chat>> {
        queries::rename_chat(&self.pool, chat_id, name).await
    }

    async fn add_chat_member(&self, chat_id: Uuid, user_id: Uuid) -> AppResult<Option<Chat>> {
        queries::add_chat_member(&self.pool, chat_id, user_id).await
    }

    async fn remove_chat_member(&self, chat_id: Uuid, user_id: Uuid) -> AppResult<Option<Chat>> {
        queries::remove_chat_member(&self.pool, chat_id, user_id).await
    }

    async fn set_latest_message(&self, chat_id: Uuid, message_id: Option<Uuid>) -> AppResult<()> {
        queries::set_latest_message(&self.pool, chat_id, message_id).await
    }

    async fn replace_latest_message(
        &self,
        chat_id: Uuid,
        expected: Uuid,
        replacement: Option<Uuid>,
    ) -> AppResult<bool> {
        queries::replace_latest_message(&self.pool, chat_id, expected, replacement).await
    }

    async fn insert_message(&self, message: NewMessage) -> AppResult<Message> {
        queries::insert_message(&self.pool, message).await
    }

    async fn find_message(&self, message_id: Uuid) -> AppResult<Option<Message>> {
        queries::find_message(&self.pool, message_id).await
    }

    async fn find_messages(&self, message_ids: &[Uuid]) -> AppResult<Vec<Message>> {
        queries::find_messages(&self.pool, message_ids).await
    }

    async fn list_chat_messages(&self, chat_id: Uuid) -> AppResult<Vec<Message>> {
        queries::list_chat_messages(&self.pool, chat_id).await
    }

    async fn mark_read_by(&self, chat_id: Uuid, reader: Uuid) -> AppResult<u64> {
        queries::mark_read_by(&self.pool, chat_id, reader).await
    }

    async fn update_status(
        &self,
        chat_id: Uuid,
        reader: Uuid,
        status: MessageStatus,
    ) -> AppResult<u64> {
        queries::update_status(&self.pool, chat_id, reader, status).await
    }

    async fn soft_delete_message(&self, message_id: Uuid) -> AppResult<Option<Message>> {
        queries::soft_delete_message(&self.pool, message_id).await
    }

    async fn latest_visible_message(&self, chat_id: Uuid) -> AppResult<Option<Message>> {
        queries::latest_visible_message(&self.pool, chat_id).await
    }
}
