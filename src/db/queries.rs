use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::*;

// ─── Row Types ─────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct ChatRow {
    id: Uuid,
    is_group_chat: bool,
    group_name: Option<String>,
    group_admin: Option<Uuid>,
    group_avatar: String,
    latest_message_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ChatRow {
    fn into_chat(self, users: Vec<Uuid>) -> Chat {
        Chat {
            id: self.id,
            is_group_chat: self.is_group_chat,
            users,
            latest_message_id: self.latest_message_id,
            group_name: self.group_name,
            group_admin: self.group_admin,
            group_avatar: self.group_avatar,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    chat_id: Uuid,
    sender_id: Uuid,
    content: String,
    message_type: String,
    file_name: Option<String>,
    file_mime_type: Option<String>,
    file_size: Option<i64>,
    file_url: Option<String>,
    reply_message_id: Option<Uuid>,
    reply_content: Option<String>,
    reply_type: Option<String>,
    reply_sender_id: Option<Uuid>,
    read_by: Vec<Uuid>,
    status: String,
    is_deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = AppError;

    fn try_from(row: MessageRow) -> AppResult<Self> {
        let id = row.id;
        let corrupt =
            move |e: AppError| AppError::Internal(anyhow::anyhow!("Corrupt message row {id}: {e}"));

        let file = match (row.file_name, row.file_url) {
            (Some(name), Some(url)) => Some(FileAttachment {
                name,
                mime_type: row.file_mime_type.unwrap_or_default(),
                size: row.file_size.unwrap_or(0),
                url,
            }),
            _ => None,
        };

        let reply_to = match (row.reply_message_id, row.reply_sender_id) {
            (Some(message_id), Some(sender_id)) => Some(ReplySnapshot {
                message_id,
                content: row.reply_content.unwrap_or_default(),
                message_type: row
                    .reply_type
                    .as_deref()
                    .unwrap_or("text")
                    .parse()
                    .map_err(corrupt)?,
                sender_id,
            }),
            _ => None,
        };

        Ok(Message {
            id: row.id,
            chat_id: row.chat_id,
            sender_id: row.sender_id,
            content: row.content,
            message_type: row.message_type.parse().map_err(corrupt)?,
            file,
            reply_to,
            read_by: row.read_by,
            status: row.status.parse().map_err(corrupt)?,
            is_deleted: row.is_deleted,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// ─── Users ─────────────────────────────────────────────

pub async fn find_users(pool: &PgPool, ids: &[Uuid]) -> AppResult<Vec<UserSummary>> {
    let users = sqlx::query_as::<_, UserSummary>(
        "SELECT id, username, name, avatar, is_online, last_seen FROM users WHERE id = ANY($1)",
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;
    Ok(users)
}

pub async fn set_user_presence(pool: &PgPool, user_id: Uuid, online: bool) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE users
        SET is_online = $2,
            last_seen = CASE WHEN $2 THEN last_seen ELSE NOW() END
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .bind(online)
    .execute(pool)
    .await?;
    Ok(())
}

// ─── Chats ─────────────────────────────────────────────

/// Member lists for the given chats, each in join order.
async fn load_members(pool: &PgPool, chat_ids: &[Uuid]) -> AppResult<HashMap<Uuid, Vec<Uuid>>> {
    let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
        "SELECT chat_id, user_id FROM chat_members WHERE chat_id = ANY($1) ORDER BY seq",
    )
    .bind(chat_ids)
    .fetch_all(pool)
    .await?;

    let mut members: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for (chat_id, user_id) in rows {
        members.entry(chat_id).or_default().push(user_id);
    }
    Ok(members)
}

async fn with_members(pool: &PgPool, row: Option<ChatRow>) -> AppResult<Option<Chat>> {
    let Some(row) = row else {
        return Ok(None);
    };
    let mut members = load_members(pool, &[row.id]).await?;
    let users = members.remove(&row.id).unwrap_or_default();
    Ok(Some(row.into_chat(users)))
}

pub async fn find_chat(pool: &PgPool, chat_id: Uuid) -> AppResult<Option<Chat>> {
    let row = sqlx::query_as::<_, ChatRow>("SELECT * FROM chats WHERE id = $1")
        .bind(chat_id)
        .fetch_optional(pool)
        .await?;
    with_members(pool, row).await
}

pub async fn find_member_chat(pool: &PgPool, chat_id: Uuid, user_id: Uuid) -> AppResult<Option<Chat>> {
    let row = sqlx::query_as::<_, ChatRow>(
        r#"
        SELECT c.* FROM chats c
        JOIN chat_members m ON m.chat_id = c.id
        WHERE c.id = $1 AND m.user_id = $2
        "#,
    )
    .bind(chat_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    with_members(pool, row).await
}

/// The unique index on `direct_key` arbitrates concurrent first contact: the
/// losing insert does nothing and the winner's row is read back.
pub async fn find_or_create_direct_chat(pool: &PgPool, a: Uuid, b: Uuid) -> AppResult<(Chat, bool)> {
    let key = direct_key(a, b);
    let mut tx = pool.begin().await?;

    let inserted = sqlx::query_as::<_, ChatRow>(
        r#"
        INSERT INTO chats (id, is_group_chat, direct_key, group_avatar, created_at, updated_at)
        VALUES ($1, FALSE, $2, $3, NOW(), NOW())
        ON CONFLICT (direct_key) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&key)
    .bind(DEFAULT_CHAT_AVATAR)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(row) = inserted {
        sqlx::query(
            "INSERT INTO chat_members (chat_id, user_id) VALUES ($1, $2), ($1, $3) ON CONFLICT DO NOTHING",
        )
        .bind(row.id)
        .bind(a)
        .bind(b)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        return Ok((row.into_chat(vec![a, b]), true));
    }
    tx.commit().await?;

    let row = sqlx::query_as::<_, ChatRow>("SELECT * FROM chats WHERE direct_key = $1")
        .bind(&key)
        .fetch_optional(pool)
        .await?;
    let chat = with_members(pool, row)
        .await?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Direct chat {key} vanished after conflict")))?;
    Ok((chat, false))
}

pub async fn create_group_chat(pool: &PgPool, group: NewGroupChat) -> AppResult<Chat> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, ChatRow>(
        r#"
        INSERT INTO chats (id, is_group_chat, group_name, group_admin, group_avatar, created_at, updated_at)
        VALUES ($1, TRUE, $2, $3, $4, NOW(), NOW())
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&group.name)
    .bind(group.admin)
    .bind(&group.avatar)
    .fetch_one(&mut *tx)
    .await?;

    for user_id in &group.users {
        sqlx::query(
            "INSERT INTO chat_members (chat_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(row.id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    let mut users: Vec<Uuid> = Vec::with_capacity(group.users.len());
    for id in group.users {
        if !users.contains(&id) {
            users.push(id);
        }
    }
    Ok(row.into_chat(users))
}

pub async fn list_chats_for_user(pool: &PgPool, user_id: Uuid) -> AppResult<Vec<Chat>> {
    let rows = sqlx::query_as::<_, ChatRow>(
        r#"
        SELECT c.* FROM chats c
        JOIN chat_members m ON m.chat_id = c.id
        WHERE m.user_id = $1
        ORDER BY c.updated_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let mut members = load_members(pool, &ids).await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let users = members.remove(&row.id).unwrap_or_default();
            row.into_chat(users)
        })
        .collect())
}

pub async fn rename_chat(pool: &PgPool, chat_id: Uuid, name: &str) -> AppResult<Option<Chat>> {
    let row = sqlx::query_as::<_, ChatRow>(
        "UPDATE chats SET group_name = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(chat_id)
    .bind(name)
    .fetch_optional(pool)
    .await?;
    with_members(pool, row).await
}

pub async fn add_chat_member(pool: &PgPool, chat_id: Uuid, user_id: Uuid) -> AppResult<Option<Chat>> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, ChatRow>(
        "UPDATE chats SET updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(chat_id)
    .fetch_optional(&mut *tx)
    .await?;
    if row.is_none() {
        return Ok(None);
    }

    sqlx::query("INSERT INTO chat_members (chat_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
        .bind(chat_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    with_members(pool, row).await
}

pub async fn remove_chat_member(pool: &PgPool, chat_id: Uuid, user_id: Uuid) -> AppResult<Option<Chat>> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, ChatRow>(
        "UPDATE chats SET updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(chat_id)
    .fetch_optional(&mut *tx)
    .await?;
    if row.is_none() {
        return Ok(None);
    }

    sqlx::query("DELETE FROM chat_members WHERE chat_id = $1 AND user_id = $2")
        .bind(chat_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    with_members(pool, row).await
}

pub async fn set_latest_message(pool: &PgPool, chat_id: Uuid, message_id: Option<Uuid>) -> AppResult<()> {
    sqlx::query("UPDATE chats SET latest_message_id = $2, updated_at = NOW() WHERE id = $1")
        .bind(chat_id)
        .bind(message_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn replace_latest_message(
    pool: &PgPool,
    chat_id: Uuid,
    expected: Uuid,
    replacement: Option<Uuid>,
) -> AppResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE chats SET latest_message_id = $3, updated_at = NOW()
        WHERE id = $1 AND latest_message_id = $2
        "#,
    )
    .bind(chat_id)
    .bind(expected)
    .bind(replacement)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

// ─── Messages ──────────────────────────────────────────

pub async fn insert_message(pool: &PgPool, new: NewMessage) -> AppResult<Message> {
    let (file_name, file_mime_type, file_size, file_url) = match new.file {
        Some(f) => (Some(f.name), Some(f.mime_type), Some(f.size), Some(f.url)),
        None => (None, None, None, None),
    };
    let (reply_id, reply_content, reply_type, reply_sender) = match new.reply_to {
        Some(r) => (
            Some(r.message_id),
            Some(r.content),
            Some(r.message_type.as_str()),
            Some(r.sender_id),
        ),
        None => (None, None, None, None),
    };

    let row = sqlx::query_as::<_, MessageRow>(
        r#"
        INSERT INTO messages (id, chat_id, sender_id, content, message_type,
                              file_name, file_mime_type, file_size, file_url,
                              reply_message_id, reply_content, reply_type, reply_sender_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(new.chat_id)
    .bind(new.sender_id)
    .bind(&new.content)
    .bind(new.message_type.as_str())
    .bind(file_name)
    .bind(file_mime_type)
    .bind(file_size)
    .bind(file_url)
    .bind(reply_id)
    .bind(reply_content)
    .bind(reply_type)
    .bind(reply_sender)
    .fetch_one(pool)
    .await?;

    row.try_into()
}

pub async fn find_message(pool: &PgPool, message_id: Uuid) -> AppResult<Option<Message>> {
    let row = sqlx::query_as::<_, MessageRow>("SELECT * FROM messages WHERE id = $1")
        .bind(message_id)
        .fetch_optional(pool)
        .await?;
    row.map(Message::try_from).transpose()
}

pub async fn find_messages(pool: &PgPool, message_ids: &[Uuid]) -> AppResult<Vec<Message>> {
    let rows = sqlx::query_as::<_, MessageRow>("SELECT * FROM messages WHERE id = ANY($1)")
        .bind(message_ids)
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(Message::try_from).collect()
}

pub async fn list_chat_messages(pool: &PgPool, chat_id: Uuid) -> AppResult<Vec<Message>> {
    let rows = sqlx::query_as::<_, MessageRow>(
        r#"
        SELECT * FROM messages
        WHERE chat_id = $1 AND NOT is_deleted
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(chat_id)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(Message::try_from).collect()
}

pub async fn mark_read_by(pool: &PgPool, chat_id: Uuid, reader: Uuid) -> AppResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE messages
        SET read_by = array_append(read_by, $2), status = 'read', updated_at = clock_timestamp()
        WHERE chat_id = $1 AND sender_id <> $2 AND NOT ($2 = ANY(read_by))
        "#,
    )
    .bind(chat_id)
    .bind(reader)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn update_status(
    pool: &PgPool,
    chat_id: Uuid,
    reader: Uuid,
    status: MessageStatus,
) -> AppResult<u64> {
    let from: Vec<String> = [MessageStatus::Sent, MessageStatus::Delivered, MessageStatus::Read]
        .into_iter()
        .filter(|s| s.accepts(status))
        .map(|s| s.as_str().to_string())
        .collect();

    let result = sqlx::query(
        r#"
        UPDATE messages
        SET status = $3,
            read_by = CASE
                WHEN $4 AND NOT ($2 = ANY(read_by)) THEN array_append(read_by, $2)
                ELSE read_by
            END,
            updated_at = clock_timestamp()
        WHERE chat_id = $1 AND sender_id <> $2 AND status = ANY($5)
        "#,
    )
    .bind(chat_id)
    .bind(reader)
    .bind(status.as_str())
    .bind(status == MessageStatus::Read)
    .bind(&from)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn soft_delete_message(pool: &PgPool, message_id: Uuid) -> AppResult<Option<Message>> {
    let row = sqlx::query_as::<_, MessageRow>(
        r#"
        UPDATE messages
        SET is_deleted = TRUE,
            updated_at = CASE WHEN is_deleted THEN updated_at ELSE clock_timestamp() END
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(message_id)
    .fetch_optional(pool)
    .await?;
    row.map(Message::try_from).transpose()
}

pub async fn latest_visible_message(pool: &PgPool, chat_id: Uuid) -> AppResult<Option<Message>> {
    let row = sqlx::query_as::<_, MessageRow>(
        r#"
        SELECT * FROM messages
        WHERE chat_id = $1 AND NOT is_deleted
        ORDER BY created_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(chat_id)
    .fetch_optional(pool)
    .await?;
    row.map(Message::try_from).transpose()
}
