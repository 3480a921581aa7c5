//! PostgreSQL store tests. These need a live database:
//!
//! DATABASE_URL=postgres://... cargo test --test pg_store_tests -- --ignored

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use chat_backend::{
    db::PgStore,
    models::{MessageStatus, MessageType, NewGroupChat, NewMessage},
    store::ChatStore,
};

async fn seed_user(pool: &PgPool, username: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (id, username, name) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(username)
        .bind(username.to_uppercase())
        .execute(pool)
        .await
        .unwrap();
    id
}

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

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn direct_chat_is_unique_per_pair(pool: PgPool) {
    let alice = seed_user(&pool, "alice").await;
    let bob = seed_user(&pool, "bob").await;
    let store = Arc::new(PgStore::new(pool));

    let (first, created) = store.find_or_create_direct_chat(alice, bob).await.unwrap();
    assert!(created);
    let (second, created) = store.find_or_create_direct_chat(bob, alice).await.unwrap();
    assert!(!created);
    assert_eq!(first.id, second.id);
    assert_eq!(first.users, vec![alice, bob]);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn concurrent_first_contact_yields_one_chat(pool: PgPool) {
    let alice = seed_user(&pool, "alice").await;
    let bob = seed_user(&pool, "bob").await;
    let store = Arc::new(PgStore::new(pool.clone()));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                if i % 2 == 0 {
                    store.find_or_create_direct_chat(alice, bob).await
                } else {
                    store.find_or_create_direct_chat(bob, alice).await
                }
            })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().0.id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chats")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn group_membership_is_a_set(pool: PgPool) {
    let admin = seed_user(&pool, "admin").await;
    let a = seed_user(&pool, "a").await;
    let b = seed_user(&pool, "b").await;
    let store = PgStore::new(pool);

    let group = store
        .create_group_chat(NewGroupChat {
            name: "crew".into(),
            users: vec![a, b, admin],
            admin,
            avatar: "https://avatars.test/x".into(),
        })
        .await
        .unwrap();
    assert_eq!(group.users, vec![a, b, admin]);

    let after_add = store.add_chat_member(group.id, a).await.unwrap().unwrap();
    assert_eq!(after_add.users.len(), 3);

    let after_remove = store.remove_chat_member(group.id, b).await.unwrap().unwrap();
    assert_eq!(after_remove.users, vec![a, admin]);
    assert!(store.find_member_chat(group.id, b).await.unwrap().is_none());

    let renamed = store.rename_chat(group.id, "crew 2").await.unwrap().unwrap();
    assert_eq!(renamed.group_name.as_deref(), Some("crew 2"));
    assert!(store.rename_chat(Uuid::new_v4(), "x").await.unwrap().is_none());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn read_receipts_are_idempotent(pool: PgPool) {
    let alice = seed_user(&pool, "alice").await;
    let bob = seed_user(&pool, "bob").await;
    let store = PgStore::new(pool);
    let (chat, _) = store.find_or_create_direct_chat(alice, bob).await.unwrap();

    let mine = store.insert_message(text(chat.id, alice, "hi")).await.unwrap();
    store.insert_message(text(chat.id, bob, "hey")).await.unwrap();

    assert_eq!(store.mark_read_by(chat.id, bob).await.unwrap(), 1);
    assert_eq!(store.mark_read_by(chat.id, bob).await.unwrap(), 0);

    let read = store.find_message(mine.id).await.unwrap().unwrap();
    assert_eq!(read.read_by, vec![bob]);
    assert_eq!(read.status, MessageStatus::Read);

    // Read never moves back to delivered
    assert_eq!(
        store
            .update_status(chat.id, bob, MessageStatus::Delivered)
            .await
            .unwrap(),
        0
    );
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn latest_pointer_compare_and_set(pool: PgPool) {
    let alice = seed_user(&pool, "alice").await;
    let bob = seed_user(&pool, "bob").await;
    let store = PgStore::new(pool);
    let (chat, _) = store.find_or_create_direct_chat(alice, bob).await.unwrap();

    let first = store.insert_message(text(chat.id, alice, "one")).await.unwrap();
    let second = store.insert_message(text(chat.id, alice, "two")).await.unwrap();
    store.set_latest_message(chat.id, Some(second.id)).await.unwrap();

    assert!(!store
        .replace_latest_message(chat.id, first.id, None)
        .await
        .unwrap());

    store.soft_delete_message(second.id).await.unwrap();
    let visible = store.latest_visible_message(chat.id).await.unwrap().unwrap();
    assert_eq!(visible.id, first.id);

    assert!(store
        .replace_latest_message(chat.id, second.id, Some(first.id))
        .await
        .unwrap());
    let chat = store.find_chat(chat.id).await.unwrap().unwrap();
    assert_eq!(chat.latest_message_id, Some(first.id));

    let listed = store.list_chat_messages(chat.id).await.unwrap();
    assert_eq!(listed.len(), 1);

    let batch = store
        .find_messages(&[first.id, second.id, Uuid::new_v4()])
        .await
        .unwrap();
    assert_eq!(batch.len(), 2);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn presence_going_offline_stamps_last_seen(pool: PgPool) {
    let alice = seed_user(&pool, "alice").await;
    let store = PgStore::new(pool);

    store.set_user_presence(alice, true).await.unwrap();
    assert!(store.find_users(&[alice]).await.unwrap()[0].is_online);

    store.set_user_presence(alice, false).await.unwrap();
    let user = &store.find_users(&[alice]).await.unwrap()[0];
    assert!(!user.is_online);
    assert!(user.last_seen.is_some());
}
