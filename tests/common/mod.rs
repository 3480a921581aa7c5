#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use chat_backend::{
    auth::generate_access_token, build_router, config::AppConfig, memory_store::MemoryStore,
    models::UserSummary, AppState,
};

/// A seeded user: id plus a bearer token for it.
#[derive(Debug, Clone)]
pub struct TestUser {
    pub id: Uuid,
    pub token: String,
}

/// Test helper that wraps a fully-built router over the in-memory store.
///
/// Each test builds its own TestApp, so no data leaks between tests.
pub struct TestApp {
    pub state: AppState,
    pub memory: MemoryStore,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(AppConfig::test_default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let memory = MemoryStore::new();
        let state = AppState::new(Arc::new(memory.clone()), config);
        TestApp { state, memory }
    }

    /// Get a fresh clone of the router for a `oneshot` request.
    fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Get a router suitable for `axum::serve` (WS integration tests).
    pub fn router_clone(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Register a user record (as the profile service would) and mint a token.
    pub fn user(&self, username: &str) -> TestUser {
        let id = Uuid::new_v4();
        self.memory.insert_user(UserSummary {
            id,
            username: username.into(),
            name: username.to_uppercase(),
            avatar: None,
            is_online: false,
            last_seen: None,
        });
        let token = generate_access_token(id, &self.state.config).unwrap();
        TestUser { id, token }
    }

    // ── Request helpers ──────────────────────────────────

    /// Send a request through the router and return (status, body as Value).
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let body_bytes = body
            .map(|v| serde_json::to_vec(&v).unwrap())
            .unwrap_or_default();

        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(t) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", t));
        }

        if !body_bytes.is_empty() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }

        let req = builder.body(Body::from(body_bytes)).unwrap();

        let response = self.router().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();

        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::String(
                String::from_utf8_lossy(&bytes).to_string(),
            ))
        };

        (status, value)
    }

    /// Typed response helper: deserializes into T.
    pub async fn request_typed<T: DeserializeOwned>(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, T) {
        let (status, value) = self.request(method, uri, token, body).await;
        let typed: T = serde_json::from_value(value).expect("Failed to deserialize response body");
        (status, typed)
    }

    // ── High-level helpers ───────────────────────────────

    /// Open the direct chat between `from` and `to`. Returns the chat id.
    pub async fn direct_chat(&self, from: &TestUser, to: &TestUser) -> Uuid {
        let (status, value) = self
            .request(
                Method::POST,
                "/api/chats",
                Some(&from.token),
                Some(json!({ "userId": to.id })),
            )
            .await;
        assert!(status.is_success(), "Access chat failed: {}", value);
        value_id(&value)
    }

    /// Create a group owned by `admin`. Returns the chat id.
    pub async fn group_chat(&self, admin: &TestUser, name: &str, members: &[&TestUser]) -> Uuid {
        let ids: Vec<Uuid> = members.iter().map(|u| u.id).collect();
        let (status, value) = self
            .request(
                Method::POST,
                "/api/chats/group",
                Some(&admin.token),
                Some(json!({ "name": name, "users": ids })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "Create group failed: {}", value);
        value_id(&value)
    }

    /// Send a text message. Returns the message id.
    pub async fn send_text(&self, sender: &TestUser, chat_id: Uuid, content: &str) -> Uuid {
        let (status, value) = self
            .request(
                Method::POST,
                "/api/messages",
                Some(&sender.token),
                Some(json!({ "chatId": chat_id, "content": content })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "Send failed: {}", value);
        value_id(&value)
    }
}

pub fn value_id(value: &Value) -> Uuid {
    Uuid::parse_str(value["id"].as_str().expect("response has no id")).unwrap()
}
