// Library re-exports for integration tests.
// The binary (main.rs) bootstraps through these modules as well.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod gateway;
pub mod memory_store;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;
pub mod ws;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware as axum_mw,
    routing::{get, post, put},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    set_header::SetResponseHeaderLayer,
    trace::{DefaultOnResponse, TraceLayer},
};

use config::AppConfig;
use gateway::RealtimeGateway;
use middleware::{rate_limit_middleware, RateLimiter};
use services::{ChatService, MessageService};
use store::ChatStore;

// ─── Application State ─────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ChatStore>,
    pub config: AppConfig,
    pub chats: ChatService,
    pub messages: MessageService,
    pub gateway: RealtimeGateway,
}

impl AppState {
    pub fn new(store: Arc<dyn ChatStore>, config: AppConfig) -> Self {
        Self {
            chats: ChatService::new(store.clone(), &config),
            messages: MessageService::new(store.clone()),
            gateway: RealtimeGateway::new(),
            store,
            config,
        }
    }
}

// ─── Router ────────────────────────────────────────────

pub fn build_router(state: AppState) -> Router {
    // ─── CORS ──────────────────────────────────────────
    let allow_origin = if state.config.cors_origins == "*" {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .cors_origins
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        AllowOrigin::list(origins)
    };
    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    // ─── Rate Limiting ─────────────────────────────────
    let global_limiter = RateLimiter::new(state.config.max_requests_per_minute, 60);
    middleware::spawn_rate_limit_cleanup(global_limiter.clone());

    let chat_routes = Router::new()
        .route("/", post(api::chats::access_chat).get(api::chats::fetch_chats))
        .route("/group", post(api::chats::create_group_chat))
        .route("/group/:chat_id", put(api::chats::rename_group))
        .route("/group/:chat_id/add", put(api::chats::add_to_group))
        .route("/group/:chat_id/remove", put(api::chats::remove_from_group));

    let message_routes = Router::new()
        .route("/", post(api::messages::send_message))
        .route("/forward", post(api::messages::forward_message))
        .route("/status/:chat_id", put(api::messages::update_message_status))
        // GET takes a chat id, DELETE a message id
        .route(
            "/:id",
            get(api::messages::all_messages).delete(api::messages::delete_message),
        );

    let api = Router::new()
        .nest("/chats", chat_routes)
        .nest("/messages", message_routes);

    Router::new()
        .route("/api/ws", get(ws::ws_handler))
        .nest("/api", api)
        .route("/health", get(health_check))
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(CompressionLayer::new())
        // TraceLayer: custom span excludes remote_addr (IP privacy)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::extract::Request| {
                    tracing::info_span!(
                        "http_request",
                        method = %req.method(),
                        uri = %req.uri(),
                        version = ?req.version(),
                    )
                })
                .on_response(DefaultOnResponse::new().level(tracing::Level::DEBUG)),
        )
        .layer(axum_mw::from_fn(move |req, next| {
            let limiter = global_limiter.clone();
            rate_limit_middleware(limiter, req, next)
        }))
        .layer(cors)
        // ─── Security Headers ──────────────────────────
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}
