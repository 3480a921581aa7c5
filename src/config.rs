use std::env;
use std::str::FromStr;

use anyhow::Context;

#[derive(Clone, Debug)]
pub struct AppConfig {
    // Server
    pub host: String,
    pub port: u16,

    // Database (empty → in-memory store, single-instance mode)
    pub database_url: String,
    pub db_max_connections: u32,

    // JWT (tokens are issued by the auth service, we only validate)
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,

    // HTTP
    pub cors_origins: String,
    pub max_requests_per_minute: u32,
    pub max_body_bytes: usize,

    // Realtime
    pub max_ws_connections_per_user: u32,
    pub ws_verify_membership: bool,
    pub fanout_on_send: bool,

    // Chats
    pub group_avatar_base_url: String,
    pub rename_requires_admin: bool,
}

impl AppConfig {
    /// Config with test-appropriate defaults (no env vars needed).
    pub fn test_default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            database_url: String::new(),
            db_max_connections: 5,
            jwt_secret: "test-jwt-secret-that-is-long-enough-for-hmac".into(),
            jwt_expiry_hours: 24,
            cors_origins: "*".into(),
            max_requests_per_minute: 10_000,
            max_body_bytes: 10 * 1024,
            max_ws_connections_per_user: 10,
            ws_verify_membership: true,
            fanout_on_send: true,
            group_avatar_base_url: "https://api.dicebear.com/7.x/avataaars/svg".into(),
            rename_requires_admin: true,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            host: env::var("CHAT_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: parse_var("CHAT_PORT", 5001)?,

            database_url: env::var("DATABASE_URL").unwrap_or_default(),
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 20)?,

            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            jwt_expiry_hours: parse_var("JWT_EXPIRY_HOURS", 24)?,

            cors_origins: env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".into()),
            max_requests_per_minute: parse_var("MAX_REQUESTS_PER_MINUTE", 120)?,
            max_body_bytes: parse_var("MAX_BODY_BYTES", 10 * 1024)?,

            max_ws_connections_per_user: parse_var("MAX_WS_CONNECTIONS_PER_USER", 5)?,
            ws_verify_membership: parse_var("WS_VERIFY_MEMBERSHIP", true)?,
            fanout_on_send: parse_var("FANOUT_ON_SEND", true)?,

            group_avatar_base_url: env::var("GROUP_AVATAR_BASE_URL")
                .unwrap_or_else(|_| "https://api.dicebear.com/7.x/avataaars/svg".into()),
            rename_requires_admin: parse_var("RENAME_REQUIRES_ADMIN", true)?,
        })
    }

    pub fn uses_database(&self) -> bool {
        !self.database_url.trim().is_empty()
    }
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{name} is invalid: {e}")),
        _ => Ok(default),
    }
}
