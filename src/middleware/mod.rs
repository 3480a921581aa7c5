pub mod auth;
pub mod extract;
pub mod rate_limit;

pub use auth::AuthUser;
pub use extract::{ApiJson, ApiPath};
pub use rate_limit::{rate_limit_middleware, spawn_rate_limit_cleanup, RateLimiter};
