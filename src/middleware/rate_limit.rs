use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request},
    http::{header::RETRY_AFTER, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;

use crate::errors::AppError;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    hits: u32,
}

/// Per-client fixed-window request budget.
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<DashMap<IpAddr, Window>>,
    budget: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(budget: u32, window_secs: u64) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            budget,
            window: Duration::from_secs(window_secs),
        }
    }

    /// Count one request from `client`. `Err` carries how long until the
    /// client's window resets.
    pub fn hit(&self, client: IpAddr) -> Result<(), Duration> {
        self.hit_at(client, Instant::now())
    }

    fn hit_at(&self, client: IpAddr, now: Instant) -> Result<(), Duration> {
        let mut entry = self.windows.entry(client).or_insert(Window {
            started: now,
            hits: 0,
        });
        let window = entry.value_mut();

        let elapsed = now.saturating_duration_since(window.started);
        if elapsed >= self.window {
            *window = Window {
                started: now,
                hits: 0,
            };
        }

        if window.hits >= self.budget {
            return Err(self.window.saturating_sub(elapsed.min(self.window)));
        }
        window.hits += 1;
        Ok(())
    }

    /// Forget clients idle for two full windows.
    fn evict_idle(windows: &DashMap<IpAddr, Window>, window: Duration) {
        let now = Instant::now();
        windows.retain(|_, w| now.saturating_duration_since(w.started) < window * 2);
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

/// Periodically drop idle client windows. The task ends once every clone of
/// the limiter is gone.
pub fn spawn_rate_limit_cleanup(limiter: RateLimiter) {
    let windows: Weak<DashMap<IpAddr, Window>> = Arc::downgrade(&limiter.windows);
    let window = limiter.window;
    drop(limiter);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(windows) = windows.upgrade() else {
                break;
            };
            RateLimiter::evict_idle(&windows, window);
        }
    });
}

/// Peer address, then the first `X-Forwarded-For` hop, then loopback.
fn client_ip(req: &Request) -> IpAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .or_else(|| {
            req.headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.split(',').next())
                .and_then(|s| s.trim().parse().ok())
        })
        .unwrap_or(IpAddr::from([127, 0, 0, 1]))
}

/// Rejects over-budget clients with 429 and a `Retry-After` header.
pub async fn rate_limit_middleware(limiter: RateLimiter, req: Request, next: Next) -> Response {
    let client = client_ip(&req);

    if let Err(retry_in) = limiter.hit(client) {
        tracing::debug!(%client, retry_in_secs = retry_in.as_secs(), "Rate limit exceeded");
        let mut response = AppError::RateLimited.into_response();
        let secs = retry_in.as_secs().max(1);
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(secs));
        return response;
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    const CLIENT: IpAddr = IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 1));

    #[test]
    fn budget_is_spent_then_reports_time_to_reset() {
        let limiter = RateLimiter::new(2, 60);
        let start = Instant::now();

        assert!(limiter.hit_at(CLIENT, start).is_ok());
        assert!(limiter.hit_at(CLIENT, start).is_ok());
        let wait = limiter
            .hit_at(CLIENT, start + Duration::from_secs(15))
            .unwrap_err();
        assert_eq!(wait, Duration::from_secs(45));
    }

    #[test]
    fn window_resets_after_it_elapses() {
        let limiter = RateLimiter::new(1, 60);
        let start = Instant::now();

        assert!(limiter.hit_at(CLIENT, start).is_ok());
        assert!(limiter.hit_at(CLIENT, start).is_err());
        assert!(limiter.hit_at(CLIENT, start + Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn budgets_are_per_client() {
        let limiter = RateLimiter::new(1, 60);

        assert!(limiter.hit(CLIENT).is_ok());
        assert!(limiter.hit(IpAddr::from([10, 0, 0, 2])).is_ok());
        assert!(limiter.hit(CLIENT).is_err());
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn idle_clients_are_evicted() {
        let limiter = RateLimiter::new(5, 0);
        limiter.hit(CLIENT).unwrap();

        RateLimiter::evict_idle(&limiter.windows, limiter.window);
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn client_ip_prefers_forwarded_header_without_peer_info() {
        let req = axum::http::Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req), IpAddr::from([203, 0, 113, 7]));

        let bare = axum::http::Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_ip(&bare), IpAddr::from([127, 0, 0, 1]));
    }
}
