use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dashmap::DashMap;
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tempbox_config::RateLimitConfig;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { limit: u32, remaining: u32 },
    Limited { limit: u32, retry_after_secs: u64 },
}

/// Fixed-window request counter keyed by client IP.
#[derive(Clone)]
pub struct FixedWindowLimiter {
    windows: Arc<DashMap<IpAddr, Window>>,
    max: u32,
    window: Duration,
    message: &'static str,
}

impl FixedWindowLimiter {
    pub fn new(max: u32, window: Duration, message: &'static str) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            max: max.max(1),
            window,
            message,
        }
    }

    pub fn check(&self, ip: IpAddr) -> Decision {
        let now = Instant::now();
        let mut entry = self.windows.entry(ip).or_insert(Window {
            count: 0,
            reset_at: now + self.window,
        });
        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + self.window;
        }
        entry.count += 1;

        if entry.count > self.max {
            let remaining = entry.reset_at.saturating_duration_since(now);
            Decision::Limited {
                limit: self.max,
                retry_after_secs: remaining.as_secs_f64().ceil() as u64,
            }
        } else {
            Decision::Allowed {
                limit: self.max,
                remaining: self.max - entry.count,
            }
        }
    }

    /// Drops windows that expired more than one window ago.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        self.windows.retain(|_, window| {
            let keep = now < window.reset_at + self.window;
            if !keep {
                purged += 1;
            }
            keep
        });
        purged
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

#[derive(Clone)]
pub struct RateLimits {
    pub enabled: bool,
    pub create: FixedWindowLimiter,
    pub reads: FixedWindowLimiter,
}

impl RateLimits {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            create: FixedWindowLimiter::new(
                config.create_max,
                Duration::from_secs(config.create_window_secs),
                "Too many inboxes created, wait a few minutes.",
            ),
            reads: FixedWindowLimiter::new(
                config.read_max,
                Duration::from_secs(config.read_window_secs),
                "Too many inbox requests, slow down.",
            ),
        }
    }

    pub fn purge_expired(&self) -> usize {
        self.create.purge_expired() + self.reads.purge_expired()
    }
}

fn client_ip<B>(req: &Request<B>) -> IpAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
        .unwrap_or(IpAddr::from([127, 0, 0, 1]))
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: u64) {
    headers.insert(name, HeaderValue::from(value));
}

pub async fn enforce(
    State(limiter): State<FixedWindowLimiter>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ip = client_ip(&req);
    match limiter.check(ip) {
        Decision::Allowed { limit, remaining } => {
            let mut response = next.run(req).await;
            set_header(response.headers_mut(), "x-ratelimit-limit", limit.into());
            set_header(response.headers_mut(), "x-ratelimit-remaining", remaining.into());
            response
        }
        Decision::Limited {
            limit,
            retry_after_secs,
        } => {
            tracing::warn!(%ip, limit, "rate limit exceeded");
            let body = json!({
                "error": "Rate limit exceeded",
                "message": limiter.message,
                "retryAfter": retry_after_secs,
                "limit": limit,
                "window": format!("{}s", limiter.window.as_secs()),
            });
            let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            let headers = response.headers_mut();
            set_header(headers, "x-ratelimit-limit", limit.into());
            set_header(headers, "x-ratelimit-remaining", 0);
            set_header(headers, "retry-after", retry_after_secs);
            response
        }
    }
}
