use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::ApiError;
use crate::AppState;

/// Entries are pruned once the map grows past this many clients.
const PRUNE_THRESHOLD: usize = 10_000;

struct Window {
    count: usize,
    reset_at: Instant,
}

/// Fixed-window request counter per client IP.
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    clients: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn per_minute(limit: usize) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Count one request from `ip`; `Err` carries the seconds until the window resets.
    pub async fn check(&self, ip: &str) -> Result<(), u64> {
        let now = Instant::now();
        let mut clients = self.clients.lock().await;

        if clients.len() > PRUNE_THRESHOLD {
            clients.retain(|_, w| w.reset_at > now);
        }

        let window = clients.entry(ip.to_string()).or_insert(Window {
            count: 0,
            reset_at: now + self.window,
        });
        if now >= window.reset_at {
            window.count = 0;
            window.reset_at = now + self.window;
        }

        if window.count >= self.limit {
            let retry = window.reset_at.saturating_duration_since(now).as_secs().max(1);
            return Err(retry);
        }
        window.count += 1;
        Ok(())
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let check_header = |key: &str| {
        headers
            .get(key)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
    };

    if let Some(forwarded) = check_header("x-forwarded-for") {
        let first_ip = forwarded
            .split(',')
            .next()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string);

        if first_ip.is_some() {
            return first_ip;
        }
    }

    check_header("cf-connecting-ip").or_else(|| check_header("x-real-ip"))
}

pub fn client_ip(request: &Request, trust_proxy_headers: bool) -> String {
    let socket_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    let ip = if trust_proxy_headers {
        forwarded_ip(request.headers()).or(socket_ip)
    } else {
        socket_ip
    };
    ip.unwrap_or_else(|| "unknown".to_string())
}

/// Middleware; a no-op when no limiter is configured.
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(limiter) = state.rate_limiter.as_ref() else {
        return next.run(request).await;
    };

    let ip = client_ip(&request, state.settings.trust_proxy_headers);
    match limiter.check(&ip).await {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            warn!("Rate limit exceeded for {ip}");
            ApiError::rate_limited(retry_after).into_response()
        }
    }
}
