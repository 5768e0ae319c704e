//! Per-client sliding-window rate limit for `POST /assess`.
//!
//! Each client gets `per_minute` requests in any 60-second window. The client
//! is the peer address, or the first `X-Forwarded-For` hop (then
//! `X-Real-IP`) when the service runs behind a trusted proxy.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

const WINDOW: Duration = Duration::from_secs(60);

/// Tracked clients above which idle entries are dropped.
const PRUNE_ABOVE: usize = 10_000;

#[derive(Debug)]
pub struct RateLimiter {
    per_minute: usize,
    trust_forwarded: bool,
    history: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(per_minute: u32, trust_forwarded: bool) -> Self {
        Self {
            per_minute: per_minute as usize,
            trust_forwarded,
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request from `client` at `now`.
    ///
    /// Over quota, nothing is recorded and the time until the oldest request
    /// leaves the window is returned.
    pub fn check(&self, client: &str, now: Instant) -> Result<(), Duration> {
        let mut history = self
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if history.len() > PRUNE_ABOVE {
            history.retain(|_, seen| {
                seen.back()
                    .is_some_and(|last| now.duration_since(*last) < WINDOW)
            });
        }

        let seen = history.entry(client.to_string()).or_default();
        while seen
            .front()
            .is_some_and(|first| now.duration_since(*first) >= WINDOW)
        {
            seen.pop_front();
        }

        if seen.len() >= self.per_minute {
            let oldest = seen.front().copied().unwrap_or(now);
            return Err(WINDOW.saturating_sub(now.duration_since(oldest)));
        }
        seen.push_back(now);
        Ok(())
    }

    fn client_of(&self, request: &Request) -> String {
        if self.trust_forwarded {
            if let Some(client) = forwarded_client(request.headers()) {
                return client;
            }
        }
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

fn forwarded_client(headers: &HeaderMap) -> Option<String> {
    first_hop(headers, "x-forwarded-for")
        .or_else(|| first_hop(headers, "x-real-ip"))
        .map(str::to_string)
}

fn first_hop<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub async fn enforce(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let client = limiter.client_of(&request);
    match limiter.check(&client, Instant::now()) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            warn!(client = %client, limit = limiter.per_minute, "rate limit exceeded");
            too_many_requests(limiter.per_minute, retry_after)
        }
    }
}

fn too_many_requests(per_minute: usize, retry_after: Duration) -> Response {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    let body = Json(json!({
        "kind": "rate-limited",
        "detail": format!("rate limit exceeded: at most {} requests per minute", per_minute),
    }));
    let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http;

    #[test]
    fn quota_is_per_client_and_slides() {
        let limiter = RateLimiter::new(2, false);
        let start = Instant::now();

        assert!(limiter.check("10.0.0.1", start).is_ok());
        assert!(limiter.check("10.0.0.1", start + Duration::from_secs(10)).is_ok());
        assert_eq!(
            limiter.check("10.0.0.1", start + Duration::from_secs(20)),
            Err(Duration::from_secs(40))
        );
        assert!(limiter.check("10.0.0.2", start + Duration::from_secs(20)).is_ok());

        // The first request has left the window; the second has not.
        assert!(limiter.check("10.0.0.1", start + Duration::from_secs(60)).is_ok());
        assert!(limiter.check("10.0.0.1", start + Duration::from_secs(61)).is_err());
    }

    #[test]
    fn rejected_requests_do_not_extend_the_window() {
        let limiter = RateLimiter::new(1, false);
        let start = Instant::now();

        assert!(limiter.check("a", start).is_ok());
        for secs in [1, 30, 59] {
            assert!(limiter.check("a", start + Duration::from_secs(secs)).is_err());
        }
        assert!(limiter.check("a", start + Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn forwarded_headers_only_when_trusted() {
        let request = || {
            http::Request::builder()
                .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
                .extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))))
                .body(Body::empty())
                .unwrap()
        };

        assert_eq!(RateLimiter::new(5, true).client_of(&request()), "203.0.113.7");
        assert_eq!(RateLimiter::new(5, false).client_of(&request()), "127.0.0.1");

        let real_ip = http::Request::builder()
            .header("x-real-ip", "198.51.100.4")
            .body(Body::empty())
            .unwrap();
        assert_eq!(RateLimiter::new(5, true).client_of(&real_ip), "198.51.100.4");

        let bare = http::Request::builder().body(Body::empty()).unwrap();
        assert_eq!(RateLimiter::new(5, true).client_of(&bare), "unknown");
    }

    #[test]
    fn retry_after_rounds_up_to_whole_seconds() {
        let response = too_many_requests(30, Duration::from_millis(1_500));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");

        let response = too_many_requests(30, Duration::ZERO);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    }
}
