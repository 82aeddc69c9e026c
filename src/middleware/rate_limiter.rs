//! Per-client rate limiting for the auth routes
//!
//! Signin and OTP verification are the brute-force surface; each client
//! address gets a token bucket refilled at the configured rate with a
//! burst of twice that. The address is the TCP peer unless proxy headers
//! are explicitly trusted.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, sync::Arc, time::Duration, time::Instant};
use tokio::sync::RwLock;

use super::{forwarded_ip, peer_ip};
use crate::error::ApiError;

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    fn try_take(&mut self, now: Instant, refill_per_second: f64, capacity: f64) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_per_second).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Token-bucket limiter keyed by client address
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<RwLock<HashMap<String, TokenBucket>>>,
    refill_per_second: f64,
    capacity: f64,
    trust_proxy_headers: bool,
}

impl RateLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        let rps = f64::from(requests_per_second.max(1));
        Self {
            buckets: Arc::new(RwLock::new(HashMap::new())),
            refill_per_second: rps,
            capacity: rps * 2.0,
            trust_proxy_headers: false,
        }
    }

    /// Key on `X-Forwarded-For` / `X-Real-IP` instead of the TCP peer.
    /// Only safe behind a proxy that overwrites those headers.
    pub fn trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    fn client_key(&self, request: &Request) -> Option<String> {
        if self.trust_proxy_headers {
            if let Some(ip) = forwarded_ip(request.headers()) {
                return Some(ip);
            }
        }
        peer_ip(request).map(|ip| ip.to_string())
    }

    /// Take one token for `key`; false when the bucket is empty
    pub async fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.write().await;
        buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::full(self.capacity, now))
            .try_take(now, self.refill_per_second, self.capacity)
    }

    /// Drop buckets idle for longer than `max_idle`
    pub async fn cleanup(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        buckets.retain(|_, b| now.saturating_duration_since(b.last_update) < max_idle);
        before - buckets.len()
    }

    /// Periodically run [`RateLimiter::cleanup`]; never returns
    pub async fn run_cleanup_loop(self, every: Duration) {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let removed = self.cleanup(every).await;
            if removed > 0 {
                tracing::debug!(removed, "Pruned idle rate limit buckets");
            }
        }
    }
}

/// Route layer: `axum::middleware::from_fn_with_state(limiter, rate_limit)`
pub async fn rate_limit(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let client = limiter.client_key(&request).unwrap_or_else(|| {
        tracing::debug!("No client address on request; using shared rate limit bucket");
        "unknown".to_string()
    });

    if !limiter.check(&client).await {
        tracing::warn!(client = %client, path = %request.uri().path(), "Rate limit exceeded");
        let mut response = ApiError::TooManyRequests.into_response();
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, header::HeaderValue::from_static("1"));
        return response;
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body, extract::ConnectInfo, http::StatusCode, middleware::from_fn_with_state,
        routing::get, Router,
    };
    use std::net::SocketAddr;
    use tower::ServiceExt;

    fn limited_router(limiter: RateLimiter) -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .route_layer(from_fn_with_state(limiter, rate_limit))
    }

    fn request_from(peer: [u8; 4], forwarded_for: Option<&str>) -> Request {
        let mut builder = axum::http::Request::get("/");
        if let Some(value) = forwarded_for {
            builder = builder.header("x-forwarded-for", value);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((peer, 40000))));
        request
    }

    async fn status(router: &Router, request: Request) -> StatusCode {
        router.clone().oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_peers_without_headers_get_separate_buckets() {
        let router = limited_router(RateLimiter::new(1));

        for _ in 0..2 {
            assert_eq!(status(&router, request_from([203, 0, 113, 7], None)).await, StatusCode::OK);
        }
        assert_eq!(
            status(&router, request_from([203, 0, 113, 7], None)).await,
            StatusCode::TOO_MANY_REQUESTS
        );

        assert_eq!(status(&router, request_from([198, 51, 100, 1], None)).await, StatusCode::OK);
        assert_eq!(status(&router, request_from([198, 51, 100, 2], None)).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_forwarded_headers_ignored_by_default() {
        let router = limited_router(RateLimiter::new(1));

        let mut statuses = Vec::new();
        for i in 0..3u8 {
            let spoofed = format!("10.1.1.{}", i);
            statuses.push(status(&router, request_from([203, 0, 113, 7], Some(&spoofed))).await);
        }

        assert_eq!(
            statuses,
            [StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
        );
    }

    #[tokio::test]
    async fn test_trusted_proxy_keys_on_forwarded_client() {
        let router = limited_router(RateLimiter::new(1).trust_proxy_headers(true));
        let proxy = [10, 0, 0, 1];

        for _ in 0..2 {
            assert_eq!(
                status(&router, request_from(proxy, Some("203.0.113.7"))).await,
                StatusCode::OK
            );
        }
        assert_eq!(
            status(&router, request_from(proxy, Some("203.0.113.7"))).await,
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status(&router, request_from(proxy, Some("198.51.100.1"))).await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn test_burst_then_reject() {
        let limiter = RateLimiter::new(5);

        for _ in 0..10 {
            assert!(limiter.check("203.0.113.7").await);
        }
        assert!(!limiter.check("203.0.113.7").await);
        assert!(limiter.check("198.51.100.1").await);
    }

    #[test]
    fn test_bucket_refills_over_time() {
        let start = Instant::now();
        let mut bucket = TokenBucket::full(2.0, start);

        assert!(bucket.try_take(start, 1.0, 2.0));
        assert!(bucket.try_take(start, 1.0, 2.0));
        assert!(!bucket.try_take(start, 1.0, 2.0));
        assert!(bucket.try_take(start + Duration::from_secs(1), 1.0, 2.0));
    }

    #[tokio::test]
    async fn test_cleanup_drops_idle_buckets() {
        let limiter = RateLimiter::new(1);
        limiter.check("a").await;

        assert_eq!(limiter.cleanup(Duration::from_secs(60)).await, 0);
        assert_eq!(limiter.cleanup(Duration::ZERO).await, 1);
    }
}
