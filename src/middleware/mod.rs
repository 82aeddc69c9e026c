//! Middleware for the Gatekeeper API
//!
//! This module provides middleware for request tracing, rate limiting,
//! security headers, and access-token authentication.

pub mod auth;
mod rate_limiter;
mod security;
mod tracing;

use axum::{
    extract::{ConnectInfo, Request},
    http::HeaderMap,
};
use std::net::{IpAddr, SocketAddr};

pub use auth::AuthenticatedUser;
pub use rate_limiter::{rate_limit, RateLimiter};
pub use security::{security_headers, SecurityHeaders};
pub use tracing::request_tracing;

/// Client address claimed by proxy headers; only meaningful behind a proxy
/// that overwrites them
pub(crate) fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// TCP peer address, present when served with connect info
pub(crate) fn peer_ip(request: &Request) -> Option<IpAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}
