//! Route definitions for the Gatekeeper API

mod auth;

use axum::{
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;

use crate::handlers;
use crate::middleware::{request_tracing, security_headers, RateLimiter, SecurityHeaders};
use crate::state::AppState;

pub use auth::auth_routes;

/// Router-wide settings taken from [`crate::config::Config`]
#[derive(Debug, Clone, Default)]
pub struct RouterOptions {
    /// Comma-separated origin list; `None` means permissive CORS
    pub cors_allowed_origins: Option<String>,
    pub security: SecurityHeaders,
}

/// Assemble the full application router
pub fn app_router(state: AppState, limiter: RateLimiter, options: RouterOptions) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(handlers::health_check))
        .merge(auth_routes(limiter))
        .with_state(state)
        .layer(from_fn_with_state(options.security, security_headers))
        .layer(from_fn(request_tracing))
        .layer(configure_cors(options.cors_allowed_origins.as_deref()))
}

async fn root() -> &'static str {
    "Gatekeeper Auth API"
}

/// Credentialed CORS for the configured origins, permissive otherwise
fn configure_cors(allowed_origins: Option<&str>) -> CorsLayer {
    let Some(allowed_origins) = allowed_origins else {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    };

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    // Cookies need credentials, which rules out wildcard headers.
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
