//! Request tracing middleware

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use super::{forwarded_ip, peer_ip};

/// Log each request once on completion, level chosen by status class
pub async fn request_tracing(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    // Query strings are left out; they can carry usernames.
    let path = request.uri().path().to_string();
    let client_ip =
        forwarded_ip(request.headers()).or_else(|| peer_ip(&request).map(|ip| ip.to_string()));

    let start = Instant::now();
    let response = next.run(request).await;
    let duration_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();

    if response.status().is_server_error() {
        tracing::error!(%method, %path, ?client_ip, status, duration_ms, "Request failed");
    } else if response.status().is_client_error() {
        tracing::warn!(%method, %path, ?client_ip, status, duration_ms, "Request rejected");
    } else {
        tracing::info!(%method, %path, ?client_ip, status, duration_ms, "Request completed");
    }

    response
}
