//! Liveness and database health

use axum::{extract::State, Json};
use serde::Serialize;

use crate::db;
use crate::state::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: String,
    pub version: &'static str,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let (status, database) = match &state.db_pool {
        None => ("healthy", "in-memory".to_string()),
        Some(pool) => match db::check_health(pool).await {
            Ok(()) => ("healthy", "connected".to_string()),
            Err(e) => {
                tracing::warn!(error = %e, "Health check failed");
                ("unhealthy", "unreachable".to_string())
            }
        },
    };

    Json(HealthResponse {
        status,
        database,
        version: env!("CARGO_PKG_VERSION"),
    })
}
