//! API handlers for Gatekeeper

pub mod auth;
pub mod health;

pub use health::health_check;

// Re-export AuthenticatedUser from middleware for handler use
pub use crate::middleware::auth::AuthenticatedUser;
