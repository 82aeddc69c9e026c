//! Data models for the gatekeeper service

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod auth;
pub use auth::*;

/// Registered identity
///
/// The password hash never leaves the server; API responses use
/// [`UserInfoResponse`].
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub roles: Vec<Role>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserInfoResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            roles: user.roles.iter().map(|r| r.authority().to_string()).collect(),
        }
    }
}

/// Database row for a user joined with its role names
#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        let mut roles: Vec<Role> = row
            .roles
            .iter()
            .filter_map(|name| Role::from_db(name))
            .collect();
        roles.sort();
        roles.dedup();

        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            roles,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Identity to be inserted at signup
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub roles: Vec<Role>,
}

/// User roles
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

impl Role {
    /// Column value in `user_roles.role`
    pub fn as_db(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "moderator" => Some(Role::Moderator),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Authority name reported to clients
    pub fn authority(&self) -> &'static str {
        match self {
            Role::User => "ROLE_USER",
            Role::Moderator => "ROLE_MODERATOR",
            Role::Admin => "ROLE_ADMIN",
        }
    }

    /// Map a signup role request; unknown names fall back to `User`
    pub fn from_signup(s: &str) -> Self {
        match s {
            "admin" => Role::Admin,
            "mod" => Role::Moderator,
            _ => Role::User,
        }
    }
}

/// Server-side refresh token record
///
/// Only the SHA-256 of the opaque token is kept; the raw value lives in the
/// client's refresh cookie.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq, Eq)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signup_role_mapping() {
        assert_eq!(Role::from_signup("admin"), Role::Admin);
        assert_eq!(Role::from_signup("mod"), Role::Moderator);
        assert_eq!(Role::from_signup("user"), Role::User);
        assert_eq!(Role::from_signup("superuser"), Role::User);
    }

    #[test]
    fn test_user_row_conversion_dedups_roles() {
        let now = Utc::now();
        let row = UserRow {
            id: Uuid::new_v4(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: "hash".to_string(),
            roles: vec!["admin".to_string(), "user".to_string(), "admin".to_string()],
            created_at: now,
            updated_at: now,
        };

        let user = User::from(row);
        assert_eq!(user.roles, vec![Role::User, Role::Admin]);

        let info = UserInfoResponse::from(user);
        assert_eq!(info.roles, vec!["ROLE_USER", "ROLE_ADMIN"]);
    }
}
