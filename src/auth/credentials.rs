//! Identity storage and password verification
//!
//! The auth core only needs to look identities up and check a password;
//! both sit behind traits so the Postgres tables can be swapped for the
//! in-memory store in tests and local runs.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::store::StoreError;
use crate::models::{NewUser, User, UserRow};

/// Unique constraint names shared by both store implementations
pub const USERNAME_CONSTRAINT: &str = "users_username_key";
pub const EMAIL_CONSTRAINT: &str = "users_email_key";

const USER_SELECT: &str = r#"
    SELECT u.id, u.username, u.email, u.password_hash, u.created_at, u.updated_at,
           COALESCE(array_agg(ur.role) FILTER (WHERE ur.role IS NOT NULL), '{}') AS roles
    FROM users u
    LEFT JOIN user_roles ur ON ur.user_id = u.id
"#;

/// Storage contract for identities
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn exists_by_username(&self, username: &str) -> Result<bool, StoreError>;

    async fn exists_by_email(&self, email: &str) -> Result<bool, StoreError>;

    /// Insert a new identity; unique violations come back as `StoreError::Duplicate`
    async fn insert(&self, user: NewUser) -> Result<User, StoreError>;
}

/// Postgres-backed identity store
#[derive(Clone)]
pub struct PgUserStore {
    db_pool: PgPool,
}

impl PgUserStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("{USER_SELECT} WHERE u.username = $1 GROUP BY u.id"))
                .bind(username)
                .fetch_optional(&self.db_pool)
                .await?;

        Ok(row.map(User::from))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("{USER_SELECT} WHERE u.id = $1 GROUP BY u.id"))
                .bind(id)
                .fetch_optional(&self.db_pool)
                .await?;

        Ok(row.map(User::from))
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE username = $1)")
                .bind(username)
                .fetch_one(&self.db_pool)
                .await?;

        Ok(exists)
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
            .bind(email)
            .fetch_one(&self.db_pool)
            .await?;

        Ok(exists)
    }

    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let role_names: Vec<String> = user.roles.iter().map(|r| r.as_db().to_string()).collect();

        let mut tx = self.db_pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role)
            SELECT $1, role FROM UNNEST($2::text[]) AS role
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(id)
        .bind(&role_names)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut roles = user.roles;
        roles.sort();
        roles.dedup();

        Ok(User {
            id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            roles,
            created_at: now,
            updated_at: now,
        })
    }
}

/// In-process identity store
#[derive(Clone, Default)]
pub struct InMemoryUserStore {
    users: Arc<RwLock<HashMap<Uuid, User>>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.username == username).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool, StoreError> {
        let users = self.users.read().await;
        Ok(users.values().any(|u| u.username == username))
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, StoreError> {
        let users = self.users.read().await;
        Ok(users.values().any(|u| u.email == email))
    }

    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.username == user.username) {
            return Err(StoreError::Duplicate(USERNAME_CONSTRAINT.to_string()));
        }
        if users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Duplicate(EMAIL_CONSTRAINT.to_string()));
        }

        let now = Utc::now();
        let mut roles = user.roles;
        roles.sort();
        roles.dedup();

        let stored = User {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            roles,
            created_at: now,
            updated_at: now,
        };
        users.insert(stored.id, stored.clone());
        Ok(stored)
    }
}

/// Password check failures
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Bad credentials")]
    InvalidCredentials,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Password hashing failed: {0}")]
    Hashing(String),
}

/// Checks a username/password pair and resolves the identity
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, username: &str, password: &str) -> Result<User, CredentialError>;
}

/// bcrypt verification against a [`UserStore`]
#[derive(Clone)]
pub struct BcryptVerifier {
    users: Arc<dyn UserStore>,
}

impl BcryptVerifier {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl CredentialVerifier for BcryptVerifier {
    async fn verify(&self, username: &str, password: &str) -> Result<User, CredentialError> {
        let user = self
            .users
            .find_by_username(username)
            .await?
            .ok_or(CredentialError::InvalidCredentials)?;

        let hash = user.password_hash.clone();
        let password = password.to_string();
        let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| CredentialError::Hashing(e.to_string()))?
            // A corrupt stored hash is treated like a wrong password.
            .unwrap_or(false);

        if !matches {
            return Err(CredentialError::InvalidCredentials);
        }
        Ok(user)
    }
}

/// Hash `password` with bcrypt off the async executor
pub async fn hash_password(password: &str, cost: u32) -> Result<String, CredentialError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| CredentialError::Hashing(e.to_string()))?
        .map_err(|e| CredentialError::Hashing(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    async fn store_with_alice() -> InMemoryUserStore {
        let store = InMemoryUserStore::new();
        store
            .insert(NewUser {
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
                password_hash: hash_password("correct-pw", 4).await.unwrap(),
                roles: vec![Role::User],
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_verify_accepts_correct_password() {
        let verifier = BcryptVerifier::new(Arc::new(store_with_alice().await));

        let user = verifier.verify("alice", "correct-pw").await.unwrap();
        assert_eq!(user.username, "alice");
    }

    #[tokio::test]
    async fn test_verify_rejects_wrong_password_and_unknown_user() {
        let verifier = BcryptVerifier::new(Arc::new(store_with_alice().await));

        assert!(matches!(
            verifier.verify("alice", "wrong").await,
            Err(CredentialError::InvalidCredentials)
        ));
        assert!(matches!(
            verifier.verify("mallory", "correct-pw").await,
            Err(CredentialError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_in_memory_insert_reports_duplicates() {
        let store = store_with_alice().await;

        let dup_name = store
            .insert(NewUser {
                username: "alice".to_string(),
                email: "other@example.com".to_string(),
                password_hash: String::new(),
                roles: vec![],
            })
            .await;
        assert!(matches!(dup_name, Err(StoreError::Duplicate(c)) if c == USERNAME_CONSTRAINT));

        let dup_email = store
            .insert(NewUser {
                username: "alice2".to_string(),
                email: "alice@example.com".to_string(),
                password_hash: String::new(),
                roles: vec![],
            })
            .await;
        assert!(matches!(dup_email, Err(StoreError::Duplicate(c)) if c == EMAIL_CONSTRAINT));
        assert_eq!(store.len().await, 1);
    }
}
