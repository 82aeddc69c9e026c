//! Refresh token persistence
//!
//! Each identity owns at most one live refresh token. The store enforces
//! that itself: issuing a token for a user is a single replace keyed by
//! user id (`ON CONFLICT (user_id) DO UPDATE` in Postgres, one lock in
//! memory), never a delete followed by an insert.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Duration;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::clock::Clock;
use super::store::StoreError;
use crate::models::RefreshToken;

/// Storage contract for refresh token records
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Insert `record`, atomically replacing any token held by `record.user_id`
    async fn upsert_for_user(&self, record: RefreshToken) -> Result<RefreshToken, StoreError>;

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>, StoreError>;

    /// Returns the number of rows removed; zero is not an error
    async fn delete_by_user(&self, user_id: Uuid) -> Result<u64, StoreError>;

    async fn delete_by_hash(&self, token_hash: &str) -> Result<u64, StoreError>;
}

/// Postgres-backed refresh token store
#[derive(Clone)]
pub struct PgRefreshTokenStore {
    db_pool: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn upsert_for_user(&self, record: RefreshToken) -> Result<RefreshToken, StoreError> {
        let stored: RefreshToken = sqlx::query_as(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO UPDATE
            SET id = EXCLUDED.id,
                token_hash = EXCLUDED.token_hash,
                expires_at = EXCLUDED.expires_at,
                created_at = EXCLUDED.created_at
            RETURNING id, user_id, token_hash, expires_at, created_at
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.token_hash)
        .bind(record.expires_at)
        .bind(record.created_at)
        .fetch_one(&self.db_pool)
        .await?;

        Ok(stored)
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>, StoreError> {
        let record: Option<RefreshToken> = sqlx::query_as(
            r#"
            SELECT id, user_id, token_hash, expires_at, created_at
            FROM refresh_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(record)
    }

    async fn delete_by_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let rows_affected = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.db_pool)
            .await?
            .rows_affected();

        Ok(rows_affected)
    }

    async fn delete_by_hash(&self, token_hash: &str) -> Result<u64, StoreError> {
        let rows_affected = sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.db_pool)
            .await?
            .rows_affected();

        Ok(rows_affected)
    }
}

/// In-process refresh token store keyed by user id
#[derive(Clone, Default)]
pub struct InMemoryRefreshTokenStore {
    by_user: Arc<RwLock<HashMap<Uuid, RefreshToken>>>,
}

impl InMemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held for `user_id` (0 or 1)
    pub async fn count_for_user(&self, user_id: Uuid) -> usize {
        usize::from(self.by_user.read().await.contains_key(&user_id))
    }

    pub async fn len(&self) -> usize {
        self.by_user.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.by_user.read().await.is_empty()
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn upsert_for_user(&self, record: RefreshToken) -> Result<RefreshToken, StoreError> {
        let mut by_user = self.by_user.write().await;
        if by_user
            .values()
            .any(|r| r.token_hash == record.token_hash && r.user_id != record.user_id)
        {
            return Err(StoreError::Duplicate("refresh_tokens_token_hash_key".to_string()));
        }
        by_user.insert(record.user_id, record.clone());
        Ok(record)
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshToken>, StoreError> {
        let by_user = self.by_user.read().await;
        Ok(by_user
            .values()
            .find(|r| r.token_hash == token_hash)
            .cloned())
    }

    async fn delete_by_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        Ok(u64::from(self.by_user.write().await.remove(&user_id).is_some()))
    }

    async fn delete_by_hash(&self, token_hash: &str) -> Result<u64, StoreError> {
        let mut by_user = self.by_user.write().await;
        let before = by_user.len();
        by_user.retain(|_, r| r.token_hash != token_hash);
        Ok((before - by_user.len()) as u64)
    }
}

/// Refresh token lookup/expiry failures
#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("Refresh token expired")]
    Expired,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A newly minted refresh token; `token` is what goes in the cookie
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub record: RefreshToken,
}

/// Refresh token lifecycle over a [`RefreshTokenStore`]
#[derive(Clone)]
pub struct RefreshTokens {
    store: Arc<dyn RefreshTokenStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl RefreshTokens {
    pub fn new(store: Arc<dyn RefreshTokenStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a token for `user_id`, replacing whatever it held before
    pub async fn create_for_user(&self, user_id: Uuid) -> Result<IssuedRefreshToken, StoreError> {
        let token = generate_opaque_token();
        let now = self.clock.now();
        let record = RefreshToken {
            id: Uuid::new_v4(),
            user_id,
            token_hash: hash_token(&token),
            expires_at: now + self.ttl,
            created_at: now,
        };

        let record = self.store.upsert_for_user(record).await?;
        tracing::debug!(user_id = %user_id, expires_at = %record.expires_at, "Issued refresh token");

        Ok(IssuedRefreshToken { token, record })
    }

    pub async fn find_by_token(&self, token: &str) -> Result<Option<RefreshToken>, StoreError> {
        self.store.find_by_hash(&hash_token(token)).await
    }

    /// Pass `record` through if still live; otherwise delete it and fail
    pub async fn verify_expiration(&self, record: RefreshToken) -> Result<RefreshToken, RefreshError> {
        if self.clock.now() >= record.expires_at {
            self.store.delete_by_hash(&record.token_hash).await?;
            tracing::info!(user_id = %record.user_id, "Expired refresh token removed");
            return Err(RefreshError::Expired);
        }
        Ok(record)
    }

    pub async fn delete_by_user(&self, user_id: Uuid) -> Result<(), StoreError> {
        self.store.delete_by_user(user_id).await?;
        Ok(())
    }

    pub async fn delete_by_token(&self, token: &str) -> Result<(), StoreError> {
        self.store.delete_by_hash(&hash_token(token)).await?;
        Ok(())
    }
}

/// 256 random bits, base64url without padding
fn generate_opaque_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hash a token for storage
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;

    fn setup() -> (RefreshTokens, InMemoryRefreshTokenStore, ManualClock) {
        let store = InMemoryRefreshTokenStore::new();
        let clock = ManualClock::default();
        let tokens = RefreshTokens::new(
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            Duration::hours(24),
        );
        (tokens, store, clock)
    }

    #[tokio::test]
    async fn test_create_replaces_existing_token() {
        let (tokens, store, _) = setup();
        let user_id = Uuid::new_v4();

        let first = tokens.create_for_user(user_id).await.unwrap();
        let second = tokens.create_for_user(user_id).await.unwrap();

        assert_ne!(first.token, second.token);
        assert_eq!(store.count_for_user(user_id).await, 1);
        assert!(tokens.find_by_token(&first.token).await.unwrap().is_none());
        assert_eq!(
            tokens.find_by_token(&second.token).await.unwrap(),
            Some(second.record)
        );
    }

    #[tokio::test]
    async fn test_concurrent_creates_leave_one_token() {
        let (tokens, store, _) = setup();
        let user_id = Uuid::new_v4();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tokens = tokens.clone();
                tokio::spawn(async move { tokens.create_for_user(user_id).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_stored_value_is_a_hash() {
        let (tokens, _, _) = setup();
        let issued = tokens.create_for_user(Uuid::new_v4()).await.unwrap();

        assert_ne!(issued.record.token_hash, issued.token);
        assert_eq!(issued.record.token_hash.len(), 64);
        assert_eq!(issued.token.len(), 43);
    }

    #[tokio::test]
    async fn test_verify_expiration_deletes_expired_record() {
        let (tokens, store, clock) = setup();
        let issued = tokens.create_for_user(Uuid::new_v4()).await.unwrap();

        clock.advance(Duration::hours(23));
        let live = tokens.verify_expiration(issued.record.clone()).await.unwrap();
        assert_eq!(live, issued.record);

        clock.advance(Duration::hours(1));
        let result = tokens.verify_expiration(issued.record).await;
        assert!(matches!(result, Err(RefreshError::Expired)));
        assert!(store.is_empty().await);
        assert!(tokens.find_by_token(&issued.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deletes_are_idempotent() {
        let (tokens, _, _) = setup();
        let user_id = Uuid::new_v4();
        let issued = tokens.create_for_user(user_id).await.unwrap();

        tokens.delete_by_token(&issued.token).await.unwrap();
        tokens.delete_by_token(&issued.token).await.unwrap();
        tokens.delete_by_user(user_id).await.unwrap();
        tokens.delete_by_user(Uuid::new_v4()).await.unwrap();
    }
}
