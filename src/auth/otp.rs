//! One-time passcode challenges
//!
//! Codes are six decimal digits, live for a fixed TTL measured from the
//! moment they were written, and are keyed by username. Writing a new code
//! for a key replaces whatever was there.

use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, Rng};
use std::{collections::HashMap, sync::Arc};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;

use super::clock::Clock;

/// Default challenge lifetime
pub const DEFAULT_OTP_TTL_SECONDS: i64 = 300;

const OTP_MIN: u32 = 100_000;
const OTP_MAX: u32 = 999_999;

#[derive(Debug, Clone)]
struct OtpEntry {
    code: String,
    created_at: DateTime<Utc>,
}

/// In-process TTL cache of outstanding OTP challenges
#[derive(Clone)]
pub struct OtpCache {
    entries: Arc<RwLock<HashMap<String, OtpEntry>>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl OtpCache {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a fresh code for `key`, superseding any earlier one
    pub async fn generate(&self, key: &str) -> String {
        let code = OsRng.gen_range(OTP_MIN..=OTP_MAX).to_string();
        let entry = OtpEntry {
            code: code.clone(),
            created_at: self.clock.now(),
        };

        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), entry);

        code
    }

    /// Current code for `key`, if one exists and has not expired
    pub async fn lookup(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !self.is_expired(entry, now) => return Some(entry.code.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: drop it unless a newer code was written in between.
        let mut entries = self.entries.write().await;
        if entries
            .get(key)
            .is_some_and(|entry| self.is_expired(entry, now))
        {
            entries.remove(key);
        }
        None
    }

    /// Compare `candidate` with the live code and consume it on a match
    ///
    /// Lookup, comparison and removal happen under one write lock, so two
    /// concurrent submissions of the same code cannot both succeed.
    pub async fn consume(&self, key: &str, candidate: &str) -> bool {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;

        let matched = match entries.get(key) {
            Some(entry) if !self.is_expired(entry, now) => {
                bool::from(entry.code.as_bytes().ct_eq(candidate.as_bytes()))
            }
            _ => false,
        };

        if matched {
            entries.remove(key);
        }
        matched
    }

    /// Remove the challenge for `key` immediately
    pub async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    /// Evict every expired entry, returning how many were dropped
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        before - entries.len()
    }

    fn is_expired(&self, entry: &OtpEntry, now: DateTime<Utc>) -> bool {
        now >= entry.created_at + self.ttl
    }
}

/// Periodically evict expired challenges
pub async fn run_purge_loop(cache: OtpCache, every: std::time::Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let purged = cache.purge_expired().await;
        if purged > 0 {
            tracing::debug!(purged, "Evicted expired OTP challenges");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;

    fn cache() -> (OtpCache, ManualClock) {
        let clock = ManualClock::default();
        let cache = OtpCache::new(
            Arc::new(clock.clone()),
            Duration::seconds(DEFAULT_OTP_TTL_SECONDS),
        );
        (cache, clock)
    }

    #[tokio::test]
    async fn test_generate_then_lookup() {
        let (cache, _) = cache();

        let code = cache.generate("alice").await;

        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        let value: u32 = code.parse().unwrap();
        assert!((OTP_MIN..=OTP_MAX).contains(&value));
        assert_eq!(cache.lookup("alice").await, Some(code));
    }

    #[tokio::test]
    async fn test_new_code_supersedes_old() {
        let (cache, _) = cache();

        let first = cache.generate("alice").await;
        let mut second = cache.generate("alice").await;
        // Collisions are possible with a 900k space; retry until distinct.
        while first == second {
            second = cache.generate("alice").await;
        }

        assert_eq!(cache.lookup("alice").await, Some(second.clone()));
        assert!(!cache.consume("alice", &first).await);
        assert!(cache.consume("alice", &second).await);
    }

    #[tokio::test]
    async fn test_code_expires_after_ttl() {
        let (cache, clock) = cache();
        cache.generate("alice").await;

        clock.advance(Duration::seconds(DEFAULT_OTP_TTL_SECONDS - 1));
        assert!(cache.lookup("alice").await.is_some());

        clock.advance(Duration::seconds(1));
        assert!(cache.lookup("alice").await.is_none());
    }

    #[tokio::test]
    async fn test_ttl_counts_from_write_not_read() {
        let (cache, clock) = cache();
        cache.generate("alice").await;

        for _ in 0..5 {
            clock.advance(Duration::seconds(60));
            cache.lookup("alice").await;
        }

        assert!(cache.lookup("alice").await.is_none());
    }

    #[tokio::test]
    async fn test_consume_is_single_use() {
        let (cache, _) = cache();
        let code = cache.generate("alice").await;

        assert!(cache.consume("alice", &code).await);
        assert!(!cache.consume("alice", &code).await);
        assert!(cache.lookup("alice").await.is_none());
    }

    #[tokio::test]
    async fn test_consume_rejects_wrong_code_and_keeps_challenge() {
        let (cache, _) = cache();
        let code = cache.generate("alice").await;
        let wrong = if code == "000000" { "111111" } else { "000000" };

        assert!(!cache.consume("alice", wrong).await);
        assert_eq!(cache.lookup("alice").await, Some(code));
    }

    #[tokio::test]
    async fn test_invalidate_and_purge() {
        let (cache, clock) = cache();
        cache.generate("alice").await;
        cache.generate("bob").await;

        cache.invalidate("alice").await;
        assert!(cache.lookup("alice").await.is_none());

        clock.advance(Duration::seconds(DEFAULT_OTP_TTL_SECONDS));
        assert_eq!(cache.purge_expired().await, 1);
        assert!(cache.lookup("bob").await.is_none());
    }
}
