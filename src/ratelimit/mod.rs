//! Per-key token bucket rate limiting.
//!
//! One bucket per `(tool, caller)` pair, created on first use with a full
//! token count. Refill is computed lazily from elapsed time on each access;
//! there is no background refill task, so state only changes under the
//! store lock and tests can drive the clock with paused tokio time.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Rate limit parameters carried by a tool definition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimit {
    /// Maximum tokens a bucket can hold (burst size).
    pub capacity: f64,
    /// Tokens replenished per second.
    pub refill_per_sec: f64,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            capacity: 100.0,
            refill_per_sec: 10.0,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(limit: RateLimit, now: Instant) -> Self {
        Self {
            tokens: limit.capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, limit: RateLimit, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * limit.refill_per_sec)
            .min(limit.capacity);
        self.last_refill = now;
    }
}

/// Keyed store of token buckets, serialized behind a single lock.
///
/// Keys are never evicted implicitly; hosts of long-lived dispatchers call
/// [`RateLimiter::evict_idle`] on their own cadence. A bucket recreated
/// after eviction starts full again, which can grant one extra burst.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<(String, String), Bucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refill the bucket for `(tool, caller)` and try to deduct one token.
    ///
    /// Returns `false` without deducting when less than one token is
    /// available. Tokens stay within `[0, capacity]` at all times.
    pub async fn try_consume(&self, tool: &str, caller: &str, limit: RateLimit) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry((tool.to_string(), caller.to_string()))
            .or_insert_with(|| Bucket::full(limit, now));
        bucket.refill(limit, now);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Current token count for a key, refreshed to `now`. Introspection for
    /// tests and metrics; `None` if the key has never been used.
    pub async fn tokens(&self, tool: &str, caller: &str, limit: RateLimit) -> Option<f64> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.get_mut(&(tool.to_string(), caller.to_string()))?;
        bucket.refill(limit, now);
        Some(bucket.tokens)
    }

    /// Drop buckets that have not been touched for at least `max_idle`.
    pub async fn evict_idle(&self, max_idle: Duration) {
        let now = Instant::now();
        self.buckets
            .lock()
            .await
            .retain(|_, b| now.saturating_duration_since(b.last_refill) < max_idle);
    }

    pub async fn len(&self) -> usize {
        self.buckets.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    const LIMIT: RateLimit = RateLimit {
        capacity: 3.0,
        refill_per_sec: 1.0,
    };

    #[tokio::test(start_paused = true)]
    async fn bucket_starts_full_and_drains() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            assert!(limiter.try_consume("search", "alice", LIMIT).await);
        }
        assert!(!limiter.try_consume("search", "alice", LIMIT).await);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_consume_does_not_deduct() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            limiter.try_consume("search", "alice", LIMIT).await;
        }
        for _ in 0..10 {
            assert!(!limiter.try_consume("search", "alice", LIMIT).await);
        }
        // One second buys exactly one token back
        advance(Duration::from_secs(1)).await;
        assert!(limiter.try_consume("search", "alice", LIMIT).await);
        assert!(!limiter.try_consume("search", "alice", LIMIT).await);
    }

    #[tokio::test(start_paused = true)]
    async fn refill_caps_at_capacity() {
        let limiter = RateLimiter::new();
        limiter.try_consume("search", "alice", LIMIT).await;
        advance(Duration::from_secs(3600)).await;
        let tokens = limiter.tokens("search", "alice", LIMIT).await.unwrap();
        assert_eq!(tokens, LIMIT.capacity);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_bucket_recovers_fully_after_capacity_over_rate() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            limiter.try_consume("search", "alice", LIMIT).await;
        }
        advance(Duration::from_secs_f64(LIMIT.capacity / LIMIT.refill_per_sec)).await;
        for _ in 0..3 {
            assert!(limiter.try_consume("search", "alice", LIMIT).await);
        }
        assert!(!limiter.try_consume("search", "alice", LIMIT).await);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            limiter.try_consume("search", "alice", LIMIT).await;
        }
        assert!(!limiter.try_consume("search", "alice", LIMIT).await);
        assert!(limiter.try_consume("search", "bob", LIMIT).await);
        assert!(limiter.try_consume("recommend", "alice", LIMIT).await);
    }

    #[tokio::test(start_paused = true)]
    async fn evict_idle_drops_only_stale_keys() {
        let limiter = RateLimiter::new();
        limiter.try_consume("search", "alice", LIMIT).await;
        advance(Duration::from_secs(120)).await;
        limiter.try_consume("search", "bob", LIMIT).await;
        limiter.evict_idle(Duration::from_secs(60)).await;
        assert_eq!(limiter.len().await, 1);
        assert!(limiter.tokens("search", "bob", LIMIT).await.is_some());
    }
}
