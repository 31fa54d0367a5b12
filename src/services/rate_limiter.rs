use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),
}

/// Atomic fixed-window counter. The window starts at the first increment and
/// is not extended by later ones.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Returns the count after incrementing and the time left in the window.
    async fn increment(&self, key: &str, window: Duration) -> Result<(u64, Duration), RateLimitError>;
}

/// Per-process counters. Counts are not shared between server instances.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, (u64, Instant)>>,
}

const PURGE_THRESHOLD: usize = 4096;

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<(u64, Duration), RateLimitError> {
        let now = Instant::now();
        let mut counters = self.counters.lock().await;
        if counters.len() > PURGE_THRESHOLD {
            counters.retain(|_, (_, reset)| *reset > now);
        }

        let entry = counters.entry(key.to_string()).or_insert((0, now + window));
        if entry.1 <= now {
            *entry = (0, now + window);
        }
        entry.0 += 1;
        Ok((entry.0, entry.1.saturating_duration_since(now)))
    }
}

/// Counters shared through Redis, so every server instance sees one count.
pub struct RedisCounterStore {
    manager: ConnectionManager,
    prefix: String,
}

impl RedisCounterStore {
    pub async fn connect(redis_url: &str) -> Result<Self, RateLimitError> {
        let client = redis::Client::open(redis_url).map_err(|e| RateLimitError::Unavailable(e.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| RateLimitError::Unavailable(e.to_string()))?;
        info!("Connected rate limit counter store");
        Ok(Self {
            manager,
            prefix: "portal:ratelimit:".to_string(),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<(u64, Duration), RateLimitError> {
        let key = format!("{}{}", self.prefix, key);
        let mut conn = self.manager.clone();
        let window_secs = window.as_secs().max(1);

        // SET NX creates the key with its TTL only once; INCR never touches the TTL.
        let (count, pttl): (i64, i64) = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(&key)
            .arg(0)
            .arg("EX")
            .arg(window_secs)
            .arg("NX")
            .ignore()
            .cmd("INCR")
            .arg(&key)
            .cmd("PTTL")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| RateLimitError::Unavailable(e.to_string()))?;

        let remaining = if pttl > 0 {
            Duration::from_millis(pttl as u64)
        } else {
            window
        };
        Ok((count.max(0) as u64, remaining))
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    /// Whole seconds until the window resets, at least 1
    pub retry_after: u64,
}

/// Fixed-window request throttle. Fails open when the counter store is down.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    timeout: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            timeout: Duration::from_millis(250),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCounterStore::new()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn allow(&self, key: &str, limit: u64, window: Duration) -> RateDecision {
        let counted = tokio::time::timeout(self.timeout, self.store.increment(key, window)).await;
        let (count, left) = match counted {
            Ok(Ok(counted)) => counted,
            Ok(Err(e)) => {
                warn!(key, error = %e, "Rate limit store failed; allowing request");
                return Self::open_decision(limit, window);
            }
            Err(_) => {
                warn!(key, "Rate limit store timed out; allowing request");
                return Self::open_decision(limit, window);
            }
        };

        let reset_at = Utc::now() + chrono::Duration::milliseconds(left.as_millis() as i64);
        RateDecision {
            allowed: count <= limit,
            limit,
            remaining: limit.saturating_sub(count),
            reset_at,
            retry_after: left.as_secs_f64().ceil().max(1.0) as u64,
        }
    }

    fn open_decision(limit: u64, window: Duration) -> RateDecision {
        RateDecision {
            allowed: true,
            limit,
            remaining: limit,
            reset_at: Utc::now() + chrono::Duration::seconds(window.as_secs() as i64),
            retry_after: window.as_secs().max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenStore;

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn increment(&self, _key: &str, _window: Duration) -> Result<(u64, Duration), RateLimitError> {
            Err(RateLimitError::Unavailable("connection refused".to_string()))
        }
    }

    struct HangingStore;

    #[async_trait]
    impl CounterStore for HangingStore {
        async fn increment(&self, _key: &str, _window: Duration) -> Result<(u64, Duration), RateLimitError> {
            futures::future::pending::<()>().await;
            Ok((0, Duration::ZERO))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sixth_request_is_rejected_then_window_resets() {
        let limiter = RateLimiter::in_memory();
        let window = Duration::from_secs(60);

        for expected_remaining in (0..5).rev() {
            let decision = limiter.allow("1.2.3.4:/login", 5, window).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }
        let sixth = limiter.allow("1.2.3.4:/login", 5, window).await;
        assert!(!sixth.allowed);
        assert_eq!(sixth.remaining, 0);
        assert!(sixth.retry_after <= 60);

        tokio::time::advance(Duration::from_secs(61)).await;
        let fresh = limiter.allow("1.2.3.4:/login", 5, window).await;
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn later_increments_do_not_extend_the_window() {
        let limiter = RateLimiter::in_memory();
        let window = Duration::from_secs(60);
        limiter.allow("k", 5, window).await;
        tokio::time::advance(Duration::from_secs(50)).await;
        let decision = limiter.allow("k", 5, window).await;
        assert!(decision.retry_after <= 10);
    }

    #[tokio::test]
    async fn keys_are_counted_separately() {
        let limiter = RateLimiter::in_memory();
        let window = Duration::from_secs(60);
        assert!(limiter.allow("a:/login", 1, window).await.allowed);
        assert!(!limiter.allow("a:/login", 1, window).await.allowed);
        assert!(limiter.allow("b:/login", 1, window).await.allowed);
        assert!(limiter.allow("a:/refresh", 1, window).await.allowed);
    }

    #[tokio::test]
    async fn fails_open_when_store_errors() {
        let limiter = RateLimiter::new(Arc::new(BrokenStore));
        for _ in 0..10 {
            assert!(limiter.allow("k", 1, Duration::from_secs(60)).await.allowed);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fails_open_when_store_hangs() {
        let limiter = RateLimiter::new(Arc::new(HangingStore)).with_timeout(Duration::from_millis(50));
        assert!(limiter.allow("k", 1, Duration::from_secs(60)).await.allowed);
    }
}
