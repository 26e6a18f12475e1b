//! Per-key token-bucket rate limiting.
//!
//! One bucket per token ID (or per remote address for unauthenticated
//! traffic). The map is behind a read-mostly lock; new keys take the write
//! path with a double-checked upsert. Stale buckets self-expire via
//! [`RateLimiter::cleanup`], which the server runs periodically.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use oubliette_core::constants::{RATE_LIMIT_BURST, RATE_LIMIT_PER_SECOND};

/// Limiter tuning.
#[derive(Clone, Copy, Debug)]
pub struct RateLimiterConfig {
    /// Sustained requests per second per key.
    pub per_second: f64,
    /// Burst capacity per key.
    pub burst: f64,
    /// Buckets idle longer than this are dropped by [`RateLimiter::cleanup`].
    pub idle_expiry: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            per_second: RATE_LIMIT_PER_SECOND,
            burst: RATE_LIMIT_BURST,
            idle_expiry: Duration::from_secs(600),
        }
    }
}

struct Bucket {
    tokens: f64,
    refilled_at: Instant,
    seen_at: Instant,
}

/// Keyed token-bucket limiter.
pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: RwLock<HashMap<String, Mutex<Bucket>>>,
}

impl RateLimiter {
    /// Create a limiter with the given tuning.
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Take one token for `key`. `Err` carries the retry-after hint.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        let now = Instant::now();

        {
            let map = self.buckets.read();
            if let Some(bucket) = map.get(key) {
                return self.take(&mut bucket.lock(), now);
            }
        }

        // Slow path: double-checked upsert under the write lock. Another
        // caller may have inserted the key between the locks.
        let mut map = self.buckets.write();
        let bucket = map.entry(key.to_owned()).or_insert_with(|| {
            Mutex::new(Bucket {
                tokens: self.config.burst,
                refilled_at: now,
                seen_at: now,
            })
        });
        self.take(&mut bucket.lock(), now)
    }

    /// Drop buckets idle past the expiry window. Returns how many were
    /// removed.
    pub fn cleanup(&self) -> usize {
        let cutoff = Instant::now()
            .checked_sub(self.config.idle_expiry)
            .unwrap_or_else(Instant::now);
        let mut map = self.buckets.write();
        let before = map.len();
        map.retain(|_, bucket| bucket.lock().seen_at > cutoff);
        before - map.len()
    }

    /// Number of tracked keys.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.buckets.read().len()
    }

    fn take(&self, bucket: &mut Bucket, now: Instant) -> Result<(), Duration> {
        let elapsed = now.saturating_duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.config.per_second).min(self.config.burst);
        bucket.refilled_at = now;
        bucket.seen_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - bucket.tokens;
            Err(Duration::from_secs_f64(deficit / self.config.per_second))
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
