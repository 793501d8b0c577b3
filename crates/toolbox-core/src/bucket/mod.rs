//! Token-bucket state and the refill/take algorithm.
//!
//! The algorithm lives here as a pure function so the in-memory store runs it
//! directly and the Redis Lua script can be checked against it. A store is
//! responsible only for making one call of it atomic per key.

pub mod memory;
pub mod redis;
pub mod store;

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Minimum expiry for a bucket key, in seconds.
pub const MIN_BUCKET_TTL_SECS: u64 = 60;

/// Shape of one bucket: how many tokens it holds and how fast it refills.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketSpec {
    pub capacity: f64,
    pub refill_per_sec: f64,
}

impl BucketSpec {
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
        }
    }

    /// A bucket that refills completely once per `window`.
    pub fn per_window(capacity: u32, window: Duration) -> Self {
        let secs = window.as_secs_f64();
        let refill_per_sec = if secs > 0.0 { capacity as f64 / secs } else { 0.0 };
        Self::new(capacity as f64, refill_per_sec)
    }
}

/// The two persisted fields of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    pub tokens: f64,
    /// Seconds since the Unix epoch.
    pub last_refill_at: f64,
}

/// Result of one consume attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Consumption {
    pub allowed: bool,
    /// Informational only; exact fractions differ between backends.
    pub tokens_remaining: f64,
    /// Zero when allowed.
    pub retry_after_secs: f64,
}

/// Refills `state` up to `now` and tries to take `cost` tokens.
///
/// A missing state is a full bucket last refilled at `now`. The returned
/// state is what the store must persist. Its `last_refill_at` never moves
/// backwards, so a caller whose clock lags cannot earn a second refill for
/// the same interval.
pub fn refill_and_take(
    state: Option<BucketState>,
    spec: BucketSpec,
    cost: f64,
    now: f64,
) -> (BucketState, Consumption) {
    let (tokens, last_refill_at) = match state {
        Some(s) => (s.tokens, s.last_refill_at),
        None => (spec.capacity, now),
    };

    let elapsed = (now - last_refill_at).max(0.0);
    let mut tokens = (tokens + elapsed * spec.refill_per_sec)
        .min(spec.capacity)
        .max(0.0);

    let consumption = if tokens >= cost {
        tokens -= cost;
        Consumption {
            allowed: true,
            tokens_remaining: tokens,
            retry_after_secs: 0.0,
        }
    } else {
        let retry_after_secs = if spec.refill_per_sec > 0.0 {
            (cost - tokens) / spec.refill_per_sec
        } else {
            1.0
        };
        Consumption {
            allowed: false,
            tokens_remaining: tokens,
            retry_after_secs,
        }
    };

    let next = BucketState {
        tokens,
        last_refill_at: last_refill_at.max(now),
    };
    (next, consumption)
}

/// Expiry applied to a bucket key after every consume.
///
/// Long enough for roughly two full refills, never below a minute.
pub fn bucket_ttl_secs(spec: BucketSpec) -> u64 {
    if spec.refill_per_sec <= 0.0 {
        return MIN_BUCKET_TTL_SECS;
    }
    let ttl = (2.0 * spec.capacity / spec.refill_per_sec).ceil();
    if ttl.is_finite() && ttl > MIN_BUCKET_TTL_SECS as f64 {
        ttl as u64
    } else {
        MIN_BUCKET_TTL_SECS
    }
}
