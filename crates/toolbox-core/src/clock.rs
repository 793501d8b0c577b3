//! Time source for bucket refills and token expiry.
//!
//! Every instance sharing one bucket store must agree on a time base, so the
//! production clock is Unix wall-clock time in fractional seconds. Backward
//! jumps are tolerated: refill math clamps negative elapsed time to zero.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Supplies "now" as seconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;

    /// Whole seconds since the epoch, as used in JWT `iat`/`exp` claims.
    fn now_secs(&self) -> u64 {
        self.now().max(0.0).floor() as u64
    }
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: f64) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, secs: f64) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) += secs;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
