//! Token-bucket limiter over a shared [`BucketStore`].

use std::sync::Arc;
use std::time::Duration;

use crate::bucket::store::BucketStore;
use crate::bucket::{BucketSpec, BucketState, Consumption};
use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};

#[derive(Clone)]
pub struct TokenBucketLimiter {
    store: Arc<dyn BucketStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl TokenBucketLimiter {
    pub fn new(store: Arc<dyn BucketStore>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            store,
            clock,
            timeout,
        }
    }

    /// Tries to take `cost` tokens from the bucket at `key`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::StoreTimeout`] if the store does not answer in time.
    /// - Any error the store reports, including [`CoreError::StoreClosed`].
    pub async fn consume(&self, key: &str, spec: BucketSpec, cost: f64) -> CoreResult<Consumption> {
        let now = self.clock.now();
        let consumption = tokio::time::timeout(self.timeout, self.store.consume(key, spec, cost, now))
            .await
            .map_err(|_| CoreError::StoreTimeout(self.timeout))??;

        if consumption.allowed {
            tracing::debug!(
                key = %key,
                remaining = consumption.tokens_remaining,
                capacity = spec.capacity,
                "Rate limit check passed"
            );
        } else {
            tracing::debug!(
                key = %key,
                retry_after = consumption.retry_after_secs,
                "Rate limit exceeded"
            );
        }
        Ok(consumption)
    }

    /// Reads a bucket without consuming from it.
    pub async fn snapshot(&self, key: &str) -> CoreResult<Option<BucketState>> {
        let now = self.clock.now();
        tokio::time::timeout(self.timeout, self.store.snapshot(key, now))
            .await
            .map_err(|_| CoreError::StoreTimeout(self.timeout))?
    }
}
