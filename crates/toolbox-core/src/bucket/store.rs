use async_trait::async_trait;

use super::{BucketSpec, BucketState, Consumption};
use crate::error::CoreResult;

/// Shared key/value backend holding token buckets.
///
/// Implementations must run [`consume`](BucketStore::consume) as one
/// indivisible read-refill-write per key: two callers racing on the last
/// token must never both be admitted. Handles are shared by every in-flight
/// request, so implementations hold at most one pooled connection, never one
/// per call.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Atomically refills the bucket at `key`, tries to take `cost` tokens,
    /// persists the result and refreshes the key's expiry.
    async fn consume(
        &self,
        key: &str,
        spec: BucketSpec,
        cost: f64,
        now: f64,
    ) -> CoreResult<Consumption>;

    /// Current persisted fields for `key`, or `None` if absent or expired.
    async fn snapshot(&self, key: &str, now: f64) -> CoreResult<Option<BucketState>>;

    /// Round-trips to the backend.
    async fn ping(&self) -> CoreResult<()>;

    /// Releases the backend. Every later call fails with
    /// [`CoreError::StoreClosed`](crate::CoreError::StoreClosed).
    async fn close(&self);
}
