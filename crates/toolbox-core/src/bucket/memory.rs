//! In-process bucket store for single-instance deployments and tests.
//!
//! Atomicity comes from `DashMap`'s per-shard write lock, held only for the
//! synchronous refill/take of one key. Correct only while one process owns
//! every bucket; multi-instance deployments need the Redis store.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::store::BucketStore;
use super::{bucket_ttl_secs, refill_and_take, BucketSpec, BucketState, Consumption};
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy)]
struct MemoryEntry {
    state: BucketState,
    expires_at: f64,
}

impl MemoryEntry {
    fn live(&self, now: f64) -> Option<BucketState> {
        (now < self.expires_at).then_some(self.state)
    }
}

#[derive(Debug, Default)]
pub struct MemoryBucketStore {
    buckets: DashMap<String, MemoryEntry>,
    closed: AtomicBool,
}

impl MemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every bucket whose expiry has passed. Returns how many were removed.
    pub fn sweep(&self, now: f64) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, entry| entry.expires_at > now);
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            tracing::debug!("Swept {removed} idle rate-limit buckets");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoreError::StoreClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl BucketStore for MemoryBucketStore {
    async fn consume(
        &self,
        key: &str,
        spec: BucketSpec,
        cost: f64,
        now: f64,
    ) -> CoreResult<Consumption> {
        self.ensure_open()?;
        let expires_at = now + bucket_ttl_secs(spec) as f64;

        let consumption = match self.buckets.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let prior = occupied.get().live(now);
                let (state, consumption) = refill_and_take(prior, spec, cost, now);
                occupied.insert(MemoryEntry { state, expires_at });
                consumption
            }
            Entry::Vacant(vacant) => {
                let (state, consumption) = refill_and_take(None, spec, cost, now);
                vacant.insert(MemoryEntry { state, expires_at });
                consumption
            }
        };

        Ok(consumption)
    }

    async fn snapshot(&self, key: &str, now: f64) -> CoreResult<Option<BucketState>> {
        self.ensure_open()?;
        Ok(self.buckets.get(key).and_then(|entry| entry.live(now)))
    }

    async fn ping(&self) -> CoreResult<()> {
        self.ensure_open()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.buckets.clear();
        tracing::info!("In-memory bucket store closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn spec(capacity: u32) -> BucketSpec {
        BucketSpec::per_window(capacity, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn first_consume_creates_bucket_below_capacity() {
        let store = MemoryBucketStore::new();
        assert!(store.snapshot("rl:k", 0.0).await.unwrap().is_none());

        let c = store.consume("rl:k", spec(5), 1.0, 10.0).await.unwrap();
        assert!(c.allowed);

        let state = store.snapshot("rl:k", 10.0).await.unwrap().unwrap();
        assert_eq!(state.tokens, 4.0);
        assert_eq!(state.last_refill_at, 10.0);
    }

    #[tokio::test]
    async fn idle_bucket_expires_and_comes_back_full() {
        let store = MemoryBucketStore::new();
        for _ in 0..5 {
            store.consume("rl:k", spec(5), 1.0, 0.0).await.unwrap();
        }
        assert!(!store.consume("rl:k", spec(5), 1.0, 0.0).await.unwrap().allowed);

        // ttl for 5 per 60s is 120s
        assert!(store.snapshot("rl:k", 119.0).await.unwrap().is_some());
        assert!(store.snapshot("rl:k", 120.0).await.unwrap().is_none());

        let c = store.consume("rl:k", spec(5), 1.0, 500.0).await.unwrap();
        assert!(c.allowed);
        assert_eq!(c.tokens_remaining, 4.0);
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_keys() {
        let store = MemoryBucketStore::new();
        store.consume("rl:old", spec(5), 1.0, 0.0).await.unwrap();
        store.consume("rl:new", spec(5), 1.0, 100.0).await.unwrap();

        assert_eq!(store.sweep(150.0), 1);
        assert_eq!(store.len(), 1);
        assert!(store.snapshot("rl:new", 150.0).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let store = MemoryBucketStore::new();
        let one = BucketSpec::per_window(1, Duration::from_secs(60));
        assert!(store.consume("rl:a", one, 1.0, 0.0).await.unwrap().allowed);
        assert!(!store.consume("rl:a", one, 1.0, 0.0).await.unwrap().allowed);
        assert!(store.consume("rl:b", one, 1.0, 0.0).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn closed_store_fails_fast() {
        let store = MemoryBucketStore::new();
        store.consume("rl:k", spec(5), 1.0, 0.0).await.unwrap();
        store.close().await;

        assert!(store.is_empty());
        assert!(matches!(
            store.consume("rl:k", spec(5), 1.0, 0.0).await,
            Err(CoreError::StoreClosed)
        ));
        assert!(matches!(store.ping().await, Err(CoreError::StoreClosed)));
        assert!(matches!(
            store.snapshot("rl:k", 0.0).await,
            Err(CoreError::StoreClosed)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_consumers_admit_exactly_capacity() {
        let store = Arc::new(MemoryBucketStore::new());
        let capacity = 25;

        let handles = (0..400).map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .consume("rl:login:ip:10.0.0.1", spec(capacity), 1.0, 1_000.0)
                    .await
                    .unwrap()
                    .allowed
            })
        });

        let admitted = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .filter(|allowed| *allowed)
            .count();

        assert_eq!(admitted, capacity as usize);
        let state = store
            .snapshot("rl:login:ip:10.0.0.1", 1_000.0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.tokens, 0.0);
    }
}
