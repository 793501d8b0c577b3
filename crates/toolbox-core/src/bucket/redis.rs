//! Redis-backed bucket store for multi-instance deployments.
//!
//! The refill/take runs inside a Lua script, so Redis serializes concurrent
//! consumers of one key without any lock in this process. Buckets are hashes
//! with two fields, `tokens` and `last_refill_at`, that expire after
//! [`bucket_ttl_secs`].

use std::sync::RwLock;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;

use super::store::BucketStore;
use super::{bucket_ttl_secs, BucketSpec, BucketState, Consumption};
use crate::error::{CoreError, CoreResult};

/// Mirrors [`refill_and_take`](super::refill_and_take). Fractional values are
/// returned as strings because Redis truncates Lua numbers to integers.
const TOKEN_BUCKET_LUA: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_per_sec = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local cost = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])

local data = redis.call("HMGET", key, "tokens", "last_refill_at")
local tokens = tonumber(data[1])
local last = tonumber(data[2])
if tokens == nil then tokens = capacity end
if last == nil then last = now end

local elapsed = now - last
if elapsed < 0 then elapsed = 0 end

tokens = math.min(capacity, tokens + elapsed * refill_per_sec)
if tokens < 0 then tokens = 0 end

local allowed = 0
local retry_after = 0
if tokens >= cost then
  allowed = 1
  tokens = tokens - cost
elseif refill_per_sec > 0 then
  retry_after = (cost - tokens) / refill_per_sec
else
  retry_after = 1
end

if now > last then last = now end

redis.call("HSET", key,
  "tokens", string.format("%.17g", tokens),
  "last_refill_at", string.format("%.17g", last))
redis.call("EXPIRE", key, ttl)

return { allowed, string.format("%.17g", tokens), string.format("%.17g", retry_after) }
"#;

pub struct RedisBucketStore {
    connection: RwLock<Option<ConnectionManager>>,
    script: Script,
}

impl RedisBucketStore {
    /// Opens the process-wide connection and checks it with a `PING`.
    pub async fn connect(url: &str) -> CoreResult<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            tracing::warn!("Failed to create Redis client for rate limiting: {e}");
            CoreError::Store(format!("invalid redis url: {e}"))
        })?;

        let mut manager = ConnectionManager::new(client).await.map_err(|e| {
            tracing::warn!("Failed to connect to Redis for rate limiting: {e}");
            CoreError::from(e)
        })?;

        let _: String = redis::cmd("PING").query_async(&mut manager).await?;
        tracing::info!("Connected to Redis bucket store");

        Ok(Self {
            connection: RwLock::new(Some(manager)),
            script: Script::new(TOKEN_BUCKET_LUA),
        })
    }

    /// Clones the shared handle; the lock is never held across an await.
    fn connection(&self) -> CoreResult<ConnectionManager> {
        self.connection
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(CoreError::StoreClosed)
    }
}

#[async_trait]
impl BucketStore for RedisBucketStore {
    async fn consume(
        &self,
        key: &str,
        spec: BucketSpec,
        cost: f64,
        now: f64,
    ) -> CoreResult<Consumption> {
        let mut conn = self.connection()?;

        let (allowed, tokens, retry_after): (i64, String, String) = self
            .script
            .key(key)
            .arg(spec.capacity)
            .arg(spec.refill_per_sec)
            .arg(now)
            .arg(cost)
            .arg(bucket_ttl_secs(spec))
            .invoke_async(&mut conn)
            .await?;

        Ok(Consumption {
            allowed: allowed == 1,
            tokens_remaining: parse_number(&tokens)?,
            retry_after_secs: parse_number(&retry_after)?,
        })
    }

    async fn snapshot(&self, key: &str, _now: f64) -> CoreResult<Option<BucketState>> {
        let mut conn = self.connection()?;

        let (tokens, last_refill_at): (Option<f64>, Option<f64>) = redis::cmd("HMGET")
            .arg(key)
            .arg("tokens")
            .arg("last_refill_at")
            .query_async(&mut conn)
            .await?;

        Ok(match (tokens, last_refill_at) {
            (Some(tokens), Some(last_refill_at)) => Some(BucketState {
                tokens,
                last_refill_at,
            }),
            _ => None,
        })
    }

    async fn ping(&self) -> CoreResult<()> {
        let mut conn = self.connection()?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn close(&self) {
        let previous = self
            .connection
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if previous.is_some() {
            tracing::info!("Redis bucket store closed");
        }
    }
}

fn parse_number(raw: &str) -> CoreResult<f64> {
    raw.trim()
        .parse::<f64>()
        .map_err(|e| CoreError::Store(format!("unexpected script reply {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn parses_lua_number_formats() {
        assert_eq!(parse_number("4").unwrap(), 4.0);
        assert_eq!(parse_number("0.5").unwrap(), 0.5);
        assert_eq!(parse_number("1.6666666666666667").unwrap(), 1.6666666666666667);
        assert!(parse_number("nan-ish").is_err());
    }

    #[tokio::test]
    async fn invalid_url_is_a_store_error() {
        let err = RedisBucketStore::connect("not a url").await.err().unwrap();
        assert!(matches!(err, CoreError::Store(_)));
    }

    /// Requires a live server: `TOOLBOX_TEST_REDIS_URL=redis://127.0.0.1/ cargo test -- --ignored`
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore]
    async fn redis_script_admits_exactly_capacity_under_contention() {
        let url = std::env::var("TOOLBOX_TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        let store = Arc::new(RedisBucketStore::connect(&url).await.unwrap());
        let key = format!("rl:test:{}", std::process::id());
        let spec = BucketSpec::per_window(10, Duration::from_secs(60));

        let handles = (0..100).map(|_| {
            let store = store.clone();
            let key = key.clone();
            tokio::spawn(async move { store.consume(&key, spec, 1.0, 1_000.0).await.unwrap() })
        });
        let admitted = futures::future::join_all(handles)
            .await
            .into_iter()
            .filter(|r| r.as_ref().unwrap().allowed)
            .count();
        assert_eq!(admitted, 10);

        let state = store.snapshot(&key, 1_000.0).await.unwrap().unwrap();
        assert_eq!(state.tokens, 0.0);
        assert_eq!(state.last_refill_at, 1_000.0);

        store.close().await;
        assert!(matches!(store.ping().await, Err(CoreError::StoreClosed)));
    }
}
