//! Shared counter store facade.
//!
//! The authoritative rate-limit counters live in an external Redis instance:
//! one sorted set per source IP whose members are admission timestamps. The
//! admission decision runs server-side as a Lua script so that pruning,
//! counting and recording are one atomic step; the gateway only ever sees
//! admit or deny. The same connection pool carries analytics publishes, and
//! a dedicated pub/sub connection feeds the anomaly alert channel.
//!
//! [`CounterStore`] is the seam the rate limiter is written against; tests
//! substitute an in-memory implementation and production wires up
//! [`RedisStore`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use rand::Rng;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use thiserror::Error;
use tracing::{debug, warn};

/// Atomic sliding-window admission, executed server-side.
///
/// Members with score at or before `now - window` are pruned (the window is
/// open on the left), the remaining cardinality is compared against the
/// limit, and on admission a `"<now_ms>-<salt>"` member is recorded and the
/// key expiry refreshed to one window.
const SLIDING_WINDOW_SCRIPT: &str = r"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local clear_before = now - window

redis.call('ZREMRANGEBYSCORE', key, '-inf', clear_before)
local count = redis.call('ZCARD', key)

if count < limit then
    redis.call('ZADD', key, now, now .. '-' .. ARGV[4])
    redis.call('PEXPIRE', key, window)
    return 1
end
return 0
";

/// Salt domain for member uniqueness under same-millisecond admissions.
const SALT_RANGE: u32 = 1_000_000;

/// Failures talking to the shared counter store.
#[derive(Debug, Error)]
pub enum ScsError {
    /// The underlying Redis call failed.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    /// The call did not complete within its deadline.
    #[error("shared counter store call timed out after {0:?}")]
    Timeout(Duration),
}

/// The counter operations the rate limiter needs.
#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    /// Attempts to admit one event for `key` at `now_ms`.
    ///
    /// Returns `Ok(true)` if the event was admitted and recorded, `Ok(false)`
    /// if the sliding window is full.
    ///
    /// # Errors
    ///
    /// Returns [`ScsError`] when the store is unreachable or the script
    /// fails; callers decide the fail-open policy.
    async fn try_admit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u32,
    ) -> Result<bool, ScsError>;
}

#[async_trait]
impl<S> CounterStore for Arc<S>
where
    S: CounterStore + ?Sized,
{
    async fn try_admit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u32,
    ) -> Result<bool, ScsError> {
        (**self).try_admit(key, now_ms, window_ms, limit).await
    }
}

/// Redis-backed [`CounterStore`] plus the pub/sub surface of the analytics
/// bus.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
    script: Arc<Script>,
}

impl RedisStore {
    /// Connects to the store at `addr` (`host:port`) and verifies liveness
    /// with a `PING`.
    ///
    /// # Errors
    ///
    /// Returns [`ScsError`] if the address is invalid, the connection cannot
    /// be established, or the ping fails. Boot treats this as fatal.
    pub async fn connect(addr: &str) -> Result<Self, ScsError> {
        let client = redis::Client::open(format!("redis://{addr}"))?;
        let mut conn = client.get_connection_manager().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!(%pong, "shared counter store ping");
        Ok(Self {
            client,
            conn,
            script: Arc::new(Script::new(SLIDING_WINDOW_SCRIPT)),
        })
    }

    /// Publishes `payload` to `channel`. Fire-and-forget callers log and
    /// drop the error.
    ///
    /// # Errors
    ///
    /// Returns [`ScsError`] if the publish fails.
    pub async fn publish(&self, channel: &str, payload: String) -> Result<(), ScsError> {
        let mut conn = self.conn.clone();
        let _: () = conn.publish(channel, payload).await?;
        Ok(())
    }

    /// Subscribes to `channel` on a dedicated connection and returns the
    /// stream of text payloads.
    ///
    /// Non-text messages are logged and skipped; the stream ends when the
    /// connection drops.
    ///
    /// # Errors
    ///
    /// Returns [`ScsError`] if the subscription cannot be established.
    pub async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<impl Stream<Item = String> + Send + 'static, ScsError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        Ok(pubsub.into_on_message().filter_map(|message| async move {
            match message.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(err) => {
                    warn!(error = %err, "non-text message on SCS channel, skipping");
                    None
                },
            }
        }))
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn try_admit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u32,
    ) -> Result<bool, ScsError> {
        let salt: u32 = rand::thread_rng().gen_range(0..SALT_RANGE);
        let mut conn = self.conn.clone();
        let admitted: i64 = self
            .script
            .key(key)
            .arg(now_ms)
            .arg(window_ms)
            .arg(limit)
            .arg(salt)
            .invoke_async(&mut conn)
            .await?;
        Ok(admitted == 1)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory [`CounterStore`] double mirroring the script semantics.

    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use super::*;

    #[derive(Debug, Default)]
    pub(crate) struct MemoryStore {
        windows: Mutex<HashMap<String, Vec<i64>>>,
        calls: AtomicU64,
        failing: AtomicBool,
    }

    impl MemoryStore {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// Number of `try_admit` calls observed, including failed ones.
        pub(crate) fn calls(&self) -> u64 {
            self.calls.load(Ordering::Relaxed)
        }

        /// Makes every subsequent call fail, simulating a store outage.
        pub(crate) fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::Relaxed);
        }
    }

    #[async_trait]
    impl CounterStore for MemoryStore {
        async fn try_admit(
            &self,
            key: &str,
            now_ms: i64,
            window_ms: i64,
            limit: u32,
        ) -> Result<bool, ScsError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.failing.load(Ordering::Relaxed) {
                return Err(ScsError::Redis(redis::RedisError::from((
                    redis::ErrorKind::IoError,
                    "simulated outage",
                ))));
            }

            let mut windows = self.windows.lock().expect("window map poisoned");
            let admissions = windows.entry(key.to_owned()).or_default();
            let clear_before = now_ms - window_ms;
            admissions.retain(|&t| t > clear_before);
            if admissions.len() < limit as usize {
                admissions.push(now_ms);
                Ok(true)
            } else {
                Ok(false)
            }
        }
    }

    #[tokio::test]
    async fn admits_until_the_window_is_full() {
        let store = MemoryStore::new();
        for _ in 0..3 {
            assert!(store.try_admit("ratelimit:a", 100, 1_000, 3).await.unwrap());
        }
        assert!(!store.try_admit("ratelimit:a", 200, 1_000, 3).await.unwrap());
    }

    #[tokio::test]
    async fn boundary_admission_is_pruned() {
        let store = MemoryStore::new();
        assert!(store.try_admit("ratelimit:a", 0, 1_000, 1).await.unwrap());
        // Exactly one window later the prior admission falls out: the window
        // is open on the left.
        assert!(store.try_admit("ratelimit:a", 1_000, 1_000, 1).await.unwrap());
        // Inside the window it still counts.
        assert!(!store.try_admit("ratelimit:a", 1_999, 1_000, 1).await.unwrap());
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let store = MemoryStore::new();
        assert!(store.try_admit("ratelimit:a", 0, 1_000, 1).await.unwrap());
        assert!(store.try_admit("ratelimit:b", 0, 1_000, 1).await.unwrap());
        assert!(!store.try_admit("ratelimit:a", 1, 1_000, 1).await.unwrap());
    }
}
