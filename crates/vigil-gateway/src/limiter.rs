//! Sliding-window admission control.
//!
//! Two tiers: the local blocklist answers for recently-denied sources
//! without leaving the process, and the shared counter store arbitrates
//! everything else with one atomic script call per decision. A denial from
//! the store seeds the blocklist for the configured TTL, so an offending IP
//! pays for at most one store round-trip per TTL even if the window would
//! have cleared sooner — under a flood this is the difference between one
//! map lookup and one network call per event.
//!
//! If the store is unreachable, errors, or exceeds its deadline, the
//! limiter fails open and admits the event: availability over blocking on
//! operator infrastructure failure.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, trace, warn};
use vigil_core::{GatewayConfig, LocalBlocklist};

use crate::scs::{CounterStore, ScsError};

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The event is within the window; it was counted and may proceed.
    Admit,
    /// The event exceeds the window, or its source is locally blocked.
    Deny,
}

/// Per-source sliding-window rate limiter over a [`CounterStore`].
#[derive(Debug)]
pub struct RateLimiter<S> {
    store: S,
    blocklist: Arc<LocalBlocklist>,
    limit: u32,
    window: Duration,
    block_ttl: Duration,
}

impl<S: CounterStore> RateLimiter<S> {
    /// Builds a limiter from the gateway configuration.
    #[must_use]
    pub fn new(store: S, blocklist: Arc<LocalBlocklist>, config: &GatewayConfig) -> Self {
        Self {
            store,
            blocklist,
            limit: config.rate_limit,
            window: config.rate_limit_window,
            block_ttl: config.local_block_ttl,
        }
    }

    /// Admissions allowed per window.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Sliding-window length.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Decides admit or deny for one event from `ip` at the current wall
    /// clock.
    ///
    /// The store call runs under a deadline of one window length; on error
    /// or timeout the limiter fails open.
    pub async fn check(&self, ip: &str) -> Decision {
        if self.blocklist.is_blocked(ip) {
            trace!(ip, "denied by local blocklist");
            return Decision::Deny;
        }

        let key = format!("ratelimit:{ip}");
        let now_ms = epoch_millis();
        let window_ms = i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX);

        let call = self.store.try_admit(&key, now_ms, window_ms, self.limit);
        let outcome = match tokio::time::timeout(self.window, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ScsError::Timeout(self.window)),
        };

        match outcome {
            Ok(true) => Decision::Admit,
            Ok(false) => {
                self.blocklist.block(ip, self.block_ttl);
                debug!(
                    ip,
                    limit = self.limit,
                    window = ?self.window,
                    "rate limit exceeded, source blocked locally"
                );
                Decision::Deny
            },
            Err(err) => {
                warn!(ip, error = %err, "Redis error (allowing request)");
                Decision::Admit
            },
        }
    }
}

/// Wall-clock milliseconds since epoch; the store script must agree with
/// other gateway replicas on "now", so this is deliberately not monotonic.
fn epoch_millis() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX),
        Err(_) => 0,
    }
}
