//! Process-wide stats ledger feeding the telemetry hub.
//!
//! Four monotonic counters plus a drop counter for the lossy analytics path.
//! The two per-second counters are read-and-reset by the aggregator exactly
//! once per tick; the swap is a single atomic exchange so increments racing
//! the tick land on one side or the other without being lost.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic request counters shared between stream handlers and the aggregator.
#[derive(Debug, Default)]
pub struct Stats {
    requests_this_second: AtomicU64,
    blocked_this_second: AtomicU64,
    total_requests: AtomicU64,
    total_blocked: AtomicU64,
    analytics_dropped: AtomicU64,
}

/// Per-second counters captured by one aggregator tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickCounters {
    /// Events received since the previous tick.
    pub requests: u64,
    /// Events blocked since the previous tick.
    pub blocked: u64,
}

impl Stats {
    /// Creates a zeroed ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one received event.
    pub fn record_request(&self) {
        // Relaxed is enough: these are independent counters, not
        // synchronization points.
        self.requests_this_second.fetch_add(1, Ordering::Relaxed);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one blocked event.
    pub fn record_blocked(&self) {
        self.blocked_this_second.fetch_add(1, Ordering::Relaxed);
        self.total_blocked.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one analytics record dropped because the publish queue was full.
    pub fn record_analytics_drop(&self) {
        self.analytics_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Atomically captures and zeroes the per-second counters.
    ///
    /// Called by the aggregator once per tick. Increments interleaving with
    /// the swap are attributed to whichever tick wins; the totals are not
    /// affected.
    #[must_use]
    pub fn take_tick(&self) -> TickCounters {
        TickCounters {
            requests: self.requests_this_second.swap(0, Ordering::Relaxed),
            blocked: self.blocked_this_second.swap(0, Ordering::Relaxed),
        }
    }

    /// Total events received over the process lifetime.
    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Total events blocked over the process lifetime.
    #[must_use]
    pub fn total_blocked(&self) -> u64 {
        self.total_blocked.load(Ordering::Relaxed)
    }

    /// Total analytics records dropped at the publish queue.
    #[must_use]
    pub fn analytics_dropped(&self) -> u64 {
        self.analytics_dropped.load(Ordering::Relaxed)
    }
}
