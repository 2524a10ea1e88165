//! Local blocklist: the in-process negative cache of rate-limited sources.
//!
//! When the shared counter store denies an IP, the gateway records it here
//! for a short TTL and answers subsequent events from that IP without
//! another store round-trip. Under a flood this keeps the per-event cost of
//! an offending source to one map lookup.
//!
//! Entries expire by monotonic clock so wall-clock jumps cannot extend or
//! shorten a block. The set is unbounded in principle but self-limiting in
//! practice: entries outlive their TTL only until the next [`cleanup`] pass,
//! which the gateway schedules on a coarse interval.
//!
//! [`cleanup`]: LocalBlocklist::cleanup
//!
//! # Concurrency
//!
//! Multi-reader / single-writer. The hot path is [`is_blocked`], a read-lock
//! lookup; writes happen only on a fresh denial or during cleanup.
//!
//! [`is_blocked`]: LocalBlocklist::is_blocked

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Negative cache mapping source IP literals to block-expiry instants.
#[derive(Debug, Default)]
pub struct LocalBlocklist {
    entries: RwLock<HashMap<String, Instant>>,
}

impl LocalBlocklist {
    /// Creates an empty blocklist.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` iff `ip` has a non-expired entry.
    ///
    /// An expired entry answers `false` immediately; it is physically removed
    /// by the next [`cleanup`](Self::cleanup) pass, not here, so reads never
    /// take the write lock.
    #[must_use]
    pub fn is_blocked(&self, ip: &str) -> bool {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        entries.get(ip).is_some_and(|expiry| Instant::now() < *expiry)
    }

    /// Records a block for `ip` expiring `ttl` from now, overwriting any
    /// existing entry.
    pub fn block(&self, ip: &str, ttl: Duration) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        entries.insert(ip.to_owned(), Instant::now() + ttl);
    }

    /// Removes all expired entries and returns how many were dropped.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, expiry| now < *expiry);
        before - entries.len()
    }

    /// Number of entries currently held, expired or not.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn unknown_ip_is_not_blocked() {
        let list = LocalBlocklist::new();
        assert!(!list.is_blocked("1.2.3.4"));
    }

    #[test]
    fn blocked_ip_is_blocked_until_expiry() {
        let list = LocalBlocklist::new();
        list.block("9.9.9.9", Duration::from_millis(50));
        assert!(list.is_blocked("9.9.9.9"));

        thread::sleep(Duration::from_millis(60));
        assert!(!list.is_blocked("9.9.9.9"));
    }

    #[test]
    fn block_overwrites_existing_expiry() {
        let list = LocalBlocklist::new();
        list.block("9.9.9.9", Duration::from_millis(10));
        list.block("9.9.9.9", Duration::from_secs(60));

        thread::sleep(Duration::from_millis(20));
        assert!(list.is_blocked("9.9.9.9"));
    }

    #[test]
    fn cleanup_drops_only_expired_entries() {
        let list = LocalBlocklist::new();
        list.block("a", Duration::from_millis(10));
        list.block("b", Duration::from_secs(60));
        assert_eq!(list.tracked(), 2);

        thread::sleep(Duration::from_millis(20));
        assert_eq!(list.cleanup(), 1);
        assert_eq!(list.tracked(), 1);
        assert!(list.is_blocked("b"));
    }

    #[test]
    fn expired_entry_answers_unblocked_before_cleanup() {
        let list = LocalBlocklist::new();
        list.block("a", Duration::from_millis(10));
        thread::sleep(Duration::from_millis(20));

        // Still tracked, but no longer authoritative.
        assert_eq!(list.tracked(), 1);
        assert!(!list.is_blocked("a"));
    }
}
