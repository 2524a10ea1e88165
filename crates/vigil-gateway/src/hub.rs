//! Telemetry hub: dashboard subscriber registry and the two broadcast
//! sources feeding it.
//!
//! Dashboards attach over websockets and receive two frame shapes, both
//! JSON text: the once-per-second aggregate `{rps, blocked, timestamp}` and
//! re-wrapped anomaly alerts `{"type":"ai_alert", ...}` from the external
//! detector. Subscribers distinguish them by the presence of `type`.
//!
//! Each subscriber is an outbound frame queue; the socket pump lives in the
//! dashboard module. Broadcast snapshots the registry under a read lock and
//! enqueues without blocking: a lagging subscriber loses frames (delivery
//! is best-effort), a closed one is evicted after the attempt. The hub
//! never blocks the stream handlers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_core::Stats;

/// Outbound frames buffered per subscriber before frames are shed.
const SUBSCRIBER_QUEUE: usize = 64;

/// Identifies one dashboard subscription for removal.
pub type SubscriberId = u64;

/// Registry of live dashboard subscribers.
#[derive(Debug, Default)]
pub struct TelemetryHub {
    subscribers: RwLock<HashMap<SubscriberId, mpsc::Sender<String>>>,
    next_id: AtomicU64,
}

impl TelemetryHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber and returns its id and frame queue.
    pub fn add(&self) -> (SubscriberId, mpsc::Receiver<String>) {
        let (frames, queue) = mpsc::channel(SUBSCRIBER_QUEUE);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let total = {
            let mut subscribers = self
                .subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            subscribers.insert(id, frames);
            subscribers.len()
        };
        info!(subscriber = id, total, "dashboard client connected");
        (id, queue)
    }

    /// Unregisters a subscriber; repeated removal is a no-op.
    pub fn remove(&self, id: SubscriberId) {
        let remaining = {
            let mut subscribers = self
                .subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if subscribers.remove(&id).is_none() {
                return;
            }
            subscribers.len()
        };
        info!(subscriber = id, total = remaining, "dashboard client disconnected");
    }

    /// Sends one text frame to every live subscriber.
    ///
    /// Enqueueing never blocks: a full queue sheds this frame for that
    /// subscriber, a closed queue marks it for eviction. Evictions happen
    /// after the registry lock is released.
    pub fn broadcast(&self, frame: &str) {
        let dead: Vec<SubscriberId> = {
            let subscribers = self
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            subscribers
                .iter()
                .filter_map(|(id, frames)| match frames.try_send(frame.to_owned()) {
                    Ok(()) => None,
                    Err(TrySendError::Full(_)) => {
                        debug!(subscriber = id, "subscriber lagging, frame shed");
                        None
                    },
                    Err(TrySendError::Closed(_)) => Some(*id),
                })
                .collect()
        };
        for id in dead {
            self.remove(id);
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// The once-per-second aggregate frame. No `type` field: dashboards key on
/// its absence.
#[derive(Debug, Serialize)]
struct AggregateFrame {
    rps: u64,
    blocked: u64,
    timestamp: i64,
}

/// Anomaly alert as received on the alerts channel and re-broadcast.
///
/// Missing fields default like the reference implementation; the `type`
/// field is overwritten regardless of what the upstream carried.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct AnomalyAlert {
    #[serde(rename = "type")]
    kind: String,
    ip: String,
    payload_size: u64,
    timestamp: i64,
}

/// Drains the per-second counters once per `period` and broadcasts the
/// aggregate frame until cancelled.
pub async fn run_aggregator(
    hub: Arc<TelemetryHub>,
    stats: Arc<Stats>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let tick = stats.take_tick();
                let frame = AggregateFrame {
                    rps: tick.requests,
                    blocked: tick.blocked,
                    timestamp: unix_seconds(),
                };
                if let Ok(encoded) = serde_json::to_string(&frame) {
                    hub.broadcast(&encoded);
                }
            }
            () = shutdown.cancelled() => break,
        }
    }
    debug!("aggregator stopped");
}

/// Forwards anomaly alerts from the external detector to the dashboards
/// until the channel closes or shutdown is requested.
///
/// Each message is parsed, stamped with `type:"ai_alert"` and re-broadcast;
/// parse failures are logged and skipped.
pub async fn run_alert_forwarder<M>(hub: Arc<TelemetryHub>, alerts: M, shutdown: CancellationToken)
where
    M: Stream<Item = String> + Send + 'static,
{
    tokio::pin!(alerts);
    loop {
        tokio::select! {
            message = alerts.next() => {
                let Some(message) = message else {
                    warn!("anomaly alert channel closed");
                    break;
                };
                let mut alert: AnomalyAlert = match serde_json::from_str(&message) {
                    Ok(alert) => alert,
                    Err(err) => {
                        warn!(error = %err, "anomaly alert parse error");
                        continue;
                    },
                };
                alert.kind = "ai_alert".to_owned();
                if let Ok(encoded) = serde_json::to_string(&alert) {
                    hub.broadcast(&encoded);
                    info!(
                        ip = %alert.ip,
                        payload_size = alert.payload_size,
                        "anomaly alert forwarded"
                    );
                }
            }
            () = shutdown.cancelled() => break,
        }
    }
}

fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let hub = TelemetryHub::new();
        let (_a, mut rx_a) = hub.add();
        let (_b, mut rx_b) = hub.add();

        hub.broadcast("frame");
        assert_eq!(rx_a.recv().await.as_deref(), Some("frame"));
        assert_eq!(rx_b.recv().await.as_deref(), Some("frame"));
    }

    #[tokio::test]
    async fn closed_subscriber_is_evicted_on_broadcast() {
        let hub = TelemetryHub::new();
        let (_id, rx) = hub.add();
        drop(rx);
        assert_eq!(hub.subscriber_count(), 1);

        hub.broadcast("frame");
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_sheds_frames_but_stays() {
        let hub = TelemetryHub::new();
        let (_id, mut rx) = hub.add();

        for n in 0..=SUBSCRIBER_QUEUE {
            hub.broadcast(&n.to_string());
        }
        assert_eq!(hub.subscriber_count(), 1);

        // The queue holds the first SUBSCRIBER_QUEUE frames; the last one
        // was shed.
        let mut received = 0;
        while let Ok(frame) = rx.try_recv() {
            assert_ne!(frame, SUBSCRIBER_QUEUE.to_string());
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_QUEUE);
    }

    #[test]
    fn remove_is_idempotent() {
        let hub = TelemetryHub::new();
        let (id, _rx) = hub.add();
        hub.remove(id);
        hub.remove(id);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn aggregator_drains_and_resets_counters() {
        let hub = Arc::new(TelemetryHub::new());
        let stats = Arc::new(Stats::new());
        let shutdown = CancellationToken::new();
        let (_id, mut frames) = hub.add();

        stats.record_request();
        stats.record_request();
        stats.record_request();
        stats.record_blocked();

        let task = tokio::spawn(run_aggregator(
            Arc::clone(&hub),
            Arc::clone(&stats),
            Duration::from_secs(1),
            shutdown.clone(),
        ));

        let first = frames.recv().await.expect("first tick frame");
        let first: serde_json::Value = serde_json::from_str(&first).unwrap();
        assert_eq!(first["rps"], 3);
        assert_eq!(first["blocked"], 1);
        assert!(first.get("type").is_none());

        let second = frames.recv().await.expect("second tick frame");
        let second: serde_json::Value = serde_json::from_str(&second).unwrap();
        assert_eq!(second["rps"], 0);
        assert_eq!(second["blocked"], 0);

        // Totals are untouched by the per-tick swaps.
        assert_eq!(stats.total_requests(), 3);
        assert_eq!(stats.total_blocked(), 1);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn forwarder_rewraps_alerts_verbatim() {
        let hub = Arc::new(TelemetryHub::new());
        let shutdown = CancellationToken::new();
        let (_id, mut frames) = hub.add();

        let alerts = futures::stream::iter(vec![
            r#"{"ip":"2.2.2.2","payload_size":77,"timestamp":123}"#.to_owned(),
        ]);
        run_alert_forwarder(Arc::clone(&hub), alerts, shutdown).await;

        assert_eq!(
            frames.recv().await.as_deref(),
            Some(r#"{"type":"ai_alert","ip":"2.2.2.2","payload_size":77,"timestamp":123}"#)
        );
    }

    #[tokio::test]
    async fn forwarder_overwrites_upstream_type() {
        let hub = Arc::new(TelemetryHub::new());
        let shutdown = CancellationToken::new();
        let (_id, mut frames) = hub.add();

        let alerts = futures::stream::iter(vec![
            r#"{"type":"something-else","ip":"3.3.3.3","payload_size":1,"timestamp":9}"#.to_owned(),
        ]);
        run_alert_forwarder(Arc::clone(&hub), alerts, shutdown).await;

        let frame: serde_json::Value =
            serde_json::from_str(&frames.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "ai_alert");
        assert_eq!(frame["ip"], "3.3.3.3");
    }

    #[tokio::test]
    async fn forwarder_skips_malformed_alerts() {
        let hub = Arc::new(TelemetryHub::new());
        let shutdown = CancellationToken::new();
        let (_id, mut frames) = hub.add();

        let alerts = futures::stream::iter(vec![
            "not json".to_owned(),
            r#"{"ip":"2.2.2.2","payload_size":77,"timestamp":123}"#.to_owned(),
        ]);
        run_alert_forwarder(Arc::clone(&hub), alerts, shutdown).await;

        // Only the well-formed alert came through.
        let frame: serde_json::Value =
            serde_json::from_str(&frames.recv().await.unwrap()).unwrap();
        assert_eq!(frame["ip"], "2.2.2.2");
        assert!(frames.try_recv().is_err());
    }
}
