//! Bounded fire-and-forget analytics publishing.
//!
//! Stream handlers must never wait on the analytics bus, so records are
//! handed to a bounded queue drained by a small pool of publish workers.
//! When the queue is full the record is dropped and counted; the analytics
//! path is intentionally lossy.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use vigil_core::{Stats, TrafficSummary};

use crate::scs::RedisStore;

/// Handle for enqueueing traffic summaries; cheap to clone per stream.
#[derive(Debug, Clone)]
pub struct AnalyticsPublisher {
    queue: mpsc::Sender<TrafficSummary>,
    stats: Arc<Stats>,
}

impl AnalyticsPublisher {
    /// Starts `workers` publish workers draining a queue of `queue_depth`
    /// records and returns the enqueue handle.
    ///
    /// Workers stop when the last handle is dropped.
    #[must_use]
    pub fn spawn(
        store: RedisStore,
        channel: String,
        stats: Arc<Stats>,
        queue_depth: usize,
        workers: usize,
    ) -> Self {
        let (queue, records) = mpsc::channel(queue_depth.max(1));
        let records = Arc::new(tokio::sync::Mutex::new(records));
        for worker in 0..workers.max(1) {
            let records = Arc::clone(&records);
            let store = store.clone();
            let channel = channel.clone();
            tokio::spawn(async move {
                run_worker(worker, &store, &channel, &records).await;
            });
        }
        Self { queue, stats }
    }

    #[cfg(test)]
    pub(crate) fn with_queue(queue: mpsc::Sender<TrafficSummary>, stats: Arc<Stats>) -> Self {
        Self { queue, stats }
    }

    /// Enqueues one summary without blocking.
    ///
    /// A full queue drops the record and bumps the drop counter; a closed
    /// queue (shutdown) drops it silently.
    pub fn try_publish(&self, summary: TrafficSummary) {
        match self.queue.try_send(summary) {
            Ok(()) => {},
            Err(TrySendError::Full(summary)) => {
                self.stats.record_analytics_drop();
                debug!(ip = %summary.ip, "analytics queue full, record dropped");
            },
            Err(TrySendError::Closed(_)) => {},
        }
    }
}

async fn run_worker(
    worker: usize,
    store: &RedisStore,
    channel: &str,
    records: &tokio::sync::Mutex<mpsc::Receiver<TrafficSummary>>,
) {
    loop {
        // Hold the lock only while waiting for the next record, so workers
        // publish concurrently.
        let summary = { records.lock().await.recv().await };
        let Some(summary) = summary else { break };
        if let Err(err) = store.publish(channel, summary.encode()).await {
            warn!(error = %err, channel, "analytics publish failed, record dropped");
        }
    }
    debug!(worker, "analytics publish worker stopped");
}
