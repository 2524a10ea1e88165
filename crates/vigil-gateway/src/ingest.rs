//! The per-stream detection state machine behind the gRPC service.
//!
//! Each accepted `StreamLogs` stream gets one handler task. For every
//! inbound event the task counts it, verifies the HMAC signature, consults
//! the rate limiter, and emits exactly one verdict on the same stream, in
//! arrival order, before reading the next event. The verdict queue is
//! bounded, so a peer that stops draining responses back-pressures the
//! receive loop instead of growing memory.
//!
//! After the verdict is queued the event's traffic summary is handed to the
//! analytics publisher, which never blocks the stream. Verification and
//! rate-limit failures produce verdicts, never stream errors; only
//! transport I/O ends the stream.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{info, warn};
use vigil_core::{SignatureVerifier, Stats, TrafficSummary};

use crate::limiter::{Decision, RateLimiter};
use crate::proto::intrusion_detection_service_server::IntrusionDetectionService;
use crate::proto::{LogRequest, LogResponse};
use crate::publisher::AnalyticsPublisher;
use crate::scs::CounterStore;

/// Outbound verdict queue bound per stream. Small, so a slow peer
/// back-pressures the receive loop quickly.
const VERDICT_QUEUE: usize = 16;

/// Per-event verdict status on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictStatus {
    /// Signature valid and within the rate limit.
    Allowed,
    /// HMAC verification failed.
    BlockedInvalidSig,
    /// The sliding window for this source is full, or the source is
    /// locally blocked.
    BlockedRateLimit,
}

impl VerdictStatus {
    /// The wire representation of this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allowed => "ALLOWED",
            Self::BlockedInvalidSig => "BLOCKED_INVALID_SIG",
            Self::BlockedRateLimit => "BLOCKED_RATE_LIMIT",
        }
    }

    /// Whether this verdict counts toward the blocked totals.
    #[must_use]
    pub const fn is_blocked(self) -> bool {
        !matches!(self, Self::Allowed)
    }
}

/// The `IntrusionDetectionService` implementation.
pub struct IntrusionGateway<S> {
    verifier: SignatureVerifier,
    limiter: Arc<RateLimiter<S>>,
    stats: Arc<Stats>,
    publisher: AnalyticsPublisher,
}

impl<S: CounterStore> IntrusionGateway<S> {
    /// Assembles the service from its collaborators.
    pub fn new(
        verifier: SignatureVerifier,
        limiter: RateLimiter<S>,
        stats: Arc<Stats>,
        publisher: AnalyticsPublisher,
    ) -> Self {
        Self {
            verifier,
            limiter: Arc::new(limiter),
            stats,
            publisher,
        }
    }
}

/// Runs one event through verification and admission control.
pub(crate) async fn evaluate<S: CounterStore>(
    verifier: &SignatureVerifier,
    limiter: &RateLimiter<S>,
    event: &LogRequest,
) -> (VerdictStatus, String) {
    if !verifier.verify(&event.payload, event.timestamp, &event.signature) {
        return (
            VerdictStatus::BlockedInvalidSig,
            "Invalid HMAC signature".to_owned(),
        );
    }
    match limiter.check(&event.ip_address).await {
        Decision::Deny => (
            VerdictStatus::BlockedRateLimit,
            format!(
                "Rate limit exceeded: {} requests per {:?}",
                limiter.limit(),
                limiter.window()
            ),
        ),
        Decision::Admit => (
            VerdictStatus::Allowed,
            "Request processed successfully".to_owned(),
        ),
    }
}

#[tonic::async_trait]
impl<S: CounterStore> IntrusionDetectionService for IntrusionGateway<S> {
    type StreamLogsStream = ReceiverStream<Result<LogResponse, Status>>;

    async fn stream_logs(
        &self,
        request: Request<Streaming<LogRequest>>,
    ) -> Result<Response<Self::StreamLogsStream>, Status> {
        let peer = request.remote_addr();
        info!(peer = ?peer, "client connected to StreamLogs");

        let mut events = request.into_inner();
        let (verdicts, outbound) = mpsc::channel(VERDICT_QUEUE);
        let verifier = self.verifier.clone();
        let limiter = Arc::clone(&self.limiter);
        let stats = Arc::clone(&self.stats);
        let publisher = self.publisher.clone();

        tokio::spawn(async move {
            loop {
                let event = match events.message().await {
                    Ok(Some(event)) => event,
                    Ok(None) => {
                        info!(peer = ?peer, "client closed stream");
                        break;
                    },
                    Err(status) => {
                        warn!(peer = ?peer, error = %status, "stream receive error");
                        let _ = verdicts.send(Err(status)).await;
                        break;
                    },
                };

                stats.record_request();

                let (status, message) = evaluate(&verifier, &limiter, &event).await;
                if status.is_blocked() {
                    stats.record_blocked();
                }

                let response = LogResponse {
                    status: status.as_str().to_owned(),
                    message,
                };
                // Verdict first, then analytics: the downstream must never
                // see an event the client has not been answered for. A send
                // failure means the peer is gone.
                if verdicts.send(Ok(response)).await.is_err() {
                    warn!(peer = ?peer, "stream send error");
                    break;
                }

                publisher.try_publish(TrafficSummary {
                    ip: event.ip_address,
                    timestamp_ns: event.timestamp,
                    payload_size: event.payload.len(),
                });
            }
        });

        Ok(Response::new(ReceiverStream::new(outbound)))
    }
}
