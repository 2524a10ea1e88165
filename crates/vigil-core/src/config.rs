//! Gateway configuration.
//!
//! One typed struct carrying every knob the daemon exposes. Defaults match
//! the reference deployment; the binary overrides them from flags and
//! environment.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use secrecy::SecretString;

/// Development-only default shared secret, overridden in any real deployment.
pub const DEFAULT_SECRET: &str = "my-super-secret-key";

/// Complete gateway configuration.
#[derive(Debug)]
pub struct GatewayConfig {
    /// gRPC ingress listen address.
    pub server_addr: SocketAddr,
    /// Dashboard HTTP listen address.
    pub http_addr: SocketAddr,
    /// Shared counter store endpoint, `host:port`.
    pub scs_addr: String,
    /// HMAC shared secret.
    pub secret: SecretString,
    /// Admissions per window per IP.
    pub rate_limit: u32,
    /// Sliding-window length.
    pub rate_limit_window: Duration,
    /// Local blocklist entry TTL.
    pub local_block_ttl: Duration,
    /// Blocklist cleanup interval.
    pub l1_cleanup_interval: Duration,
    /// Aggregator broadcast interval.
    pub aggregator_interval: Duration,
    /// Outbound analytics channel name.
    pub traffic_channel: String,
    /// Inbound anomaly alert channel name.
    pub alerts_channel: String,
    /// Bound on queued analytics records awaiting publish.
    pub publish_queue_depth: usize,
    /// Number of analytics publish workers.
    pub publish_workers: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 50051)),
            http_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)),
            scs_addr: "localhost:6379".to_owned(),
            secret: SecretString::from(DEFAULT_SECRET.to_owned()),
            rate_limit: 100,
            rate_limit_window: Duration::from_secs(10),
            local_block_ttl: Duration::from_secs(60),
            l1_cleanup_interval: Duration::from_secs(30),
            aggregator_interval: Duration::from_secs(1),
            traffic_channel: "traffic_monitor".to_owned(),
            alerts_channel: "ai_alerts".to_owned(),
            publish_queue_depth: 1024,
            publish_workers: 4,
        }
    }
}
