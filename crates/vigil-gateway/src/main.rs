//! vigil-gateway - real-time intrusion-detection gateway daemon.
//!
//! Boot order: parse flags, initialize tracing, connect and ping the shared
//! counter store (fatal on failure), subscribe to the anomaly alert
//! channel, then spawn the periodic tasks (blocklist cleanup, aggregator),
//! the alert forwarder, the analytics publish pool and the dashboard HTTP
//! server, and finally serve the gRPC ingress until SIGTERM/SIGINT.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use secrecy::SecretString;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use vigil_core::{GatewayConfig, LocalBlocklist, SignatureVerifier, Stats};
use vigil_gateway::ingest::IntrusionGateway;
use vigil_gateway::limiter::RateLimiter;
use vigil_gateway::proto::intrusion_detection_service_server::IntrusionDetectionServiceServer;
use vigil_gateway::publisher::AnalyticsPublisher;
use vigil_gateway::scs::RedisStore;
use vigil_gateway::{dashboard, hub};

/// vigil gateway - streaming intrusion detection
#[derive(Parser, Debug)]
#[command(name = "vigil-gateway")]
#[command(version, about, long_about = None)]
struct Args {
    /// gRPC ingress listen address
    #[arg(long, default_value = "0.0.0.0:50051")]
    server_addr: SocketAddr,

    /// Dashboard HTTP listen address
    #[arg(long, default_value = "0.0.0.0:8080")]
    http_addr: SocketAddr,

    /// Shared counter store (Redis) endpoint, host:port
    #[arg(long, default_value = "localhost:6379")]
    scs_addr: String,

    /// HMAC shared secret
    #[arg(
        long,
        env = "VIGIL_SECRET",
        default_value = vigil_core::config::DEFAULT_SECRET,
        hide_env_values = true
    )]
    secret: String,

    /// Admissions per window per source IP
    #[arg(long, default_value_t = 100)]
    rate_limit: u32,

    /// Sliding-window length in seconds
    #[arg(long, default_value_t = 10)]
    rate_limit_window_secs: u64,

    /// Local blocklist TTL in seconds
    #[arg(long, default_value_t = 60)]
    local_block_ttl_secs: u64,

    /// Blocklist cleanup interval in seconds
    #[arg(long, default_value_t = 30)]
    l1_cleanup_interval_secs: u64,

    /// Aggregator broadcast interval in seconds
    #[arg(long, default_value_t = 1)]
    aggregator_interval_secs: u64,

    /// Outbound analytics channel name
    #[arg(long, default_value = "traffic_monitor")]
    traffic_channel: String,

    /// Inbound anomaly alert channel name
    #[arg(long, default_value = "ai_alerts")]
    alerts_channel: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> GatewayConfig {
        GatewayConfig {
            server_addr: self.server_addr,
            http_addr: self.http_addr,
            scs_addr: self.scs_addr,
            secret: SecretString::from(self.secret),
            rate_limit: self.rate_limit,
            rate_limit_window: Duration::from_secs(self.rate_limit_window_secs),
            local_block_ttl: Duration::from_secs(self.local_block_ttl_secs),
            l1_cleanup_interval: Duration::from_secs(self.l1_cleanup_interval_secs),
            aggregator_interval: Duration::from_secs(self.aggregator_interval_secs),
            traffic_channel: self.traffic_channel,
            alerts_channel: self.alerts_channel,
            ..GatewayConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.into_config();

    // The store arbitrates every admission decision; refusing to start
    // without it beats silently failing open from the first event.
    let store = RedisStore::connect(&config.scs_addr)
        .await
        .context("failed to connect to Redis")?;
    info!(addr = %config.scs_addr, "Connected to Redis");

    let alerts = store
        .subscribe(&config.alerts_channel)
        .await
        .context("failed to subscribe to anomaly alert channel")?;
    info!(channel = %config.alerts_channel, "Subscribed to anomaly alert channel");

    let stats = Arc::new(Stats::new());
    let blocklist = Arc::new(LocalBlocklist::new());
    let hub = Arc::new(hub::TelemetryHub::new());
    let shutdown = CancellationToken::new();

    tokio::spawn(run_blocklist_cleanup(
        Arc::clone(&blocklist),
        config.l1_cleanup_interval,
        shutdown.clone(),
    ));
    tokio::spawn(hub::run_aggregator(
        Arc::clone(&hub),
        Arc::clone(&stats),
        config.aggregator_interval,
        shutdown.clone(),
    ));
    tokio::spawn(hub::run_alert_forwarder(
        Arc::clone(&hub),
        alerts,
        shutdown.clone(),
    ));

    let publisher = AnalyticsPublisher::spawn(
        store.clone(),
        config.traffic_channel.clone(),
        Arc::clone(&stats),
        config.publish_queue_depth,
        config.publish_workers,
    );

    let http_listener = TcpListener::bind(config.http_addr)
        .await
        .context("failed to bind dashboard listener")?;
    info!(addr = %config.http_addr, "WebSocket dashboard listening");
    let http_hub = Arc::clone(&hub);
    let http_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = dashboard::serve(http_listener, http_hub, http_shutdown.clone()).await {
            error!(error = %err, "dashboard HTTP server error");
        }
        // An HTTP server exit, clean or not, takes the process down with it.
        http_shutdown.cancel();
    });

    let verifier = SignatureVerifier::new(&config.secret);
    let limiter = RateLimiter::new(store, Arc::clone(&blocklist), &config);
    let gateway = IntrusionGateway::new(verifier, limiter, Arc::clone(&stats), publisher);

    info!(addr = %config.server_addr, "gRPC ingress listening");
    info!(
        limit = config.rate_limit,
        window = ?config.rate_limit_window,
        "Rate limit configured per IP"
    );

    tonic::transport::Server::builder()
        .add_service(IntrusionDetectionServiceServer::new(gateway))
        .serve_with_shutdown(config.server_addr, shutdown_signal(shutdown.clone()))
        .await
        .context("gRPC server error")?;

    shutdown.cancel();
    info!(
        total_requests = stats.total_requests(),
        total_blocked = stats.total_blocked(),
        analytics_dropped = stats.analytics_dropped(),
        "gateway shut down"
    );
    Ok(())
}

/// Removes expired blocklist entries on a coarse schedule.
async fn run_blocklist_cleanup(
    blocklist: Arc<LocalBlocklist>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = blocklist.cleanup();
                if removed > 0 {
                    debug!(removed, tracked = blocklist.tracked(), "blocklist cleanup");
                }
            }
            () = shutdown.cancelled() => break,
        }
    }
}

/// Resolves when the process should stop: SIGTERM, SIGINT, or an internal
/// shutdown request. Cancels the token on the way out.
async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT");
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
            () = shutdown.cancelled() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C"),
            () = shutdown.cancelled() => {},
        }
    }

    shutdown.cancel();
}
