//! # vigil-gateway
//!
//! The intrusion-detection gateway daemon. Clients open long-lived
//! bidirectional gRPC streams and push log events; the gateway authenticates
//! each event, enforces per-source sliding-window rate limits against a
//! shared counter store, answers with a per-event verdict on the same
//! stream, publishes sanitized traffic summaries to the analytics bus, and
//! fans aggregate and anomaly telemetry out to dashboard websockets.
//!
//! # Modules
//!
//! - [`scs`]: shared counter store facade (Redis script, publish, subscribe)
//! - [`limiter`]: sliding-window admission control with the L1 blocklist
//! - [`ingest`]: per-stream state machine behind the gRPC service
//! - [`publisher`]: bounded fire-and-forget analytics publish pool
//! - [`hub`]: dashboard subscriber registry, aggregator, anomaly forwarder
//! - [`dashboard`]: the `/ws` HTTP surface

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod dashboard;
pub mod hub;
pub mod ingest;
pub mod limiter;
pub mod proto;
pub mod publisher;
pub mod scs;
