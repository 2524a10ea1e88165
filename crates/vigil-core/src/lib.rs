//! # vigil-core
//!
//! Transport-free building blocks for the vigil intrusion-detection gateway:
//! event authentication, the local negative cache consulted before the shared
//! counter store, the process-wide stats ledger, and the analytics record
//! format published to the anomaly-detection worker.
//!
//! Everything in this crate is synchronous and free of I/O; the gateway crate
//! wires these pieces to the gRPC ingress, the shared counter store, and the
//! dashboard fan-out.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod analytics;
pub mod blocklist;
pub mod config;
pub mod signature;
pub mod stats;

pub use analytics::TrafficSummary;
pub use blocklist::LocalBlocklist;
pub use config::GatewayConfig;
pub use signature::SignatureVerifier;
pub use stats::Stats;
