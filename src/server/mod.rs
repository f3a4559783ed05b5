//! HTTP surface of the bridge
//!
//! - `/` - report ingestion (`POST`) and liveness (`GET`, `HEAD`)
//! - `/metrics` - Prometheus metrics
//!
//! Also provides stop signalling for SIGTERM/SIGINT.

pub mod ingestion;
pub mod metrics;
pub mod shutdown;

pub use ingestion::{
    build_router, serve_ingestion, DecodeFailurePolicy, IngestError, IngestionConfig,
    IngestionState,
};
pub use metrics::{create_metrics, BridgeMetrics, SharedMetrics};
pub use shutdown::{shutdown_channel, wait_for_signal, ShutdownController, ShutdownSignal};

#[cfg(test)]
#[path = "shutdown_test.rs"]
mod shutdown_tests;
