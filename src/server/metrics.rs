//! Prometheus metrics for the bridge
//!
//! - `hax_bridge_deliveries_total{outcome}` - inbound reports by outcome
//! - `hax_bridge_messages_dispatched_total{kind}` - messages handled by the relay worker
//! - `hax_bridge_queue_depth` - messages enqueued but not yet dequeued

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

pub type SharedMetrics = Arc<BridgeMetrics>;

pub struct BridgeMetrics {
    registry: Registry,
    deliveries: IntCounterVec,
    dispatched: IntCounterVec,
    queue_depth: IntGauge,
}

impl BridgeMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let deliveries = IntCounterVec::new(
            Opts::new(
                "hax_bridge_deliveries_total",
                "Service-health reports received, by outcome",
            ),
            &["outcome"],
        )?;
        let dispatched = IntCounterVec::new(
            Opts::new(
                "hax_bridge_messages_dispatched_total",
                "Messages handled by the relay worker, by kind",
            ),
            &["kind"],
        )?;
        let queue_depth = IntGauge::new(
            "hax_bridge_queue_depth",
            "Messages waiting for the relay worker",
        )?;

        registry.register(Box::new(deliveries.clone()))?;
        registry.register(Box::new(dispatched.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;

        Ok(Self {
            registry,
            deliveries,
            dispatched,
            queue_depth,
        })
    }

    /// Count an inbound report (`accepted`, `rejected`, `unavailable`, ...)
    pub fn record_delivery(&self, outcome: &str) {
        self.deliveries.with_label_values(&[outcome]).inc();
    }

    /// Count a message the worker took off the queue
    pub fn record_dispatch(&self, kind: &str) {
        self.dispatched.with_label_values(&[kind]).inc();
    }

    pub fn delivery_count(&self, outcome: &str) -> u64 {
        self.deliveries.with_label_values(&[outcome]).get()
    }

    pub fn dispatch_count(&self, kind: &str) -> u64 {
        self.dispatched.with_label_values(&[kind]).get()
    }

    /// Gauge handle shared with the message channel
    pub fn queue_depth(&self) -> IntGauge {
        self.queue_depth.clone()
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Create the shared metrics registry
pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    Ok(Arc::new(BridgeMetrics::new()?))
}
