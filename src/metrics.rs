//! Prometheus metrics
//!
//! Registered once in the default registry by [`init`]. Until then (and in
//! unit tests) [`get`] returns `None` and recording is a no-op.

use prometheus::{IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts};
use std::sync::OnceLock;

use crate::error::Result;

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub struct Metrics {
    /// Depth events offered by the transport, by segment
    pub events_received: IntCounterVec,
    /// Events dropped, by reason
    pub events_dropped: IntCounterVec,
    /// Events applied to a replica, by segment
    pub events_applied: IntCounterVec,
    /// Sequence gaps detected, by segment
    pub sequence_gaps: IntCounterVec,
    /// Completed resync tasks, by outcome
    pub resyncs: IntCounterVec,
    /// Snapshot requests sent, by segment
    pub snapshot_requests: IntCounterVec,
    /// Queued plus running resync tasks, by segment
    pub resync_backlog: IntGaugeVec,
    /// Events held back while their replica resyncs
    pub held_events: IntGauge,
    /// Cups handed to the distributor
    pub cups_published: IntCounter,
}

impl Metrics {
    fn new() -> Result<Self> {
        Ok(Self {
            events_received: IntCounterVec::new(
                Opts::new("depth_events_received_total", "Depth events received"),
                &["segment"],
            )?,
            events_dropped: IntCounterVec::new(
                Opts::new("depth_events_dropped_total", "Depth events dropped"),
                &["reason"],
            )?,
            events_applied: IntCounterVec::new(
                Opts::new("depth_events_applied_total", "Depth events applied to a replica"),
                &["segment"],
            )?,
            sequence_gaps: IntCounterVec::new(
                Opts::new("depth_sequence_gaps_total", "Sequence gaps detected"),
                &["segment"],
            )?,
            resyncs: IntCounterVec::new(
                Opts::new("depth_resyncs_total", "Resync tasks completed"),
                &["outcome"],
            )?,
            snapshot_requests: IntCounterVec::new(
                Opts::new("depth_snapshot_requests_total", "Order book snapshot requests"),
                &["segment"],
            )?,
            resync_backlog: IntGaugeVec::new(
                Opts::new("depth_resync_backlog", "Queued and running resync tasks"),
                &["segment"],
            )?,
            held_events: IntGauge::new(
                "depth_held_events",
                "Events held while their replica resyncs",
            )?,
            cups_published: IntCounter::new(
                "depth_cups_published_total",
                "Cups handed to the distributor",
            )?,
        })
    }

    fn register(&self) -> Result<()> {
        let registry = prometheus::default_registry();
        registry.register(Box::new(self.events_received.clone()))?;
        registry.register(Box::new(self.events_dropped.clone()))?;
        registry.register(Box::new(self.events_applied.clone()))?;
        registry.register(Box::new(self.sequence_gaps.clone()))?;
        registry.register(Box::new(self.resyncs.clone()))?;
        registry.register(Box::new(self.snapshot_requests.clone()))?;
        registry.register(Box::new(self.resync_backlog.clone()))?;
        registry.register(Box::new(self.held_events.clone()))?;
        registry.register(Box::new(self.cups_published.clone()))?;
        Ok(())
    }
}

/// Create and register the metrics. Calling it again is a no-op.
pub fn init() -> Result<()> {
    if METRICS.get().is_some() {
        return Ok(());
    }
    let metrics = Metrics::new()?;
    metrics.register()?;
    let _ = METRICS.set(metrics);
    Ok(())
}

pub fn get() -> Option<&'static Metrics> {
    METRICS.get()
}

/// Count one dropped event
pub fn record_drop(reason: &str) {
    if let Some(m) = get() {
        m.events_dropped.with_label_values(&[reason]).inc();
    }
}

/// Encode the default registry in the text exposition format
pub fn render() -> Result<String> {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| crate::error::DepthError::MetricsError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_registers_once() {
        init().unwrap();
        init().unwrap();

        let metrics = get().expect("initialized");
        metrics.events_dropped.with_label_values(&["overflow"]).inc();
        metrics.resync_backlog.with_label_values(&["spot"]).set(3);

        let text = render().unwrap();
        assert!(text.contains("depth_events_dropped_total"));
        assert!(text.contains("depth_resync_backlog"));
    }
}
