//! Run metrics
//!
//! The orchestrator reports two gauges per run through a [`MetricsSink`].
//! Sinks cannot fail from the orchestrator's point of view.

use tracing::info;

/// Receiver of named gauge values
pub trait MetricsSink: Send + Sync {
    fn gauge(&self, name: &str, value: u64);
}

/// Emits each gauge as a structured `info` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn gauge(&self, name: &str, value: u64) {
        info!(metric = name, value, "gauge");
    }
}
