//! Metrics collection and export.

mod collector;
mod prometheus;

pub use collector::{MetricsCollector, MetricsConfig, MetricsSnapshot, StageSnapshot};
pub use prometheus::PrometheusExporter;
