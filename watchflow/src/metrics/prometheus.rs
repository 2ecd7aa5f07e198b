//! Prometheus metrics exporter.
//!
//! Exports metrics in Prometheus text format.

use std::fmt::Write;
use std::sync::Arc;

use super::collector::MetricsCollector;

/// Prometheus metrics exporter.
pub struct PrometheusExporter {
    collector: Arc<MetricsCollector>,
    namespace: String,
}

impl PrometheusExporter {
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self::with_namespace(collector, "watchflow")
    }

    pub fn with_namespace(collector: Arc<MetricsCollector>, namespace: impl Into<String>) -> Self {
        Self {
            collector,
            namespace: namespace.into(),
        }
    }

    /// Export metrics in Prometheus text format.
    pub fn export(&self) -> String {
        let snapshot = self.collector.snapshot();
        let mut output = String::new();

        let unlabelled = [
            ("counter", "polls_total", "Total source polls", snapshot.polls_total),
            ("counter", "poll_failures_total", "Failed source polls", snapshot.poll_failures),
            (
                "counter",
                "items_discovered_total",
                "Items reported by the source",
                snapshot.items_discovered,
            ),
            (
                "counter",
                "duplicates_skipped_total",
                "Items skipped as already seen",
                snapshot.duplicates_skipped,
            ),
            (
                "counter",
                "items_enqueued_total",
                "Items admitted to the work queue",
                snapshot.items_enqueued,
            ),
            (
                "counter",
                "items_rejected_total",
                "Enqueue attempts rejected by backpressure",
                snapshot.items_rejected,
            ),
            (
                "counter",
                "items_evicted_total",
                "Queued items evicted by drop-oldest",
                snapshot.items_evicted,
            ),
            ("gauge", "queue_depth", "Items currently queued", snapshot.queue_depth),
            (
                "gauge",
                "active_workers",
                "Workers currently processing an item",
                snapshot.active_workers,
            ),
            (
                "counter",
                "worker_internal_errors_total",
                "Unexpected errors caught at the worker loop",
                snapshot.internal_errors,
            ),
            (
                "gauge",
                "item_duration_avg_ms",
                "Average pipeline duration per item",
                snapshot.avg_item_duration_ms,
            ),
        ];
        for (kind, name, help, value) in unlabelled {
            self.write_header(&mut output, kind, name, help);
            self.write_sample(&mut output, name, value, &[]);
        }

        self.write_header(&mut output, "counter", "items_total", "Items by terminal status");
        for (status, value) in [
            ("completed", snapshot.items_completed),
            ("failed", snapshot.items_failed),
            ("interrupted", snapshot.items_interrupted),
        ] {
            self.write_sample(&mut output, "items_total", value, &[("status", status)]);
        }

        // Stage metrics, one family at a time
        if !snapshot.stages.is_empty() {
            self.write_header(&mut output, "counter", "stage_runs_total", "Stage runs by outcome");
            for (stage, counts) in &snapshot.stages {
                for (outcome, value) in [
                    ("success", counts.success),
                    ("failure", counts.failure),
                    ("timeout", counts.timeout),
                ] {
                    self.write_sample(
                        &mut output,
                        "stage_runs_total",
                        value,
                        &[("stage", stage.as_str()), ("outcome", outcome)],
                    );
                }
            }

            self.write_header(
                &mut output,
                "gauge",
                "stage_duration_avg_ms",
                "Average stage duration",
            );
            for (stage, counts) in &snapshot.stages {
                self.write_sample(
                    &mut output,
                    "stage_duration_avg_ms",
                    counts.avg_duration_ms,
                    &[("stage", stage.as_str())],
                );
            }
        }

        output
    }

    fn write_header(&self, output: &mut String, kind: &str, name: &str, help: &str) {
        let _ = writeln!(output, "# HELP {}_{} {}", self.namespace, name, help);
        let _ = writeln!(output, "# TYPE {}_{} {}", self.namespace, name, kind);
    }

    fn write_sample(&self, output: &mut String, name: &str, value: u64, labels: &[(&str, &str)]) {
        if labels.is_empty() {
            let _ = writeln!(output, "{}_{} {}", self.namespace, name, value);
        } else {
            let labels_str = labels
                .iter()
                .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
                .collect::<Vec<_>>()
                .join(",");
            let _ = writeln!(output, "{}_{}{{{}}} {}", self.namespace, name, labels_str, value);
        }
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
