//! Metrics collector implementation.
//!
//! Lock-free counters for the detector, queue, workers and stages, plus a
//! periodic flush task that logs a snapshot and resets the duration window.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::pipeline::{ItemStatus, PipelineReport, StageOutcome};

/// Metrics flush configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Seconds between logged snapshots.
    pub flush_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 60,
        }
    }
}

#[derive(Debug, Default)]
struct StageCounters {
    success: AtomicU64,
    failure: AtomicU64,
    timeout: AtomicU64,
    duration_total_ms: AtomicU64,
}

/// Metrics collector for the ingestion pipeline.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    // Detector metrics
    polls_total: AtomicU64,
    poll_failures: AtomicU64,
    items_discovered: AtomicU64,
    duplicates_skipped: AtomicU64,

    // Queue metrics
    items_enqueued: AtomicU64,
    items_rejected: AtomicU64,
    items_evicted: AtomicU64,
    queue_depth: AtomicU64,

    // Worker metrics
    active_workers: AtomicU64,
    internal_errors: AtomicU64,
    items_by_status: DashMap<ItemStatus, AtomicU64>,
    item_duration_total_ms: AtomicU64,
    item_count: AtomicU64,

    // Reset on every flush
    window_duration_total_ms: AtomicU64,
    window_count: AtomicU64,

    // Stage metrics
    stages: DashMap<String, StageCounters>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Detector Metrics ==========

    pub fn record_poll(&self, discovered: u64) {
        self.polls_total.fetch_add(1, Ordering::Relaxed);
        self.items_discovered.fetch_add(discovered, Ordering::Relaxed);
    }

    pub fn record_poll_failure(&self) {
        self.polls_total.fetch_add(1, Ordering::Relaxed);
        self.poll_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicates(&self, count: u64) {
        self.duplicates_skipped.fetch_add(count, Ordering::Relaxed);
    }

    // ========== Queue Metrics ==========

    pub fn record_enqueued(&self) {
        self.items_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.items_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self) {
        self.items_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.store(depth as u64, Ordering::Relaxed);
    }

    // ========== Worker Metrics ==========

    pub fn worker_busy(&self) {
        self.active_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_idle(&self) {
        self.active_workers.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_workers(&self) -> u64 {
        self.active_workers.load(Ordering::Relaxed)
    }

    /// Record a finished pipeline run and its stage results.
    pub fn record_item(&self, report: &PipelineReport) {
        self.count_status(report.status);

        let duration_ms = report.duration.as_millis() as u64;
        self.item_duration_total_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
        self.item_count.fetch_add(1, Ordering::Relaxed);
        self.window_duration_total_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
        self.window_count.fetch_add(1, Ordering::Relaxed);

        for result in &report.results {
            let counters = self.stages.entry(result.stage.clone()).or_default();
            let counter = match result.outcome {
                StageOutcome::Success => &counters.success,
                StageOutcome::Failure => &counters.failure,
                StageOutcome::Timeout => &counters.timeout,
            };
            counter.fetch_add(1, Ordering::Relaxed);
            counters
                .duration_total_ms
                .fetch_add(result.duration.as_millis() as u64, Ordering::Relaxed);
        }
    }

    /// Record an item lost to a worker-internal error.
    pub fn record_internal_error(&self) {
        self.internal_errors.fetch_add(1, Ordering::Relaxed);
        self.count_status(ItemStatus::Failed);
    }

    fn count_status(&self, status: ItemStatus) {
        self.items_by_status
            .entry(status)
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    // ========== Snapshot ==========

    pub fn snapshot(&self) -> MetricsSnapshot {
        let status = |s: ItemStatus| {
            self.items_by_status
                .get(&s)
                .map(|c| c.load(Ordering::Relaxed))
                .unwrap_or(0)
        };
        let item_count = self.item_count.load(Ordering::Relaxed);
        let window_count = self.window_count.load(Ordering::Relaxed);

        MetricsSnapshot {
            polls_total: self.polls_total.load(Ordering::Relaxed),
            poll_failures: self.poll_failures.load(Ordering::Relaxed),
            items_discovered: self.items_discovered.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            items_enqueued: self.items_enqueued.load(Ordering::Relaxed),
            items_rejected: self.items_rejected.load(Ordering::Relaxed),
            items_evicted: self.items_evicted.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            active_workers: self.active_workers.load(Ordering::Relaxed),
            internal_errors: self.internal_errors.load(Ordering::Relaxed),
            items_completed: status(ItemStatus::Completed),
            items_failed: status(ItemStatus::Failed),
            items_interrupted: status(ItemStatus::Interrupted),
            avg_item_duration_ms: average(
                self.item_duration_total_ms.load(Ordering::Relaxed),
                item_count,
            ),
            window_items: window_count,
            window_avg_item_duration_ms: average(
                self.window_duration_total_ms.load(Ordering::Relaxed),
                window_count,
            ),
            stages: self
                .stages
                .iter()
                .map(|entry| {
                    let c = entry.value();
                    let success = c.success.load(Ordering::Relaxed);
                    let failure = c.failure.load(Ordering::Relaxed);
                    let timeout = c.timeout.load(Ordering::Relaxed);
                    (
                        entry.key().clone(),
                        StageSnapshot {
                            success,
                            failure,
                            timeout,
                            avg_duration_ms: average(
                                c.duration_total_ms.load(Ordering::Relaxed),
                                success + failure + timeout,
                            ),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Log a snapshot and start a new duration window.
    pub fn flush(&self) -> MetricsSnapshot {
        let snapshot = self.snapshot();
        self.window_duration_total_ms.store(0, Ordering::Relaxed);
        self.window_count.store(0, Ordering::Relaxed);

        let stages = serde_json::to_string(&snapshot.stages).unwrap_or_default();
        info!(
            polls = snapshot.polls_total,
            poll_failures = snapshot.poll_failures,
            enqueued = snapshot.items_enqueued,
            rejected = snapshot.items_rejected,
            evicted = snapshot.items_evicted,
            queue_depth = snapshot.queue_depth,
            completed = snapshot.items_completed,
            failed = snapshot.items_failed,
            interrupted = snapshot.items_interrupted,
            window_items = snapshot.window_items,
            window_avg_ms = snapshot.window_avg_item_duration_ms,
            stages = %stages,
            "Metrics flush"
        );
        snapshot
    }

    /// Flush every `interval` until cancelled, then flush once more.
    pub fn spawn_flush_task(
        self: Arc<Self>,
        interval: Duration,
        cancellation_token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => break,
                    _ = ticker.tick() => {
                        self.flush();
                    }
                }
            }

            self.flush();
            debug!("Metrics flush task stopped");
        })
    }
}

fn average(total: u64, count: u64) -> u64 {
    if count == 0 { 0 } else { total / count }
}

/// Per-stage counters at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub success: u64,
    pub failure: u64,
    pub timeout: u64,
    pub avg_duration_ms: u64,
}

/// Snapshot of all metrics at a point in time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub polls_total: u64,
    pub poll_failures: u64,
    pub items_discovered: u64,
    pub duplicates_skipped: u64,
    pub items_enqueued: u64,
    pub items_rejected: u64,
    pub items_evicted: u64,
    pub queue_depth: u64,
    pub active_workers: u64,
    pub internal_errors: u64,
    pub items_completed: u64,
    pub items_failed: u64,
    pub items_interrupted: u64,
    pub avg_item_duration_ms: u64,
    /// Items finished since the last flush.
    pub window_items: u64,
    pub window_avg_item_duration_ms: u64,
    pub stages: BTreeMap<String, StageSnapshot>,
}
