//! The aggregate summary shared by all workers.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::{ItemId, ItemStatus, PipelineReport, StageOutcome};

/// Per-stage outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    pub success: u64,
    pub failure: u64,
    pub timeout: u64,
}

impl StageCounts {
    fn record(&mut self, outcome: StageOutcome) {
        match outcome {
            StageOutcome::Success => self.success += 1,
            StageOutcome::Failure => self.failure += 1,
            StageOutcome::Timeout => self.timeout += 1,
        }
    }
}

/// One entry of the recent-activity list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub identity: ItemId,
    pub status: ItemStatus,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<String>,
}

/// Dashboard-style summary of everything processed so far.
///
/// Only mutated through [`SharedStateGuard`](super::SharedStateGuard);
/// everyone else reads published snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateState {
    /// Bumped on every publish.
    pub version: u64,
    /// Items that ran to a `Completed` or `Failed` outcome.
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Items whose remaining stages were skipped because of shutdown.
    pub interrupted: u64,
    pub failures_by_stage: BTreeMap<String, u64>,
    pub outcomes_by_stage: BTreeMap<String, StageCounts>,
    /// Most recent terminal items, oldest first.
    pub recent: VecDeque<ActivityEntry>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip, default = "default_recent_capacity")]
    recent_capacity: usize,
}

fn default_recent_capacity() -> usize {
    StateConfig::default().recent_capacity
}

/// Stage key used for failures that happened outside any stage.
pub const INTERNAL_FAILURE_STAGE: &str = "<internal>";

impl AggregateState {
    pub fn new(recent_capacity: usize) -> Self {
        Self {
            version: 0,
            processed: 0,
            succeeded: 0,
            failed: 0,
            interrupted: 0,
            failures_by_stage: BTreeMap::new(),
            outcomes_by_stage: BTreeMap::new(),
            recent: VecDeque::with_capacity(recent_capacity),
            updated_at: None,
            recent_capacity: recent_capacity.max(1),
        }
    }

    /// Fold a finished pipeline run into the summary.
    pub fn record_report(&mut self, report: &PipelineReport) {
        for result in &report.results {
            self.outcomes_by_stage
                .entry(result.stage.clone())
                .or_default()
                .record(result.outcome);
        }

        match report.status {
            ItemStatus::Completed => {
                self.processed += 1;
                self.succeeded += 1;
            }
            ItemStatus::Failed => {
                self.processed += 1;
                self.failed += 1;
                if let Some(stage) = &report.failed_stage {
                    *self.failures_by_stage.entry(stage.clone()).or_default() += 1;
                }
            }
            ItemStatus::Interrupted => self.interrupted += 1,
        }

        self.push_recent(ActivityEntry {
            identity: report.identity.clone(),
            status: report.status,
            finished_at: Utc::now(),
            duration_ms: report.duration.as_millis() as u64,
            failed_stage: report.failed_stage.clone(),
        });
    }

    /// Record an item that failed because its worker hit an internal error.
    pub fn record_internal_failure(&mut self, identity: &ItemId) {
        self.processed += 1;
        self.failed += 1;
        *self
            .failures_by_stage
            .entry(INTERNAL_FAILURE_STAGE.to_string())
            .or_default() += 1;

        self.push_recent(ActivityEntry {
            identity: identity.clone(),
            status: ItemStatus::Failed,
            finished_at: Utc::now(),
            duration_ms: 0,
            failed_stage: Some(INTERNAL_FAILURE_STAGE.to_string()),
        });
    }

    fn push_recent(&mut self, entry: ActivityEntry) {
        while self.recent.len() >= self.recent_capacity.max(1) {
            self.recent.pop_front();
        }
        self.recent.push_back(entry);
    }

    /// Whether `identity` is in the recent-activity list.
    pub fn has_recent(&self, identity: &str) -> bool {
        self.recent.iter().any(|e| e.identity.as_str() == identity)
    }

    pub fn recent_capacity(&self) -> usize {
        self.recent_capacity
    }
}

impl Default for AggregateState {
    fn default() -> Self {
        Self::new(StateConfig::default().recent_capacity)
    }
}

/// State guard configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Length of the recent-activity list.
    pub recent_capacity: usize,
    /// Collect mutations for this long before publishing; 0 disables coalescing.
    pub coalesce_window_ms: u64,
    /// Publish early once this many mutations are pending.
    pub coalesce_max_batch: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            recent_capacity: 50,
            coalesce_window_ms: 0,
            coalesce_max_batch: 32,
        }
    }
}
