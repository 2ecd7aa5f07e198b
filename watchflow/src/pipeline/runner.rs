//! Runs one work item through the ordered stage sequence.
//!
//! Each item moves through `Pending -> Running(i) -> ... -> Completed | Failed`.
//! Shutdown is observed only at stage boundaries: a stage that has started
//! always finishes (or exhausts its time budget), and an item whose remaining
//! stages were not started ends up `Interrupted`.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::item::{ItemId, WorkItem};
use super::stage::{FailurePolicy, PipelineStage, StageOutcome, StageResult};
use crate::notification::{Component, NotificationEvent, Notifier};

/// Position of an item in the stage state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Pending,
    Running(usize),
    Completed,
    Failed,
    Interrupted,
}

impl ItemState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Interrupted)
    }

    /// Transition after stage `index` of `stage_count` ended with `outcome`.
    pub fn after_stage(
        index: usize,
        stage_count: usize,
        outcome: StageOutcome,
        policy: FailurePolicy,
    ) -> Self {
        let advance = outcome.is_success() || policy == FailurePolicy::SkipStage;
        if !advance {
            Self::Failed
        } else if index + 1 >= stage_count {
            Self::Completed
        } else {
            Self::Running(index + 1)
        }
    }
}

/// Terminal status recorded for a processed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Completed,
    Failed,
    Interrupted,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Everything the runner observed while processing one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub identity: ItemId,
    pub attempt: u32,
    pub status: ItemStatus,
    /// One entry per stage that ran, in order.
    pub results: Vec<StageResult>,
    /// Stage that moved the item to `Failed`, if any.
    pub failed_stage: Option<String>,
    pub duration: Duration,
}

impl PipelineReport {
    /// Report for an item whose worker was terminated mid-stage.
    pub fn aborted(item: &WorkItem, duration: Duration) -> Self {
        Self {
            identity: item.identity.clone(),
            attempt: item.attempt,
            status: ItemStatus::Interrupted,
            results: Vec::new(),
            failed_stage: None,
            duration,
        }
    }

    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.results.iter().find(|r| r.stage == name)
    }
}

/// Executes the configured stages for one item at a time.
///
/// Stateless apart from the stage list; shared by all workers.
pub struct PipelineRunner {
    stages: Arc<[PipelineStage]>,
    notifier: Notifier,
}

impl PipelineRunner {
    pub fn new(stages: Vec<PipelineStage>, notifier: Notifier) -> Self {
        Self {
            stages: stages.into(),
            notifier,
        }
    }

    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    /// Run `item` through every stage, observing `cancel` between stages.
    pub async fn run(&self, item: &WorkItem, cancel: &CancellationToken) -> PipelineReport {
        let started = Instant::now();
        let mut results = Vec::with_capacity(self.stages.len());
        let mut failed_stage = None;
        let mut state = if self.stages.is_empty() {
            ItemState::Completed
        } else {
            ItemState::Pending
        };

        loop {
            let index = match state {
                ItemState::Pending => 0,
                ItemState::Running(index) => index,
                _ => break,
            };

            if cancel.is_cancelled() {
                info!(
                    identity = %item.identity,
                    next_stage = %self.stages[index].name,
                    "Shutdown observed at stage boundary"
                );
                state = ItemState::Interrupted;
                break;
            }

            let stage = &self.stages[index];
            let result = self.run_stage(stage, item).await;
            state = ItemState::after_stage(
                index,
                self.stages.len(),
                result.outcome,
                stage.on_failure,
            );

            if !result.outcome.is_success() {
                self.report_stage_failure(stage, item, &result);
                if state == ItemState::Failed {
                    failed_stage = Some(stage.name.clone());
                }
            }
            results.push(result);
        }

        let status = match state {
            ItemState::Completed => ItemStatus::Completed,
            ItemState::Interrupted => ItemStatus::Interrupted,
            _ => ItemStatus::Failed,
        };

        debug!(
            identity = %item.identity,
            status = %status,
            stages_run = results.len(),
            "Pipeline finished"
        );

        PipelineReport {
            identity: item.identity.clone(),
            attempt: item.attempt,
            status,
            results,
            failed_stage,
            duration: started.elapsed(),
        }
    }

    async fn run_stage(&self, stage: &PipelineStage, item: &WorkItem) -> StageResult {
        let started = Instant::now();
        debug!(identity = %item.identity, stage = %stage.name, "Stage started");

        let (outcome, error) =
            match tokio::time::timeout(stage.timeout, stage.executor.execute(item)).await {
                Ok(Ok(())) => (StageOutcome::Success, None),
                Ok(Err(e)) => (StageOutcome::Failure, Some(e.to_string())),
                Err(_) => (
                    StageOutcome::Timeout,
                    Some(format!("timed out after {:?}", stage.timeout)),
                ),
            };

        StageResult {
            stage: stage.name.clone(),
            outcome,
            duration: started.elapsed(),
            error,
        }
    }

    fn report_stage_failure(&self, stage: &PipelineStage, item: &WorkItem, result: &StageResult) {
        let reason = result.error.as_deref().unwrap_or("unknown error");
        let action = match stage.on_failure {
            FailurePolicy::AbortItem => "item aborted",
            FailurePolicy::SkipStage => "stage skipped",
        };

        if stage.critical {
            error!(
                identity = %item.identity,
                stage = %stage.name,
                outcome = %result.outcome,
                "Critical stage failed ({}): {}",
                action,
                reason
            );
        } else {
            warn!(
                identity = %item.identity,
                stage = %stage.name,
                outcome = %result.outcome,
                "Stage failed ({}): {}",
                action,
                reason
            );
        }

        let title = format!("Stage '{}' {} for {}", stage.name, result.outcome, item.identity);
        let body = format!("{} ({}, attempt {})", reason, action, item.attempt);
        let event = if stage.critical {
            NotificationEvent::critical(Component::PipelineRunner, title, body)
        } else {
            NotificationEvent::error(Component::PipelineRunner, title, body)
        };
        self.notifier.notify(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::Severity;
    use crate::pipeline::stage::StageExecutor;
    use crate::{Error, Result};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    /// Records every invocation and behaves as configured.
    struct FakeExecutor {
        calls: Arc<Mutex<Vec<String>>>,
        label: &'static str,
        behavior: Behavior,
    }

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        Fail,
        Hang,
    }

    #[async_trait]
    impl StageExecutor for FakeExecutor {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn execute(&self, item: &WorkItem) -> Result<()> {
            self.calls
                .lock()
                .push(format!("{}:{}", self.label, item.identity));
            match self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::Fail => Err(Error::stage_failure(self.label, "boom")),
                Behavior::Hang => {
                    std::future::pending::<()>().await;
                    Ok(())
                }
            }
        }
    }

    fn stage(
        calls: &Arc<Mutex<Vec<String>>>,
        label: &'static str,
        behavior: Behavior,
    ) -> PipelineStage {
        PipelineStage::new(
            label,
            Arc::new(FakeExecutor {
                calls: calls.clone(),
                label,
                behavior,
            }),
        )
        .with_timeout(Duration::from_secs(1))
    }

    fn runner(stages: Vec<PipelineStage>) -> (PipelineRunner, mpsc::Receiver<NotificationEvent>) {
        let (notifier, rx) = Notifier::channel(16);
        (PipelineRunner::new(stages, notifier), rx)
    }

    #[test]
    fn test_state_transitions() {
        use FailurePolicy::*;
        use StageOutcome::*;

        assert_eq!(ItemState::after_stage(0, 2, Success, AbortItem), ItemState::Running(1));
        assert_eq!(ItemState::after_stage(1, 2, Success, AbortItem), ItemState::Completed);
        assert_eq!(ItemState::after_stage(0, 2, Failure, AbortItem), ItemState::Failed);
        assert_eq!(ItemState::after_stage(0, 2, Timeout, AbortItem), ItemState::Failed);
        assert_eq!(ItemState::after_stage(0, 2, Timeout, SkipStage), ItemState::Running(1));
        assert_eq!(ItemState::after_stage(1, 2, Failure, SkipStage), ItemState::Completed);
        assert!(ItemState::Failed.is_terminal());
        assert!(!ItemState::Running(0).is_terminal());
    }

    #[tokio::test]
    async fn test_all_stages_succeed() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (runner, mut rx) = runner(vec![
            stage(&calls, "classify", Behavior::Succeed),
            stage(&calls, "summarize", Behavior::Succeed),
        ]);

        let report = runner
            .run(&WorkItem::new("A", Vec::new()), &CancellationToken::new())
            .await;

        assert_eq!(report.status, ItemStatus::Completed);
        assert_eq!(report.results.len(), 2);
        assert_eq!(*calls.lock(), vec!["classify:A", "summarize:A"]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_aborts_item() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (runner, mut rx) = runner(vec![
            stage(&calls, "classify", Behavior::Hang),
            stage(&calls, "summarize", Behavior::Succeed),
        ]);

        let report = runner
            .run(&WorkItem::new("D", Vec::new()), &CancellationToken::new())
            .await;

        assert_eq!(report.status, ItemStatus::Failed);
        assert_eq!(report.failed_stage.as_deref(), Some("classify"));
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].outcome, StageOutcome::Timeout);
        assert_eq!(*calls.lock(), vec!["classify:D"]);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.severity, Severity::Error);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_skip_stage_continues() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (runner, mut rx) = runner(vec![
            stage(&calls, "classify", Behavior::Fail).with_policy(FailurePolicy::SkipStage),
            stage(&calls, "summarize", Behavior::Succeed),
        ]);

        let report = runner
            .run(&WorkItem::new("B", Vec::new()), &CancellationToken::new())
            .await;

        assert_eq!(report.status, ItemStatus::Completed);
        assert_eq!(report.results[0].outcome, StageOutcome::Failure);
        assert_eq!(report.results[1].outcome, StageOutcome::Success);
        assert_eq!(rx.try_recv().unwrap().severity, Severity::Error);
    }

    #[tokio::test]
    async fn test_critical_stage_raises_critical() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (runner, mut rx) = runner(vec![
            stage(&calls, "classify", Behavior::Succeed),
            stage(&calls, "publish", Behavior::Fail).critical(),
        ]);

        let report = runner
            .run(&WorkItem::new("C", Vec::new()), &CancellationToken::new())
            .await;

        assert_eq!(report.status, ItemStatus::Failed);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.severity, Severity::Critical);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_is_interrupted() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (runner, _rx) = runner(vec![stage(&calls, "classify", Behavior::Succeed)]);
        let token = CancellationToken::new();
        token.cancel();

        let report = runner.run(&WorkItem::new("E", Vec::new()), &token).await;

        assert_eq!(report.status, ItemStatus::Interrupted);
        assert!(report.results.is_empty());
        assert!(calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_no_stages_completes() {
        let (runner, _rx) = runner(Vec::new());
        let report = runner
            .run(&WorkItem::new("F", Vec::new()), &CancellationToken::new())
            .await;
        assert_eq!(report.status, ItemStatus::Completed);
    }
}
