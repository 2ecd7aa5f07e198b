//! Pipeline stages and the executor capability they wrap.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::executors::{CommandExecutor, ExecutorConfig, NoopExecutor};
use super::item::WorkItem;
use crate::Result;

/// The work a stage performs on an item.
///
/// Implementations must be cancel-safe: the runner drops the `execute`
/// future when the stage's time budget is exhausted.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Run the stage for one item.
    async fn execute(&self, item: &WorkItem) -> Result<()>;
}

/// What the runner does after a stage fails or times out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Mark the item failed; later stages are not run.
    #[default]
    AbortItem,
    /// Log the failure and continue with the next stage.
    SkipStage,
}

/// One configured step of the pipeline.
#[derive(Clone)]
pub struct PipelineStage {
    pub name: String,
    pub timeout: Duration,
    pub on_failure: FailurePolicy,
    /// Failures of critical stages raise CRITICAL instead of ERROR events.
    pub critical: bool,
    pub executor: Arc<dyn StageExecutor>,
}

impl PipelineStage {
    pub fn new(name: impl Into<String>, executor: Arc<dyn StageExecutor>) -> Self {
        Self {
            name: name.into(),
            timeout: Duration::from_millis(default_timeout_ms()),
            on_failure: FailurePolicy::default(),
            critical: false,
            executor,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_policy(mut self, on_failure: FailurePolicy) -> Self {
        self.on_failure = on_failure;
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

impl fmt::Debug for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStage")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("on_failure", &self.on_failure)
            .field("critical", &self.critical)
            .field("executor", &self.executor.name())
            .finish()
    }
}

/// Stage definition as read from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl StageConfig {
    /// Build the runtime stage.
    pub fn build(&self) -> PipelineStage {
        let executor: Arc<dyn StageExecutor> = match &self.executor {
            ExecutorConfig::Noop => Arc::new(NoopExecutor),
            ExecutorConfig::Command(config) => Arc::new(CommandExecutor::new(config.clone())),
        };

        PipelineStage {
            name: self.name.clone(),
            timeout: Duration::from_millis(self.timeout_ms),
            on_failure: self.on_failure,
            critical: self.critical,
            executor,
        }
    }
}

/// How a single stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Success,
    Failure,
    Timeout,
}

impl StageOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Observability record for one stage run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: String,
    pub outcome: StageOutcome,
    pub duration: Duration,
    /// Error message for failures and timeouts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
