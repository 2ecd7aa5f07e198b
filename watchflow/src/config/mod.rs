//! Application configuration.
//!
//! Read once at startup from a JSON file; a few settings can be overridden
//! through `WATCHFLOW_*` environment variables. Loading happens before the
//! subscriber is installed, so nothing here logs; callers report what was
//! loaded once logging is up.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::logging::LoggingConfig;
use crate::metrics::MetricsConfig;
use crate::monitor::DetectorConfig;
use crate::notification::{ChannelConfig, ChannelKind, RateLimitConfig};
use crate::pipeline::{BackpressurePolicy, QueueConfig, StageConfig, WorkerPoolConfig};
use crate::source::SourceConfig;
use crate::state::StateConfig;
use crate::{Error, Result};

pub const ENV_WORKERS: &str = "WATCHFLOW_WORKERS";
pub const ENV_QUEUE_CAPACITY: &str = "WATCHFLOW_QUEUE_CAPACITY";
pub const ENV_POLL_INTERVAL_MS: &str = "WATCHFLOW_POLL_INTERVAL_MS";

/// Environment overrides that were applied, as `(variable, value)`.
pub type AppliedOverrides = Vec<(&'static str, String)>;

/// Notification router settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Capacity of the notifier inbox.
    pub queue_capacity: usize,
    /// Adapter per channel kind. `log` is always available.
    pub channels: BTreeMap<ChannelKind, ChannelConfig>,
    /// Upper bound on a single channel send.
    pub send_timeout_secs: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            channels: BTreeMap::new(),
            send_timeout_secs: 30,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub detector: DetectorConfig,
    pub queue: QueueConfig,
    pub workers: WorkerPoolConfig,
    pub stages: Vec<StageConfig>,
    pub rate_limits: BTreeMap<ChannelKind, RateLimitConfig>,
    pub notifications: NotificationsConfig,
    pub state: StateConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            detector: DetectorConfig::default(),
            queue: QueueConfig::default(),
            workers: WorkerPoolConfig::default(),
            stages: Vec::new(),
            rate_limits: default_rate_limits(),
            notifications: NotificationsConfig::default(),
            state: StateConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_rate_limits() -> BTreeMap<ChannelKind, RateLimitConfig> {
    let mut limits = BTreeMap::new();
    limits.insert(
        ChannelKind::ExternalMessage,
        RateLimitConfig {
            window_secs: 3600,
            max_count: 5,
        },
    );
    limits
}

impl AppConfig {
    /// Load from `path` (defaults when `None`), apply environment overrides
    /// and validate. Also returns the overrides that took effect.
    pub fn load(path: Option<&Path>) -> Result<(Self, AppliedOverrides)> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let applied = config.apply_env_overrides()?;
        config.validate()?;
        Ok((config, applied))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_json(&contents)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn apply_env_overrides(&mut self) -> Result<AppliedOverrides> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<AppliedOverrides> {
        let mut applied = Vec::new();
        if let Some(count) = parse_override::<usize>(&lookup, ENV_WORKERS, &mut applied)? {
            self.workers.count = count;
        }
        if let Some(capacity) =
            parse_override::<usize>(&lookup, ENV_QUEUE_CAPACITY, &mut applied)?
        {
            self.queue.capacity = capacity;
        }
        if let Some(interval) =
            parse_override::<u64>(&lookup, ENV_POLL_INTERVAL_MS, &mut applied)?
        {
            self.detector.poll_interval_ms = interval;
        }
        Ok(applied)
    }

    /// Check invariants the components rely on.
    pub fn validate(&self) -> Result<()> {
        if self.workers.count == 0 {
            return Err(Error::config("workers.count must be at least 1"));
        }
        if self.workers.shutdown_timeout_secs == 0 {
            return Err(Error::config("workers.shutdown_timeout_secs must be non-zero"));
        }
        if self.queue.capacity == 0 {
            return Err(Error::config("queue.capacity must be at least 1"));
        }
        if let BackpressurePolicy::BlockWithTimeout { timeout_ms: 0 } = self.queue.backpressure {
            return Err(Error::config("queue.backpressure.timeout_ms must be non-zero"));
        }

        if self.detector.poll_interval_ms == 0 {
            return Err(Error::config("detector.poll_interval_ms must be non-zero"));
        }
        if self.detector.error_after_failures == 0
            || self.detector.critical_after_failures == 0
            || self.detector.queue_full_critical_after == 0
        {
            return Err(Error::config("detector escalation thresholds must be at least 1"));
        }
        // Every queued or in-flight identity must fit in the seen set.
        let pending_max = self.queue.capacity + self.workers.count;
        if self.detector.seen_capacity < pending_max {
            return Err(Error::config(format!(
                "detector.seen_capacity ({}) must be at least queue.capacity + workers.count ({})",
                self.detector.seen_capacity, pending_max
            )));
        }

        let mut names = HashSet::new();
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                return Err(Error::config("stage names must not be empty"));
            }
            if !names.insert(stage.name.as_str()) {
                return Err(Error::config(format!("duplicate stage name '{}'", stage.name)));
            }
            if stage.timeout_ms == 0 {
                return Err(Error::config(format!(
                    "stage '{}' timeout_ms must be non-zero",
                    stage.name
                )));
            }
        }

        for (channel, limit) in &self.rate_limits {
            if limit.max_count == 0 {
                return Err(Error::config(format!(
                    "rate_limits.{}.max_count must be at least 1",
                    channel
                )));
            }
            if limit.window_secs == 0 {
                return Err(Error::config(format!(
                    "rate_limits.{}.window_secs must be non-zero",
                    channel
                )));
            }
        }

        if self.notifications.queue_capacity == 0 {
            return Err(Error::config("notifications.queue_capacity must be at least 1"));
        }
        if self.notifications.send_timeout_secs == 0 {
            return Err(Error::config("notifications.send_timeout_secs must be non-zero"));
        }
        if self.state.coalesce_max_batch == 0 {
            return Err(Error::config("state.coalesce_max_batch must be at least 1"));
        }
        if self.metrics.flush_interval_secs == 0 {
            return Err(Error::config("metrics.flush_interval_secs must be non-zero"));
        }

        Ok(())
    }
}

fn parse_override<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    applied: &mut AppliedOverrides,
) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let value = raw
        .trim()
        .parse::<T>()
        .map_err(|e| Error::config(format!("{}='{}': {}", key, raw, e)))?;
    applied.push((key, raw.trim().to_string()));
    Ok(Some(value))
}
