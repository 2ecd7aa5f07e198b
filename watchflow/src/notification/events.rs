//! Notification events.
//!
//! Defines the events raised by pipeline components, their severity levels
//! and the fixed severity-to-channel routing table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity level for notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Informational only.
    Info,
    /// Degraded but self-healing condition.
    Warning,
    /// An item or channel failed.
    Error,
    /// Requires immediate attention.
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Notification channel kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Durable summary record (e.g. a markdown file).
    PersistentSummary,
    /// Message to an external service (e.g. a webhook).
    ExternalMessage,
    /// Attention-grabbing alert.
    ImmediateAlert,
    /// Application log. Never rate limited.
    Log,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::PersistentSummary,
        ChannelKind::ExternalMessage,
        ChannelKind::ImmediateAlert,
        ChannelKind::Log,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PersistentSummary => "persistent_summary",
            Self::ExternalMessage => "external_message",
            Self::ImmediateAlert => "immediate_alert",
            Self::Log => "log",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity to channel routing. Fixed for every router instance.
pub const ROUTING_TABLE: [(Severity, &[ChannelKind]); 4] = [
    (
        Severity::Critical,
        &[
            ChannelKind::PersistentSummary,
            ChannelKind::ExternalMessage,
            ChannelKind::ImmediateAlert,
            ChannelKind::Log,
        ],
    ),
    (
        Severity::Error,
        &[
            ChannelKind::PersistentSummary,
            ChannelKind::ExternalMessage,
            ChannelKind::Log,
        ],
    ),
    (
        Severity::Warning,
        &[ChannelKind::PersistentSummary, ChannelKind::Log],
    ),
    (Severity::Info, &[ChannelKind::Log]),
];

/// Channels that receive events of the given severity.
pub fn channels_for(severity: Severity) -> &'static [ChannelKind] {
    ROUTING_TABLE
        .iter()
        .find(|(s, _)| *s == severity)
        .map(|(_, channels)| *channels)
        .unwrap_or(&[ChannelKind::Log])
}

/// Component that observed the reportable condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Detector,
    WorkQueue,
    WorkerPool,
    PipelineRunner,
    StateGuard,
    NotificationRouter,
    Metrics,
    Service,
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Detector => "detector",
            Self::WorkQueue => "work_queue",
            Self::WorkerPool => "worker_pool",
            Self::PipelineRunner => "pipeline_runner",
            Self::StateGuard => "state_guard",
            Self::NotificationRouter => "notification_router",
            Self::Metrics => "metrics",
            Self::Service => "service",
        };
        f.write_str(name)
    }
}

/// An immutable notification event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: Uuid,
    pub severity: Severity,
    pub title: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub source: Component,
}

impl NotificationEvent {
    pub fn new(
        severity: Severity,
        source: Component,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            severity,
            title: title.into(),
            body: body.into(),
            timestamp: Utc::now(),
            source,
        }
    }

    pub fn info(source: Component, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(Severity::Info, source, title, body)
    }

    pub fn warning(source: Component, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(Severity::Warning, source, title, body)
    }

    pub fn error(source: Component, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(Severity::Error, source, title, body)
    }

    pub fn critical(source: Component, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(Severity::Critical, source, title, body)
    }

    /// Channels this event is routed to.
    pub fn channels(&self) -> &'static [ChannelKind] {
        channels_for(self.severity)
    }
}
