//! Severity-based notification routing.
//!
//! The router fans each event out to the channels listed for its severity
//! in [`ROUTING_TABLE`](super::events::ROUTING_TABLE), consulting the
//! [`RateLimiter`] before every non-log send. Channels are sent to
//! concurrently and each send is bounded by a timeout, so a denied, failing
//! or hung channel never affects the others.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::channels::{ChannelConfig, LogChannel, NotificationChannel};
use super::events::{ChannelKind, NotificationEvent};
use super::rate_limiter::{RateLimitConfig, RateLimiter};
use crate::Result;

/// Cheap, cloneable handle used by components to raise events.
///
/// Sending never blocks: if the router's inbox is full the event is written
/// to the log and dropped.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::Sender<NotificationEvent>,
}

impl Notifier {
    /// Create a notifier and the receiving end consumed by the router.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<NotificationEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Raise an event.
    pub fn notify(&self, event: NotificationEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(
                    severity = %event.severity,
                    source = %event.source,
                    "Notification inbox full, dropping event: {}: {}",
                    event.title,
                    event.body
                );
            }
            Err(TrySendError::Closed(event)) => {
                debug!(
                    severity = %event.severity,
                    "Notification router stopped, dropping event: {}",
                    event.title
                );
            }
        }
    }
}

/// Outcome of delivering one event to one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    RateLimited,
    Failed,
    /// No adapter configured for the channel.
    Skipped,
}

/// Per-channel outcomes for one dispatched event.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<(ChannelKind, DeliveryOutcome)>,
}

impl DispatchReport {
    pub fn outcome(&self, channel: ChannelKind) -> Option<DeliveryOutcome> {
        self.outcomes
            .iter()
            .find(|(kind, _)| *kind == channel)
            .map(|(_, outcome)| *outcome)
    }
}

#[derive(Debug, Default)]
struct ChannelCounters {
    delivered: AtomicU64,
    rate_limited: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

/// Delivery counters for one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub delivered: u64,
    pub rate_limited: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// Delivery statistics across all channels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationStats {
    pub channels: BTreeMap<ChannelKind, ChannelStats>,
}

impl NotificationStats {
    pub fn channel(&self, kind: ChannelKind) -> ChannelStats {
        self.channels.get(&kind).copied().unwrap_or_default()
    }
}

/// Default upper bound on a single channel send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Notification router.
pub struct NotificationRouter {
    channels: HashMap<ChannelKind, Arc<dyn NotificationChannel>>,
    limiter: RateLimiter,
    counters: DashMap<ChannelKind, ChannelCounters>,
    send_timeout: Duration,
}

impl NotificationRouter {
    /// Create a router with only the log channel attached.
    pub fn new(limiter: RateLimiter) -> Self {
        let mut channels: HashMap<ChannelKind, Arc<dyn NotificationChannel>> = HashMap::new();
        channels.insert(ChannelKind::Log, Arc::new(LogChannel));
        Self {
            channels,
            limiter,
            counters: DashMap::new(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Build a router from channel adapter and rate limit configuration.
    pub fn from_config(
        channels: &BTreeMap<ChannelKind, ChannelConfig>,
        rate_limits: &BTreeMap<ChannelKind, RateLimitConfig>,
    ) -> Result<Self> {
        let mut router = Self::new(RateLimiter::new(rate_limits));
        for (kind, config) in channels {
            let channel = config.build()?;
            info!(
                "Initialized notification channel: {} -> {}",
                kind,
                config.channel_type()
            );
            router = router.with_channel(*kind, channel);
        }
        Ok(router)
    }

    /// Attach (or replace) the adapter for a channel kind.
    pub fn with_channel(
        mut self,
        kind: ChannelKind,
        channel: Arc<dyn NotificationChannel>,
    ) -> Self {
        self.channels.insert(kind, channel);
        self
    }

    /// Bound every channel send; a send that exceeds it counts as failed.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Dispatch an event to every channel its severity routes to.
    ///
    /// Targets are sent to concurrently; the call returns once every send
    /// has finished or timed out.
    pub async fn dispatch(&self, event: &NotificationEvent) -> DispatchReport {
        let targets = event.channels();
        let outcomes = join_all(targets.iter().map(|&kind| self.dispatch_to(event, kind))).await;

        let mut report = DispatchReport::default();
        for (&kind, outcome) in targets.iter().zip(outcomes) {
            self.record(kind, outcome);
            report.outcomes.push((kind, outcome));
        }
        report
    }

    async fn dispatch_to(&self, event: &NotificationEvent, kind: ChannelKind) -> DeliveryOutcome {
        let Some(channel) = self.channels.get(&kind) else {
            debug!(channel = %kind, "No adapter configured, skipping");
            return DeliveryOutcome::Skipped;
        };

        if !self.limiter.allow(kind) {
            warn!(
                channel = %kind,
                severity = %event.severity,
                "Rate limited, dropping notification for this channel: {}: {}",
                event.title,
                event.body
            );
            return DeliveryOutcome::RateLimited;
        }

        // Failures are logged directly, never re-routed through the notifier.
        match tokio::time::timeout(self.send_timeout, channel.send(event)).await {
            Ok(Ok(())) => DeliveryOutcome::Delivered,
            Ok(Err(e)) => {
                error!(
                    channel = %kind,
                    adapter = channel.channel_type(),
                    "Failed to deliver notification '{}': {}",
                    event.title,
                    e
                );
                DeliveryOutcome::Failed
            }
            Err(_) => {
                error!(
                    channel = %kind,
                    adapter = channel.channel_type(),
                    timeout_ms = self.send_timeout.as_millis() as u64,
                    "Timed out delivering notification '{}'",
                    event.title
                );
                DeliveryOutcome::Failed
            }
        }
    }

    fn record(&self, kind: ChannelKind, outcome: DeliveryOutcome) {
        let counters = self.counters.entry(kind).or_default();
        let counter = match outcome {
            DeliveryOutcome::Delivered => &counters.delivered,
            DeliveryOutcome::RateLimited => &counters.rate_limited,
            DeliveryOutcome::Failed => &counters.failed,
            DeliveryOutcome::Skipped => &counters.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get delivery statistics.
    pub fn stats(&self) -> NotificationStats {
        NotificationStats {
            channels: self
                .counters
                .iter()
                .map(|entry| {
                    let c = entry.value();
                    (
                        *entry.key(),
                        ChannelStats {
                            delivered: c.delivered.load(Ordering::Relaxed),
                            rate_limited: c.rate_limited.load(Ordering::Relaxed),
                            failed: c.failed.load(Ordering::Relaxed),
                            skipped: c.skipped.load(Ordering::Relaxed),
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Consume events until cancelled, then drain whatever is still queued.
    pub fn spawn(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<NotificationEvent>,
        cancellation_token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            debug!("Notification router started");
            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => {
                            self.dispatch(&event).await;
                        }
                        None => {
                            debug!("All notifiers dropped, router exiting");
                            return;
                        }
                    }
                }
            }

            rx.close();
            let mut drained = 0usize;
            while let Some(event) = rx.recv().await {
                self.dispatch(&event).await;
                drained += 1;
            }
            debug!(drained, "Notification router stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::events::{Component, Severity};
    use crate::{Error, Result};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        fn channel_type(&self) -> &'static str {
            "recording"
        }

        async fn send(&self, event: &NotificationEvent) -> Result<()> {
            self.sent.lock().push(event.title.clone());
            Ok(())
        }
    }

    struct FailingChannel;

    #[async_trait]
    impl NotificationChannel for FailingChannel {
        fn channel_type(&self) -> &'static str {
            "failing"
        }

        async fn send(&self, _event: &NotificationEvent) -> Result<()> {
            Err(Error::channel_send("failing", "connection refused"))
        }
    }

    /// A channel whose sends never complete.
    struct HangingChannel;

    #[async_trait]
    impl NotificationChannel for HangingChannel {
        fn channel_type(&self) -> &'static str {
            "hanging"
        }

        async fn send(&self, _event: &NotificationEvent) -> Result<()> {
            std::future::pending().await
        }
    }

    fn external_limit(max_count: u32) -> BTreeMap<ChannelKind, RateLimitConfig> {
        let mut limits = BTreeMap::new();
        limits.insert(
            ChannelKind::ExternalMessage,
            RateLimitConfig {
                window_secs: 3600,
                max_count,
            },
        );
        limits
    }

    #[tokio::test]
    async fn test_error_routes_to_summary_external_and_log() {
        let summary = Arc::new(RecordingChannel::default());
        let external = Arc::new(RecordingChannel::default());
        let alert = Arc::new(RecordingChannel::default());
        let router = NotificationRouter::new(RateLimiter::unlimited())
            .with_channel(ChannelKind::PersistentSummary, summary.clone())
            .with_channel(ChannelKind::ExternalMessage, external.clone())
            .with_channel(ChannelKind::ImmediateAlert, alert.clone());

        let event = NotificationEvent::error(Component::PipelineRunner, "Stage failed", "x");
        let report = router.dispatch(&event).await;

        assert_eq!(summary.sent.lock().len(), 1);
        assert_eq!(external.sent.lock().len(), 1);
        assert!(alert.sent.lock().is_empty());
        assert_eq!(
            report.outcome(ChannelKind::Log),
            Some(DeliveryOutcome::Delivered)
        );
        assert_eq!(report.outcome(ChannelKind::ImmediateAlert), None);
    }

    #[tokio::test]
    async fn test_info_goes_to_log_only() {
        let summary = Arc::new(RecordingChannel::default());
        let router = NotificationRouter::new(RateLimiter::unlimited())
            .with_channel(ChannelKind::PersistentSummary, summary.clone());

        let report = router
            .dispatch(&NotificationEvent::info(Component::Service, "Started", ""))
            .await;

        assert!(summary.sent.lock().is_empty());
        assert_eq!(report.outcomes.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_drops_only_limited_channel() {
        let summary = Arc::new(RecordingChannel::default());
        let external = Arc::new(RecordingChannel::default());
        let router = NotificationRouter::new(RateLimiter::new(&external_limit(5)))
            .with_channel(ChannelKind::PersistentSummary, summary.clone())
            .with_channel(ChannelKind::ExternalMessage, external.clone());

        for i in 0..6 {
            let event = NotificationEvent::error(Component::PipelineRunner, format!("e{i}"), "");
            router.dispatch(&event).await;
            tokio::time::advance(std::time::Duration::from_secs(300)).await;
        }

        assert_eq!(external.sent.lock().len(), 5);
        assert_eq!(summary.sent.lock().len(), 6);

        let stats = router.stats();
        assert_eq!(stats.channel(ChannelKind::ExternalMessage).delivered, 5);
        assert_eq!(stats.channel(ChannelKind::ExternalMessage).rate_limited, 1);
        assert_eq!(stats.channel(ChannelKind::Log).delivered, 6);
    }

    #[tokio::test]
    async fn test_channel_failure_does_not_block_others() {
        let summary = Arc::new(RecordingChannel::default());
        let router = NotificationRouter::new(RateLimiter::unlimited())
            .with_channel(ChannelKind::PersistentSummary, Arc::new(FailingChannel))
            .with_channel(ChannelKind::ExternalMessage, summary.clone());

        let event = NotificationEvent::new(Severity::Error, Component::Detector, "boom", "");
        let report = router.dispatch(&event).await;

        assert_eq!(
            report.outcome(ChannelKind::PersistentSummary),
            Some(DeliveryOutcome::Failed)
        );
        assert_eq!(summary.sent.lock().len(), 1);
        assert_eq!(router.stats().channel(ChannelKind::PersistentSummary).failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_channel_times_out_without_blocking_others() {
        let external = Arc::new(RecordingChannel::default());
        let router = NotificationRouter::new(RateLimiter::unlimited())
            .with_channel(ChannelKind::PersistentSummary, Arc::new(HangingChannel))
            .with_channel(ChannelKind::ExternalMessage, external.clone())
            .with_send_timeout(Duration::from_secs(5));

        let started = tokio::time::Instant::now();
        let event = NotificationEvent::error(Component::PipelineRunner, "Stage failed", "x");
        let report = router.dispatch(&event).await;

        assert!(started.elapsed() < Duration::from_secs(6));
        assert_eq!(external.sent.lock().len(), 1);
        assert_eq!(
            report.outcome(ChannelKind::Log),
            Some(DeliveryOutcome::Delivered)
        );
        assert_eq!(
            report.outcome(ChannelKind::PersistentSummary),
            Some(DeliveryOutcome::Failed)
        );
        assert_eq!(router.stats().channel(ChannelKind::PersistentSummary).failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_channel_does_not_stall_later_events() {
        let summary = Arc::new(RecordingChannel::default());
        let router = Arc::new(
            NotificationRouter::new(RateLimiter::unlimited())
                .with_channel(ChannelKind::ImmediateAlert, Arc::new(HangingChannel))
                .with_channel(ChannelKind::PersistentSummary, summary.clone())
                .with_send_timeout(Duration::from_secs(2)),
        );
        let (notifier, rx) = Notifier::channel(16);
        let token = CancellationToken::new();
        let handle = router.clone().spawn(rx, token.clone());

        notifier.notify(NotificationEvent::critical(Component::WorkerPool, "down", ""));
        notifier.notify(NotificationEvent::warning(Component::Detector, "later", ""));
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(*summary.sent.lock(), vec!["down".to_string(), "later".to_string()]);
        assert_eq!(router.stats().channel(ChannelKind::Log).delivered, 2);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_unconfigured_channel_skipped() {
        let router = NotificationRouter::new(RateLimiter::unlimited());
        let event = NotificationEvent::critical(Component::WorkerPool, "down", "");
        let report = router.dispatch(&event).await;

        assert_eq!(
            report.outcome(ChannelKind::ImmediateAlert),
            Some(DeliveryOutcome::Skipped)
        );
        assert_eq!(
            report.outcome(ChannelKind::Log),
            Some(DeliveryOutcome::Delivered)
        );
    }

    #[tokio::test]
    async fn test_spawned_router_drains_on_cancel() {
        let summary = Arc::new(RecordingChannel::default());
        let router = Arc::new(
            NotificationRouter::new(RateLimiter::unlimited())
                .with_channel(ChannelKind::PersistentSummary, summary.clone()),
        );
        let (notifier, rx) = Notifier::channel(16);
        let token = CancellationToken::new();

        for i in 0..3 {
            notifier.notify(NotificationEvent::warning(
                Component::Detector,
                format!("w{i}"),
                "",
            ));
        }
        token.cancel();
        router.spawn(rx, token).await.unwrap();

        assert_eq!(summary.sent.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_notifier_full_inbox_drops() {
        let (notifier, mut rx) = Notifier::channel(1);
        notifier.notify(NotificationEvent::info(Component::Service, "a", ""));
        notifier.notify(NotificationEvent::info(Component::Service, "b", ""));

        assert_eq!(rx.recv().await.unwrap().title, "a");
        assert!(rx.try_recv().is_err());
    }
}
