//! Periodic source polling and deduplicated enqueueing.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::seen::SeenSet;
use crate::metrics::MetricsCollector;
use crate::notification::{Component, NotificationEvent, Notifier};
use crate::pipeline::{ItemId, PendingItems, PushOutcome, WorkItem, WorkQueue};
use crate::source::ItemSource;
use crate::{Error, Result};

/// Identities listed in a single notification body.
const MAX_LISTED_IDS: usize = 10;

/// Detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Time between polls.
    pub poll_interval_ms: u64,
    /// Consecutive poll failures before they are logged as errors.
    pub error_after_failures: u32,
    /// Consecutive poll failures that raise a CRITICAL event.
    pub critical_after_failures: u32,
    /// Consecutive ticks with rejected enqueues that raise a CRITICAL event.
    pub queue_full_critical_after: u32,
    /// Number of remembered identities kept once they are no longer queued,
    /// in flight or listed by the source.
    pub seen_capacity: usize,
    /// File the seen identities are persisted to.
    pub seen_ids_path: Option<PathBuf>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 60_000,
            error_after_failures: 3,
            critical_after_failures: 10,
            queue_full_critical_after: 5,
            seen_capacity: 10_000,
            seen_ids_path: None,
        }
    }
}

impl DetectorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub source_failed: bool,
    pub discovered: usize,
    pub duplicates: usize,
    pub enqueued: usize,
    pub evicted: usize,
    pub rejected: usize,
    /// New items not offered because the queue was already rejecting.
    pub deferred: usize,
    /// New items whose payload could not be fetched.
    pub fetch_failed: usize,
    /// Seen identities dropped by compaction.
    pub forgotten: usize,
}

#[derive(Debug, Default)]
struct Streaks {
    poll_failures: u32,
    queue_full_ticks: u32,
}

/// Polls an [`ItemSource`] and feeds new items into the [`WorkQueue`].
///
/// Never waits on processing: enqueue waits are bounded by the poll interval.
pub struct Detector {
    config: DetectorConfig,
    source: Arc<dyn ItemSource>,
    queue: Arc<WorkQueue>,
    seen: tokio::sync::Mutex<SeenSet>,
    pending: PendingItems,
    notifier: Notifier,
    metrics: Arc<MetricsCollector>,
    streaks: parking_lot::Mutex<Streaks>,
}

impl Detector {
    pub fn new(
        config: DetectorConfig,
        source: Arc<dyn ItemSource>,
        queue: Arc<WorkQueue>,
        seen: SeenSet,
        pending: PendingItems,
        notifier: Notifier,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            config,
            source,
            queue,
            seen: tokio::sync::Mutex::new(seen),
            pending,
            notifier,
            metrics,
            streaks: parking_lot::Mutex::new(Streaks::default()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.streaks.lock().poll_failures
    }

    /// Identities enqueued and not yet completed or failed.
    pub fn pending(&self) -> &PendingItems {
        &self.pending
    }

    /// Poll once and enqueue every unseen item.
    pub async fn tick(&self, cancel: &CancellationToken) -> TickReport {
        let started = Instant::now();
        let budget = self.poll_interval();

        let polled = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TickReport::default(),
            polled = self.source.poll() => polled,
        };

        let listed = match polled {
            Ok(listed) => {
                self.record_poll_success();
                listed
            }
            Err(e) => {
                self.record_poll_failure(&e);
                return TickReport {
                    source_failed: true,
                    ..Default::default()
                };
            }
        };
        self.metrics.record_poll(listed.len() as u64);

        let mut report = TickReport {
            discovered: listed.len(),
            ..Default::default()
        };
        let mut rejected: Vec<ItemId> = Vec::new();
        let mut evicted: Vec<ItemId> = Vec::new();
        let mut seen = self.seen.lock().await;

        for identity in &listed {
            if seen.contains(identity.as_str()) {
                report.duplicates += 1;
                continue;
            }
            if !rejected.is_empty() {
                report.deferred += 1;
                continue;
            }

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                fetched = self.source.fetch(identity) => fetched,
            };
            let payload = match fetched {
                Ok(payload) => payload,
                Err(e) => {
                    // Not marked seen; offered again while the source lists it.
                    warn!(identity = %identity, "Could not fetch item, skipping: {}", e);
                    report.fetch_failed += 1;
                    continue;
                }
            };

            let identity = identity.clone();
            seen.insert(identity.clone());
            self.pending.insert(identity.clone());
            let work = WorkItem::new(identity.clone(), payload);
            let max_wait = budget.saturating_sub(started.elapsed());

            let pushed = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.unmark(&mut seen, &identity);
                    break;
                }
                pushed = self.queue.push_within(work, max_wait) => pushed,
            };

            match pushed {
                Ok(PushOutcome::Enqueued) => {
                    report.enqueued += 1;
                    self.metrics.record_enqueued();
                    debug!(identity = %identity, "Enqueued item");
                }
                Ok(PushOutcome::EvictedOldest(oldest)) => {
                    report.enqueued += 1;
                    report.evicted += 1;
                    self.metrics.record_enqueued();
                    self.metrics.record_evicted();
                    // Offer the evicted item again on a later tick.
                    self.unmark(&mut seen, &oldest.identity);
                    evicted.push(oldest.identity);
                }
                Err(e) if e.is_backpressure() => {
                    self.unmark(&mut seen, &identity);
                    self.metrics.record_rejected();
                    warn!(identity = %identity, "Enqueue rejected: {}", e);
                    rejected.push(identity);
                }
                Err(Error::Shutdown) => {
                    self.unmark(&mut seen, &identity);
                    break;
                }
                Err(e) => {
                    self.unmark(&mut seen, &identity);
                    error!(identity = %identity, "Unexpected enqueue error: {}", e);
                }
            }
        }
        report.rejected = rejected.len();

        // Anything still listed or pending must stay seen, or it would be
        // enqueued again on the next tick.
        let still_listed: HashSet<&str> = listed.iter().map(ItemId::as_str).collect();
        report.forgotten = seen.compact(|id| {
            still_listed.contains(id.as_str()) || self.pending.contains(id.as_str())
        });
        if report.forgotten > 0 {
            debug!(forgotten = report.forgotten, "Compacted seen identities");
        }

        self.persist_locked(&mut seen).await;
        drop(seen);

        self.report_backpressure(&rejected, &evicted, report.deferred);
        self.metrics.record_duplicates(report.duplicates as u64);
        self.metrics.set_queue_depth(self.queue.len());

        debug!(
            discovered = report.discovered,
            enqueued = report.enqueued,
            duplicates = report.duplicates,
            rejected = report.rejected,
            "Detector tick complete"
        );
        report
    }

    fn unmark(&self, seen: &mut SeenSet, identity: &ItemId) {
        seen.remove(identity.as_str());
        self.pending.remove(identity.as_str());
    }

    fn record_poll_success(&self) {
        let mut streaks = self.streaks.lock();
        if streaks.poll_failures > 0 {
            info!(
                source = self.source.name(),
                "Source recovered after {} failed poll(s)", streaks.poll_failures
            );
        }
        streaks.poll_failures = 0;
    }

    fn record_poll_failure(&self, err: &Error) {
        let failures = {
            let mut streaks = self.streaks.lock();
            streaks.poll_failures += 1;
            streaks.poll_failures
        };
        self.metrics.record_poll_failure();

        if failures >= self.config.error_after_failures {
            error!(
                source = self.source.name(),
                failures, "Poll failed: {}", err
            );
        } else {
            warn!(
                source = self.source.name(),
                failures, "Poll failed, retrying next tick: {}", err
            );
        }

        if failures == self.config.critical_after_failures {
            self.notifier.notify(NotificationEvent::critical(
                Component::Detector,
                format!("Source '{}' unavailable", self.source.name()),
                format!("{} consecutive poll failures; last error: {}", failures, err),
            ));
        }
    }

    fn report_backpressure(&self, rejected: &[ItemId], evicted: &[ItemId], deferred: usize) {
        if !evicted.is_empty() {
            self.notifier.notify(NotificationEvent::warning(
                Component::WorkQueue,
                "Work queue full, dropped oldest items",
                format!(
                    "{} queued item(s) evicted and will be offered again: {}",
                    evicted.len(),
                    list_ids(evicted)
                ),
            ));
        }

        let ticks = {
            let mut streaks = self.streaks.lock();
            if rejected.is_empty() {
                streaks.queue_full_ticks = 0;
                return;
            }
            streaks.queue_full_ticks += 1;
            streaks.queue_full_ticks
        };

        self.notifier.notify(NotificationEvent::warning(
            Component::WorkQueue,
            "Work queue full, enqueue rejected",
            format!(
                "{} item(s) rejected and {} deferred (capacity {}); retrying next tick: {}",
                rejected.len(),
                deferred,
                self.queue.capacity(),
                list_ids(rejected)
            ),
        ));

        if ticks == self.config.queue_full_critical_after {
            self.notifier.notify(NotificationEvent::critical(
                Component::WorkQueue,
                "Work queue persistently full",
                format!(
                    "Enqueue rejected on {} consecutive ticks (capacity {})",
                    ticks,
                    self.queue.capacity()
                ),
            ));
        }
    }

    async fn persist_locked(&self, seen: &mut SeenSet) {
        if let Err(e) = seen.persist().await {
            warn!("Failed to persist seen identities: {}", e);
            self.notifier.notify(NotificationEvent::warning(
                Component::Detector,
                "Dedup set could not be persisted",
                format!(
                    "{}; items were still enqueued and may be processed again after a restart",
                    e
                ),
            ));
        }
    }

    /// Forget identities so they are rediscovered, then persist.
    pub async fn forget<'a>(&self, identities: impl IntoIterator<Item = &'a ItemId>) {
        let mut seen = self.seen.lock().await;
        let mut forgotten = 0usize;
        for identity in identities {
            if seen.remove(identity.as_str()) {
                forgotten += 1;
            }
        }
        if forgotten > 0 {
            info!(forgotten, "Unprocessed items will be rediscovered on restart");
        }
        self.persist_locked(&mut seen).await;
    }

    /// Persist the seen set if it changed.
    pub async fn persist_seen(&self) -> Result<bool> {
        self.seen.lock().await.persist().await
    }

    pub async fn has_seen(&self, identity: &str) -> bool {
        self.seen.lock().await.contains(identity)
    }

    /// Run one tick per poll interval until cancelled.
    ///
    /// Ticks never overlap; a slow tick causes the missed ticks to be skipped.
    pub fn spawn(self: Arc<Self>, cancellation_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                source = self.source.name(),
                "Detector started, polling every {:?}",
                self.poll_interval()
            );
            let mut ticker = tokio::time::interval(self.poll_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = cancellation_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                self.tick(&cancellation_token).await;
            }

            info!("Detector stopped");
        })
    }
}

fn list_ids(ids: &[ItemId]) -> String {
    let mut listed: Vec<&str> = ids.iter().take(MAX_LISTED_IDS).map(ItemId::as_str).collect();
    if ids.len() > MAX_LISTED_IDS {
        listed.push("...");
    }
    listed.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::Severity;
    use crate::pipeline::{BackpressurePolicy, QueueConfig};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Returns the scripted listings in order, then the last one forever.
    struct ScriptedSource {
        batches: Mutex<Vec<Result<Vec<ItemId>>>>,
        unreadable: Mutex<HashSet<String>>,
        fetches: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(batches: Vec<Result<Vec<ItemId>>>) -> Self {
            Self {
                batches: Mutex::new(batches),
                unreadable: Mutex::new(HashSet::new()),
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ItemSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn poll(&self) -> Result<Vec<ItemId>> {
            let mut batches = self.batches.lock();
            if batches.len() > 1 {
                return batches.remove(0);
            }
            match batches.first() {
                Some(Ok(ids)) => Ok(ids.clone()),
                Some(Err(_)) | None => Err(Error::source_unavailable("down")),
            }
        }

        async fn fetch(&self, identity: &ItemId) -> Result<Vec<u8>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.unreadable.lock().contains(identity.as_str()) {
                return Err(Error::source_unavailable("gone"));
            }
            Ok(identity.as_str().as_bytes().to_vec())
        }
    }

    fn items(ids: &[&str]) -> Vec<ItemId> {
        ids.iter().map(ItemId::new).collect()
    }

    fn detector(
        source: ScriptedSource,
        capacity: usize,
        backpressure: BackpressurePolicy,
        config: DetectorConfig,
    ) -> (Detector, Arc<WorkQueue>, mpsc::Receiver<NotificationEvent>) {
        detector_with_seen(source, capacity, backpressure, config, SeenSet::new(100))
    }

    fn detector_with_seen(
        source: impl ItemSource + 'static,
        capacity: usize,
        backpressure: BackpressurePolicy,
        config: DetectorConfig,
        seen: SeenSet,
    ) -> (Detector, Arc<WorkQueue>, mpsc::Receiver<NotificationEvent>) {
        let (notifier, rx) = Notifier::channel(64);
        let queue = Arc::new(WorkQueue::new(QueueConfig {
            capacity,
            backpressure,
        }));
        let detector = Detector::new(
            config,
            Arc::new(source),
            queue.clone(),
            seen,
            PendingItems::new(),
            notifier,
            Arc::new(MetricsCollector::new()),
        );
        (detector, queue, rx)
    }

    fn queued_ids(queue: &WorkQueue) -> Vec<String> {
        queue
            .drain()
            .into_iter()
            .map(|item| item.identity.to_string())
            .collect()
    }

    fn drain_events(rx: &mut mpsc::Receiver<NotificationEvent>) -> Vec<NotificationEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_new_items_enqueued_once() {
        let source = ScriptedSource::new(vec![Ok(items(&["A", "B", "C"]))]);
        let (detector, queue, _rx) = detector(
            source,
            10,
            BackpressurePolicy::RejectNew,
            DetectorConfig::default(),
        );
        let token = CancellationToken::new();

        let first = detector.tick(&token).await;
        assert_eq!(first.enqueued, 3);
        assert_eq!(detector.pending().len(), 3);

        let second = detector.tick(&token).await;
        assert_eq!(second.enqueued, 0);
        assert_eq!(second.duplicates, 3);
        assert_eq!(queue.len(), 3);

        let first = queue.pop().await.unwrap();
        assert_eq!(first.identity.as_str(), "A");
        assert_eq!(&*first.payload, b"A");
        assert_eq!(queue.pop().await.unwrap().identity.as_str(), "B");
        assert_eq!(queue.pop().await.unwrap().identity.as_str(), "C");
    }

    #[tokio::test]
    async fn test_reject_new_warns_and_rediscovers() {
        let source = ScriptedSource::new(vec![Ok(items(&["1", "2", "3", "4", "5", "6"]))]);
        let (detector, queue, mut rx) = detector(
            source,
            5,
            BackpressurePolicy::RejectNew,
            DetectorConfig::default(),
        );
        let token = CancellationToken::new();

        let report = detector.tick(&token).await;
        assert_eq!(report.enqueued, 5);
        assert_eq!(report.rejected, 1);
        assert!(!detector.has_seen("6").await);
        assert!(!detector.pending().contains("6"));

        let events = drain_events(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Warning);

        // Space frees up; the rejected item is offered again.
        queue.pop().await.unwrap();
        let report = detector.tick(&token).await;
        assert_eq!(report.enqueued, 1);
        assert_eq!(report.duplicates, 5);
        assert!(detector.has_seen("6").await);
    }

    #[tokio::test]
    async fn test_drop_oldest_forgets_evicted() {
        let source = ScriptedSource::new(vec![Ok(items(&["a", "b", "c"]))]);
        let (detector, queue, mut rx) = detector(
            source,
            2,
            BackpressurePolicy::DropOldest,
            DetectorConfig::default(),
        );

        let report = detector.tick(&CancellationToken::new()).await;
        assert_eq!(report.enqueued, 3);
        assert_eq!(report.evicted, 1);
        assert!(!detector.has_seen("a").await);
        assert!(!detector.pending().contains("a"));
        assert_eq!(queue.len(), 2);

        let events = drain_events(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Warning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_with_timeout_bounded_by_interval() {
        let source = ScriptedSource::new(vec![Ok(items(&["a", "b", "c"]))]);
        let config = DetectorConfig {
            poll_interval_ms: 200,
            ..Default::default()
        };
        let (detector, _queue, _rx) = detector(
            source,
            1,
            BackpressurePolicy::BlockWithTimeout { timeout_ms: 10_000 },
            config,
        );

        let started = Instant::now();
        let report = detector.tick(&CancellationToken::new()).await;

        assert!(started.elapsed() <= Duration::from_millis(250));
        assert_eq!(report.enqueued, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.deferred, 1);
    }

    #[tokio::test]
    async fn test_consecutive_poll_failures_escalate_once() {
        let source = ScriptedSource::new(vec![Err(Error::source_unavailable("down"))]);
        let config = DetectorConfig {
            error_after_failures: 2,
            critical_after_failures: 3,
            ..Default::default()
        };
        let (detector, _queue, mut rx) =
            detector(source, 10, BackpressurePolicy::RejectNew, config);
        let token = CancellationToken::new();

        for _ in 0..5 {
            let report = detector.tick(&token).await;
            assert!(report.source_failed);
        }

        assert_eq!(detector.consecutive_failures(), 5);
        let events = drain_events(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_poll_recovery_resets_streak() {
        let source = ScriptedSource::new(vec![
            Err(Error::source_unavailable("down")),
            Err(Error::source_unavailable("down")),
            Ok(items(&["x"])),
        ]);
        let (detector, queue, _rx) = detector(
            source,
            10,
            BackpressurePolicy::RejectNew,
            DetectorConfig::default(),
        );
        let token = CancellationToken::new();

        detector.tick(&token).await;
        detector.tick(&token).await;
        assert_eq!(detector.consecutive_failures(), 2);

        let report = detector.tick(&token).await;
        assert!(!report.source_failed);
        assert_eq!(detector.consecutive_failures(), 0);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_persistent_queue_full_raises_critical() {
        let source = ScriptedSource::new(vec![Ok(items(&["a", "b"]))]);
        let config = DetectorConfig {
            queue_full_critical_after: 2,
            ..Default::default()
        };
        let (detector, _queue, mut rx) =
            detector(source, 1, BackpressurePolicy::RejectNew, config);
        let token = CancellationToken::new();

        for _ in 0..4 {
            detector.tick(&token).await;
        }

        let events = drain_events(&mut rx);
        let critical = events
            .iter()
            .filter(|e| e.severity == Severity::Critical)
            .count();
        let warnings = events
            .iter()
            .filter(|e| e.severity == Severity::Warning)
            .count();
        assert_eq!(critical, 1);
        assert_eq!(warnings, 4);
    }

    #[tokio::test]
    async fn test_persist_failure_still_enqueues() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("seen_ids");
        let seen = SeenSet::load(&path, 100).await.unwrap();
        // A non-empty directory at the target path makes the rename fail.
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("blocker"), b"").unwrap();

        let (notifier, mut rx) = Notifier::channel(16);
        let queue = Arc::new(WorkQueue::new(QueueConfig::default()));
        let detector = Detector::new(
            DetectorConfig::default(),
            Arc::new(ScriptedSource::new(vec![Ok(items(&["a"]))])),
            queue.clone(),
            seen,
            PendingItems::new(),
            notifier,
            Arc::new(MetricsCollector::new()),
        );

        let report = detector.tick(&CancellationToken::new()).await;
        assert_eq!(report.enqueued, 1);
        assert_eq!(queue.len(), 1);

        let events = drain_events(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Warning);
        assert_eq!(events[0].title, "Dedup set could not be persisted");
    }

    #[tokio::test]
    async fn test_forget_allows_rediscovery() {
        let source = ScriptedSource::new(vec![Ok(items(&["a"]))]);
        let (detector, queue, _rx) = detector(
            source,
            10,
            BackpressurePolicy::RejectNew,
            DetectorConfig::default(),
        );
        let token = CancellationToken::new();

        detector.tick(&token).await;
        let remaining = queue.drain();
        detector
            .forget(remaining.iter().map(|item| &item.identity))
            .await;

        let report = detector.tick(&token).await;
        assert_eq!(report.enqueued, 1);
    }

    #[tokio::test]
    async fn test_small_seen_capacity_never_requeues_pending() {
        let source = ScriptedSource::new(vec![Ok(items(&["a", "b", "c"]))]);
        let (detector, queue, _rx) = detector_with_seen(
            source,
            10,
            BackpressurePolicy::RejectNew,
            DetectorConfig::default(),
            SeenSet::new(2),
        );
        let token = CancellationToken::new();

        detector.tick(&token).await;
        let second = detector.tick(&token).await;

        assert_eq!(second.enqueued, 0);
        assert_eq!(second.duplicates, 3);
        assert_eq!(second.forgotten, 0);
        assert_eq!(queued_ids(&queue), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_compaction_drops_finished_unlisted_items() {
        let source = ScriptedSource::new(vec![Ok(items(&["a", "b", "c"])), Ok(items(&["d"]))]);
        let (detector, queue, _rx) = detector_with_seen(
            source,
            10,
            BackpressurePolicy::RejectNew,
            DetectorConfig::default(),
            SeenSet::new(2),
        );
        let token = CancellationToken::new();

        detector.tick(&token).await;
        // "a" and "b" finish; "c" is still being processed.
        for id in queued_ids(&queue).iter().take(2) {
            detector.pending().remove(id);
        }

        let report = detector.tick(&token).await;
        assert_eq!(report.enqueued, 1);
        assert_eq!(report.forgotten, 2);
        assert!(!detector.has_seen("a").await);
        assert!(!detector.has_seen("b").await);
        assert!(detector.has_seen("c").await);
        assert!(detector.has_seen("d").await);
    }

    #[tokio::test]
    async fn test_payload_fetched_only_for_new_items() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(items(&["a", "b"]))]));
        let (notifier, _rx) = Notifier::channel(16);
        let detector = Detector::new(
            DetectorConfig::default(),
            source.clone(),
            Arc::new(WorkQueue::new(QueueConfig::default())),
            SeenSet::new(100),
            PendingItems::new(),
            notifier,
            Arc::new(MetricsCollector::new()),
        );
        let token = CancellationToken::new();

        for _ in 0..3 {
            detector.tick(&token).await;
        }
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_skips_item_until_readable() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(items(&["a", "b"]))]));
        source.unreadable.lock().insert("a".to_string());
        let (notifier, _rx) = Notifier::channel(16);
        let queue = Arc::new(WorkQueue::new(QueueConfig::default()));
        let detector = Detector::new(
            DetectorConfig::default(),
            source.clone(),
            queue.clone(),
            SeenSet::new(100),
            PendingItems::new(),
            notifier,
            Arc::new(MetricsCollector::new()),
        );
        let token = CancellationToken::new();

        let report = detector.tick(&token).await;
        assert_eq!(report.fetch_failed, 1);
        assert_eq!(report.enqueued, 1);
        assert!(!detector.has_seen("a").await);

        source.unreadable.lock().clear();
        let report = detector.tick(&token).await;
        assert_eq!(report.enqueued, 1);
        assert_eq!(queued_ids(&queue), vec!["b", "a"]);
    }

    #[test]
    fn test_list_ids_truncates() {
        let ids: Vec<ItemId> = (0..12).map(|i| ItemId::new(i.to_string())).collect();
        let listed = list_ids(&ids);
        assert!(listed.starts_with("0, 1, 2"));
        assert!(listed.ends_with("..."));
    }
}
