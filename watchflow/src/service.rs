//! Service container.
//!
//! Wires every component from [`AppConfig`] and owns their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::metrics::{MetricsCollector, MetricsSnapshot, PrometheusExporter};
use crate::monitor::{Detector, SeenSet};
use crate::notification::{
    Component, NotificationEvent, NotificationRouter, NotificationStats, Notifier,
};
use crate::pipeline::{
    PendingItems, PipelineRunner, PipelineStage, WorkQueue, WorkerContext, WorkerPool,
};
use crate::source::ItemSource;
use crate::state::{AggregateState, CoalescingUpdater, SharedStateGuard, StateWriter};
use crate::{Error, Result};

/// Handles created by `start` and consumed by `shutdown`.
#[derive(Default)]
struct Tasks {
    inbox: Option<mpsc::Receiver<NotificationEvent>>,
    coalescer: Option<CoalescingUpdater>,
    detector: Option<JoinHandle<()>>,
    metrics: Option<JoinHandle<()>>,
    router: Option<JoinHandle<()>>,
    started: bool,
}

/// Holds every runtime component.
pub struct ServiceContainer {
    config: AppConfig,
    queue: Arc<WorkQueue>,
    detector: Arc<Detector>,
    runner: Arc<PipelineRunner>,
    pool: WorkerPool,
    guard: Arc<SharedStateGuard>,
    router: Arc<NotificationRouter>,
    notifier: Notifier,
    metrics: Arc<MetricsCollector>,
    pending: PendingItems,
    detector_token: CancellationToken,
    metrics_token: CancellationToken,
    router_token: CancellationToken,
    tasks: Mutex<Tasks>,
}

impl ServiceContainer {
    /// Build everything from configuration.
    pub async fn new(config: AppConfig) -> Result<Self> {
        let source = config.source.build();
        let stages = config.stages.iter().map(|s| s.build()).collect();
        let router =
            NotificationRouter::from_config(&config.notifications.channels, &config.rate_limits)?
                .with_send_timeout(Duration::from_secs(config.notifications.send_timeout_secs));
        Self::with_parts(config, source, stages, router).await
    }

    /// Build with injected source, stages and router.
    pub async fn with_parts(
        config: AppConfig,
        source: Arc<dyn ItemSource>,
        stages: Vec<PipelineStage>,
        router: NotificationRouter,
    ) -> Result<Self> {
        config.validate()?;
        info!("Initializing service container");

        let (notifier, inbox) = Notifier::channel(config.notifications.queue_capacity);
        let metrics = Arc::new(MetricsCollector::new());
        let queue = Arc::new(WorkQueue::new(config.queue.clone()));

        let seen = match &config.detector.seen_ids_path {
            Some(path) => SeenSet::load(path, config.detector.seen_capacity).await?,
            None => SeenSet::new(config.detector.seen_capacity),
        };
        let pending = PendingItems::new();
        let detector = Arc::new(Detector::new(
            config.detector.clone(),
            source,
            queue.clone(),
            seen,
            pending.clone(),
            notifier.clone(),
            metrics.clone(),
        ));

        if stages.is_empty() {
            warn!("No pipeline stages configured; items will complete immediately");
        }
        let runner = Arc::new(PipelineRunner::new(stages, notifier.clone()));
        let pool = WorkerPool::new(config.workers.clone(), notifier.clone());
        let guard = Arc::new(SharedStateGuard::new(config.state.recent_capacity));

        info!("Service container initialized");

        Ok(Self {
            config,
            queue,
            detector,
            runner,
            pool,
            guard,
            router: Arc::new(router),
            notifier,
            metrics,
            pending,
            detector_token: CancellationToken::new(),
            metrics_token: CancellationToken::new(),
            router_token: CancellationToken::new(),
            tasks: Mutex::new(Tasks {
                inbox: Some(inbox),
                ..Default::default()
            }),
        })
    }

    /// Spawn the router, state updater, workers, metrics flush and detector.
    pub fn start(&self) -> Result<()> {
        let mut tasks = self.tasks.lock();
        if tasks.started {
            return Err(Error::Other("service already started".to_string()));
        }
        let inbox = tasks
            .inbox
            .take()
            .ok_or_else(|| Error::Other("notification inbox already consumed".to_string()))?;
        tasks.started = true;

        info!(
            capacity = self.queue.capacity(),
            policy = ?self.queue.policy(),
            "Work queue ready"
        );
        info!(
            "Pipeline stages: [{}]",
            self.runner
                .stages()
                .iter()
                .map(|s| s.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        tasks.router = Some(self.router.clone().spawn(inbox, self.router_token.clone()));

        let state = if self.config.state.coalesce_window_ms > 0 {
            let coalescer = CoalescingUpdater::spawn(self.guard.clone(), &self.config.state);
            let writer = coalescer.writer();
            tasks.coalescer = Some(coalescer);
            writer
        } else {
            StateWriter::Direct(self.guard.clone())
        };

        self.pool.start(WorkerContext {
            queue: self.queue.clone(),
            runner: self.runner.clone(),
            state,
            metrics: self.metrics.clone(),
            notifier: self.notifier.clone(),
            pending: self.pending.clone(),
        });

        tasks.metrics = Some(self.metrics.clone().spawn_flush_task(
            Duration::from_secs(self.config.metrics.flush_interval_secs),
            self.metrics_token.clone(),
        ));
        tasks.detector = Some(self.detector.clone().spawn(self.detector_token.clone()));

        self.notifier.notify(NotificationEvent::info(
            Component::Service,
            "Service started",
            format!(
                "{} worker(s), queue capacity {}",
                self.pool.worker_count(),
                self.queue.capacity()
            ),
        ));
        Ok(())
    }

    /// Stop every component in dependency order.
    ///
    /// Items still queued, interrupted at a stage boundary or aborted are
    /// forgotten by the detector so they are rediscovered on the next start.
    /// Returns `ShutdownTimeout` if workers had to be aborted.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down services");
        let (detector, coalescer, metrics, router) = {
            let mut tasks = self.tasks.lock();
            (
                tasks.detector.take(),
                tasks.coalescer.take(),
                tasks.metrics.take(),
                tasks.router.take(),
            )
        };

        info!("Stopping detector...");
        self.detector_token.cancel();
        if let Some(handle) = detector
            && let Err(e) = handle.await
        {
            error!("Detector task ended abnormally: {}", e);
        }

        self.queue.close();
        let pool_result = self.pool.shutdown().await;

        let remaining = self.queue.drain();
        let mut unfinished = self.pending.drain();
        for item in &remaining {
            if !unfinished.contains(&item.identity) {
                unfinished.push(item.identity.clone());
            }
        }
        if unfinished.is_empty() {
            if let Err(e) = self.detector.persist_seen().await {
                warn!("Failed to persist seen identities: {}", e);
            }
        } else {
            info!(
                "{} item(s) did not finish ({} still queued) and will be rediscovered",
                unfinished.len(),
                remaining.len()
            );
            self.detector.forget(&unfinished).await;
        }

        if let Some(coalescer) = coalescer {
            coalescer.shutdown().await;
        }

        self.metrics_token.cancel();
        match metrics {
            Some(handle) => {
                if let Err(e) = handle.await {
                    error!("Metrics task ended abnormally: {}", e);
                }
            }
            None => {
                self.metrics.flush();
            }
        }

        let state = self.guard.snapshot();
        self.notifier.notify(NotificationEvent::info(
            Component::Service,
            "Service stopped",
            format!(
                "{} processed ({} succeeded, {} failed), {} interrupted, {} left queued",
                state.processed,
                state.succeeded,
                state.failed,
                state.interrupted,
                remaining.len()
            ),
        ));

        // The router drains pending events before exiting.
        self.router_token.cancel();
        if let Some(handle) = router
            && let Err(e) = handle.await
        {
            error!("Notification router ended abnormally: {}", e);
        }

        info!("Services shut down");
        pool_result
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn detector(&self) -> &Arc<Detector> {
        &self.detector
    }

    pub fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    /// Latest published aggregate state.
    pub fn snapshot(&self) -> Arc<AggregateState> {
        self.guard.snapshot()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<Arc<AggregateState>> {
        self.guard.subscribe()
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Metrics in Prometheus text format.
    pub fn prometheus(&self) -> String {
        PrometheusExporter::new(self.metrics.clone()).export()
    }

    pub fn notification_stats(&self) -> NotificationStats {
        self.router.stats()
    }
}
