//! Worker pool implementation for pipeline processing.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::item::{ItemId, WorkItem};
use super::pending::PendingItems;
use super::runner::{ItemStatus, PipelineReport, PipelineRunner};
use super::work_queue::WorkQueue;
use crate::metrics::MetricsCollector;
use crate::notification::{Component, NotificationEvent, Notifier};
use crate::state::StateWriter;
use crate::{Error, Result};

/// Configuration for the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Number of concurrent workers.
    pub count: usize,
    /// How long `shutdown` waits for in-flight items before aborting workers.
    pub shutdown_timeout_secs: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            count: 3,
            shutdown_timeout_secs: 30,
        }
    }
}

/// Collaborators shared by every worker.
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<WorkQueue>,
    pub runner: Arc<PipelineRunner>,
    pub state: StateWriter,
    pub metrics: Arc<MetricsCollector>,
    pub notifier: Notifier,
    /// Cleared for an identity once it completes or fails.
    pub pending: PendingItems,
}

/// Item each busy worker is processing, keyed by worker id.
type InFlight = Arc<DashMap<usize, (WorkItem, Instant)>>;

/// A fixed-size pool of workers draining the work queue.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    cancellation_token: CancellationToken,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
    in_flight: InFlight,
    ctx: parking_lot::Mutex<Option<WorkerContext>>,
    notifier: Notifier,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig, notifier: Notifier) -> Self {
        Self {
            config: WorkerPoolConfig {
                count: config.count.max(1),
                ..config
            },
            cancellation_token: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
            in_flight: Arc::new(DashMap::new()),
            ctx: parking_lot::Mutex::new(None),
            notifier,
        }
    }

    /// Spawn the workers.
    pub fn start(&self, ctx: WorkerContext) {
        info!("Starting worker pool with {} workers", self.config.count);

        let mut tasks = self.tasks.lock();
        if let Some(ref mut join_set) = *tasks {
            for worker_id in 0..self.config.count {
                let ctx = ctx.clone();
                let token = self.cancellation_token.clone();
                let in_flight = self.in_flight.clone();
                join_set.spawn(worker_loop(worker_id, ctx, token, in_flight));
            }
        }
        *self.ctx.lock() = Some(ctx);
    }

    /// Signal every worker to stop after its current stage and wait for them.
    ///
    /// Workers still running after the shutdown timeout are aborted and a
    /// CRITICAL event is raised. Their items are recorded as interrupted and
    /// stay in the pending registry.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Stopping worker pool");
        self.cancellation_token.cancel();

        // Take the join set out of the mutex before awaiting
        let join_set = self.tasks.lock().take();
        let Some(mut join_set) = join_set else {
            return Ok(());
        };

        let timeout = Duration::from_secs(self.config.shutdown_timeout_secs);
        let drained = tokio::time::timeout(timeout, async {
            while let Some(result) = join_set.join_next().await {
                if let Err(e) = result {
                    error!("Worker task ended abnormally: {}", e);
                }
            }
        })
        .await;

        if drained.is_ok() {
            info!("Worker pool stopped");
            return Ok(());
        }

        let remaining = join_set.len();
        error!(
            remaining,
            "Worker pool did not stop within {:?}, aborting workers", timeout
        );
        join_set.abort_all();
        while join_set.join_next().await.is_some() {}

        let aborted = self.record_aborted().await;
        self.notifier.notify(NotificationEvent::critical(
            Component::WorkerPool,
            "Worker pool shutdown timed out",
            format!(
                "{} worker(s) were still running after {:?} and were terminated; interrupted: {}",
                remaining,
                timeout,
                aborted
                    .iter()
                    .map(|id| id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        ));
        Err(Error::ShutdownTimeout { remaining })
    }

    /// Record the items of aborted workers as interrupted.
    async fn record_aborted(&self) -> Vec<ItemId> {
        let aborted: Vec<(WorkItem, Instant)> = self
            .in_flight
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.in_flight.clear();

        let ctx = self.ctx.lock().clone();
        let Some(ctx) = ctx else {
            return aborted.into_iter().map(|(item, _)| item.identity).collect();
        };

        let mut identities = Vec::with_capacity(aborted.len());
        for (item, started) in aborted {
            warn!(identity = %item.identity, "Item interrupted by worker abort");
            let report = PipelineReport::aborted(&item, started.elapsed());
            ctx.metrics.record_item(&report);
            ctx.metrics.worker_idle();
            if let Err(e) = ctx.state.apply(move |state| state.record_report(&report)).await {
                warn!(identity = %item.identity, "Could not record interrupted item: {}", e);
            }
            identities.push(item.identity);
        }
        identities
    }

    /// Check if the pool is running.
    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }

    pub fn worker_count(&self) -> usize {
        self.config.count
    }
}

async fn worker_loop(
    worker_id: usize,
    ctx: WorkerContext,
    token: CancellationToken,
    in_flight: InFlight,
) {
    debug!("Worker {} started", worker_id);

    loop {
        let item = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            popped = ctx.queue.pop() => match popped {
                Ok(item) => item,
                Err(Error::Shutdown) => break,
                Err(e) => {
                    error!("Worker {} failed to pop: {}", worker_id, e);
                    continue;
                }
            },
        };

        ctx.metrics.set_queue_depth(ctx.queue.len());
        ctx.metrics.worker_busy();
        in_flight.insert(worker_id, (item.clone(), Instant::now()));
        debug!(identity = %item.identity, "Worker {} processing item", worker_id);

        let outcome = AssertUnwindSafe(process_item(&ctx, &item, &token))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(report)) => {
                debug!(
                    identity = %item.identity,
                    status = %report.status,
                    "Worker {} finished item", worker_id
                );
                // Interrupted items stay pending so shutdown can hand them back.
                if report.status != ItemStatus::Interrupted {
                    ctx.pending.remove(item.identity.as_str());
                }
            }
            Ok(Err(e)) => {
                handle_internal_error(&ctx, &item, worker_id, &e.to_string()).await;
                ctx.pending.remove(item.identity.as_str());
            }
            Err(panic) => {
                let message = format!("worker panicked: {}", panic_message(&*panic));
                handle_internal_error(&ctx, &item, worker_id, &message).await;
                ctx.pending.remove(item.identity.as_str());
            }
        }

        in_flight.remove(&worker_id);
        ctx.metrics.worker_idle();
    }

    debug!("Worker {} shutting down", worker_id);
}

async fn process_item(
    ctx: &WorkerContext,
    item: &WorkItem,
    token: &CancellationToken,
) -> Result<PipelineReport> {
    let report = ctx.runner.run(item, token).await;
    ctx.metrics.record_item(&report);

    let recorded = report.clone();
    ctx.state
        .apply(move |state| state.record_report(&recorded))
        .await?;

    Ok(report)
}

async fn handle_internal_error(
    ctx: &WorkerContext,
    item: &WorkItem,
    worker_id: usize,
    message: &str,
) {
    error!(
        identity = %item.identity,
        "Worker {} internal error, marking item failed: {}", worker_id, message
    );
    ctx.metrics.record_internal_error();

    let identity = item.identity.clone();
    if let Err(e) = ctx
        .state
        .apply(move |state| state.record_internal_failure(&identity))
        .await
    {
        warn!(identity = %item.identity, "Could not record failed item: {}", e);
    }

    ctx.notifier.notify(NotificationEvent::error(
        Component::WorkerPool,
        format!("Internal error processing {}", item.identity),
        message.to_string(),
    ));
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
