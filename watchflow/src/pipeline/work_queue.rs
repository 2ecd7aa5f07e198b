//! Bounded FIFO work queue with a configurable backpressure policy.
//!
//! The detector is the only producer; worker tasks are the consumers.
//! Consumers wait on a [`Notify`] rather than polling, and the queue's
//! cancellation token releases every waiter once shutdown begins.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::item::WorkItem;
use crate::{Error, Result};

/// What happens when an item is pushed onto a full queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Fail immediately with [`Error::QueueFull`].
    #[default]
    RejectNew,
    /// Wait for space, failing with [`Error::EnqueueTimeout`] when the wait expires.
    BlockWithTimeout { timeout_ms: u64 },
    /// Evict the oldest queued item to admit the new one.
    DropOldest,
}

/// Configuration for the work queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of queued items.
    pub capacity: usize,
    /// Policy applied when the queue is full.
    pub backpressure: BackpressurePolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            backpressure: BackpressurePolicy::default(),
        }
    }
}

/// Result of a successful push.
#[derive(Debug)]
pub enum PushOutcome {
    Enqueued,
    /// The item was admitted by evicting the returned oldest item.
    EvictedOldest(WorkItem),
}

/// Bounded FIFO queue shared by the detector and the workers.
pub struct WorkQueue {
    config: QueueConfig,
    items: Mutex<VecDeque<WorkItem>>,
    /// Signalled when an item is pushed.
    item_ready: Notify,
    /// Signalled when an item is popped.
    space_ready: Notify,
    shutdown: CancellationToken,
}

impl WorkQueue {
    pub fn new(config: QueueConfig) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            config: QueueConfig {
                capacity,
                ..config
            },
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            item_ready: Notify::new(),
            space_ready: Notify::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Push an item using the configured policy.
    pub async fn push(&self, item: WorkItem) -> Result<PushOutcome> {
        self.push_within(item, Duration::MAX).await
    }

    /// Push an item, capping any backpressure wait at `max_wait`.
    ///
    /// Only [`BackpressurePolicy::BlockWithTimeout`] ever waits; the effective
    /// wait is the smaller of its timeout and `max_wait`.
    pub async fn push_within(&self, item: WorkItem, max_wait: Duration) -> Result<PushOutcome> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Shutdown);
        }

        match self.config.backpressure {
            BackpressurePolicy::RejectNew => {
                let mut items = self.items.lock();
                if items.len() >= self.config.capacity {
                    return Err(Error::QueueFull {
                        capacity: self.config.capacity,
                    });
                }
                items.push_back(item);
                drop(items);
                self.item_ready.notify_one();
                Ok(PushOutcome::Enqueued)
            }
            BackpressurePolicy::DropOldest => {
                let mut items = self.items.lock();
                let evicted = if items.len() >= self.config.capacity {
                    items.pop_front()
                } else {
                    None
                };
                items.push_back(item);
                drop(items);
                self.item_ready.notify_one();

                match evicted {
                    Some(oldest) => {
                        warn!(
                            evicted = %oldest.identity,
                            "Queue full, evicted oldest item"
                        );
                        Ok(PushOutcome::EvictedOldest(oldest))
                    }
                    None => Ok(PushOutcome::Enqueued),
                }
            }
            BackpressurePolicy::BlockWithTimeout { timeout_ms } => {
                let wait = Duration::from_millis(timeout_ms).min(max_wait);
                self.push_blocking(item, wait).await
            }
        }
    }

    async fn push_blocking(&self, item: WorkItem, wait: Duration) -> Result<PushOutcome> {
        let deadline = Instant::now().checked_add(wait);

        loop {
            {
                let mut items = self.items.lock();
                if items.len() < self.config.capacity {
                    items.push_back(item);
                    drop(items);
                    self.item_ready.notify_one();
                    return Ok(PushOutcome::Enqueued);
                }
            }

            // `notify_one` stores a permit when nobody is waiting, so a pop
            // between the check above and this await is not lost.
            let space = self.space_ready.notified();
            let expired = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(Error::Shutdown),
                _ = space => {}
                _ = expired => {
                    debug!(identity = %item.identity, "Enqueue wait expired");
                    return Err(Error::EnqueueTimeout(wait));
                }
            }
        }
    }

    /// Wait for the next item in FIFO order.
    ///
    /// Returns [`Error::Shutdown`] once the queue is closed, even if items
    /// remain queued.
    pub async fn pop(&self) -> Result<WorkItem> {
        loop {
            if self.shutdown.is_cancelled() {
                return Err(Error::Shutdown);
            }

            if let Some(item) = self.items.lock().pop_front() {
                self.space_ready.notify_one();
                return Ok(item);
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(Error::Shutdown),
                _ = self.item_ready.notified() => {}
            }
        }
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<WorkItem> {
        if self.shutdown.is_cancelled() {
            return None;
        }
        let item = self.items.lock().pop_front();
        if item.is_some() {
            self.space_ready.notify_one();
        }
        item
    }

    /// Stop accepting and handing out items and wake every waiter.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Remove and return everything still queued, oldest first.
    pub fn drain(&self) -> Vec<WorkItem> {
        self.items.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.config.backpressure
    }
}
