//! Coalescing of state mutations into fewer publish cycles.
//!
//! Workers hand mutations to a channel; a single task collects them for up
//! to `coalesce_window_ms` (or `coalesce_max_batch` items) and applies the
//! batch under one lock acquisition.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::aggregate::StateConfig;
use super::guard::{SharedStateGuard, StateMutation, StateWriter};

/// Background task batching state mutations.
pub struct CoalescingUpdater {
    sender: mpsc::Sender<StateMutation>,
    cancellation_token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CoalescingUpdater {
    /// Spawn the flush loop for `guard`.
    pub fn spawn(guard: Arc<SharedStateGuard>, config: &StateConfig) -> Self {
        let max_batch = config.coalesce_max_batch.max(1);
        let window = Duration::from_millis(config.coalesce_window_ms);
        let (sender, receiver) = mpsc::channel(max_batch * 2);
        let cancellation_token = CancellationToken::new();

        let handle = tokio::spawn(Self::run_flush_loop(
            receiver,
            guard,
            window,
            max_batch,
            cancellation_token.clone(),
        ));

        Self {
            sender,
            cancellation_token,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Writer that feeds this updater.
    pub fn writer(&self) -> StateWriter {
        StateWriter::Coalesced(self.sender.clone())
    }

    /// Apply everything still pending and stop the loop.
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn run_flush_loop(
        mut receiver: mpsc::Receiver<StateMutation>,
        guard: Arc<SharedStateGuard>,
        window: Duration,
        max_batch: usize,
        cancellation_token: CancellationToken,
    ) {
        loop {
            let first = tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => break,
                mutation = receiver.recv() => match mutation {
                    Some(mutation) => mutation,
                    None => break,
                },
            };

            let mut batch = Vec::with_capacity(max_batch);
            batch.push(first);

            let deadline = tokio::time::sleep(window);
            tokio::pin!(deadline);
            while batch.len() < max_batch {
                tokio::select! {
                    _ = &mut deadline => break,
                    _ = cancellation_token.cancelled() => break,
                    mutation = receiver.recv() => match mutation {
                        Some(mutation) => batch.push(mutation),
                        None => break,
                    },
                }
            }

            let applied = guard.apply_batch(batch);
            debug!(applied, "Coalesced state publish");
        }

        // Final flush.
        receiver.close();
        let mut remaining = Vec::new();
        while let Some(mutation) = receiver.recv().await {
            remaining.push(mutation);
        }
        let applied = guard.apply_batch(remaining);
        debug!(applied, "State updater stopped");
    }
}
