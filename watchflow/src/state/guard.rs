//! Serialized mutation of the aggregate state.
//!
//! Writers go through [`SharedStateGuard::with_lock`]; each mutation is
//! applied to a private copy which replaces the current state only once the
//! closure returns, and the new state is published as an immutable
//! `Arc<AggregateState>` snapshot. Readers never take the lock.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use super::aggregate::AggregateState;
use crate::{Error, Result};

/// A deferred mutation of the aggregate state.
pub type StateMutation = Box<dyn FnOnce(&mut AggregateState) + Send + 'static>;

/// Owner of the aggregate state.
pub struct SharedStateGuard {
    current: Mutex<Arc<AggregateState>>,
    published: watch::Sender<Arc<AggregateState>>,
}

impl SharedStateGuard {
    pub fn new(recent_capacity: usize) -> Self {
        let initial = Arc::new(AggregateState::new(recent_capacity));
        let (published, _) = watch::channel(initial.clone());
        Self {
            current: Mutex::new(initial),
            published,
        }
    }

    /// Apply one mutation and publish the result.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut AggregateState) -> R) -> R {
        let mut current = self.current.lock();
        let mut next = AggregateState::clone(&current);
        let result = f(&mut next);
        self.commit(&mut current, next);
        result
    }

    /// Apply several mutations in order with a single publish.
    pub fn apply_batch(&self, mutations: Vec<StateMutation>) -> usize {
        if mutations.is_empty() {
            return 0;
        }
        let count = mutations.len();
        let mut current = self.current.lock();
        let mut next = AggregateState::clone(&current);
        for mutation in mutations {
            mutation(&mut next);
        }
        self.commit(&mut current, next);
        count
    }

    fn commit(&self, current: &mut Arc<AggregateState>, mut next: AggregateState) {
        next.version += 1;
        next.updated_at = Some(Utc::now());
        let next = Arc::new(next);
        *current = next.clone();
        // Published under the lock so versions arrive in order.
        self.published.send_replace(next);
    }

    /// Latest published state.
    pub fn snapshot(&self) -> Arc<AggregateState> {
        self.published.borrow().clone()
    }

    /// Receive every newly published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<AggregateState>> {
        self.published.subscribe()
    }
}

/// Handle workers use to mutate state, directly or via the coalescer.
#[derive(Clone)]
pub enum StateWriter {
    Direct(Arc<SharedStateGuard>),
    Coalesced(mpsc::Sender<StateMutation>),
}

impl StateWriter {
    pub async fn apply<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut AggregateState) + Send + 'static,
    {
        match self {
            Self::Direct(guard) => {
                guard.with_lock(f);
                Ok(())
            }
            Self::Coalesced(tx) => tx
                .send(Box::new(f))
                .await
                .map_err(|_| Error::WorkerInternal("state updater stopped".to_string())),
        }
    }
}
