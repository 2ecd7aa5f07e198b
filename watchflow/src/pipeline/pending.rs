//! Identities that are queued or being processed.

use std::sync::Arc;

use dashmap::DashSet;

use super::item::ItemId;

/// Shared registry of identities between enqueue and a terminal outcome.
///
/// The detector adds an identity when it enqueues it; workers remove it once
/// the item completes or fails. Interrupted items stay registered so that
/// shutdown can hand them back to the detector.
#[derive(Debug, Clone, Default)]
pub struct PendingItems {
    ids: Arc<DashSet<ItemId>>,
}

impl PendingItems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, identity: ItemId) -> bool {
        self.ids.insert(identity)
    }

    pub fn remove(&self, identity: &str) -> bool {
        self.ids.remove(identity).is_some()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.ids.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Remove and return every registered identity.
    pub fn drain(&self) -> Vec<ItemId> {
        let ids: Vec<ItemId> = self.ids.iter().map(|id| id.key().clone()).collect();
        for id in &ids {
            self.ids.remove(id);
        }
        ids
    }
}
