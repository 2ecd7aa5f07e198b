//! Work items carried through the pipeline.

use std::borrow::Borrow;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque, immutable identity of a unit of work.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Arc<str>);

impl ItemId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl Borrow<str> for ItemId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A unit of work discovered by the detector.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Identity used for deduplication.
    pub identity: ItemId,
    /// Opaque payload handed to stage executors.
    pub payload: Arc<[u8]>,
    /// When the item entered the queue.
    pub enqueued_at: DateTime<Utc>,
    /// Attempt number, starting at 1.
    pub attempt: u32,
}

impl WorkItem {
    /// Create a first-attempt work item.
    pub fn new(identity: impl Into<ItemId>, payload: impl Into<Arc<[u8]>>) -> Self {
        Self {
            identity: identity.into(),
            payload: payload.into(),
            enqueued_at: Utc::now(),
            attempt: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_new_item_first_attempt() {
        let item = WorkItem::new("msg-1", b"hello".to_vec());
        assert_eq!(item.attempt, 1);
        assert_eq!(item.identity.as_str(), "msg-1");
        assert_eq!(&*item.payload, b"hello");
    }

    #[test]
    fn test_item_id_lookup_by_str() {
        let mut set = HashSet::new();
        set.insert(ItemId::new("a"));
        assert!(set.contains("a"));
        assert!(!set.contains("b"));
    }
}
