//! Bounded set of identities the detector has already enqueued.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::Result;
use crate::pipeline::ItemId;

/// Deduplication set with insertion-order compaction.
///
/// `capacity` is enforced by [`SeenSet::compact`], which never evicts a
/// pinned identity, so the set may exceed it while many items are pinned.
///
/// When a backing file is configured the set is loaded from it at startup
/// and rewritten by [`SeenSet::persist`], one identity per line, oldest
/// first.
#[derive(Debug)]
pub struct SeenSet {
    ids: HashSet<ItemId>,
    /// Insertion order, oldest first. Same members as `ids`.
    order: VecDeque<ItemId>,
    capacity: usize,
    path: Option<PathBuf>,
    dirty: bool,
}

impl SeenSet {
    /// In-memory set.
    pub fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            path: None,
            dirty: false,
        }
    }

    /// File-backed set; a missing file yields an empty set.
    pub async fn load(path: impl Into<PathBuf>, capacity: usize) -> Result<Self> {
        let path = path.into();
        let mut set = Self::new(capacity);

        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                for line in contents.lines().filter(|l| !l.is_empty()) {
                    set.insert(ItemId::new(line));
                }
                set.compact(|_| false);
                info!(
                    "Loaded {} seen identities from {}",
                    set.len(),
                    path.display()
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No seen-ids file at {}, starting empty", path.display());
            }
            Err(e) => return Err(e.into()),
        }

        set.path = Some(path);
        set.dirty = false;
        Ok(set)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.ids.contains(identity)
    }

    /// Insert an identity; returns false if it was already present.
    pub fn insert(&mut self, identity: ItemId) -> bool {
        if !self.ids.insert(identity.clone()) {
            return false;
        }
        self.order.push_back(identity);
        self.dirty = true;
        true
    }

    /// Forget an identity so it is reported as new again.
    pub fn remove(&mut self, identity: &str) -> bool {
        if !self.ids.remove(identity) {
            return false;
        }
        if let Some(pos) = self.order.iter().position(|id| id.as_str() == identity) {
            self.order.remove(pos);
        }
        self.dirty = true;
        true
    }

    /// Evict the oldest identities not matched by `pinned` until the set
    /// is back within capacity. Returns the number evicted.
    pub fn compact(&mut self, pinned: impl Fn(&ItemId) -> bool) -> usize {
        let mut excess = self.ids.len().saturating_sub(self.capacity);
        if excess == 0 {
            return 0;
        }

        let before = self.ids.len();
        let ids = &mut self.ids;
        self.order.retain(|id| {
            if excess == 0 || pinned(id) {
                return true;
            }
            ids.remove(id);
            excess -= 1;
            false
        });

        let evicted = before - self.ids.len();
        if evicted > 0 {
            self.dirty = true;
        }
        evicted
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Rewrite the backing file if the set changed since the last persist.
    ///
    /// Returns `Ok(false)` when there was nothing to write.
    pub async fn persist(&mut self) -> Result<bool> {
        let Some(path) = self.path.clone() else {
            return Ok(false);
        };
        if !self.dirty {
            return Ok(false);
        }

        let mut contents = String::new();
        for id in &self.order {
            // One identity per line; a line break inside one cannot round-trip.
            if id.as_str().contains(['\n', '\r']) {
                warn!("Not persisting identity containing a line break: {:?}", id.as_str());
                continue;
            }
            contents.push_str(id.as_str());
            contents.push('\n');
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &path).await?;

        self.dirty = false;
        Ok(true)
    }
}
