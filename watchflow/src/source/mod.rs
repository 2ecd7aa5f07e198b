//! External item sources polled by the detector.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::pipeline::ItemId;

mod directory;

pub use directory::DirectorySource;

/// Adapter for the external system the detector watches.
///
/// `poll` lists the identities currently available, in the order they
/// should be enqueued; it must be cheap since it runs every tick. Payloads
/// are only fetched for identities the detector has not seen.
#[async_trait]
pub trait ItemSource: Send + Sync {
    fn name(&self) -> &str;

    /// List the currently available identities.
    ///
    /// Transient failures should be reported as `Error::SourceUnavailable`.
    async fn poll(&self) -> Result<Vec<ItemId>>;

    /// Fetch the payload of one listed identity.
    ///
    /// An error skips the item for this tick; it is offered again once the
    /// source lists it on a later poll.
    async fn fetch(&self, identity: &ItemId) -> Result<Vec<u8>>;
}

/// Source selection from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Poll a directory; each regular file is one item.
    Directory {
        path: PathBuf,
        /// Only files with one of these extensions; empty means all files.
        #[serde(default)]
        extensions: Vec<String>,
    },
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::Directory {
            path: PathBuf::from("inbox"),
            extensions: Vec::new(),
        }
    }
}

impl SourceConfig {
    pub fn build(&self) -> Arc<dyn ItemSource> {
        match self {
            Self::Directory { path, extensions } => {
                Arc::new(DirectorySource::new(path.clone(), extensions.clone()))
            }
        }
    }
}
