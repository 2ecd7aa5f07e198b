//! Markdown summary file channel.
//!
//! Appends one entry per event, each with a small front-matter header so the
//! file stays greppable by severity and source.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::NotificationChannel;
use crate::Result;
use crate::notification::events::NotificationEvent;

/// File channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    /// Summary file path. Parent directories are created on first write.
    pub path: PathBuf,
}

/// Appends markdown entries to a summary file.
pub struct FileChannel {
    config: FileConfig,
}

impl FileChannel {
    pub fn new(config: FileConfig) -> Self {
        Self { config }
    }

    fn render(event: &NotificationEvent) -> String {
        format!(
            "---\nseverity: {}\nsource: {}\ntimestamp: {}\nid: {}\n---\n\n## {}\n\n{}\n\n",
            event.severity,
            event.source,
            event.timestamp.to_rfc3339(),
            event.id,
            event.title.replace('\n', " "),
            event.body
        )
    }
}

#[async_trait]
impl NotificationChannel for FileChannel {
    fn channel_type(&self) -> &'static str {
        "file"
    }

    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        if let Some(parent) = self.config.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.path)
            .await?;
        file.write_all(Self::render(event).as_bytes()).await?;
        file.flush().await?;

        debug!(path = %self.config.path.display(), "summary entry appended");
        Ok(())
    }
}
