//! Notification channels.
//!
//! This module provides the transports behind each [`ChannelKind`]:
//! - Application log (tracing)
//! - Markdown summary file
//! - Discord webhooks
//! - Generic webhooks (HTTP POST)

mod discord;
mod file;
mod log;
mod webhook;

pub use discord::{DiscordChannel, DiscordConfig};
pub use file::{FileChannel, FileConfig};
pub use log::LogChannel;
pub use webhook::{WebhookChannel, WebhookConfig};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::events::NotificationEvent;
use crate::Result;

/// Trait for notification channels.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Get the channel type name.
    fn channel_type(&self) -> &'static str;

    /// Send a notification through this channel.
    async fn send(&self, event: &NotificationEvent) -> Result<()>;
}

/// Channel adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConfig {
    /// Write through the application log.
    Log,
    /// Append markdown entries to a file.
    File(FileConfig),
    /// Discord webhook channel.
    Discord(DiscordConfig),
    /// Generic webhook channel.
    Webhook(WebhookConfig),
}

impl ChannelConfig {
    /// Get the channel type name.
    pub fn channel_type(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::File(_) => "file",
            Self::Discord(_) => "discord",
            Self::Webhook(_) => "webhook",
        }
    }

    /// Build the channel adapter.
    pub fn build(&self) -> Result<Arc<dyn NotificationChannel>> {
        let channel: Arc<dyn NotificationChannel> = match self {
            Self::Log => Arc::new(LogChannel),
            Self::File(c) => Arc::new(FileChannel::new(c.clone())),
            Self::Discord(c) => Arc::new(DiscordChannel::new(c.clone())?),
            Self::Webhook(c) => Arc::new(WebhookChannel::new(c.clone())?),
        };
        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_config_tagged() {
        let config: ChannelConfig = serde_json::from_str(
            r#"{"type": "webhook", "url": "https://example.com/hook"}"#,
        )
        .unwrap();
        assert_eq!(config.channel_type(), "webhook");

        let config: ChannelConfig = serde_json::from_str(r#"{"type": "log"}"#).unwrap();
        assert!(matches!(config, ChannelConfig::Log));
    }

    #[test]
    fn test_build_file_channel() {
        let config = ChannelConfig::File(FileConfig {
            path: "summary.md".into(),
        });
        let channel = config.build().unwrap();
        assert_eq!(channel.channel_type(), "file");
    }
}
