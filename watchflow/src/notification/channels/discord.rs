//! Discord webhook notification channel.
//!
//! Retries on 429 responses respecting the Retry-After header.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::NotificationChannel;
use crate::notification::events::{NotificationEvent, Severity};
use crate::{Error, Result};

/// Maximum number of retries for rate-limited requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Discord channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Discord webhook URL.
    pub webhook_url: String,
    /// Optional username for the webhook.
    #[serde(default = "default_username")]
    pub username: Option<String>,
    /// Optional avatar URL for the webhook.
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_username() -> Option<String> {
    Some("watchflow".to_string())
}

fn default_timeout() -> u64 {
    10
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            username: default_username(),
            avatar_url: None,
            timeout_secs: default_timeout(),
        }
    }
}

/// Discord notification channel.
pub struct DiscordChannel {
    config: DiscordConfig,
    client: Client,
}

impl DiscordChannel {
    /// Create a new Discord channel.
    pub fn new(config: DiscordConfig) -> Result<Self> {
        if config.webhook_url.is_empty() {
            return Err(Error::config("discord webhook_url must not be empty"));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    /// Get the embed color based on severity.
    fn get_color(severity: Severity) -> u32 {
        match severity {
            Severity::Info => 0x3498db,     // Blue
            Severity::Warning => 0xf39c12,  // Orange
            Severity::Error => 0xe67e22,    // Dark orange
            Severity::Critical => 0xe74c3c, // Red
        }
    }

    /// Build the webhook payload for an event.
    fn build_payload(&self, event: &NotificationEvent) -> serde_json::Value {
        let embed = json!({
            "title": event.title,
            "description": event.body,
            "color": Self::get_color(event.severity),
            "timestamp": event.timestamp.to_rfc3339(),
            "footer": {
                "text": format!("Severity: {} | Source: {}", event.severity, event.source)
            }
        });

        let mut payload = json!({
            "embeds": [embed]
        });

        if let Some(username) = &self.config.username {
            payload["username"] = json!(username);
        }
        if let Some(avatar_url) = &self.config.avatar_url {
            payload["avatar_url"] = json!(avatar_url);
        }

        payload
    }

    async fn send_with_retry(&self, payload: &serde_json::Value) -> Result<()> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            let response = self
                .client
                .post(&self.config.webhook_url)
                .json(payload)
                .send()
                .await
                .map_err(|e| Error::channel_send("discord", e.to_string()))?;

            let status = response.status();

            if status.is_success() {
                return Ok(());
            }

            if status.as_u16() == 429 {
                let retry_after = Self::parse_retry_after(&response);

                if attempts >= MAX_RATE_LIMIT_RETRIES {
                    warn!(
                        "Discord rate limit: max retries ({}) exceeded, last retry_after was {:?}",
                        MAX_RATE_LIMIT_RETRIES, retry_after
                    );
                    return Err(Error::channel_send(
                        "discord",
                        format!("rate limited after {} attempts", MAX_RATE_LIMIT_RETRIES),
                    ));
                }

                let wait_duration = retry_after.unwrap_or(Duration::from_secs(1));
                debug!(
                    "Discord rate limited (429), waiting {:?} before retry (attempt {}/{})",
                    wait_duration, attempts, MAX_RATE_LIMIT_RETRIES
                );
                tokio::time::sleep(wait_duration).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            warn!("Discord webhook failed: {} - {}", status, body);
            return Err(Error::channel_send(
                "discord",
                format!("{} - {}", status, body),
            ));
        }
    }

    fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
        ["Retry-After", "X-RateLimit-Reset-After"]
            .iter()
            .filter_map(|name| response.headers().get(*name))
            .filter_map(|value| value.to_str().ok()?.parse::<f64>().ok())
            .find(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64)
    }
}

#[async_trait]
impl NotificationChannel for DiscordChannel {
    fn channel_type(&self) -> &'static str {
        "discord"
    }

    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        let payload = self.build_payload(event);
        self.send_with_retry(&payload).await?;

        debug!("Discord notification sent: {}", event.title);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::events::Component;

    fn channel() -> DiscordChannel {
        DiscordChannel::new(DiscordConfig {
            webhook_url: "https://example.com/webhook".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_discord_config_default() {
        let config = DiscordConfig::default();
        assert!(config.webhook_url.is_empty());
        assert_eq!(config.username.as_deref(), Some("watchflow"));
    }

    #[test]
    fn test_empty_url_rejected() {
        assert!(DiscordChannel::new(DiscordConfig::default()).is_err());
    }

    #[test]
    fn test_get_color() {
        assert_eq!(DiscordChannel::get_color(Severity::Info), 0x3498db);
        assert_eq!(DiscordChannel::get_color(Severity::Critical), 0xe74c3c);
    }

    #[test]
    fn test_build_payload() {
        let event = NotificationEvent::critical(
            Component::Detector,
            "Source unreachable",
            "5 consecutive poll failures",
        );

        let payload = channel().build_payload(&event);

        assert!(payload["embeds"].is_array());
        let embed = &payload["embeds"][0];
        assert_eq!(embed["title"], "Source unreachable");
        assert_eq!(
            embed["color"],
            DiscordChannel::get_color(Severity::Critical) as i64
        );
        assert_eq!(payload["username"], "watchflow");
    }
}
