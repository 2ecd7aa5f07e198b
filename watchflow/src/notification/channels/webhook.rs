//! Generic webhook notification channel.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::NotificationChannel;
use crate::notification::events::NotificationEvent;
use crate::{Error, Result};

/// Webhook channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Webhook URL.
    pub url: String,
    /// Optional bearer token.
    #[serde(default)]
    pub bearer_token: Option<String>,
    /// Custom headers.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            bearer_token: None,
            headers: Vec::new(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Generic webhook notification channel.
pub struct WebhookChannel {
    config: WebhookConfig,
    client: Client,
}

impl WebhookChannel {
    /// Create a new webhook channel.
    pub fn new(config: WebhookConfig) -> Result<Self> {
        if config.url.is_empty() {
            return Err(Error::config("webhook url must not be empty"));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    /// Build the JSON payload.
    fn build_payload(event: &NotificationEvent) -> serde_json::Value {
        json!({
            "id": event.id,
            "severity": event.severity.to_string(),
            "title": event.title,
            "body": event.body,
            "source": event.source.to_string(),
            "timestamp": event.timestamp.to_rfc3339(),
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn channel_type(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        let mut request = self
            .client
            .post(&self.config.url)
            .json(&Self::build_payload(event));

        for (name, value) in &self.config.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::channel_send("webhook", e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Webhook failed: {} - {}", status, body);
            return Err(Error::channel_send(
                "webhook",
                format!("{} - {}", status, body),
            ));
        }

        debug!("Webhook notification sent: {}", event.title);
        Ok(())
    }
}
