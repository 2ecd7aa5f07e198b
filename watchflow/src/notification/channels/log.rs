//! Log notification channel.

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::NotificationChannel;
use crate::Result;
use crate::notification::events::{NotificationEvent, Severity};

/// Writes events to the application log at a level matching their severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn channel_type(&self) -> &'static str {
        "log"
    }

    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        match event.severity {
            Severity::Critical | Severity::Error => error!(
                severity = %event.severity,
                source = %event.source,
                "{}: {}",
                event.title,
                event.body
            ),
            Severity::Warning => warn!(
                severity = %event.severity,
                source = %event.source,
                "{}: {}",
                event.title,
                event.body
            ),
            Severity::Info => info!(
                severity = %event.severity,
                source = %event.source,
                "{}: {}",
                event.title,
                event.body
            ),
        }
        Ok(())
    }
}
