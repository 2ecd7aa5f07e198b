//! Application-wide error types.

use std::time::Duration;

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Enqueue timed out after {0:?}")]
    EnqueueTimeout(Duration),

    #[error("Shutdown in progress")]
    Shutdown,

    #[error("Stage '{stage}' failed: {message}")]
    StageFailure { stage: String, message: String },

    #[error("Stage '{stage}' timed out after {timeout:?}")]
    StageTimeout { stage: String, timeout: Duration },

    #[error("Worker internal error: {0}")]
    WorkerInternal(String),

    #[error("Channel '{channel}' send failed: {message}")]
    ChannelSend { channel: String, message: String },

    #[error("Shutdown timed out with {remaining} worker(s) still running")]
    ShutdownTimeout { remaining: usize },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn source_unavailable(msg: impl Into<String>) -> Self {
        Self::SourceUnavailable(msg.into())
    }

    pub fn stage_failure(stage: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::StageFailure {
            stage: stage.into(),
            message: msg.into(),
        }
    }

    pub fn channel_send(channel: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ChannelSend {
            channel: channel.into(),
            message: msg.into(),
        }
    }

    /// Whether the error is a backpressure rejection rather than a fault.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::QueueFull { .. } | Self::EnqueueTimeout(_))
    }
}
