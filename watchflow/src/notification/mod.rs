//! Notification subsystem.
//!
//! Components raise [`NotificationEvent`]s through a [`Notifier`]; a single
//! [`NotificationRouter`] task maps each event's severity to its channel set
//! and delivers it, subject to per-channel sliding-window rate limits.
//!
//! # Example
//!
//! ```ignore
//! use watchflow::notification::{Notifier, NotificationRouter, RateLimiter};
//!
//! let (notifier, rx) = Notifier::channel(256);
//! let router = Arc::new(NotificationRouter::new(RateLimiter::unlimited()));
//! let handle = router.spawn(rx, cancellation_token.clone());
//!
//! notifier.notify(NotificationEvent::warning(Component::Detector, "Queue full", "item rejected"));
//! ```

pub mod channels;
pub mod events;
pub mod rate_limiter;
pub mod router;

pub use channels::{ChannelConfig, NotificationChannel};
pub use events::{ChannelKind, Component, NotificationEvent, ROUTING_TABLE, Severity, channels_for};
pub use rate_limiter::{ChannelBudget, RateLimitConfig, RateLimiter};
pub use router::{
    ChannelStats, DeliveryOutcome, DispatchReport, NotificationRouter, NotificationStats, Notifier,
};
