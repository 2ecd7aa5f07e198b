//! watchflow library crate.
//!
//! A polling ingestion pipeline: a detector watches a source, new items are
//! buffered in a bounded work queue, and a pool of workers runs each item
//! through an ordered sequence of stages. Outcomes are folded into a shared
//! aggregate state and reported through severity-routed, rate-limited
//! notification channels.

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod notification;
pub mod pipeline;
pub mod service;
pub mod source;
pub mod state;

pub use error::{Error, Result};
pub use service::ServiceContainer;
