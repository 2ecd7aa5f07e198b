//! Source monitoring.
//!
//! The [`Detector`] polls an [`ItemSource`](crate::source::ItemSource) on a
//! fixed interval, filters identities it has already enqueued through a
//! [`SeenSet`], and pushes the rest into the work queue.

mod detector;
mod seen;

pub use detector::{Detector, DetectorConfig, TickReport};
pub use seen::SeenSet;
