//! Shared aggregate state.
//!
//! [`AggregateState`] is owned by a [`SharedStateGuard`]; workers mutate it
//! through a [`StateWriter`] (optionally batched by a [`CoalescingUpdater`])
//! and readers consume published snapshots.

pub mod aggregate;
pub mod coalesce;
pub mod guard;

pub use aggregate::{
    ActivityEntry, AggregateState, INTERNAL_FAILURE_STAGE, StageCounts, StateConfig,
};
pub use coalesce::CoalescingUpdater;
pub use guard::{SharedStateGuard, StateMutation, StateWriter};
