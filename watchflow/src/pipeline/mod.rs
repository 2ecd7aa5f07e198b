//! Processing pipeline.
//!
//! Items discovered by the detector are buffered in a bounded [`WorkQueue`],
//! picked up by a fixed-size [`WorkerPool`], and run through the configured
//! [`PipelineStage`] sequence by the [`PipelineRunner`].

pub mod executors;
pub mod item;
pub mod pending;
pub mod runner;
pub mod stage;
pub mod work_queue;
pub mod worker_pool;

pub use executors::{CommandConfig, CommandExecutor, ExecutorConfig, NoopExecutor};
pub use item::{ItemId, WorkItem};
pub use pending::PendingItems;
pub use runner::{ItemState, ItemStatus, PipelineReport, PipelineRunner};
pub use stage::{
    FailurePolicy, PipelineStage, StageConfig, StageExecutor, StageOutcome, StageResult,
};
pub use work_queue::{BackpressurePolicy, PushOutcome, QueueConfig, WorkQueue};
pub use worker_pool::{WorkerContext, WorkerPool, WorkerPoolConfig};
