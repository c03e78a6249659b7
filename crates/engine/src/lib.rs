//! chime-engine — the async scheduling engine.
//!
//! Job stores, executors, the task registry, and the [`Scheduler`] wakeup
//! loop that ties them together. Domain types (triggers, the job record,
//! events, errors) live in `chime-core` and are re-exported here so most
//! consumers depend on this crate alone.

pub mod config;
pub mod executor;
pub mod scheduler;
pub mod store;
pub mod task;

pub use config::SchedulerConfig;
pub use executor::{Executor, ExecutorContext, InstanceGuard, PoolExecutor};
pub use scheduler::{Scheduler, SchedulerState};
pub use store::{FileJobStore, JobStore, MemoryJobStore};
pub use task::{TaskFn, TaskRegistry};

pub use chime_core::{
    trigger, Job, JobArgs, JobBuilder, Result, SchedulerError, SchedulerEvent, Trigger,
    DEFAULT_ALIAS,
};
