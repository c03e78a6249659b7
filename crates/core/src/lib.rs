//! chime-core — pure domain types for the chime scheduler.
//!
//! Triggers (next-fire-time computation), the job record and its policy
//! fields, the scheduler event type, and the shared error taxonomy. No I/O
//! lives here; stores, executors, and the wakeup loop are in `chime-engine`.

pub mod error;
pub mod event;
pub mod job;
pub mod trigger;

pub use error::{Result, SchedulerError};
pub use event::SchedulerEvent;
pub use job::{Job, JobArgs, JobBuilder, DEFAULT_ALIAS};
pub use trigger::{AndTrigger, CronTrigger, DateTrigger, IntervalTrigger, OrTrigger, Trigger};
