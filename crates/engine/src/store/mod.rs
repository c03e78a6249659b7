//! Job store contract — persistence-agnostic due-job query and mutation.
//!
//! Backends own their consistency discipline, but `get_due_jobs` followed by
//! `update_job` from the same scheduler must observe the prior write
//! (read-your-writes within one process).
//!
//! - [`memory`] — the default in-memory store
//! - [`file`] — JSON-file-backed store (the serialization codec seam)

pub mod file;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use chime_core::{Job, Result};

pub use file::FileJobStore;
pub use memory::MemoryJobStore;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Open backend resources. Called by the scheduler at `start`.
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Release backend resources. Called by the scheduler at `shutdown`.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    /// Fails with [`SchedulerError::Conflict`](chime_core::SchedulerError)
    /// if the id is already present.
    async fn add_job(&self, job: Job) -> Result<()>;

    /// Fails with `NotFound` if the id is absent. Persists at minimum the
    /// mutated `next_run_time` without a full-record race.
    async fn update_job(&self, job: Job) -> Result<()>;

    /// Fails with `NotFound` if the id is absent; idempotent removal is the
    /// caller's business.
    async fn remove_job(&self, id: &str) -> Result<()>;

    /// Jobs with `next_run_time <= now`, ordered by `next_run_time`
    /// ascending, ties broken by job id. Paused jobs are never due.
    async fn get_due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>>;

    /// Minimum `next_run_time` across non-paused jobs, or `None` if nothing
    /// is pending. Drives the engine's sleep interval.
    async fn get_next_run_time(&self) -> Result<Option<DateTime<Utc>>>;

    async fn get_all_jobs(&self) -> Result<Vec<Job>>;

    async fn lookup_job(&self, id: &str) -> Result<Option<Job>>;
}

/// Sort key shared by the reference stores: due time ascending, then id.
pub(crate) fn due_order(a: &Job, b: &Job) -> std::cmp::Ordering {
    a.next_run_time
        .cmp(&b.next_run_time)
        .then_with(|| a.id.cmp(&b.id))
}
