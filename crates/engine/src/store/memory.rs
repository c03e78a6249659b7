//! In-memory job store — the default backend.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use chime_core::{Job, Result, SchedulerError};

use super::{due_order, JobStore};

/// Plain map guarded by a short-lived lock; ordering is computed on query.
/// Read-your-writes holds trivially: every mutation happens under the same
/// lock the queries take.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn add_job(&self, job: Job) -> Result<()> {
        let mut jobs = self.jobs.write();
        if jobs.contains_key(&job.id) {
            return Err(SchedulerError::Conflict { id: job.id });
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn update_job(&self, job: Job) -> Result<()> {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(&job.id) {
            Some(slot) => {
                *slot = job;
                Ok(())
            }
            None => Err(SchedulerError::NotFound { id: job.id }),
        }
    }

    async fn remove_job(&self, id: &str) -> Result<()> {
        match self.jobs.write().remove(id) {
            Some(_) => Ok(()),
            None => Err(SchedulerError::NotFound { id: id.to_string() }),
        }
    }

    async fn get_due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let mut due: Vec<Job> = self
            .jobs
            .read()
            .values()
            .filter(|j| j.next_run_time.map_or(false, |t| t <= now))
            .cloned()
            .collect();
        due.sort_by(due_order);
        Ok(due)
    }

    async fn get_next_run_time(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .jobs
            .read()
            .values()
            .filter_map(|j| j.next_run_time)
            .min())
    }

    async fn get_all_jobs(&self) -> Result<Vec<Job>> {
        let mut all: Vec<Job> = self.jobs.read().values().cloned().collect();
        all.sort_by(due_order);
        Ok(all)
    }

    async fn lookup_job(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.jobs.read().get(id).cloned())
    }
}
