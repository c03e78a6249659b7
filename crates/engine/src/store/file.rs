//! JSON-file-backed job store.
//!
//! Keeps the working set in memory and persists the full job list as JSON
//! after every mutation — the reference consumer of the serialization codec
//! seam that out-of-process backends need. Writes go through
//! `spawn_blocking` so the scheduler loop never blocks on the filesystem.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use chime_core::{Job, Result, SchedulerError};

use super::{due_order, JobStore};

pub struct FileJobStore {
    path: PathBuf,
    jobs: Arc<RwLock<HashMap<String, Job>>>,
}

impl FileJobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn persist(&self) -> Result<()> {
        let snapshot: Vec<Job> = {
            let mut jobs: Vec<Job> = self.jobs.read().values().cloned().collect();
            jobs.sort_by(due_order);
            jobs
        };
        let json = serde_json::to_string_pretty(&snapshot)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, json)?;
            Ok(())
        })
        .await
        .map_err(|e| SchedulerError::Store(format!("persist task failed: {e}")))?
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn start(&self) -> Result<()> {
        let path = self.path.clone();
        let loaded = tokio::task::spawn_blocking(move || -> Result<Option<Vec<Job>>> {
            match std::fs::read_to_string(&path) {
                Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(|e| SchedulerError::Store(format!("load task failed: {e}")))??;

        if let Some(jobs) = loaded {
            let count = jobs.len();
            let mut map = self.jobs.write();
            map.clear();
            for job in jobs {
                map.insert(job.id.clone(), job);
            }
            tracing::info!(count, path = %self.path.display(), "loaded jobs from disk");
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.persist().await
    }

    async fn add_job(&self, job: Job) -> Result<()> {
        {
            let mut jobs = self.jobs.write();
            if jobs.contains_key(&job.id) {
                return Err(SchedulerError::Conflict { id: job.id });
            }
            jobs.insert(job.id.clone(), job);
        }
        self.persist().await
    }

    async fn update_job(&self, job: Job) -> Result<()> {
        {
            let mut jobs = self.jobs.write();
            match jobs.get_mut(&job.id) {
                Some(slot) => *slot = job,
                None => return Err(SchedulerError::NotFound { id: job.id }),
            }
        }
        self.persist().await
    }

    async fn remove_job(&self, id: &str) -> Result<()> {
        if self.jobs.write().remove(id).is_none() {
            return Err(SchedulerError::NotFound { id: id.to_string() });
        }
        self.persist().await
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

#[cfg(test)]
mod tests {
    use super::*;
    use chime_core::trigger::IntervalTrigger;
    use chrono::TimeZone;
    use std::time::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()
    }

    fn job(id: &str) -> Job {
        Job::builder("task")
            .id(id)
            .trigger(IntervalTrigger::new(t0(), Duration::from_secs(60)).unwrap())
            .build(t0())
            .unwrap()
    }

    #[tokio::test]
    async fn jobs_survive_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");

        let store = FileJobStore::new(&path);
        store.start().await.unwrap();
        store.add_job(job("a")).await.unwrap();
        store.add_job(job("b")).await.unwrap();
        store.shutdown().await.unwrap();

        let reopened = FileJobStore::new(&path);
        reopened.start().await.unwrap();
        let all = reopened.get_all_jobs().await.unwrap();
        assert_eq!(all.len(), 2);
        let loaded = reopened.lookup_job("a").await.unwrap().unwrap();
        assert_eq!(
            loaded.next_run_time,
            Some(t0() + chrono::Duration::seconds(60))
        );
    }

    #[tokio::test]
    async fn missing_file_is_an_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path().join("absent.json"));
        store.start().await.unwrap();
        assert!(store.get_all_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn conflict_and_not_found_match_the_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path().join("jobs.json"));
        store.start().await.unwrap();
        store.add_job(job("a")).await.unwrap();

        assert!(matches!(
            store.add_job(job("a")).await.unwrap_err(),
            SchedulerError::Conflict { .. }
        ));
        assert!(matches!(
            store.remove_job("ghost").await.unwrap_err(),
            SchedulerError::NotFound { .. }
        ));
    }
}
