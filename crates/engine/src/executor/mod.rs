//! Executor contract — instance-limited dispatch of job callables.
//!
//! Executors run callables outside the scheduling loop and report exactly
//! one terminal event per accepted run (executed / error); runs past a
//! job's `max_instances` are dropped with a `MaxInstancesReached` event,
//! never queued.

pub mod pool;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;

use chime_core::{Job, Result, SchedulerEvent};

use crate::task::TaskRegistry;

pub use pool::PoolExecutor;

/// Everything an executor needs from its scheduler: the callable registry
/// and the event channel terminal events go out on.
#[derive(Clone)]
pub struct ExecutorContext {
    pub tasks: TaskRegistry,
    pub events: broadcast::Sender<SchedulerEvent>,
}

impl ExecutorContext {
    /// Send failures mean nobody is subscribed; that is fine.
    pub fn emit(&self, event: SchedulerEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Wire the executor to its scheduler. Called once before any submit.
    fn start(&self, ctx: ExecutorContext);

    /// Enqueue the batch; must not block the caller past enqueue time. A
    /// submission counts as one running instance of the job, covering all
    /// its grouped run times: at `max_instances` the whole batch is dropped
    /// with a `MaxInstancesReached` event per run, never queued. Accepted
    /// runs are announced with `JobSubmitted` and each produces exactly one
    /// terminal event. Fails only when the backend itself cannot accept
    /// work (not started / shut down) — the job then stays due and the
    /// scheduler retries next iteration.
    async fn submit(&self, job: &Job, run_times: Vec<DateTime<Utc>>) -> Result<()>;

    /// Stop accepting submissions; with `wait`, block until in-flight runs
    /// finish.
    async fn shutdown(&self, wait: bool);

    /// Currently running instances of a job.
    fn running_count(&self, job_id: &str) -> u32;
}

/// Tracks in-flight run counts per job id for instance limiting.
pub struct InstanceGuard {
    counts: RwLock<HashMap<String, Arc<AtomicU32>>>,
}

impl Default for InstanceGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceGuard {
    pub fn new() -> Self {
        Self {
            counts: RwLock::new(HashMap::new()),
        }
    }

    /// Try to claim a slot. Returns the counter to decrement on completion,
    /// or `None` when `max` instances are already running. The claim is a
    /// compare-exchange, so concurrent submitters cannot overshoot `max`.
    pub fn try_acquire(&self, job_id: &str, max: u32) -> Option<Arc<AtomicU32>> {
        let counter = {
            let mut map = self.counts.write();
            map.entry(job_id.to_string())
                .or_insert_with(|| Arc::new(AtomicU32::new(0)))
                .clone()
        };
        let mut current = counter.load(Ordering::SeqCst);
        loop {
            if current >= max {
                return None;
            }
            match counter.compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return Some(counter),
                Err(actual) => current = actual,
            }
        }
    }

    /// Current in-flight count for a job.
    pub fn in_flight(&self, job_id: &str) -> u32 {
        self.counts
            .read()
            .get(job_id)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_enforces_limit_and_releases() {
        let guard = InstanceGuard::new();
        let a = guard.try_acquire("j", 2).expect("first slot");
        let _b = guard.try_acquire("j", 2).expect("second slot");
        assert!(guard.try_acquire("j", 2).is_none(), "at limit");
        assert_eq!(guard.in_flight("j"), 2);

        a.fetch_sub(1, Ordering::SeqCst);
        assert!(guard.try_acquire("j", 2).is_some());
    }

    #[test]
    fn guard_counts_jobs_independently() {
        let guard = InstanceGuard::new();
        assert!(guard.try_acquire("a", 1).is_some());
        assert!(guard.try_acquire("b", 1).is_some());
        assert!(guard.try_acquire("a", 1).is_none());
    }

    #[test]
    fn concurrent_acquire_never_overshoots() {
        let guard = Arc::new(InstanceGuard::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let g = guard.clone();
                std::thread::spawn(move || g.try_acquire("j", 4).is_some())
            })
            .collect();
        let granted = handles
            .into_iter()
            .filter_map(|h| h.join().ok())
            .filter(|granted| *granted)
            .count();
        assert_eq!(granted, 4);
        assert_eq!(guard.in_flight("j"), 4);
    }
}
