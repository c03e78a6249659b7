//! Reference executor: one tokio task per submission batch, with an
//! optional global cap on concurrently running batches.
//!
//! A batch (one `submit` call, possibly several grouped catch-up run times)
//! executes its runs sequentially under a single instance slot.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, warn};

use chime_core::{Job, Result, SchedulerError, SchedulerEvent};

use super::{Executor, ExecutorContext, InstanceGuard};

pub struct PoolExecutor {
    ctx: RwLock<Option<ExecutorContext>>,
    instances: Arc<InstanceGuard>,
    /// Global cap on concurrently running callables; `None` = unbounded.
    capacity: Option<Arc<Semaphore>>,
    accepting: AtomicBool,
    in_flight: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl PoolExecutor {
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// Cap the number of callables running at once across all jobs.
    pub fn with_capacity(limit: Option<usize>) -> Self {
        Self {
            ctx: RwLock::new(None),
            instances: Arc::new(InstanceGuard::new()),
            capacity: limit.map(|n| Arc::new(Semaphore::new(n.max(1)))),
            accepting: AtomicBool::new(false),
            in_flight: Arc::new(AtomicUsize::new(0)),
            drained: Arc::new(Notify::new()),
        }
    }

    fn context(&self) -> Option<ExecutorContext> {
        self.ctx.read().clone()
    }
}

impl Default for PoolExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for PoolExecutor {
    fn start(&self, ctx: ExecutorContext) {
        *self.ctx.write() = Some(ctx);
        self.accepting.store(true, Ordering::SeqCst);
    }

    async fn submit(&self, job: &Job, run_times: Vec<DateTime<Utc>>) -> Result<()> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(SchedulerError::SubmissionFailed {
                id: job.id.clone(),
                reason: "executor is not accepting work".into(),
            });
        }
        let ctx = self.context().ok_or_else(|| SchedulerError::SubmissionFailed {
            id: job.id.clone(),
            reason: "executor was never started".into(),
        })?;

        if run_times.is_empty() {
            return Ok(());
        }

        // One batch occupies one instance slot; its grouped run times do
        // not count individually.
        let Some(counter) = self.instances.try_acquire(&job.id, job.max_instances) else {
            debug!(job_id = %job.id, max = job.max_instances, "max instances reached, dropping runs");
            for run_time in run_times {
                ctx.emit(SchedulerEvent::MaxInstancesReached {
                    job_id: job.id.clone(),
                    run_time,
                });
            }
            return Ok(());
        };

        // Accepted: announce every run before any of them executes.
        for run_time in &run_times {
            ctx.emit(SchedulerEvent::JobSubmitted {
                job_id: job.id.clone(),
                run_time: *run_time,
            });
        }

        let task = ctx.tasks.lookup(&job.task);
        let job_id = job.id.clone();
        let task_alias = job.task.clone();
        let args = job.args.clone();
        let capacity = self.capacity.clone();
        let in_flight = self.in_flight.clone();
        let drained = self.drained.clone();
        in_flight.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            // Hold a capacity permit for the duration of the batch.
            let _permit = match capacity {
                Some(sem) => sem.acquire_owned().await.ok(),
                None => None,
            };

            for run_time in run_times {
                let outcome = match &task {
                    Some(task) => task(args.clone()).await,
                    None => Err(anyhow::anyhow!("no task registered under {task_alias:?}")),
                };
                match outcome {
                    Ok(()) => {
                        debug!(job_id = %job_id, %run_time, "job executed");
                        ctx.emit(SchedulerEvent::JobExecuted {
                            job_id: job_id.clone(),
                            run_time,
                        });
                    }
                    Err(e) => {
                        warn!(job_id = %job_id, %run_time, error = %e, "job raised an error");
                        ctx.emit(SchedulerEvent::JobError {
                            job_id: job_id.clone(),
                            run_time,
                            error: e.to_string(),
                        });
                    }
                }
            }

            counter.fetch_sub(1, Ordering::SeqCst);
            if in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                drained.notify_waiters();
            }
        });
        Ok(())
    }

    async fn shutdown(&self, wait: bool) {
        self.accepting.store(false, Ordering::SeqCst);
        if wait {
            loop {
                let pending = self.drained.notified();
                if self.in_flight.load(Ordering::SeqCst) == 0 {
                    break;
                }
                pending.await;
            }
        }
    }

    fn running_count(&self, job_id: &str) -> u32 {
        self.instances.in_flight(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskRegistry;
    use chime_core::trigger::IntervalTrigger;
    use chrono::TimeZone;
    use std::time::Duration;
    use tokio::sync::broadcast;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()
    }

    fn job(id: &str, task: &str, max_instances: u32) -> Job {
        Job::builder(task)
            .id(id)
            .max_instances(max_instances)
            .trigger(IntervalTrigger::new(t0(), Duration::from_secs(60)).unwrap())
            .build(t0())
            .unwrap()
    }

    fn wired_executor(tasks: &TaskRegistry) -> (PoolExecutor, broadcast::Receiver<SchedulerEvent>) {
        let (tx, rx) = broadcast::channel(64);
        let executor = PoolExecutor::new();
        executor.start(ExecutorContext {
            tasks: tasks.clone(),
            events: tx,
        });
        (executor, rx)
    }

    fn drain_events(rx: &mut broadcast::Receiver<SchedulerEvent>) -> Vec<SchedulerEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn count(events: &[SchedulerEvent], pred: fn(&SchedulerEvent) -> bool) -> usize {
        events.iter().filter(|ev| pred(ev)).count()
    }

    #[tokio::test]
    async fn emits_one_terminal_event_per_run() {
        let tasks = TaskRegistry::new();
        tasks.register("ok", |_| async { Ok(()) });
        let (executor, mut rx) = wired_executor(&tasks);

        executor
            .submit(&job("j", "ok", 3), vec![t0(), t0(), t0()])
            .await
            .unwrap();
        executor.shutdown(true).await;

        let events = drain_events(&mut rx);
        assert_eq!(
            count(&events, |ev| matches!(ev, SchedulerEvent::JobExecuted { .. })),
            3
        );
    }

    #[tokio::test]
    async fn batch_occupies_a_single_instance_slot() {
        let tasks = TaskRegistry::new();
        tasks.register("ok", |_| async { Ok(()) });
        let (executor, mut rx) = wired_executor(&tasks);

        // Three grouped catch-up runs on a max_instances=1 job: the batch
        // is one instance, so every run is accepted and executed.
        let run_times = vec![
            t0(),
            t0() + chrono::Duration::seconds(60),
            t0() + chrono::Duration::seconds(120),
        ];
        executor.submit(&job("j", "ok", 1), run_times).await.unwrap();
        executor.shutdown(true).await;

        let events = drain_events(&mut rx);
        assert_eq!(
            count(&events, |ev| matches!(ev, SchedulerEvent::JobSubmitted { .. })),
            3
        );
        assert_eq!(
            count(&events, |ev| matches!(ev, SchedulerEvent::JobExecuted { .. })),
            3
        );
        assert_eq!(
            count(&events, |ev| matches!(
                ev,
                SchedulerEvent::MaxInstancesReached { .. }
            )),
            0
        );
    }

    #[tokio::test]
    async fn failure_is_captured_as_event() {
        let tasks = TaskRegistry::new();
        tasks.register("boom", |_| async { anyhow::bail!("kaput") });
        let (executor, mut rx) = wired_executor(&tasks);

        executor.submit(&job("j", "boom", 1), vec![t0()]).await.unwrap();
        executor.shutdown(true).await;

        let events = drain_events(&mut rx);
        let error = events
            .iter()
            .find_map(|ev| match ev {
                SchedulerEvent::JobError { error, .. } => Some(error.clone()),
                _ => None,
            })
            .expect("a JobError event");
        assert!(error.contains("kaput"));
    }

    #[tokio::test]
    async fn unknown_task_reports_error_not_panic() {
        let tasks = TaskRegistry::new();
        let (executor, mut rx) = wired_executor(&tasks);

        executor.submit(&job("j", "ghost", 1), vec![t0()]).await.unwrap();
        executor.shutdown(true).await;

        let events = drain_events(&mut rx);
        assert_eq!(
            count(&events, |ev| matches!(ev, SchedulerEvent::JobError { .. })),
            1
        );
    }

    #[tokio::test]
    async fn second_instance_is_skipped_while_first_still_runs() {
        let tasks = TaskRegistry::new();
        let release = Arc::new(Notify::new());
        let gate = release.clone();
        tasks.register("slow", move |_| {
            let gate = gate.clone();
            async move {
                gate.notified().await;
                Ok(())
            }
        });
        let (executor, mut rx) = wired_executor(&tasks);

        let j = job("j", "slow", 1);
        executor.submit(&j, vec![t0()]).await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(executor.running_count("j"), 1);

        // Next occurrence becomes due while the first run is in flight:
        // dropped, and never announced as submitted.
        let late = t0() + chrono::Duration::seconds(60);
        executor.submit(&j, vec![late]).await.unwrap();
        let events = drain_events(&mut rx);
        assert!(events.iter().any(|ev| matches!(
            ev,
            SchedulerEvent::MaxInstancesReached { run_time, .. } if *run_time == late
        )));
        assert!(!events.iter().any(|ev| matches!(
            ev,
            SchedulerEvent::JobSubmitted { run_time, .. } if *run_time == late
        )));
        assert_eq!(executor.running_count("j"), 1);

        // notify_one stores a permit, so this cannot race the waiter.
        release.notify_one();
        executor.shutdown(true).await;
        assert_eq!(executor.running_count("j"), 0);
    }

    #[tokio::test]
    async fn rejects_after_shutdown() {
        let tasks = TaskRegistry::new();
        let (executor, _rx) = wired_executor(&tasks);
        executor.shutdown(false).await;
        let err = executor.submit(&job("j", "ok", 1), vec![t0()]).await.unwrap_err();
        assert!(matches!(err, SchedulerError::SubmissionFailed { .. }));
    }
}
