//! Scheduler core — registries, state machine, and the wakeup loop.
//!
//! One control task per scheduler: it sleeps until the nearest pending run
//! across all stores, pulls due jobs, applies misfire/coalesce policy,
//! submits to the matching executor, and advances each job's
//! `next_run_time` through its trigger. Client calls that could change the
//! nearest pending time nudge a `Notify` so the loop re-plans early.
//!
//! Registry bookkeeping sits behind short `parking_lot` locks that are
//! never held across store I/O or executor submission.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use chime_core::{Job, JobBuilder, Result, SchedulerError, SchedulerEvent, Trigger, DEFAULT_ALIAS};

use crate::config::SchedulerConfig;
use crate::executor::{Executor, ExecutorContext, PoolExecutor};
use crate::store::{JobStore, MemoryJobStore};
use crate::task::TaskRegistry;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
    Paused,
}

/// The central scheduling engine. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: SchedulerConfig,
    stores: RwLock<HashMap<String, Arc<dyn JobStore>>>,
    executors: RwLock<HashMap<String, Arc<dyn Executor>>>,
    tasks: TaskRegistry,
    events: broadcast::Sender<SchedulerEvent>,
    state: RwLock<SchedulerState>,
    /// Wakes the control loop early when the nearest pending time may have
    /// changed.
    wakeup: Notify,
    shutdown_tx: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (shutdown_tx, _) = watch::channel(false);

        let mut stores: HashMap<String, Arc<dyn JobStore>> = HashMap::new();
        stores.insert(DEFAULT_ALIAS.to_string(), Arc::new(MemoryJobStore::new()));
        let mut executors: HashMap<String, Arc<dyn Executor>> = HashMap::new();
        executors.insert(DEFAULT_ALIAS.to_string(), Arc::new(PoolExecutor::new()));

        Self {
            inner: Arc::new(Inner {
                config,
                stores: RwLock::new(stores),
                executors: RwLock::new(executors),
                tasks: TaskRegistry::new(),
                events,
                state: RwLock::new(SchedulerState::Stopped),
                wakeup: Notify::new(),
                shutdown_tx,
                loop_handle: Mutex::new(None),
            }),
        }
    }

    // ── Registries ────────────────────────────────────────────────────

    /// Register a job store under `alias`. If the scheduler is already
    /// running the store is started immediately.
    pub async fn add_store(&self, alias: impl Into<String>, store: Arc<dyn JobStore>) -> Result<()> {
        let alias = alias.into();
        {
            let mut stores = self.inner.stores.write();
            if stores.contains_key(&alias) {
                return Err(SchedulerError::Conflict { id: alias });
            }
            stores.insert(alias.clone(), store.clone());
        }
        if self.state() != SchedulerState::Stopped {
            store.start().await?;
        }
        debug!(%alias, "job store registered");
        Ok(())
    }

    /// Register an executor under `alias`. If the scheduler is already
    /// running the executor is wired up immediately.
    pub fn add_executor(&self, alias: impl Into<String>, executor: Arc<dyn Executor>) -> Result<()> {
        let alias = alias.into();
        {
            let mut executors = self.inner.executors.write();
            if executors.contains_key(&alias) {
                return Err(SchedulerError::Conflict { id: alias });
            }
            executors.insert(alias.clone(), executor.clone());
        }
        if self.state() != SchedulerState::Stopped {
            executor.start(self.executor_context());
        }
        debug!(%alias, "executor registered");
        Ok(())
    }

    /// Register the async callable jobs refer to by alias.
    pub fn register_task<F, Fut>(&self, alias: impl Into<String>, task: F)
    where
        F: Fn(chime_core::JobArgs) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner.tasks.register(alias, task);
    }

    /// Subscribe to the fired/missed/error event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> SchedulerState {
        *self.inner.state.read()
    }

    // ── Job management ────────────────────────────────────────────────

    /// Build and persist a job; its first run time comes from the trigger.
    /// Wakes the loop in case the new job fires sooner than the current
    /// plan.
    pub async fn add_job(&self, builder: JobBuilder) -> Result<Job> {
        let job = builder.build(Utc::now())?;
        let store = self
            .store(&job.store)
            .ok_or_else(|| SchedulerError::UnknownStore(job.store.clone()))?;
        if self.executor(&job.executor).is_none() {
            return Err(SchedulerError::UnknownExecutor(job.executor.clone()));
        }
        store.add_job(job.clone()).await?;
        info!(job_id = %job.id, task = %job.task, next_run = ?job.next_run_time, "job added");
        self.emit(SchedulerEvent::JobAdded {
            job_id: job.id.clone(),
        });
        self.inner.wakeup.notify_one();
        Ok(job)
    }

    /// Remove a job from whichever store holds it.
    pub async fn remove_job(&self, id: &str) -> Result<()> {
        let (_, store, _) = self.find_job(id).await?;
        store.remove_job(id).await?;
        info!(job_id = %id, "job removed");
        self.emit(SchedulerEvent::JobRemoved { job_id: id.into() });
        self.inner.wakeup.notify_one();
        Ok(())
    }

    /// Pause a job: it stays stored but stops firing.
    pub async fn pause_job(&self, id: &str) -> Result<()> {
        let (_, store, mut job) = self.find_job(id).await?;
        job.next_run_time = None;
        store.update_job(job).await?;
        info!(job_id = %id, "job paused");
        self.inner.wakeup.notify_one();
        Ok(())
    }

    /// Resume a paused job from the present moment. A job whose trigger is
    /// already exhausted is removed instead.
    pub async fn resume_job(&self, id: &str) -> Result<()> {
        let (_, store, mut job) = self.find_job(id).await?;
        match job.trigger.next_fire_time(None, Utc::now()) {
            Some(next) => {
                job.next_run_time = Some(next);
                info!(job_id = %id, %next, "job resumed");
                store.update_job(job).await?;
            }
            None => {
                warn!(job_id = %id, "trigger exhausted on resume, removing job");
                store.remove_job(id).await?;
                self.emit(SchedulerEvent::JobRemoved { job_id: id.into() });
            }
        }
        self.inner.wakeup.notify_one();
        Ok(())
    }

    /// Swap a job's trigger and recompute its next run.
    pub async fn reschedule_job(&self, id: &str, trigger: impl Into<Trigger>) -> Result<()> {
        let (_, store, mut job) = self.find_job(id).await?;
        let trigger = trigger.into();
        job.next_run_time = trigger.next_fire_time(None, Utc::now());
        job.trigger = trigger;
        info!(job_id = %id, next_run = ?job.next_run_time, "job rescheduled");
        store.update_job(job).await?;
        self.inner.wakeup.notify_one();
        Ok(())
    }

    pub async fn get_job(&self, id: &str) -> Result<Job> {
        Ok(self.find_job(id).await?.2)
    }

    /// All jobs across all stores.
    pub async fn get_jobs(&self) -> Result<Vec<Job>> {
        let mut all = Vec::new();
        for (alias, store) in self.stores_snapshot() {
            match store.get_all_jobs().await {
                Ok(mut jobs) => all.append(&mut jobs),
                Err(e) => error!(store = %alias, error = %e, "store listing failed"),
            }
        }
        Ok(all)
    }

    /// Nudge the control loop to re-plan its wakeup immediately.
    pub fn wakeup(&self) {
        self.inner.wakeup.notify_one();
    }

    // ── Lifecycle ─────────────────────────────────────────────────────

    /// Start stores and executors, then spawn the control loop.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.inner.state.write();
            if *state != SchedulerState::Stopped {
                return Err(SchedulerError::AlreadyRunning);
            }
            *state = SchedulerState::Running;
        }

        // A store failure aborts the start: roll the state back and close
        // whatever already opened, so a retry is possible.
        let mut started: Vec<(String, Arc<dyn JobStore>)> = Vec::new();
        for (alias, store) in self.stores_snapshot() {
            if let Err(e) = store.start().await {
                error!(store = %alias, error = %e, "store failed to start");
                for (alias, store) in started {
                    if let Err(e) = store.shutdown().await {
                        error!(store = %alias, error = %e, "store shutdown failed");
                    }
                }
                *self.inner.state.write() = SchedulerState::Stopped;
                return Err(e);
            }
            started.push((alias, store));
        }
        let ctx = self.executor_context();
        for (_, executor) in self.executors_snapshot() {
            executor.start(ctx.clone());
        }

        let _ = self.inner.shutdown_tx.send(false);
        let scheduler = self.clone();
        let shutdown_rx = self.inner.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move { scheduler.run_loop(shutdown_rx).await });
        *self.inner.loop_handle.lock() = Some(handle);

        info!("scheduler started");
        self.emit(SchedulerEvent::SchedulerStarted);
        Ok(())
    }

    /// Pause dispatch; stores and executors stay up.
    pub fn pause(&self) -> Result<()> {
        let mut state = self.inner.state.write();
        match *state {
            SchedulerState::Running => {
                *state = SchedulerState::Paused;
                drop(state);
                self.inner.wakeup.notify_one();
                info!("scheduler paused");
                Ok(())
            }
            SchedulerState::Paused => Ok(()),
            SchedulerState::Stopped => Err(SchedulerError::NotRunning),
        }
    }

    /// Resume dispatch; the wakeup is recomputed immediately.
    pub fn resume(&self) -> Result<()> {
        let mut state = self.inner.state.write();
        match *state {
            SchedulerState::Paused => {
                *state = SchedulerState::Running;
                drop(state);
                self.inner.wakeup.notify_one();
                info!("scheduler resumed");
                Ok(())
            }
            SchedulerState::Running => Ok(()),
            SchedulerState::Stopped => Err(SchedulerError::NotRunning),
        }
    }

    /// Stop the loop, then executors (draining in-flight runs when `wait`),
    /// then stores.
    pub async fn shutdown(&self, wait: bool) -> Result<()> {
        {
            let mut state = self.inner.state.write();
            if *state == SchedulerState::Stopped {
                return Err(SchedulerError::NotRunning);
            }
            *state = SchedulerState::Stopped;
        }

        let _ = self.inner.shutdown_tx.send(true);
        self.inner.wakeup.notify_one();
        let handle = self.inner.loop_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        for (_, executor) in self.executors_snapshot() {
            executor.shutdown(wait).await;
        }
        for (alias, store) in self.stores_snapshot() {
            if let Err(e) = store.shutdown().await {
                error!(store = %alias, error = %e, "store shutdown failed");
            }
        }

        info!("scheduler shut down");
        self.emit(SchedulerEvent::SchedulerShutdown);
        Ok(())
    }

    // ── The wakeup loop ───────────────────────────────────────────────

    async fn run_loop(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let retry_floor = Duration::from_millis(self.inner.config.retry_floor_ms.max(1));
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let paused = self.state() == SchedulerState::Paused;
            let sleep = if paused {
                None
            } else {
                let now = Utc::now();
                match self.next_wakeup_time().await {
                    // Still-due jobs (e.g. a failed submission) get the
                    // retry floor instead of a hot loop.
                    Some(at) if at <= now => Some(retry_floor),
                    Some(at) => Some((at - now).to_std().unwrap_or(Duration::ZERO)),
                    None => None,
                }
            };

            tokio::select! {
                _ = self.inner.wakeup.notified() => {
                    // Re-plan: something changed the nearest pending time.
                    continue;
                }
                _ = shutdown_rx.changed() => {
                    continue;
                }
                _ = sleep_or_forever(sleep) => {
                    let now = Utc::now();
                    self.tick(now).await;
                }
            }
        }
        debug!("control loop exited");
    }

    /// Process one scheduling pass at the given instant: pull due jobs from
    /// every store, apply misfire/coalesce policy, submit, and advance.
    ///
    /// Public so hosts and tests can drive the engine with their own clock;
    /// the control loop calls it with wall time.
    pub async fn tick(&self, now: DateTime<Utc>) {
        for (alias, store) in self.stores_snapshot() {
            // One failing store must not halt the others.
            let due = match store.get_due_jobs(now).await {
                Ok(due) => due,
                Err(e) => {
                    error!(store = %alias, error = %e, "due-job query failed");
                    continue;
                }
            };
            for job in due {
                self.process_job(&store, job, now).await;
            }
        }
    }

    /// Handle one due job; failures are isolated to this job.
    async fn process_job(&self, store: &Arc<dyn JobStore>, job: Job, now: DateTime<Utc>) {
        // Coalesce collapses the backlog to the single latest occurrence no
        // matter how long it is; earlier ones are absorbed without events.
        // The catch-up cap only bounds discrete submissions, so it applies
        // to the non-coalesced enumeration alone.
        let selected: Vec<DateTime<Utc>> = if job.coalesce {
            match job.latest_due_run_time(now) {
                Some(latest) => vec![latest],
                None => return,
            }
        } else {
            let runs = job.due_run_times(now, self.inner.config.max_catchup_runs);
            if runs.len() == self.inner.config.max_catchup_runs {
                warn!(job_id = %job.id, "catch-up cap hit; remaining occurrences fold into the next tick");
            }
            runs
        };
        let Some(&last_due) = selected.last() else {
            return;
        };

        let grace = job
            .misfire_grace_time
            .and_then(|g| chrono::Duration::from_std(g).ok());
        let mut to_submit = Vec::with_capacity(selected.len());
        for run_time in selected {
            match grace {
                Some(grace) if now - run_time > grace => {
                    warn!(job_id = %job.id, %run_time, "run missed its misfire grace period");
                    self.emit(SchedulerEvent::JobMissed {
                        job_id: job.id.clone(),
                        run_time,
                    });
                }
                _ => to_submit.push(run_time),
            }
        }

        if !to_submit.is_empty() {
            let Some(executor) = self.executor(&job.executor) else {
                warn!(job_id = %job.id, executor = %job.executor, "executor alias is unknown");
                self.emit(SchedulerEvent::SubmissionFailed {
                    job_id: job.id.clone(),
                    reason: format!("unknown executor {:?}", job.executor),
                });
                // Leave the job due; retried next iteration.
                return;
            };
            // The executor announces accepted runs with `JobSubmitted` and
            // drops over-limit ones itself, so acceptance is reported once.
            if let Err(e) = executor.submit(&job, to_submit).await {
                warn!(job_id = %job.id, error = %e, "submission failed; job stays due");
                self.emit(SchedulerEvent::SubmissionFailed {
                    job_id: job.id.clone(),
                    reason: e.to_string(),
                });
                return;
            }
        }

        // Advance from the previous run time, not wall clock, so periodic
        // triggers stay phase-locked even after a delayed pass.
        match job.next_after(last_due) {
            Some(next) => {
                let job_id = job.id.clone();
                let mut updated = job;
                updated.next_run_time = Some(next);
                if let Err(e) = store.update_job(updated).await {
                    error!(job_id = %job_id, error = %e, "failed to persist advanced run time");
                }
            }
            None => {
                let job_id = job.id.clone();
                match store.remove_job(&job.id).await {
                    // Someone removed it concurrently; that is fine.
                    Err(SchedulerError::NotFound { .. }) | Ok(()) => {
                        debug!(job_id = %job_id, "trigger exhausted, job retired");
                        self.emit(SchedulerEvent::JobRemoved { job_id });
                    }
                    Err(e) => error!(job_id = %job_id, error = %e, "failed to retire job"),
                }
            }
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────

    fn executor_context(&self) -> ExecutorContext {
        ExecutorContext {
            tasks: self.inner.tasks.clone(),
            events: self.inner.events.clone(),
        }
    }

    fn emit(&self, event: SchedulerEvent) {
        let _ = self.inner.events.send(event);
    }

    fn store(&self, alias: &str) -> Option<Arc<dyn JobStore>> {
        self.inner.stores.read().get(alias).cloned()
    }

    fn executor(&self, alias: &str) -> Option<Arc<dyn Executor>> {
        self.inner.executors.read().get(alias).cloned()
    }

    fn stores_snapshot(&self) -> Vec<(String, Arc<dyn JobStore>)> {
        self.inner
            .stores
            .read()
            .iter()
            .map(|(a, s)| (a.clone(), s.clone()))
            .collect()
    }

    fn executors_snapshot(&self) -> Vec<(String, Arc<dyn Executor>)> {
        self.inner
            .executors
            .read()
            .iter()
            .map(|(a, e)| (a.clone(), e.clone()))
            .collect()
    }

    async fn find_job(&self, id: &str) -> Result<(String, Arc<dyn JobStore>, Job)> {
        for (alias, store) in self.stores_snapshot() {
            match store.lookup_job(id).await {
                Ok(Some(job)) => return Ok((alias, store, job)),
                Ok(None) => {}
                Err(e) => error!(store = %alias, error = %e, "lookup failed"),
            }
        }
        Err(SchedulerError::NotFound { id: id.to_string() })
    }

    async fn next_wakeup_time(&self) -> Option<DateTime<Utc>> {
        let mut nearest: Option<DateTime<Utc>> = None;
        for (alias, store) in self.stores_snapshot() {
            match store.get_next_run_time().await {
                Ok(Some(t)) => nearest = Some(nearest.map_or(t, |n| n.min(t))),
                Ok(None) => {}
                Err(e) => error!(store = %alias, error = %e, "next-run query failed"),
            }
        }
        nearest
    }
}

/// Sleep for `duration`, or forever when there is nothing scheduled (the
/// loop then only wakes on notify/shutdown).
async fn sleep_or_forever(duration: Option<Duration>) {
    match duration {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}
