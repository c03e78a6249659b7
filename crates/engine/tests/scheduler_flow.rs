//! End-to-end run against a live control loop and wall clock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chime_engine::trigger::{DateTrigger, IntervalTrigger};
use chime_engine::{Job, Scheduler, SchedulerEvent};
use chrono::Utc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn live_loop_executes_interval_job_and_drains_on_shutdown() {
    init_tracing();
    let scheduler = Scheduler::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    scheduler.register_task("beat", move |_| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });

    scheduler.start().await.unwrap();
    let mut rx = scheduler.subscribe();

    // The loop is already asleep with nothing scheduled; adding the job
    // must wake it.
    scheduler
        .add_job(
            Job::builder("beat")
                .id("beat")
                .trigger(IntervalTrigger::starting_now(Duration::from_millis(50)).unwrap())
                .misfire_grace_time(None),
        )
        .await
        .unwrap();

    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        let mut executed = 0;
        while executed < 2 {
            if let Ok(SchedulerEvent::JobExecuted { .. }) = rx.recv().await {
                executed += 1;
            }
        }
    })
    .await;
    assert!(waited.is_ok(), "expected two executions within 5s");

    scheduler.shutdown(true).await.unwrap();
    assert!(runs.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn one_shot_job_runs_once_and_is_retired() {
    init_tracing();
    let scheduler = Scheduler::new();
    scheduler.register_task("once", |_| async { Ok(()) });
    scheduler.start().await.unwrap();
    let mut rx = scheduler.subscribe();

    scheduler
        .add_job(
            Job::builder("once")
                .id("once")
                .trigger(DateTrigger::new(Utc::now() + chrono::Duration::milliseconds(50)))
                .misfire_grace_time(None),
        )
        .await
        .unwrap();

    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        let mut executed = false;
        let mut removed = false;
        while !(executed && removed) {
            match rx.recv().await {
                Ok(SchedulerEvent::JobExecuted { .. }) => executed = true,
                Ok(SchedulerEvent::JobRemoved { .. }) => removed = true,
                _ => {}
            }
        }
    })
    .await;
    assert!(waited.is_ok(), "expected execution and retirement within 5s");

    assert!(scheduler.get_job("once").await.is_err());
    scheduler.shutdown(true).await.unwrap();
}
