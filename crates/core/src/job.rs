//! Job data model — the record binding a task to its trigger and policy.
//!
//! `next_run_time` is mutated only by the scheduler loop; `None` means the
//! job is paused (retired jobs are removed from their store entirely).

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::trigger::Trigger;

/// Store / executor alias every scheduler has registered out of the box.
pub const DEFAULT_ALIAS: &str = "default";

/// Positional and keyword arguments handed to the task callable.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JobArgs {
    #[serde(default)]
    pub positional: Vec<serde_json::Value>,
    #[serde(default)]
    pub keyword: serde_json::Map<String, serde_json::Value>,
}

impl JobArgs {
    pub fn positional(values: Vec<serde_json::Value>) -> Self {
        Self {
            positional: values,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }
}

fn default_max_instances() -> u32 {
    1
}

fn default_coalesce() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    /// Alias of the registered task callable.
    pub task: String,
    #[serde(default)]
    pub args: JobArgs,
    pub trigger: Trigger,
    /// Job store alias this job lives in.
    pub store: String,
    /// Executor alias runs are submitted to.
    pub executor: String,
    /// `None` = paused.
    pub next_run_time: Option<DateTime<Utc>>,
    /// How late a due run may start before it is skipped as missed.
    /// `None` = infinite grace.
    #[serde(default)]
    pub misfire_grace_time: Option<Duration>,
    /// Collapse a backlog of missed occurrences into the single latest one.
    #[serde(default = "default_coalesce")]
    pub coalesce: bool,
    /// Cap on concurrently running instances of this job.
    #[serde(default = "default_max_instances")]
    pub max_instances: u32,
}

impl Job {
    pub fn builder(task: impl Into<String>) -> JobBuilder {
        JobBuilder::new(task)
    }

    pub fn is_paused(&self) -> bool {
        self.next_run_time.is_none()
    }

    /// Every scheduled occurrence at or before `now`, oldest first,
    /// starting from the current `next_run_time`.
    ///
    /// Walks the trigger with the cursor as both previous fire time and
    /// lower bound, which reconstructs the missed series without the
    /// trigger holding any state. Capped at `max_runs` so a long-dead job
    /// cannot flood a single tick; the remainder is picked up next tick.
    pub fn due_run_times(&self, now: DateTime<Utc>, max_runs: usize) -> Vec<DateTime<Utc>> {
        let mut runs = Vec::new();
        let mut cursor = match self.next_run_time {
            Some(t) if t <= now => t,
            _ => return runs,
        };
        runs.push(cursor);
        while runs.len() < max_runs {
            match self.trigger.next_fire_time(Some(cursor), cursor) {
                Some(next) if next <= now => {
                    runs.push(next);
                    cursor = next;
                }
                _ => break,
            }
        }
        runs
    }

    /// Latest scheduled occurrence `<= now`, or `None` when the job is
    /// paused or not yet due.
    ///
    /// Walks the whole backlog without retaining it, so a coalesced job
    /// collapses to its true latest occurrence no matter how far behind it
    /// is. Each step strictly increases toward `now`, so the walk
    /// terminates.
    pub fn latest_due_run_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut cursor = match self.next_run_time {
            Some(t) if t <= now => t,
            _ => return None,
        };
        while let Some(next) = self.trigger.next_fire_time(Some(cursor), cursor) {
            if next > now {
                break;
            }
            cursor = next;
        }
        Some(cursor)
    }

    /// Next occurrence strictly after `last`, used by the scheduler to
    /// advance the job once its due occurrences are handled.
    pub fn next_after(&self, last: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.trigger.next_fire_time(Some(last), last)
    }
}

/// Fluent builder; only the task alias and trigger are mandatory.
#[derive(Clone, Debug)]
pub struct JobBuilder {
    id: Option<String>,
    name: Option<String>,
    task: String,
    args: JobArgs,
    trigger: Option<Trigger>,
    store: String,
    executor: String,
    misfire_grace_time: Option<Duration>,
    coalesce: bool,
    max_instances: u32,
    paused: bool,
}

impl JobBuilder {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            id: None,
            name: None,
            task: task.into(),
            args: JobArgs::default(),
            trigger: None,
            store: DEFAULT_ALIAS.to_string(),
            executor: DEFAULT_ALIAS.to_string(),
            misfire_grace_time: Some(Duration::from_secs(1)),
            coalesce: default_coalesce(),
            max_instances: default_max_instances(),
            paused: false,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn args(mut self, args: JobArgs) -> Self {
        self.args = args;
        self
    }

    pub fn trigger(mut self, trigger: impl Into<Trigger>) -> Self {
        self.trigger = Some(trigger.into());
        self
    }

    pub fn store(mut self, alias: impl Into<String>) -> Self {
        self.store = alias.into();
        self
    }

    pub fn executor(mut self, alias: impl Into<String>) -> Self {
        self.executor = alias.into();
        self
    }

    /// `None` = infinite grace.
    pub fn misfire_grace_time(mut self, grace: Option<Duration>) -> Self {
        self.misfire_grace_time = grace;
        self
    }

    pub fn coalesce(mut self, coalesce: bool) -> Self {
        self.coalesce = coalesce;
        self
    }

    pub fn max_instances(mut self, max_instances: u32) -> Self {
        self.max_instances = max_instances;
        self
    }

    /// Add the job in a paused state (no first run computed).
    pub fn paused(mut self) -> Self {
        self.paused = true;
        self
    }

    /// Validate and build. The first `next_run_time` is computed from the
    /// trigger at `now` unless the job starts paused.
    pub fn build(self, now: DateTime<Utc>) -> Result<Job> {
        let trigger = self
            .trigger
            .ok_or_else(|| SchedulerError::InvalidJob("a trigger is required".into()))?;
        if self.task.trim().is_empty() {
            return Err(SchedulerError::InvalidJob("task alias is empty".into()));
        }
        if self.max_instances == 0 {
            return Err(SchedulerError::InvalidJob(
                "max_instances must be at least 1".into(),
            ));
        }
        let id = self.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if id.trim().is_empty() {
            return Err(SchedulerError::InvalidJob("job id is empty".into()));
        }
        let next_run_time = if self.paused {
            None
        } else {
            trigger.next_fire_time(None, now)
        };
        Ok(Job {
            name: self.name.unwrap_or_else(|| self.task.clone()),
            id,
            task: self.task,
            args: self.args,
            trigger,
            store: self.store,
            executor: self.executor,
            next_run_time,
            misfire_grace_time: self.misfire_grace_time,
            coalesce: self.coalesce,
            max_instances: self.max_instances,
        })
    }
}
