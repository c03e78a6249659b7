//! Task registry — the callable side of a job.
//!
//! Jobs carry only an alias; the registry maps aliases to boxed async
//! closures. That keeps job records serializable (a persistent store saves
//! the alias, never the closure) and resolution is a plain lookup at fire
//! time.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::RwLock;

use chime_core::JobArgs;

pub type TaskFn = Arc<dyn Fn(JobArgs) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<RwLock<HashMap<String, TaskFn>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async closure under `alias`, replacing any previous
    /// registration.
    pub fn register<F, Fut>(&self, alias: impl Into<String>, task: F)
    where
        F: Fn(JobArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let wrapped: TaskFn = Arc::new(move |args| task(args).boxed());
        self.inner.write().insert(alias.into(), wrapped);
    }

    pub fn lookup(&self, alias: &str) -> Option<TaskFn> {
        self.inner.read().get(alias).cloned()
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.inner.read().contains_key(alias)
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.inner.read().keys().cloned().collect();
        f.debug_struct("TaskRegistry").field("tasks", &names).finish()
    }
}
