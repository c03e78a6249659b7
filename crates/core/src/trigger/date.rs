//! One-shot trigger: fires at a single instant, then never again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DateTrigger {
    pub run_at: DateTime<Utc>,
}

impl DateTrigger {
    pub fn new(run_at: DateTime<Utc>) -> Self {
        Self { run_at }
    }

    /// Returns `run_at` until a fire at or past it has been recorded.
    ///
    /// A `run_at` in the past is still reported once; whether it actually
    /// runs is decided by the job's misfire grace period.
    pub fn next_fire_time(
        &self,
        previous: Option<DateTime<Utc>>,
        _now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match previous {
            Some(p) if p >= self.run_at => None,
            _ => Some(self.run_at),
        }
    }
}
