//! AND / OR combinators over sub-triggers.
//!
//! Combinators are as pure as their parts: the shared `previous` fire time
//! is threaded into every sub-trigger, so no combinator carries state of its
//! own.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Trigger;

/// Iteration cap while converging the AND combinator. Hitting it means the
/// sub-triggers never agree within tolerance.
const MAX_AND_ITERATIONS: u32 = 128;

fn default_tolerance() -> Duration {
    Duration::from_secs(1)
}

/// Fires only when every sub-trigger would fire within `tolerance` of each
/// other; the agreed instant is the latest of the candidates.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AndTrigger {
    pub triggers: Vec<Trigger>,
    #[serde(default = "default_tolerance")]
    pub tolerance: Duration,
}

impl AndTrigger {
    pub fn new(triggers: Vec<Trigger>) -> Self {
        Self {
            triggers,
            tolerance: default_tolerance(),
        }
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn next_fire_time(
        &self,
        previous: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if self.triggers.is_empty() {
            return None;
        }
        let tolerance = chrono::Duration::from_std(self.tolerance).ok()?;

        let mut cursor = now;
        for _ in 0..MAX_AND_ITERATIONS {
            // Any exhausted sub-trigger retires the whole combination.
            let candidates = self
                .triggers
                .iter()
                .map(|t| t.next_fire_time(previous, cursor))
                .collect::<Option<Vec<_>>>()?;
            let earliest = *candidates.iter().min()?;
            let latest = *candidates.iter().max()?;
            if latest - earliest <= tolerance {
                return Some(latest);
            }
            // Advance the lagging sub-triggers by moving the bound to the
            // slowest candidate.
            cursor = latest;
        }
        None
    }
}

/// Fires at the earliest sub-trigger result; retires only when every
/// sub-trigger is exhausted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrTrigger {
    pub triggers: Vec<Trigger>,
}

impl OrTrigger {
    pub fn new(triggers: Vec<Trigger>) -> Self {
        Self { triggers }
    }

    pub fn next_fire_time(
        &self,
        previous: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        self.triggers
            .iter()
            .filter_map(|t| t.next_fire_time(previous, now))
            .min()
    }
}
