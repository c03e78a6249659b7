//! Fixed-period trigger, phase-locked to an anchor instant.
//!
//! Every fire time is `anchor + k * period` for some integer `k >= 1`, so a
//! delayed run never shifts the phase of subsequent runs. The anchor itself
//! never fires; a job anchored at its creation instant first fires one
//! period later.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntervalTrigger {
    pub anchor: DateTime<Utc>,
    pub period: Duration,
    /// No fire times are produced past this bound.
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
}

impl IntervalTrigger {
    /// Period must be at least one millisecond.
    pub fn new(anchor: DateTime<Utc>, period: Duration) -> Result<Self> {
        if period < Duration::from_millis(1) {
            return Err(SchedulerError::InvalidJob(
                "interval period must be at least 1ms".into(),
            ));
        }
        Ok(Self {
            anchor,
            period,
            end_at: None,
        })
    }

    /// Anchor at the current instant.
    pub fn starting_now(period: Duration) -> Result<Self> {
        Self::new(Utc::now(), period)
    }

    pub fn with_end(mut self, end_at: DateTime<Utc>) -> Self {
        self.end_at = Some(end_at);
        self
    }

    /// Smallest `anchor + k * period` (k >= 1) that is `>= now` and
    /// `> previous`. The anchor itself is a phase reference, not a fire
    /// time: a job anchored at its creation instant first fires one period
    /// later.
    pub fn next_fire_time(
        &self,
        previous: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        // Millisecond resolution; sub-millisecond remainders are dropped so
        // all slot arithmetic stays congruent.
        let period_ms = chrono::Duration::from_std(self.period)
            .ok()?
            .num_milliseconds()
            .max(1);
        let period = chrono::Duration::milliseconds(period_ms);

        let lower = match previous {
            Some(p) if p > now => p,
            _ => now,
        };

        let k = if lower <= self.anchor {
            1
        } else {
            let diff_ms = (lower - self.anchor).num_milliseconds();
            ((diff_ms + period_ms - 1) / period_ms).max(1)
        };
        let mut candidate = self.anchor + chrono::Duration::milliseconds(k * period_ms);
        // `k` came from millisecond-truncated arithmetic; when `lower` sits
        // fractionally past the slot, bump one period to honour the bound.
        if candidate < lower {
            candidate += period;
        }
        // Strictly after the previous fire.
        if let Some(p) = previous {
            while candidate <= p {
                candidate += period;
            }
        }

        match self.end_at {
            Some(end) if candidate > end => None,
            _ => Some(candidate),
        }
    }
}
