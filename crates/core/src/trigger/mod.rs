//! Trigger engine — pure next-fire-time computation.
//!
//! A trigger answers one question: given the previous fire time and a lower
//! time bound, when does the job fire next? Triggers hold no mutable state;
//! run bookkeeping lives in the [`Job`](crate::job::Job).
//!
//! Split into submodules:
//! - [`date`] — one-shot trigger
//! - [`interval`] — fixed period, phase-locked to an anchor
//! - [`cron`] — calendar-field constraint sets with rollover resolution
//! - [`combining`] — AND / OR combinators over sub-triggers

pub mod combining;
pub mod cron;
pub mod date;
pub mod interval;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use combining::{AndTrigger, OrTrigger};
pub use cron::CronTrigger;
pub use date::DateTrigger;
pub use interval::IntervalTrigger;

/// The closed set of trigger kinds.
///
/// `next_fire_time(previous, now)` returns the smallest fire instant that is
/// `>= now` and strictly after `previous` (when given), or `None` once the
/// trigger is exhausted. It is a pure function of its inputs and monotonic
/// in `now`. The one deliberate exception to the `>= now` rule is
/// [`DateTrigger`], which reports its single instant even when it already
/// lies in the past — lateness is the misfire policy's concern.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    Date(DateTrigger),
    Interval(IntervalTrigger),
    Cron(CronTrigger),
    And(AndTrigger),
    Or(OrTrigger),
}

impl Trigger {
    pub fn next_fire_time(
        &self,
        previous: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(t) => t.next_fire_time(previous, now),
            Self::Interval(t) => t.next_fire_time(previous, now),
            Self::Cron(t) => t.next_fire_time(previous, now),
            Self::And(t) => t.next_fire_time(previous, now),
            Self::Or(t) => t.next_fire_time(previous, now),
        }
    }
}

impl From<DateTrigger> for Trigger {
    fn from(t: DateTrigger) -> Self {
        Self::Date(t)
    }
}

impl From<IntervalTrigger> for Trigger {
    fn from(t: IntervalTrigger) -> Self {
        Self::Interval(t)
    }
}

impl From<CronTrigger> for Trigger {
    fn from(t: CronTrigger) -> Self {
        Self::Cron(t)
    }
}

impl From<AndTrigger> for Trigger {
    fn from(t: AndTrigger) -> Self {
        Self::And(t)
    }
}

impl From<OrTrigger> for Trigger {
    fn from(t: OrTrigger) -> Self {
        Self::Or(t)
    }
}
