//! Scheduler event stream — everything observable about job lifecycle.
//!
//! Events are broadcast to subscribers; misfires and max-instance skips are
//! reported here rather than surfacing as errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    SchedulerStarted,
    SchedulerShutdown,
    JobAdded {
        job_id: String,
    },
    JobRemoved {
        job_id: String,
    },
    /// A due occurrence was accepted by its executor.
    JobSubmitted {
        job_id: String,
        run_time: DateTime<Utc>,
    },
    /// The job callable returned successfully.
    JobExecuted {
        job_id: String,
        run_time: DateTime<Utc>,
    },
    /// The job callable failed; the error is captured, never re-raised
    /// into the control loop.
    JobError {
        job_id: String,
        run_time: DateTime<Utc>,
        error: String,
    },
    /// A due occurrence outlived its misfire grace period and was skipped.
    JobMissed {
        job_id: String,
        run_time: DateTime<Utc>,
    },
    /// The executor dropped a run because `max_instances` were already
    /// running. Not an error, never retried.
    MaxInstancesReached {
        job_id: String,
        run_time: DateTime<Utc>,
    },
    /// The executor backend refused the submission; the job stays due and
    /// is retried on the next loop iteration.
    SubmissionFailed {
        job_id: String,
        reason: String,
    },
}

impl SchedulerEvent {
    /// Job id this event concerns, if any.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::SchedulerStarted | Self::SchedulerShutdown => None,
            Self::JobAdded { job_id }
            | Self::JobRemoved { job_id }
            | Self::JobSubmitted { job_id, .. }
            | Self::JobExecuted { job_id, .. }
            | Self::JobError { job_id, .. }
            | Self::JobMissed { job_id, .. }
            | Self::MaxInstancesReached { job_id, .. }
            | Self::SubmissionFailed { job_id, .. } => Some(job_id),
        }
    }
}
