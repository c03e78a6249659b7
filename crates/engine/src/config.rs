//! Engine tuning knobs.

use serde::{Deserialize, Serialize};

fn default_max_catchup_runs() -> usize {
    16
}

fn default_event_capacity() -> usize {
    256
}

fn default_retry_floor_ms() -> u64 {
    500
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Cap on catch-up runs enumerated per job per tick when `coalesce` is
    /// off; the remainder folds into the next tick.
    #[serde(default = "default_max_catchup_runs")]
    pub max_catchup_runs: usize,
    /// Capacity of the broadcast event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Minimum sleep after a tick that left jobs due (e.g. a failed
    /// submission), so a dead executor cannot busy-spin the control loop.
    #[serde(default = "default_retry_floor_ms")]
    pub retry_floor_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_catchup_runs: default_max_catchup_runs(),
            event_capacity: default_event_capacity(),
            retry_floor_ms: default_retry_floor_ms(),
        }
    }
}
