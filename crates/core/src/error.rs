/// Shared error type used across all chime crates.
#[derive(thiserror::Error, Debug)]
pub enum SchedulerError {
    #[error("job id already present: {id}")]
    Conflict { id: String },

    #[error("no such job: {id}")]
    NotFound { id: String },

    #[error("no job store registered under alias: {0}")]
    UnknownStore(String),

    #[error("no executor registered under alias: {0}")]
    UnknownExecutor(String),

    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("could not submit job {id}: {reason}")]
    SubmissionFailed { id: String, reason: String },

    #[error("scheduler is not running")]
    NotRunning,

    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("store: {0}")]
    Store(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
