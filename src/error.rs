//! Error types shared across the forecast, scheduling and audit layers.

use thiserror::Error;

/// Forecast ingestion and storage failures.
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("forecast must contain at least one row")]
    Empty,

    #[error("row {index}: {field} {message}")]
    Invalid {
        index: usize,
        field: &'static str,
        message: String,
    },

    #[error("forecast storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("forecast serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persistence failures of the scheduler's plan state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("plan state I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("plan state serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The forecast snapshot could not be hashed.
#[derive(Debug, Error)]
#[error("cannot digest forecast: {0}")]
pub struct DigestError(#[from] pub serde_json::Error);

/// Failures reported by a tenant's scheduling actor.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("stale version {attempted}: current version is {current}")]
    VersionConflict { current: u64, attempted: u64 },

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Digest(#[from] DigestError),

    #[error("scheduler for tenant \"{0}\" is no longer running")]
    Closed(String),
}

impl SchedulerError {
    /// True when the caller should refresh its view of the current version and retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

/// Audit and impact log failures. Never fatal to a plan application.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit log CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("audit payload serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("audit writer task failed: {0}")]
    Task(String),
}

/// A summarizer could not produce text.
#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("summarizer unavailable: {0}")]
    Unavailable(String),

    #[error("summarizer returned no text")]
    Empty,
}

/// Failures of a reoptimization run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("plan version {attempted} is stale: current version is {current}")]
    Conflict { current: u64, attempted: u64 },

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error(transparent)]
    Digest(#[from] DigestError),

    #[error(transparent)]
    Scheduler(SchedulerError),
}

impl From<SchedulerError> for RunError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::VersionConflict { current, attempted } => {
                Self::Conflict { current, attempted }
            }
            SchedulerError::InvalidPlan(reason) => Self::InvalidPlan(reason),
            SchedulerError::Digest(e) => Self::Digest(e),
            other => Self::Scheduler(other),
        }
    }
}
