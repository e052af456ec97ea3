//! Error taxonomy for the check pipeline.
//!
//! Each stage has its own error type so the pipeline can tell which stage
//! failed and report it in logs and in the error alert. The CLI layer
//! converts everything into `anyhow::Error`.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure talking to an external HTTP API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// Network error, 5xx, or 429. Worth retrying.
    #[error("transient API failure: {0}")]
    Transient(String),
    /// Non-retryable failure, or retries exhausted.
    #[error("API request failed: {0}")]
    Fatal(String),
}

impl ApiError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transient(_))
    }
}

/// The active set could not be loaded; diffing without it is unsafe.
#[derive(Debug, Error)]
#[error("failed to load active disconnections: {0}")]
pub struct StateReadError(#[from] pub sqlx::Error);

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit log I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("audit log write error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("durable store write failed: {0}")]
    Store(#[from] sqlx::Error),
    /// An opening write matched an episode that is already closed.
    #[error("episode for account {account_id} detected at {detected_at} is already resolved")]
    AlreadyResolved {
        account_id: i64,
        detected_at: DateTime<Utc>,
    },
    #[error(transparent)]
    Audit(#[from] AuditError),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    /// Token or channel permissions are wrong. Never retried.
    #[error("chat authorization failed: {0}")]
    Auth(String),
    #[error("chat delivery failed: {0}")]
    Delivery(String),
}

impl From<ApiError> for NotifyError {
    fn from(err: ApiError) -> Self {
        NotifyError::Delivery(err.to_string())
    }
}

/// Pipeline stage, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Lock,
    StateRead,
    Fetch,
    Persist,
    Notify,
    Cleanup,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Lock => "lock",
            Stage::StateRead => "state-read",
            Stage::Fetch => "fetch",
            Stage::Persist => "persist",
            Stage::Notify => "notify",
            Stage::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fatal failure of one check run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not acquire run lock: {0}")]
    Lock(#[source] sqlx::Error),
    #[error("another check run ({holder}) is in progress")]
    Locked { holder: String },
    #[error(transparent)]
    StateRead(#[from] StateReadError),
    #[error("inventory fetch failed: {0}")]
    Fetch(#[from] ApiError),
    #[error("persisting events failed: {0}")]
    Persist(#[from] PersistError),
    #[error("sending alert failed: {0}")]
    Notify(#[from] NotifyError),
    #[error("run exceeded the maximum runtime of {limit:?} during {stage}")]
    Timeout { limit: Duration, stage: Stage },
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Lock(_) | PipelineError::Locked { .. } => Stage::Lock,
            PipelineError::StateRead(_) => Stage::StateRead,
            PipelineError::Fetch(_) => Stage::Fetch,
            PipelineError::Persist(_) => Stage::Persist,
            PipelineError::Notify(_) => Stage::Notify,
            PipelineError::Timeout { stage, .. } => *stage,
        }
    }
}
