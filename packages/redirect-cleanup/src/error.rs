//! Typed errors for the cleanup engine.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can match
//! on the failure that stopped a job or a rollback.

use thiserror::Error;
use uuid::Uuid;

use crate::types::content::ContentId;
use crate::types::job::JobStatus;

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum CleanupError {
    /// A job was requested before any fresh analysis was cached
    #[error("no redirect analysis available: run an analysis before starting a job")]
    AnalysisMissing,

    /// No job record under this id
    #[error("job not found: {job_id}")]
    JobNotFound { job_id: Uuid },

    /// The job state machine does not allow this edge
    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    /// Job options rejected at start
    #[error("invalid job options: {reason}")]
    InvalidOptions { reason: String },

    /// Another live job holds the mutation lock
    #[error("live job {holder} is already running")]
    LiveJobActive { holder: Uuid },

    /// Rollback refused or failed
    #[error("rollback failed: {0}")]
    Rollback(#[from] RollbackError),

    /// Key-value storage operation failed
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Content store read or write failed
    #[error("content store error: {0}")]
    Content(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Redirect rule source failed
    #[error("redirect rule source error: {0}")]
    Rules(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A stored record could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CleanupError {
    pub fn storage(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Storage(err.into())
    }

    pub fn content(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Content(err.into())
    }

    pub fn rules(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Rules(err.into())
    }
}

/// Reasons a rollback is refused or aborted.
///
/// Every variant leaves content as it was before the rollback was requested.
#[derive(Debug, Error)]
pub enum RollbackError {
    /// Dry run, `create_backup = false`, or nothing was ever written
    #[error("no backups recorded for job {job_id}")]
    NoBackups { job_id: Uuid },

    /// Only completed jobs can be rolled back
    #[error("job {job_id} is {status}, only completed jobs can be rolled back")]
    InvalidState { job_id: Uuid, status: JobStatus },

    #[error("job {job_id} was already rolled back")]
    AlreadyRolledBack { job_id: Uuid },

    /// A snapshotted item no longer exists in the content store
    #[error("content item {content_id} no longer exists")]
    ItemMissing { content_id: ContentId },

    /// A restore write failed; already-restored items were put back
    #[error("restoring {content_id} failed: {reason}")]
    RestoreFailed { content_id: ContentId, reason: String },

    /// Content read back after restore differs from the snapshot
    #[error("restored value of {content_id} does not match its backup")]
    VerificationFailed { content_id: ContentId },
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, CleanupError>;
