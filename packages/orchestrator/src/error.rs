//! Typed errors for the orchestration engine.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can match
//! on the outcome instead of parsing messages.

use std::time::Duration;

use thiserror::Error;

use crate::types::{ids::JobId, phase::Phase};

/// Errors raised by step workers.
///
/// The variants line up with the classifier categories; `Other` is
/// classified by message pattern.
#[derive(Debug, Error)]
pub enum StepError {
    /// Connection-level failure talking to a remote service
    #[error("network error: {0}")]
    Network(String),

    /// The call did not finish in time
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The remote service is throttling us
    #[error("rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    /// A response could not be parsed into the expected shape
    #[error("parse error: {0}")]
    Parse(String),

    /// Input or output failed validation
    #[error("validation failed: {0}")]
    Validation(String),

    /// A required upstream phase output is absent
    #[error("missing required output from phase {phase}")]
    MissingInput { phase: Phase },

    /// Anything else
    #[error("{0}")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StepError {
    /// Build an unclassified error from a message.
    pub fn other(message: impl Into<String>) -> Self {
        StepError::Other(message.into().into())
    }
}

/// Errors from a durable store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem or socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend refused or could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Store failures seen by a step worker: I/O and outages are transient,
/// a bad record is a parse failure.
impl From<StoreError> for StepError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Serialization(e) => StepError::Parse(e.to_string()),
            other => StepError::Network(other.to_string()),
        }
    }
}

/// Errors from the checkpoint layer.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint store error: {0}")]
    Store(#[from] StoreError),

    /// The record matched the engine version but its state is unusable
    #[error("corrupt checkpoint for job {job_id}: {reason}")]
    Corrupt { job_id: JobId, reason: String },
}

/// Caller-visible failures of a job submission.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// An equivalent job is already running.
    ///
    /// Never retried and never folded into a generic failure.
    #[error("duplicate submission: equivalent job in flight ({locator})")]
    DuplicateInFlight {
        locator: String,
        job_id: Option<JobId>,
    },

    /// A required phase failed; the job is now FAILED.
    #[error("phase {phase} failed: {message}")]
    PhaseFailed {
        phase: Phase,
        message: String,
        has_partial_output: bool,
    },

    /// The job's checkpoint is already in a terminal phase.
    #[error("job {job_id} is already terminal ({phase})")]
    AlreadyTerminal { job_id: JobId, phase: Phase },

    /// No checkpoint exists for the job.
    #[error("no checkpoint found for job {job_id}")]
    NotFound { job_id: JobId },

    /// Manual resume was requested for a job that has not failed.
    #[error("job {job_id} is not failed (phase {phase})")]
    NotFailed { job_id: JobId, phase: Phase },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Result type alias for step worker calls.
pub type StepResult<T> = std::result::Result<T, StepError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for checkpoint operations.
pub type CheckpointResult<T> = std::result::Result<T, CheckpointError>;

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
