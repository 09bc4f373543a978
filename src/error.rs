use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::slicer::SlicerError;

/// Rejections raised before a job is enqueued.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Invalid material: {0}")]
    UnknownMaterial(String),

    #[error("Infill must be between 0 and 100%, got {0}")]
    InfillOutOfRange(i64),

    #[error("Model is empty")]
    EmptyModel,

    #[error("File size {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Status store error: {0}")]
    Store(#[from] StoreError),
}

/// Why a caller stopped waiting for a job to finish.
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("Job not found: {0}")]
    UnknownJob(String),

    #[error("Job {id} did not finish within {}s", .after.as_secs())]
    DeadlineExceeded { id: String, after: Duration },

    #[error("No workers left to finish job {0}")]
    WorkersGone(String),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue is closed")]
    Closed,

    #[error("Unknown delivery tag: {0}")]
    UnknownDelivery(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {0} already exists")]
    AlreadyExists(String),

    #[error("Job {0} already reached a terminal state")]
    AlreadyTerminal(String),

    #[error("Claim on job {0} is no longer current")]
    StaleClaim(String),

    #[error("Refusing to move job {id} from {from} back to {to}")]
    Regression { id: String, from: String, to: String },
}

/// Failure of a single execution attempt.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Model validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    #[error(transparent)]
    Slicer(#[from] SlicerError),

    #[error("Working area error: {0}")]
    WorkingArea(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Lost the claim on job {0}")]
    ClaimLost(String),
}

impl JobError {
    /// Caller failures are reported immediately; system failures go through
    /// the retry budget.
    pub fn kind(&self) -> FailureKind {
        match self {
            JobError::UnsupportedFormat(_) | JobError::ValidationFailed(_) => FailureKind::Caller,
            _ => FailureKind::System,
        }
    }

    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            JobError::UnsupportedFormat(_) => Some(ErrorCode::UnsupportedFormat),
            JobError::ValidationFailed(_) => Some(ErrorCode::ValidationFailed),
            JobError::Slicer(SlicerError::NotFound { .. } | SlicerError::Spawn(_)) => {
                Some(ErrorCode::ToolUnavailable)
            }
            JobError::Slicer(_) => Some(ErrorCode::ToolExecutionFailed),
            _ => None,
        }
    }
}

/// Classifies a job failure for retry logic decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Bad input: unsupported format or a model that fails validation.
    Caller,
    /// Tool missing, tool crashed, or anything unclassified.
    System,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Caller => write!(f, "Caller"),
            FailureKind::System => write!(f, "System"),
        }
    }
}

/// Error codes visible to whoever polls a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationFailed,
    ToolUnavailable,
    ToolExecutionFailed,
    UnsupportedFormat,
    RetryExhausted,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::ToolUnavailable => "TOOL_UNAVAILABLE",
            ErrorCode::ToolExecutionFailed => "TOOL_EXECUTION_FAILED",
            ErrorCode::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            ErrorCode::RetryExhausted => "RETRY_EXHAUSTED",
        };
        f.write_str(s)
    }
}
