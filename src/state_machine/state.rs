use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::job::Job;
use crate::error::{ErrorCode, FailureKind, JobError};
use crate::slicer::PrintEstimate;

/// Progress reported once the model is in the working area.
pub const PROGRESS_STAGED: u8 = 10;
/// Progress reported right before the slicer starts.
pub const PROGRESS_SLICING: u8 = 35;
/// Progress reported once the slicer has produced its artifact.
pub const PROGRESS_EXTRACTING: u8 = 85;

/// Lifecycle of a job: PENDING → RUNNING → (PROGRESS)* → SUCCESS | ERROR
///
/// Each variant carries only the data valid in that state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running { attempt: u32 },
    Progress { attempt: u32, percent: u8 },
    Success(PrintEstimate),
    Error(JobFailure),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success(_) | JobState::Error(_))
    }

    pub fn progress(&self) -> u8 {
        match self {
            JobState::Pending | JobState::Running { .. } => 0,
            JobState::Progress { percent, .. } => *percent,
            JobState::Success(_) | JobState::Error(_) => 100,
        }
    }

    pub fn attempt(&self) -> Option<u32> {
        match self {
            JobState::Running { attempt } | JobState::Progress { attempt, .. } => Some(*attempt),
            _ => None,
        }
    }

    /// Whether a poller that has seen `current` may next see `self`.
    ///
    /// Terminal states are final. A new RUNNING may reset progress (retry or
    /// redelivery), but attempts never go backwards and progress never
    /// decreases within an attempt.
    pub fn may_follow(&self, current: &JobState) -> bool {
        if current.is_terminal() {
            return false;
        }
        match self {
            JobState::Pending => matches!(current, JobState::Pending),
            JobState::Running { attempt } => current.attempt().is_none_or(|a| *attempt >= a),
            JobState::Progress { attempt, percent } => match current {
                JobState::Progress {
                    attempt: a,
                    percent: p,
                } => *attempt > *a || (*attempt == *a && percent >= p),
                other => other.attempt().is_none_or(|a| *attempt >= a),
            },
            JobState::Success(_) | JobState::Error(_) => true,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "PENDING"),
            JobState::Running { .. } => write!(f, "RUNNING"),
            JobState::Progress { .. } => write!(f, "PROGRESS"),
            JobState::Success(_) => write!(f, "SUCCESS"),
            JobState::Error(_) => write!(f, "ERROR"),
        }
    }
}

/// Terminal error payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub code: ErrorCode,
    pub message: String,
    /// Individual reasons, e.g. every failed validation check.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
    /// For RETRY_EXHAUSTED, the code of the last failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<ErrorCode>,
}

impl JobFailure {
    fn from_error(err: &JobError) -> Self {
        let details = match err {
            JobError::ValidationFailed(errors) => errors.clone(),
            _ => Vec::new(),
        };
        Self {
            code: err.code().unwrap_or(ErrorCode::RetryExhausted),
            message: err.to_string(),
            details,
            cause: None,
        }
    }

    fn exhausted(err: &JobError, attempts: u32) -> Self {
        Self {
            code: ErrorCode::RetryExhausted,
            message: format!("Gave up after {attempts} failed attempts: {err}"),
            details: Vec::new(),
            cause: err.code(),
        }
    }
}

/// The result of evaluating a state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Move to a new non-terminal state.
    Next(JobState),
    /// Run the pipeline again after `delay`.
    Retry {
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    /// The job reached SUCCESS or ERROR.
    Complete(JobState),
}

/// Drives a `Job` through the state machine.
pub struct StateMachine;

impl StateMachine {
    /// Enter RUNNING for a fresh attempt. Progress starts over.
    pub fn begin_attempt(job: &mut Job) -> Transition {
        let t = Transition::Next(JobState::Running {
            attempt: job.attempt,
        });
        Self::apply(job, &t);
        t
    }

    /// Record a progress checkpoint. Never lowers progress within an attempt.
    pub fn checkpoint(job: &mut Job, percent: u8) -> Transition {
        let percent = percent.min(100).max(job.state.progress());
        let t = Transition::Next(JobState::Progress {
            attempt: job.attempt,
            percent,
        });
        Self::apply(job, &t);
        t
    }

    /// Decide what follows a finished attempt.
    ///
    /// - Success completes the job.
    /// - Caller failures complete the job with an error without touching the
    ///   retry budget.
    /// - System failures consume one attempt; they retry while attempts remain,
    ///   otherwise complete with RETRY_EXHAUSTED. Never both.
    pub fn finish(job: &mut Job, result: Result<PrintEstimate, JobError>) -> Transition {
        let t = match result {
            Ok(estimate) => Transition::Complete(JobState::Success(estimate)),
            Err(err) if err.kind() == FailureKind::Caller => {
                Transition::Complete(JobState::Error(JobFailure::from_error(&err)))
            }
            Err(err) => Self::handle_failure(job, &err),
        };
        Self::apply(job, &t);
        t
    }

    fn handle_failure(job: &mut Job, err: &JobError) -> Transition {
        job.attempt += 1;
        if job.attempt < job.retry_config.max_attempts {
            Transition::Retry {
                attempt: job.attempt,
                delay: job.retry_config.delay_for_attempt(job.attempt),
                reason: err.to_string(),
            }
        } else {
            job.attempt = job.retry_config.max_attempts;
            Transition::Complete(JobState::Error(JobFailure::exhausted(err, job.attempt)))
        }
    }

    fn apply(job: &mut Job, transition: &Transition) {
        match transition {
            Transition::Next(state) | Transition::Complete(state) => {
                job.state_history.push(job.state.clone());
                job.state = state.clone();
            }
            Transition::Retry { .. } => {
                // State stays put until the next attempt begins.
                job.state_history.push(job.state.clone());
            }
        }
        job.updated_at = chrono::Utc::now();
    }
}
