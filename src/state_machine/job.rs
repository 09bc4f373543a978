use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::JobState;
use crate::profile::{FillDensity, Material};

pub type JobId = String;

/// What the caller submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInput {
    pub model: Vec<u8>,
    pub material: Material,
    pub fill_density: FillDensity,
}

/// The message carried by the queue. The producer assigns `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessage {
    pub id: JobId,
    pub input: JobInput,
}

impl JobMessage {
    pub fn new(input: JobInput) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            input,
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Failed attempts allowed before the job is marked as errored.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before re-running a failed attempt, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Double the delay on every further failure instead of keeping it fixed.
    #[serde(default)]
    pub exponential: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            exponential: false,
        }
    }
}

impl RetryConfig {
    /// Delay after the `attempt`-th failure.
    /// Exponential: delay = base_delay_ms * 2^(attempt - 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ms = if self.exponential {
            let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
            self.base_delay_ms.saturating_mul(factor)
        } else {
            self.base_delay_ms
        };
        Duration::from_millis(ms)
    }
}

/// A job as seen by the worker executing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub input: JobInput,
    pub state: JobState,
    pub state_history: Vec<JobState>,
    /// Failed attempts so far.
    pub attempt: u32,
    pub retry_config: RetryConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Rebuilds a job from a delivered message. `attempt` comes from the
    /// status store so a redelivered job keeps its spent budget.
    pub fn from_message(message: JobMessage, attempt: u32, retry_config: RetryConfig) -> Self {
        let now = Utc::now();
        Self {
            id: message.id,
            input: message.input,
            state: JobState::Pending,
            state_history: Vec::new(),
            attempt,
            retry_config,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Structured audit record produced at job completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub job_id: JobId,
    pub material: Material,
    pub fill_density: FillDensity,
    pub model_bytes: usize,
    pub final_state: JobState,
    pub state_transitions: Vec<JobState>,
    pub attempt: u32,
    pub max_attempts: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl AuditRecord {
    pub fn from_job(job: &Job) -> Self {
        let now = Utc::now();
        let duration = now - job.created_at;

        Self {
            job_id: job.id.clone(),
            material: job.input.material,
            fill_density: job.input.fill_density,
            model_bytes: job.input.model.len(),
            final_state: job.state.clone(),
            state_transitions: job.state_history.clone(),
            attempt: job.attempt,
            max_attempts: job.retry_config.max_attempts,
            started_at: job.created_at,
            completed_at: now,
            duration_ms: duration.num_milliseconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> JobInput {
        JobInput {
            model: vec![1, 2, 3],
            material: Material::Pla,
            fill_density: FillDensity::from_percent(20).unwrap(),
        }
    }

    #[test]
    fn job_from_message_defaults() {
        let message = JobMessage::new(input());
        let id = message.id.clone();
        let job = Job::from_message(message, 0, RetryConfig::default());
        assert_eq!(job.id, id);
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempt, 0);
        assert_eq!(job.retry_config.max_attempts, 3);
        assert!(job.state_history.is_empty());
    }

    #[test]
    fn redelivered_job_keeps_attempts() {
        let job = Job::from_message(JobMessage::new(input()), 2, RetryConfig::default());
        assert_eq!(job.attempt, 2);
    }

    #[test]
    fn message_ids_are_unique() {
        assert_ne!(JobMessage::new(input()).id, JobMessage::new(input()).id);
    }

    #[test]
    fn fixed_backoff_by_default() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(30));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(30));
    }

    #[test]
    fn retry_config_exponential_backoff() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay_ms: 1000,
            exponential: true,
        };
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(8000));
    }

    #[test]
    fn audit_record_from_job() {
        let job = Job::from_message(JobMessage::new(input()), 0, RetryConfig::default());
        let record = AuditRecord::from_job(&job);

        assert_eq!(record.job_id, job.id);
        assert_eq!(record.material, Material::Pla);
        assert_eq!(record.model_bytes, 3);
        assert_eq!(record.max_attempts, 3);
        assert_eq!(record.final_state, JobState::Pending);
    }
}
