//! Job status store: the only place a poller reads job state from.
//!
//! Workers write through a [`Claim`]. Claiming a job supersedes any earlier
//! claim, so a worker that was presumed dead and comes back finds its writes
//! rejected instead of clobbering the newer run. Terminal states are final.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StoreError;
use crate::slicer::PrintEstimate;
use crate::state_machine::{JobFailure, JobId, JobState};

/// Proof that a worker currently owns a job's execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub job_id: JobId,
    pub worker: String,
    pub token: u64,
    /// Failed attempts recorded when the claim was granted.
    pub attempt: u32,
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub state: JobState,
    pub attempt: u32,
    pub claim_token: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a status query returns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    pub id: JobId,
    pub state: String,
    pub progress: u8,
    pub attempt: u32,
    pub result: Option<PrintEstimate>,
    pub error: Option<JobFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobStatusView {
    pub fn is_terminal(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }
}

impl From<&JobRecord> for JobStatusView {
    fn from(record: &JobRecord) -> Self {
        let (result, error) = match &record.state {
            JobState::Success(estimate) => (Some(estimate.clone()), None),
            JobState::Error(failure) => (None, Some(failure.clone())),
            _ => (None, None),
        };
        Self {
            id: record.id.clone(),
            state: record.state.to_string(),
            progress: record.state.progress(),
            attempt: record.attempt,
            result,
            error,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

pub trait StatusStore: Send + Sync {
    /// Registers a freshly submitted job as PENDING.
    fn create(&self, id: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn status(&self, id: &str) -> impl Future<Output = Option<JobStatusView>> + Send;

    /// Takes ownership of a job's execution, superseding older claims.
    /// Fails with [`StoreError::AlreadyTerminal`] once the job is finished.
    fn claim(&self, id: &str, worker: &str)
    -> impl Future<Output = Result<Claim, StoreError>> + Send;

    /// Writes a new state. Visible to pollers as soon as this returns.
    fn update(
        &self,
        claim: &Claim,
        state: JobState,
        attempt: u32,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<JobId, JobRecord>,
    next_token: u64,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave a record half-written.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn pending_record(id: &str) -> JobRecord {
    let now = Utc::now();
    JobRecord {
        id: id.to_string(),
        state: JobState::Pending,
        attempt: 0,
        claim_token: None,
        created_at: now,
        updated_at: now,
    }
}

impl StatusStore for InMemoryStatusStore {
    async fn create(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.records.contains_key(id) {
            return Err(StoreError::AlreadyExists(id.to_string()));
        }
        inner.records.insert(id.to_string(), pending_record(id));
        Ok(())
    }

    async fn status(&self, id: &str) -> Option<JobStatusView> {
        self.lock().records.get(id).map(JobStatusView::from)
    }

    async fn claim(&self, id: &str, worker: &str) -> Result<Claim, StoreError> {
        let mut inner = self.lock();
        inner.next_token += 1;
        let token = inner.next_token;

        let record = inner
            .records
            .entry(id.to_string())
            .or_insert_with(|| pending_record(id));
        if record.state.is_terminal() {
            return Err(StoreError::AlreadyTerminal(id.to_string()));
        }
        record.claim_token = Some(token);
        record.updated_at = Utc::now();

        Ok(Claim {
            job_id: id.to_string(),
            worker: worker.to_string(),
            token,
            attempt: record.attempt,
        })
    }

    async fn update(&self, claim: &Claim, state: JobState, attempt: u32) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let record = inner
            .records
            .get_mut(&claim.job_id)
            .ok_or_else(|| StoreError::NotFound(claim.job_id.clone()))?;

        if record.state.is_terminal() {
            return Err(StoreError::AlreadyTerminal(claim.job_id.clone()));
        }
        if record.claim_token != Some(claim.token) {
            return Err(StoreError::StaleClaim(claim.job_id.clone()));
        }
        if attempt < record.attempt || !state.may_follow(&record.state) {
            return Err(StoreError::Regression {
                id: claim.job_id.clone(),
                from: record.state.to_string(),
                to: state.to_string(),
            });
        }

        record.state = state;
        record.attempt = attempt;
        record.updated_at = Utc::now();
        Ok(())
    }
}
