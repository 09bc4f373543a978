//! Producer side: validating submissions, enqueueing them, answering status queries.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use crate::error::{SubmitError, WaitError};
use crate::profile::{FillDensity, Material};
use crate::queue::JobQueue;
use crate::state_machine::{JobId, JobInput, JobMessage};
use crate::store::{JobStatusView, StatusStore};

pub struct JobClient<Q, T> {
    queue: Arc<Q>,
    store: Arc<T>,
    max_model_bytes: usize,
}

impl<Q: JobQueue, T: StatusStore> JobClient<Q, T> {
    pub fn new(queue: Arc<Q>, store: Arc<T>, max_model_bytes: usize) -> Self {
        Self {
            queue,
            store,
            max_model_bytes,
        }
    }

    /// Checks the request, records the job as PENDING and enqueues it.
    ///
    /// Nothing reaches the queue unless material, infill and size are acceptable.
    pub async fn submit(
        &self,
        model: Vec<u8>,
        material: &str,
        infill_percent: i64,
    ) -> Result<JobId, SubmitError> {
        let material: Material = material.parse()?;
        let fill_density = FillDensity::from_percent(infill_percent)?;
        if model.is_empty() {
            return Err(SubmitError::EmptyModel);
        }
        if model.len() > self.max_model_bytes {
            return Err(SubmitError::TooLarge {
                size: model.len(),
                limit: self.max_model_bytes,
            });
        }

        let message = JobMessage::new(JobInput {
            model,
            material,
            fill_density,
        });
        let id = message.id.clone();

        self.store.create(&id).await?;
        self.queue.publish(message).await?;
        info!(job_id = %id, %material, fill_density = %fill_density, "job submitted");
        Ok(id)
    }

    /// Current state of a job, or `None` if the id is unknown.
    pub async fn status(&self, id: &str) -> Option<JobStatusView> {
        self.store.status(id).await
    }

    /// Polls until the job is terminal.
    ///
    /// Gives up once `timeout` has passed, or as soon as `workers_alive`
    /// reports that nobody is left to run the job.
    pub async fn wait_terminal(
        &self,
        id: &str,
        timeout: Duration,
        interval: Duration,
        workers_alive: impl Fn() -> bool,
        mut on_update: impl FnMut(&JobStatusView),
    ) -> Result<JobStatusView, WaitError> {
        let deadline = Instant::now() + timeout;
        loop {
            let view = self
                .status(id)
                .await
                .ok_or_else(|| WaitError::UnknownJob(id.to_string()))?;
            on_update(&view);
            if view.is_terminal() {
                return Ok(view);
            }
            if !workers_alive() {
                return Err(WaitError::WorkersGone(id.to_string()));
            }
            if Instant::now() >= deadline {
                return Err(WaitError::DeadlineExceeded {
                    id: id.to_string(),
                    after: timeout,
                });
            }
            tokio::time::sleep(interval).await;
        }
    }
}
