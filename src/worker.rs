//! Consumer side: a fixed number of tasks pulling deliveries off the queue.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::orchestrator::JobOrchestrator;
use crate::queue::JobQueue;
use crate::slicer::Slicer;
use crate::store::StatusStore;

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `count` workers. They stop once the queue is closed and drained.
    pub fn spawn<Q, S, T>(count: usize, queue: Arc<Q>, orchestrator: Arc<JobOrchestrator<S, T>>) -> Self
    where
        Q: JobQueue + 'static,
        S: Slicer + 'static,
        T: StatusStore + 'static,
    {
        let handles = (0..count)
            .map(|i| {
                let name = format!("worker-{i}");
                let span = info_span!("worker", name = %name);
                tokio::spawn(
                    run_worker(name, Arc::clone(&queue), Arc::clone(&orchestrator)).instrument(span),
                )
            })
            .collect();
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// True once every worker has exited, whether the queue closed or a task panicked.
    pub fn is_finished(&self) -> bool {
        self.handles.iter().all(|h| h.is_finished())
    }

    /// Waits for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task panicked");
            }
        }
    }
}

async fn run_worker<Q, S, T>(name: String, queue: Arc<Q>, orchestrator: Arc<JobOrchestrator<S, T>>)
where
    Q: JobQueue,
    S: Slicer,
    T: StatusStore,
{
    debug!("waiting for jobs");
    while let Some(delivery) = queue.consume().await {
        let job_id = delivery.message.id.clone();
        if delivery.redelivered {
            info!(%job_id, "picked up redelivered job");
        }

        match orchestrator.process(delivery.message, &name).await {
            Ok(processed) => {
                debug!(%job_id, ?processed, "acknowledging delivery");
                if let Err(e) = queue.ack(delivery.tag).await {
                    warn!(%job_id, error = %e, "ack failed");
                }
            }
            // Left unacknowledged so the broker hands it to someone else.
            Err(e) => error!(%job_id, error = %format!("{e:#}"), "job processing aborted"),
        }
    }
    debug!("queue closed, exiting");
}
