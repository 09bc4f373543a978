use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, bail};
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};

use crate::config::AppConfig;
use crate::error::{JobError, StoreError};
use crate::mesh::MeshReport;
use crate::slicer::{PrintEstimate, SliceRequest, Slicer, read_print_estimate};
use crate::state_machine::{
    AuditRecord, Job, JobMessage, JobState, PROGRESS_EXTRACTING, PROGRESS_SLICING,
    PROGRESS_STAGED, StateMachine, Transition,
};
use crate::store::{Claim, StatusStore};
use crate::validator::validate_model;

const MODEL_FILE: &str = "model.stl";
const OUTPUT_FILE: &str = "output.gcode";

/// How a delivery was handled.
#[derive(Debug, Clone, PartialEq)]
pub enum Processed {
    /// This worker wrote the terminal state.
    Finished(JobState),
    /// The job was already terminal; nothing ran.
    Duplicate,
    /// Another worker claimed the job mid-flight; this run stopped without a terminal write.
    Superseded,
}

/// Drives one delivered job through validation, slicing and extraction.
pub struct JobOrchestrator<S, T> {
    config: Arc<AppConfig>,
    slicer: S,
    store: Arc<T>,
}

impl<S: Slicer, T: StatusStore> JobOrchestrator<S, T> {
    pub fn new(config: Arc<AppConfig>, slicer: S, store: Arc<T>) -> Self {
        Self {
            config,
            slicer,
            store,
        }
    }

    /// Runs the job until it is terminal, retrying system failures in place.
    ///
    /// The caller should acknowledge the delivery only when this returns `Ok`.
    #[instrument(skip_all, fields(job_id = %message.id, worker = %worker))]
    pub async fn process(&self, message: JobMessage, worker: &str) -> Result<Processed> {
        let claim = match self.store.claim(&message.id, worker).await {
            Ok(claim) => claim,
            Err(StoreError::AlreadyTerminal(_)) => {
                info!("job already finished, skipping duplicate delivery");
                return Ok(Processed::Duplicate);
            }
            Err(e) => bail!("failed to claim job {}: {e}", message.id),
        };

        let mut job = Job::from_message(message, claim.attempt, self.config.retry.clone());

        loop {
            let result = self.run_attempt(&mut job, &claim).await;
            if let Err(JobError::ClaimLost(_)) = &result {
                warn!("claim superseded, abandoning run");
                return Ok(Processed::Superseded);
            }
            if let Err(e) = &result {
                warn!(attempt = job.attempt, error = %e, kind = %e.kind(), "attempt failed");
            }

            match StateMachine::finish(&mut job, result) {
                Transition::Retry {
                    attempt,
                    delay,
                    reason,
                } => {
                    log_retry(attempt, job.retry_config.max_attempts, &reason, delay);
                    tokio::time::sleep(delay).await;
                }
                Transition::Complete(state) => {
                    match self.store.update(&claim, state.clone(), job.attempt).await {
                        Ok(()) => {}
                        Err(StoreError::StaleClaim(_) | StoreError::AlreadyTerminal(_)) => {
                            warn!("terminal write rejected, another run owns this job");
                            return Ok(Processed::Superseded);
                        }
                        Err(e) => bail!("failed to record terminal state: {e}"),
                    }
                    info!(state = %state, attempt = job.attempt, "job finished");
                    let record = AuditRecord::from_job(&job);
                    debug!(audit = %serde_json::to_string(&record).unwrap_or_default(), "audit record");
                    return Ok(Processed::Finished(state));
                }
                Transition::Next(state) => {
                    bail!("unexpected transition after attempt: {state}");
                }
            }
        }
    }

    /// One pass through the pipeline inside a fresh working area.
    async fn run_attempt(&self, job: &mut Job, claim: &Claim) -> Result<PrintEstimate, JobError> {
        StateMachine::begin_attempt(job);
        self.record(job, claim).await?;

        let area = self.working_area(&job.id)?;
        debug!(path = %area.path().display(), attempt = job.attempt, "working area ready");
        let result = self.pipeline(job, claim, area.path()).await;

        // Dropping the TempDir would also remove it; closing surfaces the error.
        let path = area.path().to_path_buf();
        if let Err(e) = area.close() {
            warn!(path = %path.display(), error = %e, "failed to remove working area");
        }
        result
    }

    async fn pipeline(
        &self,
        job: &mut Job,
        claim: &Claim,
        dir: &Path,
    ) -> Result<PrintEstimate, JobError> {
        let model_path = dir.join(MODEL_FILE);
        tokio::fs::write(&model_path, &job.input.model).await?;
        self.checkpoint(job, claim, PROGRESS_STAGED).await?;

        let mesh = {
            let path = model_path.clone();
            tokio::task::spawn_blocking(move || load_mesh(&path))
                .await
                .map_err(|e| JobError::Internal(format!("mesh loader failed: {e}")))??
        };

        let verdict = validate_model(&mesh, &self.config.printer);
        if !verdict.is_valid {
            info!(
                errors = ?verdict.errors,
                size = ?verdict.model_size,
                volume = verdict.volume,
                "model rejected"
            );
            return Err(JobError::ValidationFailed(verdict.errors));
        }

        self.checkpoint(job, claim, PROGRESS_SLICING).await?;
        let request = SliceRequest {
            model_path,
            output_path: dir.join(OUTPUT_FILE),
            material: job.input.material,
            fill_density: job.input.fill_density,
        };
        let output = self.slicer.slice(&request).await?;
        debug!(elapsed_ms = output.elapsed.as_millis() as u64, "slicer finished");

        self.checkpoint(job, claim, PROGRESS_EXTRACTING).await?;
        let artifact = output.artifact;
        let estimate = tokio::task::spawn_blocking(move || read_print_estimate(&artifact))
            .await
            .map_err(|e| JobError::Internal(format!("metadata reader failed: {e}")))?;
        Ok(estimate)
    }

    async fn checkpoint(&self, job: &mut Job, claim: &Claim, percent: u8) -> Result<(), JobError> {
        StateMachine::checkpoint(job, percent);
        self.record(job, claim).await
    }

    /// Writes the job's current state before the pipeline moves on.
    async fn record(&self, job: &Job, claim: &Claim) -> Result<(), JobError> {
        match self.store.update(claim, job.state.clone(), job.attempt).await {
            Ok(()) => Ok(()),
            Err(StoreError::StaleClaim(_) | StoreError::AlreadyTerminal(_)) => {
                Err(JobError::ClaimLost(job.id.clone()))
            }
            Err(e) => Err(JobError::Internal(e.to_string())),
        }
    }

    fn working_area(&self, job_id: &str) -> io::Result<TempDir> {
        let short_id: String = job_id.chars().take(8).collect();
        let prefix = format!("slice-{short_id}-");
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        match &self.config.worker.work_dir {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
    }
}

/// Opening the file is a working-area problem; failing to decode it is the caller's.
fn load_mesh(path: &Path) -> Result<MeshReport, JobError> {
    let mut reader = BufReader::new(File::open(path)?);
    MeshReport::from_reader(&mut reader).map_err(|e| JobError::UnsupportedFormat(e.to_string()))
}

fn log_retry(attempt: u32, max: u32, reason: &str, delay: std::time::Duration) {
    warn!(
        attempt,
        max_attempts = max,
        delay_ms = delay.as_millis() as u64,
        "retrying: {reason}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::mesh::fixtures::{box_stl, nan_stl};
    use crate::profile::{FillDensity, Material};
    use crate::slicer::{Locator, PrusaSlicer, SliceOutput, SlicerError};
    use crate::state_machine::{JobFailure, JobInput, RetryConfig};
    use crate::store::{InMemoryStatusStore, JobStatusView};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    const GCODE: &str = "; total filament used [g] = 2.51\n\
                         ; total filament cost = $0.06\n\
                         ; estimated printing time (normal mode) = 0h 31m\n";

    /// Fails the first `failures` calls, then writes a G-code file.
    struct MockSlicer {
        failures: u32,
        calls: AtomicU32,
    }

    impl MockSlicer {
        fn failing(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    impl Slicer for MockSlicer {
        async fn slice(&self, request: &SliceRequest) -> Result<SliceOutput, SlicerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(SlicerError::Exit {
                    code: Some(1),
                    diagnostic: format!("crash #{}", call + 1),
                });
            }
            tokio::fs::write(&request.output_path, GCODE).await.unwrap();
            Ok(SliceOutput {
                artifact: request.output_path.clone(),
                elapsed: Duration::from_millis(1),
            })
        }
    }

    /// Records what a poller would see while the slicer runs.
    struct ObservingSlicer {
        store: Arc<InMemoryStatusStore>,
        job_id: String,
        seen: Mutex<Vec<JobStatusView>>,
    }

    impl Slicer for ObservingSlicer {
        async fn slice(&self, request: &SliceRequest) -> Result<SliceOutput, SlicerError> {
            let view = self.store.status(&self.job_id).await.unwrap();
            self.seen.lock().unwrap().push(view);
            tokio::fs::write(&request.output_path, GCODE).await.unwrap();
            Ok(SliceOutput {
                artifact: request.output_path.clone(),
                elapsed: Duration::ZERO,
            })
        }
    }

    fn test_config(work_dir: Option<PathBuf>) -> Arc<AppConfig> {
        let mut config = AppConfig::default();
        config.retry.base_delay_ms = 0;
        config.worker.work_dir = work_dir;
        Arc::new(config)
    }

    fn message(model: Vec<u8>) -> JobMessage {
        JobMessage::new(JobInput {
            model,
            material: Material::Pla,
            fill_density: FillDensity::from_percent(20).unwrap(),
        })
    }

    async fn submitted(store: &InMemoryStatusStore, model: Vec<u8>) -> JobMessage {
        let msg = message(model);
        store.create(&msg.id).await.unwrap();
        msg
    }

    fn failure(processed: Processed) -> JobFailure {
        match processed {
            Processed::Finished(JobState::Error(failure)) => failure,
            other => panic!("expected terminal error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transient_failures_then_success() {
        let store = Arc::new(InMemoryStatusStore::new());
        let orch = JobOrchestrator::new(test_config(None), MockSlicer::failing(2), store.clone());
        let msg = submitted(&store, box_stl(10.0, 10.0, 10.0)).await;

        let processed = orch.process(msg.clone(), "worker-0").await.unwrap();
        assert!(matches!(processed, Processed::Finished(JobState::Success(_))));

        let view = store.status(&msg.id).await.unwrap();
        assert_eq!(view.state, "SUCCESS");
        assert_eq!(view.attempt, 2);
        let result = view.result.unwrap();
        assert_eq!(result.material_grams, 2.51);
        assert_eq!(result.cost, 0.06);
        assert_eq!(result.print_time, "0h 31m");
        assert!(view.error.is_none());
    }

    #[tokio::test]
    async fn persistent_failure_exhausts_attempts() {
        let store = Arc::new(InMemoryStatusStore::new());
        let orch = JobOrchestrator::new(test_config(None), MockSlicer::failing(u32::MAX), store.clone());
        let msg = submitted(&store, box_stl(10.0, 10.0, 10.0)).await;

        let failure = failure(orch.process(msg.clone(), "worker-0").await.unwrap());
        assert_eq!(failure.code, ErrorCode::RetryExhausted);
        assert_eq!(failure.cause, Some(ErrorCode::ToolExecutionFailed));
        assert!(failure.message.contains("crash #3"));
        assert_eq!(orch.slicer.calls.load(Ordering::SeqCst), 3);

        let view = store.status(&msg.id).await.unwrap();
        assert_eq!(view.state, "ERROR");
        assert_eq!(view.attempt, 3);
        assert!(view.result.is_none());
    }

    #[tokio::test]
    async fn oversized_model_fails_validation_without_retry() {
        let store = Arc::new(InMemoryStatusStore::new());
        let orch = JobOrchestrator::new(test_config(None), MockSlicer::failing(0), store.clone());
        let msg = submitted(&store, box_stl(300.0, 300.0, 300.0)).await;

        let failure = failure(orch.process(msg.clone(), "worker-0").await.unwrap());
        assert_eq!(failure.code, ErrorCode::ValidationFailed);
        assert_eq!(failure.details.len(), 1);
        assert!(failure.details[0].contains("exceeds build volume"));
        assert_eq!(orch.slicer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.status(&msg.id).await.unwrap().attempt, 0);
    }

    #[tokio::test]
    async fn unreadable_model_is_unsupported_format() {
        let store = Arc::new(InMemoryStatusStore::new());
        let orch = JobOrchestrator::new(test_config(None), MockSlicer::failing(0), store.clone());
        let msg = submitted(&store, b"this is not an stl file".to_vec()).await;

        let failure = failure(orch.process(msg.clone(), "worker-0").await.unwrap());
        assert_eq!(failure.code, ErrorCode::UnsupportedFormat);
        assert_eq!(orch.slicer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.status(&msg.id).await.unwrap().attempt, 0);
    }

    #[tokio::test]
    async fn non_finite_mesh_never_reaches_the_slicer() {
        let store = Arc::new(InMemoryStatusStore::new());
        let orch = JobOrchestrator::new(test_config(None), MockSlicer::failing(0), store.clone());
        let msg = submitted(&store, nan_stl()).await;

        let failure = failure(orch.process(msg.clone(), "worker-0").await.unwrap());
        assert_eq!(failure.code, ErrorCode::UnsupportedFormat);
        assert!(failure.message.contains("non-finite"));
        assert_eq!(orch.slicer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.status(&msg.id).await.unwrap().attempt, 0);
    }

    #[tokio::test]
    async fn missing_tool_is_retried_then_reported() {
        let store = Arc::new(InMemoryStatusStore::new());
        let config = test_config(None);
        let slicer = PrusaSlicer::from_config(&config).with_locator(
            Locator::new(Some(PathBuf::from("/nonexistent/prusa-slicer")))
                .with_search_path(None)
                .with_install_paths(vec![]),
        );
        let orch = JobOrchestrator::new(config, slicer, store.clone());
        let msg = submitted(&store, box_stl(10.0, 10.0, 10.0)).await;

        let failure = failure(orch.process(msg, "worker-0").await.unwrap());
        assert_eq!(failure.code, ErrorCode::RetryExhausted);
        assert_eq!(failure.cause, Some(ErrorCode::ToolUnavailable));
    }

    #[tokio::test]
    async fn redelivery_after_terminal_state_is_ignored() {
        let store = Arc::new(InMemoryStatusStore::new());
        let orch = JobOrchestrator::new(test_config(None), MockSlicer::failing(0), store.clone());
        let msg = submitted(&store, box_stl(10.0, 10.0, 10.0)).await;

        orch.process(msg.clone(), "worker-0").await.unwrap();
        let before = store.status(&msg.id).await.unwrap();

        let again = orch.process(msg.clone(), "worker-1").await.unwrap();
        assert_eq!(again, Processed::Duplicate);
        assert_eq!(store.status(&msg.id).await.unwrap(), before);
        assert_eq!(orch.slicer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_worker_does_not_write_terminal_state() {
        let store = Arc::new(InMemoryStatusStore::new());
        let orch = JobOrchestrator::new(test_config(None), MockSlicer::failing(0), store.clone());
        let msg = submitted(&store, box_stl(10.0, 10.0, 10.0)).await;

        // A newer claim taken after ours: our first write must be fenced off.
        let claim = store.claim(&msg.id, "worker-0").await.unwrap();
        store.claim(&msg.id, "worker-1").await.unwrap();
        let mut job = Job::from_message(msg.clone(), 0, RetryConfig::default());
        let result = orch.run_attempt(&mut job, &claim).await;
        assert!(matches!(result, Err(JobError::ClaimLost(_))));
        assert_eq!(store.status(&msg.id).await.unwrap().state, "PENDING");
    }

    #[tokio::test]
    async fn progress_is_visible_while_slicing() {
        let store = Arc::new(InMemoryStatusStore::new());
        let msg = submitted(&store, box_stl(10.0, 10.0, 10.0)).await;
        let slicer = ObservingSlicer {
            store: store.clone(),
            job_id: msg.id.clone(),
            seen: Mutex::new(Vec::new()),
        };
        let orch = JobOrchestrator::new(test_config(None), slicer, store.clone());

        orch.process(msg.clone(), "worker-0").await.unwrap();

        let seen = orch.slicer.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].state, "PROGRESS");
        assert_eq!(seen[0].progress, PROGRESS_SLICING);
        assert_eq!(store.status(&msg.id).await.unwrap().progress, 100);
    }

    #[tokio::test]
    async fn working_areas_are_removed_on_every_path() {
        let root = TempDir::new().unwrap();
        let store = Arc::new(InMemoryStatusStore::new());

        let ok = JobOrchestrator::new(
            test_config(Some(root.path().to_path_buf())),
            MockSlicer::failing(1),
            store.clone(),
        );
        let msg = submitted(&store, box_stl(10.0, 10.0, 10.0)).await;
        ok.process(msg, "worker-0").await.unwrap();

        let msg = submitted(&store, b"garbage".to_vec()).await;
        ok.process(msg, "worker-0").await.unwrap();

        let leftovers = std::fs::read_dir(root.path()).unwrap().count();
        assert_eq!(leftovers, 0);
    }
}
