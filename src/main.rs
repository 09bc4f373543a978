mod cli;
mod config;
mod error;
mod mesh;
mod orchestrator;
mod profile;
mod queue;
mod slicer;
mod state_machine;
mod store;
mod submit;
mod ui;
mod validator;
mod worker;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use cli::{Cli, Command};
use config::AppConfig;
use orchestrator::JobOrchestrator;
use queue::InMemoryQueue;
use slicer::PrusaSlicer;
use store::InMemoryStatusStore;
use submit::JobClient;
use ui::JobProgress;
use worker::WorkerPool;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(&cli)?;
    match cli.command {
        Command::Calculate {
            models,
            material,
            infill,
        } => calculate(config, &models, &material, infill).await,
        Command::Check => {
            let path = PrusaSlicer::from_config(&config).executable()?;
            println!("{}", path.display());
            Ok(())
        }
        Command::Specs => {
            ui::print_specs(&config);
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "slicer_jobs=debug"
    } else {
        "slicer_jobs=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    if let Some(max_attempts) = cli.max_attempts {
        config.retry.max_attempts = max_attempts;
    }
    if let Some(workers) = cli.workers {
        config.worker.concurrency = workers;
    }
    config.validate()?;
    Ok(config)
}

async fn calculate(
    config: AppConfig,
    models: &[PathBuf],
    material: &str,
    infill: i64,
) -> Result<()> {
    let slicer = PrusaSlicer::from_config(&config);
    let executable = slicer
        .executable()
        .context("PrusaSlicer is required to calculate quotes")?;
    let materials: Vec<String> = config.materials.keys().map(|m| m.to_string()).collect();
    info!(
        printer = %config.printer.name,
        materials = %materials.join(", "),
        slicer = %executable.display(),
        "slicer service ready"
    );

    if let Some(dir) = &config.worker.work_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create work dir {}", dir.display()))?;
    }

    let config = Arc::new(config);
    let queue = Arc::new(InMemoryQueue::new());
    let store = Arc::new(InMemoryStatusStore::new());
    let orchestrator = Arc::new(JobOrchestrator::new(config.clone(), slicer, store.clone()));
    let client = JobClient::new(queue.clone(), store, config.worker.max_model_bytes);
    let pool = WorkerPool::spawn(config.worker.concurrency, queue.clone(), orchestrator);
    info!(workers = pool.len(), "worker pool started");

    let mut jobs = Vec::with_capacity(models.len());
    let mut failed = 0usize;
    for path in models {
        match submit_model(&client, path, material, infill).await {
            Ok(id) => jobs.push((path, id)),
            Err(e) => {
                error!(model = %path.display(), error = %format!("{e:#}"), "submission rejected");
                failed += 1;
            }
        }
    }

    // Jobs beyond the worker count wait in the queue for earlier ones.
    let rounds = u32::try_from(jobs.len().div_ceil(pool.len().max(1))).unwrap_or(u32::MAX);
    let timeout = config.job_deadline().saturating_mul(rounds.max(1));
    for (path, id) in &jobs {
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mut progress = JobProgress::start(&label);
        let view = client
            .wait_terminal(
                id,
                timeout,
                POLL_INTERVAL,
                || !pool.is_finished(),
                |view| progress.update(view),
            )
            .await?;
        progress.complete(&view);
        ui::print_status(&view);
        if view.error.is_some() {
            failed += 1;
        }
    }

    queue.close();
    pool.join().await;
    if queue.in_flight() > 0 {
        warn!(unacked = queue.in_flight(), "deliveries left unacknowledged");
    }

    if failed > 0 {
        bail!("{failed} of {} model(s) failed", models.len());
    }
    Ok(())
}

async fn submit_model(
    client: &JobClient<InMemoryQueue, InMemoryStatusStore>,
    path: &Path,
    material: &str,
    infill: i64,
) -> Result<String> {
    let model = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let id = client.submit(model, material, infill).await?;
    Ok(id)
}
