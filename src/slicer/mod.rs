//! The external slicing tool: locating it, invoking it, reading what it wrote.

pub mod locate;
pub mod metadata;
mod process;

use std::ffi::OsString;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config::AppConfig;
use crate::profile::{FillDensity, Material, MaterialProfiles};

pub use locate::Locator;
pub use metadata::{PrintEstimate, read_print_estimate};

#[derive(Debug, Error)]
pub enum SlicerError {
    #[error("slicer executable not found (searched {})", display_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },

    #[error("failed to start slicer: {0}")]
    Spawn(#[source] io::Error),

    #[error("slicer exited with {}: {diagnostic}", describe_code(.code))]
    Exit {
        code: Option<i32>,
        diagnostic: String,
    },

    #[error("slicer timed out after {}s: {diagnostic}", .after.as_secs())]
    Timeout { after: Duration, diagnostic: String },

    #[error("no profile configured for material {0}")]
    MissingProfile(Material),
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "nothing".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (killed by signal)".to_string(),
    }
}

/// One slicing run inside a job's working area.
#[derive(Debug, Clone)]
pub struct SliceRequest {
    pub model_path: PathBuf,
    pub output_path: PathBuf,
    pub material: Material,
    pub fill_density: FillDensity,
}

#[derive(Debug, Clone)]
pub struct SliceOutput {
    pub artifact: PathBuf,
    pub elapsed: Duration,
}

/// Turns a model file into a G-code artifact.
pub trait Slicer: Send + Sync {
    fn slice(
        &self,
        request: &SliceRequest,
    ) -> impl Future<Output = Result<SliceOutput, SlicerError>> + Send;
}

/// Runs PrusaSlicer's command-line interface.
#[derive(Debug, Clone)]
pub struct PrusaSlicer {
    locator: Locator,
    printer_config: PathBuf,
    materials: MaterialProfiles,
    layer_height: f64,
    timeout: Duration,
    capture_limit: usize,
}

impl PrusaSlicer {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            locator: Locator::new(config.slicer.executable.clone()),
            printer_config: config.slicer.printer_config.clone(),
            materials: config.materials.clone(),
            layer_height: config.printer.layer_height,
            timeout: Duration::from_secs(config.slicer.timeout_secs),
            capture_limit: config.slicer.max_diagnostic_bytes,
        }
    }

    pub fn with_locator(mut self, locator: Locator) -> Self {
        self.locator = locator;
        self
    }

    /// Resolves the executable; used by the startup check.
    pub fn executable(&self) -> Result<PathBuf, SlicerError> {
        self.locator.resolve()
    }

    pub fn args(&self, request: &SliceRequest) -> Result<Vec<OsString>, SlicerError> {
        let material_config = self
            .materials
            .get(&request.material)
            .ok_or(SlicerError::MissingProfile(request.material))?;

        Ok(vec![
            "--load".into(),
            self.printer_config.clone().into_os_string(),
            "--load".into(),
            material_config.clone().into_os_string(),
            "--layer-height".into(),
            self.layer_height.to_string().into(),
            "--fill-density".into(),
            request.fill_density.to_string().into(),
            "--export-gcode".into(),
            "-o".into(),
            request.output_path.clone().into_os_string(),
            request.model_path.clone().into_os_string(),
        ])
    }
}

impl Slicer for PrusaSlicer {
    async fn slice(&self, request: &SliceRequest) -> Result<SliceOutput, SlicerError> {
        let executable = self.locator.resolve()?;
        let args = self.args(request)?;
        tracing::debug!(executable = %executable.display(), ?args, "invoking slicer");

        let out = process::run(&executable, &args, self.timeout, self.capture_limit)
            .await
            .map_err(|e| match e {
                process::RunError::Spawn(e) if e.kind() == io::ErrorKind::NotFound => {
                    SlicerError::NotFound {
                        searched: vec![executable.clone()],
                    }
                }
                process::RunError::Spawn(e) | process::RunError::Wait(e) => SlicerError::Spawn(e),
                process::RunError::Timeout { stderr, .. } => SlicerError::Timeout {
                    after: self.timeout,
                    diagnostic: stderr,
                },
            })?;

        if !out.status.success() {
            let diagnostic = if out.stderr.trim().is_empty() {
                out.stdout
            } else {
                out.stderr
            };
            return Err(SlicerError::Exit {
                code: out.status.code(),
                diagnostic: diagnostic.trim().to_string(),
            });
        }

        if !request.output_path.exists() {
            tracing::warn!(output = %request.output_path.display(), "slicer succeeded but wrote no artifact");
        }

        Ok(SliceOutput {
            artifact: request.output_path.clone(),
            elapsed: out.elapsed,
        })
    }
}
