//! Finding the slicer executable on this machine.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::SlicerError;

/// Environment variable that points straight at the executable.
pub const OVERRIDE_ENV: &str = "PRUSA_SLICER_PATH";

pub const EXECUTABLE_NAME: &str = if cfg!(windows) {
    "prusa-slicer.exe"
} else {
    "prusa-slicer"
};

/// Conventional install locations, tried after the search path.
pub fn platform_install_paths() -> Vec<PathBuf> {
    let paths: &[&str] = if cfg!(windows) {
        &[
            r"C:\Program Files\Prusa3D\PrusaSlicer\prusa-slicer.exe",
            r"C:\Program Files (x86)\Prusa3D\PrusaSlicer\prusa-slicer.exe",
        ]
    } else if cfg!(target_os = "macos") {
        &["/Applications/PrusaSlicer.app/Contents/MacOS/PrusaSlicer"]
    } else {
        &["/usr/bin/prusa-slicer"]
    };
    paths.iter().map(PathBuf::from).collect()
}

/// Resolves the slicer in order: explicit override, search path, install locations.
#[derive(Debug, Clone)]
pub struct Locator {
    override_path: Option<PathBuf>,
    search_path: Option<OsString>,
    install_paths: Vec<PathBuf>,
}

impl Locator {
    /// Uses the process `PATH` and the platform install locations.
    pub fn new(override_path: Option<PathBuf>) -> Self {
        Self {
            override_path,
            search_path: env::var_os("PATH"),
            install_paths: platform_install_paths(),
        }
    }

    pub fn with_search_path(mut self, search_path: Option<OsString>) -> Self {
        self.search_path = search_path;
        self
    }

    pub fn with_install_paths(mut self, install_paths: Vec<PathBuf>) -> Self {
        self.install_paths = install_paths;
        self
    }

    pub fn resolve(&self) -> Result<PathBuf, SlicerError> {
        let mut searched = Vec::new();

        if let Some(path) = &self.override_path {
            if path.exists() {
                return Ok(path.clone());
            }
            searched.push(path.clone());
        }

        if let Some(search_path) = &self.search_path {
            for dir in env::split_paths(search_path) {
                let candidate = dir.join(EXECUTABLE_NAME);
                if is_executable(&candidate) {
                    return Ok(candidate);
                }
                searched.push(candidate);
            }
        }

        for path in &self.install_paths {
            if path.exists() {
                return Ok(path.clone());
            }
            searched.push(path.clone());
        }

        Err(SlicerError::NotFound { searched })
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
