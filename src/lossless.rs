//! # Lossless Optimizer Module
//!
//! Passa percorsi assoluti di file o directory a un ottimizzatore lossless
//! esterno che parla il protocollo di ImageOptim-CLI.
//!
//! ## Modalità:
//! - `files()`: un solo processo `--quit`, lista di percorsi su stdin
//!   separati da newline
//! - `directories()`: un processo `--directory <p> --quit` per directory,
//!   in sequenza
//!
//! Il binario viene cercato una sola volta per esecuzione; la working
//! directory è quella di installazione del binario trovato.

use crate::error::{Result, RespimgError};
use crate::platform::PlatformCommands;
use crate::utils::run_engine;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Losslessly recompresses raster files in place.
#[async_trait]
pub trait LosslessOptimizer: Send + Sync {
    /// Locate the optimizer. Fails when no candidate exists.
    async fn ensure_available(&self) -> Result<()>;

    /// Optimize a batch of files in one invocation.
    async fn files(&self, paths: &[PathBuf]) -> Result<()>;

    /// Optimize whole directories, one invocation each.
    async fn directories(&self, paths: &[PathBuf]) -> Result<()>;
}

/// Built-in install locations, in lookup order.
pub fn default_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(path) = PlatformCommands::instance().get_tool_path("imageoptim") {
        candidates.push(path);
    }
    candidates.push(PathBuf::from("/usr/local/bin/imageoptim"));
    candidates.push(PathBuf::from("/opt/homebrew/bin/imageoptim"));
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".local").join("bin").join("imageoptim"));
    }
    candidates
}

async fn absolute(path: &Path) -> Result<PathBuf> {
    match tokio::fs::canonicalize(path).await {
        Ok(canonical) => Ok(canonical),
        Err(_) if path.is_absolute() => Ok(path.to_path_buf()),
        Err(_) => Ok(std::env::current_dir()?.join(path)),
    }
}

/// The stdin payload for a files batch.
pub fn stdin_payload(paths: &[PathBuf]) -> Vec<u8> {
    let mut payload = paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("\n");
    payload.push('\n');
    payload.into_bytes()
}

/// ImageOptim-CLI adapter
pub struct ImageOptim {
    candidates: Vec<PathBuf>,
    binary: OnceCell<PathBuf>,
    timeout: Duration,
}

impl ImageOptim {
    /// Look in `candidates`, or the built-in locations when empty.
    pub fn new(candidates: Vec<PathBuf>, timeout: Duration) -> Self {
        let candidates = if candidates.is_empty() {
            default_candidates()
        } else {
            candidates
        };
        Self {
            candidates,
            binary: OnceCell::new(),
            timeout,
        }
    }

    async fn binary(&self) -> Result<&PathBuf> {
        self.binary
            .get_or_try_init(|| async {
                for candidate in &self.candidates {
                    let found = tokio::fs::metadata(candidate)
                        .await
                        .map(|m| m.is_file())
                        .unwrap_or(false);
                    if found {
                        info!("Lossless optimizer: {}", candidate.display());
                        return Ok(candidate.clone());
                    }
                    debug!("Optimizer not at {}", candidate.display());
                }
                Err(RespimgError::OptimizerNotFound(self.candidates.clone()))
            })
            .await
    }

    async fn command(&self) -> Result<Command> {
        let binary = self.binary().await?;
        let mut command = Command::new(binary);
        if let Some(install_dir) = binary.parent().filter(|p| !p.as_os_str().is_empty()) {
            command.current_dir(install_dir);
        }
        Ok(command)
    }

    async fn run(&self, command: Command, stdin: Option<Vec<u8>>) -> Result<()> {
        let output = run_engine("imageoptim", command, stdin, self.timeout).await?;
        if output.status.success() {
            Ok(())
        } else {
            debug!(
                "imageoptim stderr: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            Err(RespimgError::OptimizerFailed)
        }
    }
}

#[async_trait]
impl LosslessOptimizer for ImageOptim {
    async fn ensure_available(&self) -> Result<()> {
        self.binary().await.map(|_| ())
    }

    async fn files(&self, paths: &[PathBuf]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }

        let mut absolute_paths = Vec::with_capacity(paths.len());
        for path in paths {
            absolute_paths.push(absolute(path).await?);
        }

        let mut command = self.command().await?;
        command.arg("--quit");
        info!("Optimizing {} file(s) losslessly", absolute_paths.len());
        self.run(command, Some(stdin_payload(&absolute_paths))).await
    }

    async fn directories(&self, paths: &[PathBuf]) -> Result<()> {
        for path in paths {
            let directory = absolute(path).await?;
            let mut command = self.command().await?;
            command.arg("--directory").arg(&directory).arg("--quit");
            info!("Optimizing directory {}", directory.display());
            self.run(command, None).await?;
        }
        Ok(())
    }
}
