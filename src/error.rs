//! # Error Types Module
//!
//! Questo modulo definisce tutti i tipi di errore dell'applicazione.
//!
//! ## Responsabilità:
//! - Definisce `RespimgError` enum per categorizzare tutti gli errori possibili
//! - Classifica ogni errore con `ErrorKind` (fatale, saltabile, engine, parse)
//! - Integra con `thiserror` per automatic error conversion
//!
//! ## Categorie:
//! - `FatalConfig`: configurazione invalida, nessuna width, nessun file,
//!   optimizer non trovato. Interrompe l'intera esecuzione.
//! - `SkippableInput`: width invalida. Salta solo quella width.
//! - `EngineFailure`: tool esterno mancante, exit code non-zero, output
//!   malformato, timeout. Warning per quell'unità.
//! - `ParseFailure`: SVG non parsabile. Il file viene saltato.
//!
//! ## Esempio:
//! ```ignore
//! if groups.is_empty() {
//!     return Err(RespimgError::NoFileGroups);
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;

/// How an error affects the run that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Stops the whole run before (or instead of) any further stage.
    FatalConfig,
    /// Only the affected unit is skipped.
    SkippableInput,
    /// An external engine could not do its job for one unit.
    EngineFailure,
    /// Input markup could not be parsed; that file is skipped.
    ParseFailure,
}

/// Custom error types for the responsive image pipeline
#[derive(thiserror::Error, Debug)]
pub enum RespimgError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No widths have been defined.")]
    NoWidths,

    #[error("Width is invalid ({0}). Make sure it's a positive integer.")]
    InvalidWidth(String),

    #[error("Quality is invalid ({0}). Make sure it's a value between 1 and 100.")]
    InvalidQuality(i64),

    #[error("Unable to compile; no valid source files were found.")]
    NoFileGroups,

    #[error("Unable to read configuration for {0}. Have you specified a target with a `src`?")]
    UnreadableTarget(String),

    #[error(
        "Unable to resize more than one image in compact or files object format ({dest}, {count} sources).\n\
         For multiple files please use the files array format."
    )]
    MultipleSources { dest: PathBuf, count: usize },

    #[error("Lossless optimizer not found. Looked in: {}", format_candidates(.0))]
    OptimizerNotFound(Vec<PathBuf>),

    #[error("{engine} could not be started, please ensure it is installed correctly: {source}")]
    MissingEngine {
        engine: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{engine} failed: {message}")]
    EngineFailed { engine: String, message: String },

    #[error("optimizer exited with failure status")]
    OptimizerFailed,

    #[error("{engine} produced malformed status output: {output:?}")]
    MalformedStatus { engine: String, output: String },

    #[error("{engine} timed out after {elapsed:?}")]
    Timeout { engine: String, elapsed: Duration },

    #[error("Invalid vector dimensions for {0}: intrinsic width is zero")]
    ZeroIntrinsicWidth(PathBuf),

    #[error("Unable to parse SVG: {0}")]
    SvgParse(String),
}

fn format_candidates(candidates: &[PathBuf]) -> String {
    candidates
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl RespimgError {
    /// Classify the error for the orchestrator.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RespimgError::Config(_)
            | RespimgError::ConfigParse { .. }
            | RespimgError::NoWidths
            | RespimgError::InvalidQuality(_)
            | RespimgError::NoFileGroups
            | RespimgError::UnreadableTarget(_)
            | RespimgError::MultipleSources { .. }
            | RespimgError::OptimizerNotFound(_) => ErrorKind::FatalConfig,
            RespimgError::InvalidWidth(_) => ErrorKind::SkippableInput,
            RespimgError::SvgParse(_) => ErrorKind::ParseFailure,
            RespimgError::Io(_)
            | RespimgError::MissingEngine { .. }
            | RespimgError::EngineFailed { .. }
            | RespimgError::OptimizerFailed
            | RespimgError::MalformedStatus { .. }
            | RespimgError::Timeout { .. }
            | RespimgError::ZeroIntrinsicWidth(_) => ErrorKind::EngineFailure,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::FatalConfig
    }

    /// True when the engine binary itself could not be spawned.
    pub fn is_missing_engine(&self) -> bool {
        matches!(self, RespimgError::MissingEngine { .. })
    }
}

pub type Result<T, E = RespimgError> = std::result::Result<T, E>;
