//! # Pipeline Module
//!
//! Separa le responsabilità in sottomoduli:
//! - `orchestrator`: fasi, fan-out per width e raccolta risultati
//! - `progress_tracker`: progress bar ed eventi JSON unificati
//! - `path_resolver`: naming dei file di output

pub mod orchestrator;
pub mod path_resolver;
pub mod progress_tracker;

pub use orchestrator::{Engines, Pipeline, RunReport, RunSettings, Stage, UnitOutcome};
pub use path_resolver::PathResolver;
pub use progress_tracker::ProgressTracker;
