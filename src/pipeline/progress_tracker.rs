//! # Progress Tracking Module
//!
//! Unifica progress bar ed eventi JSON. Viene chiamato solo dal collettore
//! dell'orchestratore, quindi non serve sincronizzazione.

use crate::json_output::JsonMessage;
use crate::pipeline::orchestrator::{Stage, UnitOutcome};
use crate::progress::ProgressManager;
use std::path::Path;
use tracing::{info, warn};

/// Tracker per progress bar ed eventi JSON
#[derive(Clone)]
pub struct ProgressTracker {
    json_output: bool,
    progress_manager: ProgressManager,
}

impl ProgressTracker {
    /// Crea un nuovo tracker. La barra è visibile solo fuori dalla modalità JSON.
    pub fn new(total_units: usize, json_output: bool, show_progress: bool) -> Self {
        Self {
            json_output,
            progress_manager: ProgressManager::new(total_units as u64, show_progress && !json_output),
        }
    }

    /// Segnala l'ingresso in una fase
    pub fn enter_stage(&self, stage: Stage) {
        if self.json_output {
            JsonMessage::stage(stage.name()).emit();
        } else {
            info!("Stage: {}", stage.name());
        }
    }

    /// Gestisce il completamento di una unità di resize
    pub fn unit_complete(&self, source: &Path, width: u32, outcome: &UnitOutcome) {
        let file_name = source.file_name().unwrap_or_default().to_string_lossy();

        let message = match outcome {
            UnitOutcome::Produced(output) => format!(
                "[OK] {}",
                output.file_name().unwrap_or_default().to_string_lossy()
            ),
            UnitOutcome::Skipped => format!("[SKIP] {} at w{}", file_name, width),
            UnitOutcome::Failed(error) => {
                warn!("{} at w{}: {}", source.display(), width, error);
                format!("[ERROR] {} at w{}", file_name, width)
            }
        };
        self.progress_manager.update(&message);

        if self.json_output {
            JsonMessage::FileComplete {
                source: source.to_path_buf(),
                width: Some(width),
                output: match outcome {
                    UnitOutcome::Produced(output) => Some(output.clone()),
                    _ => None,
                },
                skipped: matches!(outcome, UnitOutcome::Skipped),
                error: match outcome {
                    UnitOutcome::Failed(error) => Some(error.clone()),
                    _ => None,
                },
            }
            .emit();
        }
    }

    /// Gestisce un errore non fatale fuori dalla fase di resize
    pub fn file_failed(&self, source: &Path, error: &str) {
        warn!("{}: {}", source.display(), error);
        if self.json_output {
            JsonMessage::FileComplete {
                source: source.to_path_buf(),
                width: None,
                output: None,
                skipped: false,
                error: Some(error.to_string()),
            }
            .emit();
        }
    }

    /// Riporta il conteggio di una width
    pub fn width_complete(&self, width: u32, produced: usize) {
        if produced > 0 {
            info!(
                "Resized {} {} for w{}",
                produced,
                if produced == 1 { "file" } else { "files" },
                width
            );
        }
        if self.json_output {
            JsonMessage::WidthComplete { width, produced }.emit();
        }
    }

    /// Finalizza progress bar
    pub fn finish(&self, summary: &str) {
        self.progress_manager.finish(summary);
    }
}
