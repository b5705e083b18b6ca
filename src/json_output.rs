//! # JSON Output Module
//!
//! Questo modulo gestisce l'output strutturato in JSON (una riga per evento
//! su stdout) per chi integra `respimg` in altri strumenti.
//!
//! ## Tipi di messaggi:
//! - `start`: Inizio di una esecuzione per un target
//! - `stage`: Ingresso in una fase della pipeline
//! - `file_complete`: Fine elaborazione di una unità (file, width)
//! - `width_complete`: Conteggio dei file prodotti per una width
//! - `complete`: Fine esecuzione con statistiche finali
//! - `error`: Errore fatale

use crate::config::OptionSet;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tipo di messaggio JSON
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JsonMessage {
    /// Inizio dell'esecuzione
    #[serde(rename = "start")]
    Start {
        target: String,
        file_groups: usize,
        widths: Vec<u32>,
        config: JsonConfig,
    },

    /// Ingresso in una fase
    #[serde(rename = "stage")]
    Stage { stage: String },

    /// Fine elaborazione di una unità
    #[serde(rename = "file_complete")]
    FileComplete {
        source: PathBuf,
        width: Option<u32>,
        output: Option<PathBuf>,
        skipped: bool,
        error: Option<String>,
    },

    /// Fine di una width
    #[serde(rename = "width_complete")]
    WidthComplete { width: u32, produced: usize },

    /// Esecuzione completata
    #[serde(rename = "complete")]
    Complete {
        target: String,
        files_produced: usize,
        files_skipped: usize,
        errors: usize,
        svg_bytes_saved: u64,
        duration_seconds: f64,
    },

    /// Errore generale
    #[serde(rename = "error")]
    Error {
        message: String,
        details: Option<String>,
    },
}

/// Configurazione per output JSON
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonConfig {
    pub quality: i64,
    pub workers: usize,
    pub optimize_svg: bool,
    pub optimize_raster_input: bool,
    pub optimize_raster_output: bool,
}

impl JsonConfig {
    pub fn new(options: &OptionSet, workers: usize) -> Self {
        Self {
            quality: options.quality,
            workers,
            optimize_svg: options.optimize.svg,
            optimize_raster_input: options.optimize.raster_input,
            optimize_raster_output: options.optimize.raster_output,
        }
    }
}

impl JsonMessage {
    /// Emette il messaggio JSON su stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }

    /// Crea un messaggio di fase
    pub fn stage(stage: &str) -> Self {
        Self::Stage {
            stage: stage.to_string(),
        }
    }

    /// Crea un messaggio di errore
    pub fn error(message: String, details: Option<String>) -> Self {
        Self::Error { message, details }
    }
}
