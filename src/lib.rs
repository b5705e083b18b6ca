//! # respimg Library
//!
//! Genera varianti responsive (una per width) di immagini raster e vettoriali
//! pilotando tool esterni, con ottimizzazione lossless opzionale.
//!
//! ## Architettura dei moduli:
//! - `config`: Risoluzione opzioni a livelli e file di configurazione
//! - `validate`: Controllo di widths, quality e gruppi di file
//! - `error`: Tipi di errore e loro classificazione
//! - `pipeline`: Orchestratore delle fasi, naming degli output, progress
//! - `rasterizer`: Adapter del renderer vettoriale (protocollo PhantomJS)
//! - `resize`: Adapter ImageMagick per il resize raster
//! - `lossless`: Adapter dell'optimizer lossless (protocollo ImageOptim-CLI)
//! - `svg_optimizer`: Pulizia SVG in-process
//! - `file_manager`: Discovery e classificazione dei file
//! - `platform` / `tool_resolver`: Ricerca degli eseguibili
//! - `progress` / `json_output`: Reporting
//!
//! ## Utilizzo:
//! ```ignore
//! use respimg::{resolve, Engines, Pipeline, RunSettings};
//!
//! let options = resolve(&[&overrides])?;
//! let engines = Engines::from_settings(&EngineSettings::default(), &options)?;
//! let report = Pipeline::new("site", options, groups, engines, RunSettings::default())
//!     .run()
//!     .await?;
//! ```

pub mod config;
pub mod error;
pub mod file_manager;
pub mod json_output;
pub mod lossless;
pub mod pipeline;
pub mod platform;
pub mod progress;
pub mod rasterizer;
pub mod resize;
pub mod svg_optimizer;
pub mod tool_resolver;
pub mod utils;
pub mod validate;

pub use config::{resolve, EngineSettings, FileGroupSpec, OptionSet, Overrides, RunConfig};
pub use error::{ErrorKind, RespimgError, Result};
pub use pipeline::{Engines, Pipeline, RunReport, RunSettings, Stage};
