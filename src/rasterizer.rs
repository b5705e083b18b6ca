//! # Vector Rasterizer Module
//!
//! Rende un sorgente SVG in PNG a una larghezza fissa tramite un renderer
//! headless esterno (PhantomJS con lo script incluso nel binario).
//!
//! ## Protocollo:
//! - Argomenti posizionali: `<script> <src> <dest.png> <width> <height>`
//! - L'altezza è calcolata dalle dimensioni intrinseche dell'SVG
//! - Il renderer stampa una riga JSON `{"status": true}` prima di uscire

use crate::error::{Result, RespimgError};
use crate::pipeline::path_resolver::PathResolver;
use crate::utils::{failure_message, run_engine};
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info};

const BUNDLED_SCRIPT: &str = include_str!("../assets/svg2png.js");

/// Turns a vector source into a raster file at a given width.
#[async_trait]
pub trait VectorRasterizer: Send + Sync {
    /// Render `src` at `width` pixels. `dest` is the per-width destination;
    /// the produced raster path is returned.
    async fn rasterize(&self, src: &Path, dest: &Path, width: u32) -> Result<PathBuf>;
}

/// Declared width and height of an SVG root element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntrinsicSize {
    pub width: f64,
    pub height: f64,
}

impl IntrinsicSize {
    /// Output height preserving the aspect ratio; `None` when the intrinsic
    /// width is zero.
    pub fn height_for(&self, width: u32) -> Option<u32> {
        if self.width == 0.0 {
            return None;
        }
        let height = (width as f64 * self.height / self.width).round();
        if height.is_finite() && height >= 1.0 {
            Some(height.min(u32::MAX as f64) as u32)
        } else {
            Some(1)
        }
    }
}

/// Leading number of an attribute value (`"100px"` -> 100). Values without
/// a numeric prefix count as 1.
fn numeric_prefix(value: &str) -> f64 {
    let value = value.trim();
    let candidate: String = value
        .chars()
        .take_while(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        .collect();

    (1..=candidate.len())
        .rev()
        .find_map(|end| candidate[..end].parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(1.0)
}

/// Read `width`/`height` from the root `<svg>` element.
pub fn read_intrinsic_size(svg: &str) -> Result<IntrinsicSize> {
    let mut reader = Reader::from_str(svg);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() != b"svg" {
                    return Err(RespimgError::SvgParse(format!(
                        "root element is <{}>, not <svg>",
                        String::from_utf8_lossy(e.name().as_ref())
                    )));
                }

                let mut size = IntrinsicSize {
                    width: 1.0,
                    height: 1.0,
                };
                for attr in e.attributes() {
                    let attr = attr.map_err(|err| RespimgError::SvgParse(err.to_string()))?;
                    let value = attr
                        .unescape_value()
                        .map_err(|err| RespimgError::SvgParse(err.to_string()))?;
                    match attr.key.as_ref() {
                        b"width" => size.width = numeric_prefix(&value),
                        b"height" => size.height = numeric_prefix(&value),
                        _ => {}
                    }
                }
                return Ok(size);
            }
            Ok(Event::Eof) => {
                return Err(RespimgError::SvgParse("no root element".to_string()));
            }
            Ok(_) => continue,
            Err(err) => return Err(RespimgError::SvgParse(err.to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RenderStatus {
    status: bool,
    #[serde(default)]
    message: Option<String>,
}

/// Find the renderer's status record among its stdout lines.
fn parse_status(stdout: &str) -> Option<RenderStatus> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .find_map(|line| serde_json::from_str::<RenderStatus>(line).ok())
}

enum RenderScript {
    Bundled(NamedTempFile),
    External(PathBuf),
}

impl RenderScript {
    fn path(&self) -> &Path {
        match self {
            RenderScript::Bundled(file) => file.path(),
            RenderScript::External(path) => path,
        }
    }
}

/// PhantomJS-protocol rasterizer.
pub struct PhantomRasterizer {
    program: PathBuf,
    script: RenderScript,
    timeout: Duration,
}

impl PhantomRasterizer {
    /// Use `program` with the given render script, or the bundled one
    /// (written to a temporary file that lives as long as the rasterizer).
    pub fn new(program: impl Into<PathBuf>, script: Option<PathBuf>, timeout: Duration) -> Result<Self> {
        let script = match script {
            Some(path) => RenderScript::External(path),
            None => {
                let mut file = tempfile::Builder::new()
                    .prefix("respimg-svg2png-")
                    .suffix(".js")
                    .tempfile()?;
                file.write_all(BUNDLED_SCRIPT.as_bytes())?;
                file.flush()?;
                RenderScript::Bundled(file)
            }
        };

        Ok(Self {
            program: program.into(),
            script,
            timeout,
        })
    }

    fn engine_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

#[async_trait]
impl VectorRasterizer for PhantomRasterizer {
    async fn rasterize(&self, src: &Path, dest: &Path, width: u32) -> Result<PathBuf> {
        let svg = tokio::fs::read_to_string(src).await?;
        let size = read_intrinsic_size(&svg)?;
        let height = size
            .height_for(width)
            .ok_or_else(|| RespimgError::ZeroIntrinsicWidth(src.to_path_buf()))?;
        let output = PathResolver::rasterized_path(dest);
        debug!(
            "Rasterizing {} ({}x{} intrinsic) at {}x{}",
            src.display(),
            size.width,
            size.height,
            width,
            height
        );

        let engine = self.engine_name();
        let mut command = Command::new(&self.program);
        command
            .arg(self.script.path())
            .arg(src)
            .arg(&output)
            .arg(width.to_string())
            .arg(height.to_string());

        let result = run_engine(&engine, command, None, self.timeout).await?;
        let stdout = String::from_utf8_lossy(&result.stdout);
        let status = parse_status(&stdout);

        if !result.status.success() {
            let message = status
                .and_then(|s| s.message)
                .unwrap_or_else(|| failure_message(&result));
            return Err(RespimgError::EngineFailed { engine, message });
        }

        match status {
            Some(RenderStatus { status: true, .. }) => {}
            Some(RenderStatus { message, .. }) => {
                return Err(RespimgError::EngineFailed {
                    engine,
                    message: message.unwrap_or_else(|| "renderer reported failure".to_string()),
                })
            }
            None => {
                return Err(RespimgError::MalformedStatus {
                    engine,
                    output: stdout.trim().to_string(),
                })
            }
        }

        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Err(RespimgError::EngineFailed {
                engine,
                message: format!("reported success but {} was not written", output.display()),
            });
        }

        info!(
            "Resized image: {} resized to {}px wide, saved to {}",
            src.display(),
            width,
            output.display()
        );
        Ok(output)
    }
}
