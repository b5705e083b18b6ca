//! # Image Resize Module
//!
//! Questo modulo ridimensiona i sorgenti raster a una larghezza fissa tramite
//! **ImageMagick** esterno.
//!
//! ## Tool Strategy
//! **Priorità Tool (decrescente):**
//! 1. **magick** (ImageMagick 7.x) - `magick identify` per l'ispezione
//! 2. **convert** (ImageMagick 6.x/legacy) - `identify` separato
//!
//! ## Ordine argomenti
//! `src` → filter → filter-support → resize-function + width → unsharp →
//! dither → posterize → background → alpha → quality → `-define` PNG/JPEG →
//! interlace → colorspace → strip → `dest` (sempre ultimo).
//!
//! Ogni opzione nulla non contribuisce nulla: è così che il profilo
//! "no-optimization" cambia il comportamento, popolando campi altrimenti
//! assenti.
//!
//! ## GIF animate
//! Un sorgente GIF con delay e più di una scena viene saltato: nessun output,
//! nessun errore.

use crate::config::{OptionSet, Unsharp};
use crate::error::{Result, RespimgError};
use crate::platform::{MagickFlavor, PlatformCommands};
use crate::utils::{failure_message, run_engine, to_string_vec};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// What a transform did for one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutcome {
    /// A raster file was written at this path
    Written(PathBuf),
    /// The source is animated and was left alone
    Skipped,
}

/// Resizes a raster source to a target width.
#[async_trait]
pub trait RasterTransformer: Send + Sync {
    async fn transform(
        &self,
        src: &Path,
        dest: &Path,
        options: &OptionSet,
        width: u32,
    ) -> Result<TransformOutcome>;
}

/// Properties reported by `identify` for the first frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub format: String,
    pub delay: u32,
    pub scenes: u32,
}

impl SourceInfo {
    /// GIF87 cannot be animated; a GIF with a frame delay and more than one
    /// scene is.
    pub fn is_animated(&self) -> bool {
        self.format.eq_ignore_ascii_case("GIF") && self.delay > 0 && self.scenes > 1
    }
}

/// Format string passed to `identify`: magick format, delay, scene count.
pub const IDENTIFY_FORMAT: &str = "%m %T %n\n";

/// Parse the first line of `identify -format "%m %T %n\n"` output.
pub fn parse_identify(output: &str) -> Option<SourceInfo> {
    let line = output.lines().map(str::trim).find(|line| !line.is_empty())?;
    let mut fields = line.split_whitespace();
    let format = fields.next()?.to_string();
    let delay = fields.next()?.parse().ok()?;
    let scenes = fields.next()?.parse().ok()?;
    Some(SourceInfo {
        format,
        delay,
        scenes,
    })
}

fn unsharp_geometry(unsharp: &Unsharp) -> Option<String> {
    let radius = unsharp.radius?;
    let mut geometry = radius.to_string();
    if let Some(sigma) = unsharp.sigma {
        geometry.push_str(&format!("x{}", sigma));
        if let Some(gain) = unsharp.gain {
            geometry.push_str(&format!("+{}", gain));
            if let Some(threshold) = unsharp.threshold {
                geometry.push_str(&format!("+{}", threshold));
            }
        }
    }
    Some(geometry)
}

/// Build the full transform argument list. The destination is always last.
pub fn build_transform_args(src: &Path, dest: &Path, options: &OptionSet, width: u32) -> Vec<String> {
    let mut args = vec![src.display().to_string()];

    if let Some(ref filter) = options.filter {
        args.extend(to_string_vec(["-filter", filter.as_str()]));
    }
    if let Some(support) = options.filter_support {
        args.extend(to_string_vec(["-define".to_string(), format!("filter:support={}", support)]));
    }

    let resize_function = options.resize_function.as_deref().unwrap_or("resize");
    args.extend(to_string_vec([format!("-{}", resize_function), width.to_string()]));

    if let Some(geometry) = options.unsharp.as_ref().and_then(unsharp_geometry) {
        args.extend(to_string_vec(["-unsharp".to_string(), geometry]));
    }

    match options.dither.as_deref() {
        Some("plus") => args.push("+dither".to_string()),
        Some(dither) => args.extend(to_string_vec(["-dither", dither])),
        None => {}
    }
    if let Some(posterize) = options.posterize {
        args.extend(crate::args!["-posterize", posterize]);
    }
    if let Some(ref background) = options.background {
        args.extend(to_string_vec(["-background", background.as_str()]));
    }
    if let Some(ref alpha) = options.alpha {
        args.extend(to_string_vec(["-alpha", alpha.as_str()]));
    }
    args.extend(crate::args!["-quality", options.quality]);

    let defines = [
        options
            .png_preserve_colormap
            .map(|v| format!("png:preserve-colormap={}", v)),
        options
            .jpeg_fancy_upsampling
            .as_ref()
            .map(|v| format!("jpeg:fancy-upsampling={}", v)),
        options
            .png_compression_filter
            .map(|v| format!("png:compression-filter={}", v)),
        options
            .png_compression_level
            .map(|v| format!("png:compression-level={}", v)),
        options
            .png_compression_strategy
            .map(|v| format!("png:compression-strategy={}", v)),
        options
            .png_exclude_chunk
            .as_ref()
            .map(|v| format!("png:exclude-chunk={}", v)),
    ];
    for define in defines.into_iter().flatten() {
        args.extend(to_string_vec(["-define".to_string(), define]));
    }

    if let Some(ref interlace) = options.interlace {
        args.extend(to_string_vec(["-interlace", interlace.as_str()]));
    }
    if let Some(ref colorspace) = options.colorspace {
        args.extend(to_string_vec(["-colorspace", colorspace.as_str()]));
    }
    if options.strip == Some(true) {
        args.push("-strip".to_string());
    }

    args.push(dest.display().to_string());
    args
}

/// A program plus the arguments that always precede the per-call ones.
#[derive(Debug, Clone)]
struct EngineProgram {
    program: PathBuf,
    leading_args: Vec<String>,
}

impl EngineProgram {
    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.leading_args);
        command
    }

    fn name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

/// ImageMagick-backed raster transform engine
pub struct ImageMagick {
    transform: EngineProgram,
    identify: EngineProgram,
    timeout: Duration,
}

impl ImageMagick {
    /// Use whichever ImageMagick generation is installed.
    pub fn detect(timeout: Duration) -> Self {
        Self::with_flavor(PlatformCommands::instance().detect_magick(), timeout)
    }

    pub fn with_flavor(flavor: MagickFlavor, timeout: Duration) -> Self {
        let platform = PlatformCommands::instance();
        let (identify_tool, identify_args) = flavor.identify_tool();
        info!("Raster processor: {}", flavor.transform_tool());

        Self {
            transform: EngineProgram {
                program: platform.tool_path_or_name(flavor.transform_tool()),
                leading_args: Vec::new(),
            },
            identify: EngineProgram {
                program: platform.tool_path_or_name(identify_tool),
                leading_args: to_string_vec(identify_args.iter()),
            },
            timeout,
        }
    }

    /// Explicit programs, each with leading arguments.
    pub fn with_programs(
        transform: (PathBuf, Vec<String>),
        identify: (PathBuf, Vec<String>),
        timeout: Duration,
    ) -> Self {
        Self {
            transform: EngineProgram {
                program: transform.0,
                leading_args: transform.1,
            },
            identify: EngineProgram {
                program: identify.0,
                leading_args: identify.1,
            },
            timeout,
        }
    }

    /// Inspect the source's format, frame delay and scene count.
    pub async fn identify(&self, src: &Path) -> Result<SourceInfo> {
        let engine = self.identify.name();
        let mut command = self.identify.command();
        command.arg("-format").arg(IDENTIFY_FORMAT).arg(src);

        let output = run_engine(&engine, command, None, self.timeout).await?;
        if !output.status.success() {
            return Err(RespimgError::EngineFailed {
                engine,
                message: failure_message(&output),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_identify(&stdout).ok_or_else(|| RespimgError::MalformedStatus {
            engine,
            output: stdout.trim().to_string(),
        })
    }
}

#[async_trait]
impl RasterTransformer for ImageMagick {
    async fn transform(
        &self,
        src: &Path,
        dest: &Path,
        options: &OptionSet,
        width: u32,
    ) -> Result<TransformOutcome> {
        let info = self.identify(src).await?;
        if info.is_animated() {
            warn!("{} is animated - skipping", dest.display());
            return Ok(TransformOutcome::Skipped);
        }

        let args = build_transform_args(src, dest, options, width);
        let engine = self.transform.name();
        let mut command = self.transform.command();
        command.args(&args);
        debug!("Command: {} {:?}", engine, args);

        let output = run_engine(&engine, command, None, self.timeout).await?;
        if !output.status.success() {
            return Err(RespimgError::EngineFailed {
                engine,
                message: failure_message(&output),
            });
        }

        info!(
            "Resized image: {} resized to {}px wide, saved to {}",
            src.display(),
            width,
            dest.display()
        );
        Ok(TransformOutcome::Written(dest.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, Overrides};
    use serde_json::{json, Value};

    fn overrides(value: Value) -> Overrides {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    fn args_for(options: &OptionSet) -> Vec<String> {
        build_transform_args(Path::new("in/a.png"), Path::new("out/a-w320.png"), options, 320)
    }

    #[test]
    fn test_default_argument_order() {
        let options = resolve(&[]).unwrap();
        assert_eq!(
            args_for(&options),
            vec![
                "in/a.png",
                "-filter",
                "Triangle",
                "-define",
                "filter:support=2",
                "-thumbnail",
                "320",
                "-unsharp",
                "0.25x0.08+8.3+0.045",
                "-quality",
                "82",
                "-define",
                "jpeg:fancy-upsampling=off",
                "-strip",
                "out/a-w320.png",
            ]
        );
    }

    #[test]
    fn test_no_optimization_profile_arguments() {
        let task = overrides(json!({ "optimize": { "rasterOutput": false } }));
        let options = resolve(&[&task]).unwrap();
        let args = args_for(&options);

        let expected_tail = vec![
            "-dither",
            "None",
            "-posterize",
            "136",
            "-background",
            "Black",
            "-alpha",
            "Background",
            "-quality",
            "82",
            "-define",
            "jpeg:fancy-upsampling=off",
            "-define",
            "png:compression-filter=5",
            "-define",
            "png:compression-level=9",
            "-define",
            "png:compression-strategy=1",
            "-define",
            "png:exclude-chunk=all",
            "-interlace",
            "None",
            "-colorspace",
            "sRGB",
            "-strip",
            "out/a-w320.png",
        ];
        assert_eq!(args[9..].to_vec(), expected_tail);
    }

    #[test]
    fn test_unsharp_is_cumulative() {
        let cases = [
            (json!({ "radius": 1.5 }), Some("1.5")),
            (json!({ "radius": 1.5, "sigma": 1 }), Some("1.5x1")),
            (json!({ "radius": 1.5, "sigma": 1, "gain": 0.7 }), Some("1.5x1+0.7")),
            (
                json!({ "radius": 1.5, "sigma": 1, "gain": 0.7, "threshold": 0.02 }),
                Some("1.5x1+0.7+0.02"),
            ),
            // later components without earlier ones do not apply
            (json!({ "radius": 1.5, "gain": 0.7, "threshold": 0.02 }), Some("1.5")),
            (json!({ "sigma": 1, "gain": 0.7 }), None),
        ];

        for (unsharp, expected) in cases {
            let unsharp: Unsharp = serde_json::from_value(unsharp).unwrap();
            assert_eq!(unsharp_geometry(&unsharp).as_deref(), expected);
        }
    }

    #[test]
    fn test_plus_dither_and_null_fields() {
        let task = overrides(json!({
            "dither": "plus",
            "unsharp": null,
            "filter": null,
            "filterSupport": null,
            "resizeFunction": "resize",
            "strip": false,
            "jpegFancyUpsampling": null,
            "pngPreserveColormap": true
        }));
        let options = resolve(&[&task]).unwrap();
        assert_eq!(
            args_for(&options),
            vec![
                "in/a.png",
                "-resize",
                "320",
                "+dither",
                "-quality",
                "82",
                "-define",
                "png:preserve-colormap=true",
                "out/a-w320.png",
            ]
        );
    }

    #[test]
    fn test_identify_parsing() {
        let info = parse_identify("GIF 10 3\nGIF 10 3\nGIF 10 3\n").unwrap();
        assert!(info.is_animated());

        assert!(!parse_identify("GIF 0 1\n").unwrap().is_animated());
        assert!(!parse_identify("GIF 10 1\n").unwrap().is_animated());
        assert!(!parse_identify("PNG 0 1\n").unwrap().is_animated());
        assert!(parse_identify("garbage").is_none());
        assert!(parse_identify("").is_none());
    }

    #[cfg(unix)]
    mod protocol {
        use super::*;
        use tempfile::TempDir;

        fn sh(script: &str) -> (PathBuf, Vec<String>) {
            (
                PathBuf::from("sh"),
                vec!["-c".to_string(), script.to_string(), "sh".to_string()],
            )
        }

        #[tokio::test]
        async fn test_transform_writes_destination() {
            let temp_dir = TempDir::new().unwrap();
            let log = temp_dir.path().join("args.txt");
            let dest = temp_dir.path().join("a-w320.png");

            let engine = ImageMagick::with_programs(
                sh(&format!(
                    "echo \"$@\" > {}; for last in \"$@\"; do :; done; touch \"$last\"",
                    log.display()
                )),
                sh("echo 'PNG 0 1'"),
                Duration::from_secs(10),
            );

            let options = resolve(&[]).unwrap();
            let outcome = engine
                .transform(Path::new("in/a.png"), &dest, &options, 320)
                .await
                .unwrap();
            assert_eq!(outcome, TransformOutcome::Written(dest.clone()));
            assert!(dest.exists());

            let logged = std::fs::read_to_string(&log).unwrap();
            assert!(logged.starts_with("in/a.png -filter Triangle"));
            assert!(logged.trim_end().ends_with(&dest.display().to_string()));
        }

        #[tokio::test]
        async fn test_animated_gif_is_skipped() {
            let temp_dir = TempDir::new().unwrap();
            let marker = temp_dir.path().join("transformed");

            let engine = ImageMagick::with_programs(
                sh(&format!("touch {}", marker.display())),
                sh("printf 'GIF 10 3\\nGIF 10 3\\nGIF 10 3\\n'"),
                Duration::from_secs(10),
            );

            let options = resolve(&[]).unwrap();
            let outcome = engine
                .transform(
                    Path::new("anim.gif"),
                    &temp_dir.path().join("anim-w320.gif"),
                    &options,
                    320,
                )
                .await
                .unwrap();
            assert_eq!(outcome, TransformOutcome::Skipped);
            assert!(!marker.exists());
        }

        #[tokio::test]
        async fn test_engine_failure_carries_stderr() {
            let engine = ImageMagick::with_programs(
                sh("echo 'convert: no decode delegate' >&2; exit 1"),
                sh("echo 'PNG 0 1'"),
                Duration::from_secs(10),
            );

            let options = resolve(&[]).unwrap();
            let err = engine
                .transform(Path::new("a.png"), Path::new("a-w320.png"), &options, 320)
                .await
                .unwrap_err();
            match err {
                RespimgError::EngineFailed { message, .. } => {
                    assert_eq!(message, "convert: no decode delegate")
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[tokio::test]
    async fn test_missing_processor_is_flagged() {
        let engine = ImageMagick::with_programs(
            (PathBuf::from("respimg-no-such-magick"), Vec::new()),
            (PathBuf::from("respimg-no-such-identify"), Vec::new()),
            Duration::from_secs(5),
        );
        let options = resolve(&[]).unwrap();
        let err = engine
            .transform(Path::new("a.png"), Path::new("a-w320.png"), &options, 320)
            .await
            .unwrap_err();
        assert!(err.is_missing_engine());
    }
}
