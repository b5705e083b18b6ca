//! # respimg - Main Entry Point
//!
//! Punto di ingresso della CLI.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti con `clap`
//! - Inizializzazione del logging con `tracing` (su stderr, stdout resta per il JSON)
//! - Costruzione delle opzioni di invocazione e avvio della pipeline per ogni target
//!
//! ## Modalità:
//! ```bash
//! respimg --config respimg.json --target site
//! respimg --input img --output dist/img --widths 320,640 --quality 80 --no-optimize-output
//! respimg --check-tools
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use respimg::config::OptimizeFlags;
use respimg::file_manager::FileManager;
use respimg::json_output::JsonMessage;
use respimg::platform::PlatformCommands;
use respimg::{
    resolve, EngineSettings, Engines, FileGroupSpec, OptionSet, Overrides, Pipeline, RunConfig,
    RunSettings,
};

#[derive(Parser)]
#[command(name = "respimg")]
#[command(about = "Generate responsive width variants of raster and vector images")]
struct Args {
    /// Configuration file with shared options, targets and engine settings
    #[arg(short, long, conflicts_with = "input")]
    config: Option<PathBuf>,

    /// Run only this target (all targets when omitted)
    #[arg(short, long, requires = "config")]
    target: Option<String>,

    /// Directory of source images (directory mode)
    #[arg(short, long, requires = "output")]
    input: Option<PathBuf>,

    /// Destination directory for directory mode
    #[arg(short, long, requires = "input")]
    output: Option<PathBuf>,

    /// Output widths, comma separated
    #[arg(long, value_delimiter = ',')]
    widths: Option<Vec<String>>,

    /// Output quality (1-100)
    #[arg(short, long)]
    quality: Option<i64>,

    /// Skip in-process SVG optimization
    #[arg(long)]
    no_optimize_svg: bool,

    /// Skip lossless optimization of raster sources
    #[arg(long)]
    no_optimize_input: bool,

    /// Skip lossless optimization of produced files
    #[arg(long)]
    no_optimize_output: bool,

    /// Number of concurrent resize units
    #[arg(short, long)]
    workers: Option<usize>,

    /// Emit newline-delimited JSON events on stdout
    #[arg(long)]
    json: bool,

    /// Print the external tools report and exit
    #[arg(long)]
    check_tools: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Invocation-level overrides. The optimize gates start from `base` so a
    /// single `--no-optimize-*` flag does not re-enable the others.
    fn overrides(&self, base: OptimizeFlags) -> Overrides {
        let mut overrides = Overrides::new();
        if let Some(ref widths) = self.widths {
            let widths: Vec<Value> = widths.iter().map(|w| Value::String(w.trim().to_string())).collect();
            overrides.insert("widths".into(), Value::Array(widths));
        }
        if let Some(quality) = self.quality {
            overrides.insert("quality".into(), json!(quality));
        }
        if self.no_optimize_svg || self.no_optimize_input || self.no_optimize_output {
            overrides.insert(
                "optimize".into(),
                json!({
                    "svg": base.svg && !self.no_optimize_svg,
                    "rasterInput": base.raster_input && !self.no_optimize_input,
                    "rasterOutput": base.raster_output && !self.no_optimize_output,
                }),
            );
        }
        overrides
    }

    fn run_settings(&self, engines: &EngineSettings) -> RunSettings {
        RunSettings {
            workers: engines.workers,
            json_output: self.json,
            show_progress: !self.json && !self.verbose,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if args.check_tools {
        let platform = PlatformCommands::instance();
        println!("{}", PlatformCommands::system_info());
        println!("{}", platform.get_tools_report());
        return Ok(());
    }

    if let Err(e) = run(&args).await {
        if args.json {
            JsonMessage::error(e.to_string(), e.chain().nth(1).map(|s| s.to_string())).emit();
        } else {
            error!("{:#}", e);
        }
        std::process::exit(1);
    }

    Ok(())
}

async fn run(args: &Args) -> Result<()> {
    match (&args.config, &args.input, &args.output) {
        (Some(config_path), _, _) => run_config(args, config_path).await,
        (None, Some(input), Some(output)) => run_directory(args, input, output).await,
        _ => Err(anyhow::anyhow!(
            "Nothing to do: pass --config FILE or --input DIR --output DIR"
        )),
    }
}

async fn run_config(args: &Args, config_path: &Path) -> Result<()> {
    let config = RunConfig::from_file(config_path)
        .await
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let mut engine_settings = config.engines.clone();
    if let Some(workers) = args.workers {
        engine_settings.workers = workers;
        engine_settings.validate()?;
    }

    let targets = config.select_targets(args.target.as_deref())?;
    if targets.is_empty() {
        return Err(anyhow::anyhow!("No targets defined in {}", config_path.display()));
    }

    for (name, target) in targets {
        let base = config.options_for(target, &Overrides::new())?.optimize;
        let options = config.options_for(target, &args.overrides(base))?;
        run_target(args, name, options, target.files.clone(), &engine_settings).await?;
    }
    Ok(())
}

async fn run_directory(args: &Args, input: &Path, output: &Path) -> Result<()> {
    if !input.is_dir() {
        return Err(anyhow::anyhow!("Input directory does not exist: {}", input.display()));
    }

    let mut engine_settings = EngineSettings::default();
    if let Some(workers) = args.workers {
        engine_settings.workers = workers;
    }
    engine_settings.validate()?;

    let groups = FileManager::groups_for_directory(input, output);
    info!("Found {} image(s) in {}", groups.len(), input.display());

    let options = resolve(&[&args.overrides(OptimizeFlags::default())])?;
    run_target(args, "directory", options, groups, &engine_settings).await
}

async fn run_target(
    args: &Args,
    name: &str,
    options: OptionSet,
    groups: Vec<FileGroupSpec>,
    engine_settings: &EngineSettings,
) -> Result<()> {
    let engines = Engines::from_settings(engine_settings, &options)?;
    let pipeline = Pipeline::new(name, options, groups, engines, args.run_settings(engine_settings));
    pipeline
        .run()
        .await
        .with_context(|| format!("Target `{}` failed", name))?;
    Ok(())
}
