//! # Pipeline Orchestrator
//!
//! Orchestratore principale: esegue le fasi in sequenza stretta, ognuna
//! attesa completamente prima della successiva.
//!
//! ```text
//! Validate → OptimizeVectorInputs → OptimizeRasterInputs → Resize → OptimizeOutputs → Done
//! ```
//!
//! - Validazione o optimizer non trovato: errore fatale, nessuna fase successiva.
//! - Errori per singolo file: registrati e saltati, l'esecuzione continua.
//! - Resize: le width in ordine; i gruppi di una width in parallelo, limitati
//!   da un semaforo. L'orchestratore è l'unico collettore dei risultati.

use crate::config::{EngineSettings, FileGroup, FileGroupSpec, OptionSet};
use crate::error::{Result, RespimgError};
use crate::file_manager::FileManager;
use crate::json_output::{JsonConfig, JsonMessage};
use crate::lossless::{ImageOptim, LosslessOptimizer};
use crate::pipeline::path_resolver::PathResolver;
use crate::pipeline::progress_tracker::ProgressTracker;
use crate::platform::{MagickFlavor, PlatformCommands};
use crate::rasterizer::{PhantomRasterizer, VectorRasterizer};
use crate::resize::{ImageMagick, RasterTransformer, TransformOutcome};
use crate::svg_optimizer::{optimize_file, SvgOptimizer, VectorOptimizer};
use crate::validate::{validate_file_groups, validate_quality, validate_widths};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    OptimizeVectorInputs,
    OptimizeRasterInputs,
    Resize,
    OptimizeOutputs,
    Done,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::OptimizeVectorInputs => "optimize-vector-inputs",
            Stage::OptimizeRasterInputs => "optimize-raster-inputs",
            Stage::Resize => "resize",
            Stage::OptimizeOutputs => "optimize-outputs",
            Stage::Done => "done",
        }
    }
}

/// How one resize unit ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Produced(PathBuf),
    Skipped,
    Failed(String),
}

/// The external engines a run drives.
#[derive(Clone)]
pub struct Engines {
    pub rasterizer: Arc<dyn VectorRasterizer>,
    pub transformer: Arc<dyn RasterTransformer>,
    pub lossless: Arc<dyn LosslessOptimizer>,
    pub vector: Arc<dyn VectorOptimizer>,
}

impl Engines {
    /// Real engines from the engine settings; the vector optimizer uses the
    /// run's plugin list.
    pub fn from_settings(settings: &EngineSettings, options: &OptionSet) -> Result<Self> {
        let timeout = Duration::from_secs(settings.engine_timeout_secs);
        let platform = PlatformCommands::instance();

        let transformer = match settings
            .raster_processor
            .as_deref()
            .and_then(MagickFlavor::from_name)
        {
            Some(flavor) => ImageMagick::with_flavor(flavor, timeout),
            None => ImageMagick::detect(timeout),
        };

        let rasterizer_program = if Path::new(&settings.rasterizer).components().count() > 1 {
            PathBuf::from(&settings.rasterizer)
        } else {
            platform.tool_path_or_name(&settings.rasterizer)
        };
        let rasterizer = PhantomRasterizer::new(
            rasterizer_program,
            settings.rasterizer_script.clone(),
            timeout,
        )?;

        Ok(Self {
            rasterizer: Arc::new(rasterizer),
            transformer: Arc::new(transformer),
            lossless: Arc::new(ImageOptim::new(settings.optimizer_candidates.clone(), timeout)),
            vector: Arc::new(SvgOptimizer::from_plugins(&options.svgo_plugins)),
        })
    }
}

/// Run-level knobs that are not part of the option set.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub workers: usize,
    pub json_output: bool,
    pub show_progress: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            json_output: false,
            show_progress: false,
        }
    }
}

/// Bytes saved on one vector source.
#[derive(Debug, Clone, PartialEq)]
pub struct SavingsRecord {
    pub path: PathBuf,
    pub saved_bytes: u64,
    pub percent_saved: f64,
}

/// A per-file failure that did not stop the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub path: PathBuf,
    pub width: Option<u32>,
    pub message: String,
}

/// What a run did.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub target: String,
    /// Files produced per width, in width order
    pub tally: Vec<(u32, usize)>,
    /// Every raster file produced by the resize stage
    pub outputs: Vec<PathBuf>,
    pub svg_savings: Vec<SavingsRecord>,
    pub total_saved: u64,
    pub failures: Vec<UnitFailure>,
    /// Animated sources left alone, with the width they were skipped at
    pub skipped: Vec<(PathBuf, u32)>,
    pub rejected_widths: Vec<String>,
    /// Stages entered, in order
    pub stages: Vec<Stage>,
    pub duration: Duration,
}

impl RunReport {
    fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            ..Self::default()
        }
    }

    pub fn produced_for(&self, width: u32) -> Option<usize> {
        self.tally
            .iter()
            .find(|(w, _)| *w == width)
            .map(|(_, count)| *count)
    }

    pub fn files_produced(&self) -> usize {
        self.outputs.len()
    }

    pub fn format_summary(&self) -> String {
        format!(
            "Produced: {} files | Skipped: {} | Errors: {} | SVG saved: {}",
            self.files_produced(),
            self.skipped.len(),
            self.failures.len(),
            FileManager::format_size(self.total_saved)
        )
    }

    /// Stampa statistiche finali
    pub fn log_summary(&self) {
        info!("=== {} complete ===", self.target);
        for (width, count) in &self.tally {
            info!("w{}: {} file(s)", width, count);
        }
        if !self.rejected_widths.is_empty() {
            info!("Rejected widths: {}", self.rejected_widths.join(", "));
        }
        if !self.svg_savings.is_empty() {
            info!(
                "SVG optimization saved {} across {} file(s)",
                FileManager::format_size(self.total_saved),
                self.svg_savings.len()
            );
        }
        info!("Skipped (animated): {}", self.skipped.len());
        info!("Errors: {}", self.failures.len());
        info!("Duration: {:.2}s", self.duration.as_secs_f64());
    }
}

/// A validated group plus the file the resize stage should read.
#[derive(Debug, Clone)]
struct WorkItem {
    group: FileGroup,
    input: PathBuf,
    vector: bool,
}

/// One orchestrated run over a target's file groups.
pub struct Pipeline {
    target: String,
    options: Arc<OptionSet>,
    groups: Vec<FileGroupSpec>,
    engines: Engines,
    settings: RunSettings,
}

impl Pipeline {
    pub fn new(
        target: impl Into<String>,
        options: OptionSet,
        groups: Vec<FileGroupSpec>,
        engines: Engines,
        settings: RunSettings,
    ) -> Self {
        Self {
            target: target.into(),
            options: Arc::new(options),
            groups,
            engines,
            settings,
        }
    }

    fn enter(&self, report: &mut RunReport, tracker: &ProgressTracker, stage: Stage) {
        debug!("Entering stage {:?}", stage);
        report.stages.push(stage);
        tracker.enter_stage(stage);
    }

    /// Esegue l'intera pipeline
    pub async fn run(&self) -> Result<RunReport> {
        let start_time = Instant::now();
        let mut report = RunReport::new(&self.target);
        let mut tracker = ProgressTracker::new(0, self.settings.json_output, false);

        // Validate
        self.enter(&mut report, &tracker, Stage::Validate);
        validate_quality(self.options.quality)?;
        let widths = validate_widths(self.options.widths.as_deref())?;
        let groups = validate_file_groups(&self.groups)?;
        report.rejected_widths = widths.rejected.clone();

        let optimize = self.options.optimize;
        if optimize.raster_input || optimize.raster_output {
            self.engines.lossless.ensure_available().await?;
        }

        self.log_configuration(&widths.valid, groups.len());
        tracker = ProgressTracker::new(
            widths.valid.len() * groups.len(),
            self.settings.json_output,
            self.settings.show_progress,
        );

        let mut items: Vec<WorkItem> = groups
            .into_iter()
            .map(|group| WorkItem {
                input: group.source.clone(),
                vector: FileManager::is_vector(&group.source),
                group,
            })
            .collect();

        if optimize.svg {
            self.enter(&mut report, &tracker, Stage::OptimizeVectorInputs);
            self.optimize_vector_inputs(&mut items, &mut report, &tracker).await;
        }

        if optimize.raster_input {
            self.enter(&mut report, &tracker, Stage::OptimizeRasterInputs);
            self.optimize_raster_inputs(&mut items, &mut report, &tracker).await;
        }

        self.enter(&mut report, &tracker, Stage::Resize);
        for &width in &widths.valid {
            self.resize_width(&items, width, &mut report, &tracker).await;
        }

        if optimize.raster_output && !report.outputs.is_empty() {
            self.enter(&mut report, &tracker, Stage::OptimizeOutputs);
            let optimized = self.optimize_paths(&report.outputs).await;
            if let Err(e) = optimized {
                let message = e.to_string();
                for output in report.outputs.clone() {
                    tracker.file_failed(&output, &message);
                    report.failures.push(UnitFailure {
                        path: output,
                        width: None,
                        message: message.clone(),
                    });
                }
            }
        }

        self.enter(&mut report, &tracker, Stage::Done);
        report.duration = start_time.elapsed();
        tracker.finish(&report.format_summary());

        if self.settings.json_output {
            JsonMessage::Complete {
                target: report.target.clone(),
                files_produced: report.files_produced(),
                files_skipped: report.skipped.len(),
                errors: report.failures.len(),
                svg_bytes_saved: report.total_saved,
                duration_seconds: report.duration.as_secs_f64(),
            }
            .emit();
        } else {
            report.log_summary();
        }

        Ok(report)
    }

    /// Logga configurazione (solo se non JSON mode)
    fn log_configuration(&self, widths: &[u32], group_count: usize) {
        if self.settings.json_output {
            JsonMessage::Start {
                target: self.target.clone(),
                file_groups: group_count,
                widths: widths.to_vec(),
                config: JsonConfig::new(&self.options, self.settings.workers),
            }
            .emit();
            return;
        }

        let optimize = self.options.optimize;
        info!("Target: {}", self.target);
        info!("Found {} file group(s) to process", group_count);
        info!("Widths: {:?}", widths);
        info!("Quality: {}", self.options.quality);
        info!(
            "Optimize: svg={} raster-input={} raster-output={}",
            optimize.svg, optimize.raster_input, optimize.raster_output
        );
        info!("Workers: {}", self.settings.workers);
    }

    async fn optimize_vector_inputs(
        &self,
        items: &mut [WorkItem],
        report: &mut RunReport,
        tracker: &ProgressTracker,
    ) {
        for item in items.iter_mut().filter(|item| item.vector) {
            let source = &item.group.source;
            let destination = &item.group.destination;
            match optimize_file(self.engines.vector.as_ref(), source, destination).await {
                Ok(optimization) => {
                    info!(
                        "Optimized {}: saved {} ({:.2}%)",
                        source.display(),
                        FileManager::format_size(optimization.saved_bytes),
                        optimization.percent_saved
                    );
                    report.total_saved += optimization.saved_bytes;
                    report.svg_savings.push(SavingsRecord {
                        path: destination.clone(),
                        saved_bytes: optimization.saved_bytes,
                        percent_saved: optimization.percent_saved,
                    });
                    item.input = destination.clone();
                }
                Err(e) => {
                    tracker.file_failed(source, &e.to_string());
                    report.failures.push(UnitFailure {
                        path: source.clone(),
                        width: None,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    /// Copy raster sources into the destination tree and optimize the copies.
    async fn optimize_raster_inputs(
        &self,
        items: &mut [WorkItem],
        report: &mut RunReport,
        tracker: &ProgressTracker,
    ) {
        let mut copies: Vec<(usize, PathBuf)> = Vec::new();

        for (index, item) in items.iter().enumerate().filter(|(_, item)| !item.vector) {
            let source = &item.group.source;
            let copy = item.group.destination.clone();
            if !same_file(source, &copy).await {
                let copied = async {
                    PathResolver::ensure_parent_dirs(&copy).await?;
                    tokio::fs::copy(source, &copy).await?;
                    Ok::<(), RespimgError>(())
                }
                .await;
                if let Err(e) = copied {
                    tracker.file_failed(source, &e.to_string());
                    report.failures.push(UnitFailure {
                        path: source.clone(),
                        width: None,
                        message: e.to_string(),
                    });
                    continue;
                }
            }
            copies.push((index, copy));
        }

        if copies.is_empty() {
            return;
        }

        let paths: Vec<PathBuf> = copies.iter().map(|(_, path)| path.clone()).collect();
        match self.optimize_paths(&paths).await {
            Ok(()) => {
                for (index, copy) in copies {
                    items[index].input = copy;
                }
            }
            Err(e) => {
                let message = e.to_string();
                for (index, _) in copies {
                    let source = &items[index].group.source;
                    tracker.file_failed(source, &message);
                    report.failures.push(UnitFailure {
                        path: source.clone(),
                        width: None,
                        message: message.clone(),
                    });
                }
            }
        }
    }

    /// Files go to the optimizer in one batch; directories one at a time.
    async fn optimize_paths(&self, paths: &[PathBuf]) -> Result<()> {
        let mut files = Vec::new();
        let mut directories = Vec::new();
        for path in paths {
            let is_dir = tokio::fs::metadata(path)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            if is_dir {
                directories.push(path.clone());
            } else {
                files.push(path.clone());
            }
        }

        if !directories.is_empty() {
            self.engines.lossless.directories(&directories).await?;
        }
        if !files.is_empty() {
            self.engines.lossless.files(&files).await?;
        }
        Ok(())
    }

    /// Fan out every group at one width and collect the results.
    async fn resize_width(
        &self,
        items: &[WorkItem],
        width: u32,
        report: &mut RunReport,
        tracker: &ProgressTracker,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.settings.workers.max(1)));
        let mut tasks = Vec::with_capacity(items.len());

        for item in items {
            let semaphore = semaphore.clone();
            let engines = self.engines.clone();
            let options = self.options.clone();
            let item = item.clone();
            let source = item.group.source.clone();

            let task = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                resize_unit(&engines, &options, &item, width).await
            });
            tasks.push((source, task));
        }

        let mut produced = 0;
        let mut missing_engine_reported = false;
        let (sources, handles): (Vec<PathBuf>, Vec<_>) = tasks.into_iter().unzip();
        let results = join_all(handles).await;

        for (source, result) in sources.into_iter().zip(results) {
            let outcome = match result {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    if e.is_missing_engine() && !missing_engine_reported {
                        error!("{}", e);
                        missing_engine_reported = true;
                    }
                    UnitOutcome::Failed(e.to_string())
                }
                Err(join_error) => UnitOutcome::Failed(format!("resize task failed: {}", join_error)),
            };

            tracker.unit_complete(&source, width, &outcome);
            match outcome {
                UnitOutcome::Produced(path) => {
                    produced += 1;
                    report.outputs.push(path);
                }
                UnitOutcome::Skipped => report.skipped.push((source, width)),
                UnitOutcome::Failed(message) => report.failures.push(UnitFailure {
                    path: source,
                    width: Some(width),
                    message,
                }),
            }
        }

        tracker.width_complete(width, produced);
        report.tally.push((width, produced));
    }
}

/// Resize one group at one width.
async fn resize_unit(
    engines: &Engines,
    options: &OptionSet,
    item: &WorkItem,
    width: u32,
) -> Result<UnitOutcome> {
    let dest = PathResolver::resolve(&item.group.source, &item.group.destination, width).await?;

    if item.vector {
        let output = engines.rasterizer.rasterize(&item.input, &dest, width).await?;
        return Ok(UnitOutcome::Produced(output));
    }

    match engines
        .transformer
        .transform(&item.input, &dest, options, width)
        .await?
    {
        TransformOutcome::Written(path) => Ok(UnitOutcome::Produced(path)),
        TransformOutcome::Skipped => Ok(UnitOutcome::Skipped),
    }
}

async fn same_file(a: &Path, b: &Path) -> bool {
    match (tokio::fs::canonicalize(a).await, tokio::fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, Overrides};
    use crate::svg_optimizer::PluginSet;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    type CallLog = Arc<Mutex<Vec<String>>>;

    fn record(log: &CallLog, entry: String) {
        log.lock().unwrap().push(entry);
    }

    fn entries(log: &CallLog) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    struct FakeRasterizer {
        log: CallLog,
    }

    #[async_trait]
    impl VectorRasterizer for FakeRasterizer {
        async fn rasterize(&self, src: &Path, dest: &Path, width: u32) -> Result<PathBuf> {
            record(&self.log, format!("rasterize {} {}", src.display(), width));
            let output = PathResolver::rasterized_path(dest);
            tokio::fs::write(&output, b"png").await?;
            Ok(output)
        }
    }

    struct FakeTransformer {
        log: CallLog,
    }

    #[async_trait]
    impl RasterTransformer for FakeTransformer {
        async fn transform(
            &self,
            src: &Path,
            dest: &Path,
            options: &OptionSet,
            width: u32,
        ) -> Result<TransformOutcome> {
            let name = src.file_name().unwrap().to_string_lossy().to_string();
            record(
                &self.log,
                format!(
                    "transform {} {} alpha={:?}",
                    src.display(),
                    width,
                    options.alpha
                ),
            );
            if name.contains("anim") {
                return Ok(TransformOutcome::Skipped);
            }
            if name.contains("broken") {
                return Err(RespimgError::EngineFailed {
                    engine: "magick".into(),
                    message: "no decode delegate".into(),
                });
            }
            tokio::fs::write(dest, b"raster").await?;
            Ok(TransformOutcome::Written(dest.to_path_buf()))
        }
    }

    struct FakeLossless {
        log: CallLog,
        available: bool,
    }

    #[async_trait]
    impl LosslessOptimizer for FakeLossless {
        async fn ensure_available(&self) -> Result<()> {
            record(&self.log, "lossless lookup".to_string());
            if self.available {
                Ok(())
            } else {
                Err(RespimgError::OptimizerNotFound(vec![PathBuf::from("/nowhere/imageoptim")]))
            }
        }

        async fn files(&self, paths: &[PathBuf]) -> Result<()> {
            record(&self.log, format!("lossless files {}", paths.len()));
            Ok(())
        }

        async fn directories(&self, paths: &[PathBuf]) -> Result<()> {
            record(&self.log, format!("lossless directories {}", paths.len()));
            Ok(())
        }
    }

    fn fake_engines(log: &CallLog, lossless_available: bool) -> Engines {
        Engines {
            rasterizer: Arc::new(FakeRasterizer { log: log.clone() }),
            transformer: Arc::new(FakeTransformer { log: log.clone() }),
            lossless: Arc::new(FakeLossless {
                log: log.clone(),
                available: lossless_available,
            }),
            vector: Arc::new(SvgOptimizer::new(PluginSet::default())),
        }
    }

    fn options(value: Value) -> OptionSet {
        let overrides: Overrides = match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        };
        resolve(&[&overrides]).unwrap()
    }

    fn group(src: &Path, dest: &Path) -> FileGroupSpec {
        FileGroupSpec {
            src: Some(vec![src.to_path_buf()]),
            dest: dest.to_path_buf(),
            cwd: None,
        }
    }

    fn pipeline(options: OptionSet, groups: Vec<FileGroupSpec>, engines: Engines) -> Pipeline {
        Pipeline::new("test", options, groups, engines, RunSettings::default())
    }

    #[tokio::test]
    async fn test_raster_source_without_optimization() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("a.png");
        std::fs::write(&src, b"png").unwrap();
        let out = temp_dir.path().join("out");

        let log = CallLog::default();
        let options = options(json!({
            "widths": [320, 640],
            "optimize": { "svg": false, "rasterInput": false, "rasterOutput": false }
        }));
        let report = pipeline(options, vec![group(&src, &out.join("a.png"))], fake_engines(&log, true))
            .run()
            .await
            .unwrap();

        assert_eq!(
            report.outputs,
            vec![out.join("a-w320.png"), out.join("a-w640.png")]
        );
        assert!(out.join("a-w320.png").exists());
        assert!(out.join("a-w640.png").exists());
        assert_eq!(report.tally, vec![(320, 1), (640, 1)]);

        let calls = entries(&log);
        assert!(calls.iter().all(|call| !call.starts_with("lossless")));
        let transforms: Vec<&String> = calls.iter().filter(|c| c.starts_with("transform")).collect();
        assert_eq!(transforms.len(), 2);
        assert!(transforms
            .iter()
            .all(|call| call.ends_with("alpha=Some(\"Background\")")));
        assert_eq!(
            report.stages,
            vec![Stage::Validate, Stage::Resize, Stage::Done]
        );
    }

    #[tokio::test]
    async fn test_vector_source_is_optimized_then_rasterized() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("b.svg");
        std::fs::write(
            &src,
            "<?xml version=\"1.0\"?>\n<svg width=\"100\" height=\"50\">\n  <title>b</title>\n  <rect/>\n</svg>\n",
        )
        .unwrap();
        let out = temp_dir.path().join("out");

        let log = CallLog::default();
        let options = options(json!({ "widths": [320], "optimize": { "svg": true } }));
        let report = pipeline(options, vec![group(&src, &out.join("b.svg"))], fake_engines(&log, true))
            .run()
            .await
            .unwrap();

        assert_eq!(report.svg_savings.len(), 1);
        assert!(report.total_saved > 0);
        assert_eq!(
            std::fs::read_to_string(out.join("b.svg")).unwrap(),
            "<svg width=\"100\" height=\"50\"><rect/></svg>"
        );
        assert_eq!(report.outputs, vec![out.join("b-w320.png")]);
        assert_eq!(report.tally, vec![(320, 1)]);

        assert_eq!(
            entries(&log),
            vec![
                "lossless lookup".to_string(),
                format!("rasterize {} 320", out.join("b.svg").display()),
                "lossless files 1".to_string(),
            ]
        );
        assert_eq!(
            report.stages,
            vec![
                Stage::Validate,
                Stage::OptimizeVectorInputs,
                Stage::OptimizeRasterInputs,
                Stage::Resize,
                Stage::OptimizeOutputs,
                Stage::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_resize_reads_optimized_raster_copy() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("in/a.jpg");
        std::fs::create_dir_all(src.parent().unwrap()).unwrap();
        std::fs::write(&src, b"jpeg").unwrap();
        let dest = temp_dir.path().join("out/a.jpg");

        let log = CallLog::default();
        let options = options(json!({ "widths": [320, 640] }));
        let report = pipeline(options, vec![group(&src, &dest)], fake_engines(&log, true))
            .run()
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"jpeg");
        assert_eq!(
            entries(&log),
            vec![
                "lossless lookup".to_string(),
                "lossless files 1".to_string(),
                format!("transform {} 320 alpha=None", dest.display()),
                format!("transform {} 640 alpha=None", dest.display()),
                "lossless files 2".to_string(),
            ]
        );
        assert_eq!(report.files_produced(), 2);
    }

    #[tokio::test]
    async fn test_animated_source_is_skipped_without_error() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("anim.gif");
        std::fs::write(&src, b"gif").unwrap();
        let out = temp_dir.path().join("out");

        let log = CallLog::default();
        let options = options(json!({
            "widths": [320],
            "optimize": { "svg": false, "rasterInput": false, "rasterOutput": false }
        }));
        let report = pipeline(options, vec![group(&src, &out.join("anim.gif"))], fake_engines(&log, true))
            .run()
            .await
            .unwrap();

        assert!(report.outputs.is_empty());
        assert!(report.failures.is_empty());
        assert_eq!(report.skipped, vec![(src.clone(), 320)]);
        assert_eq!(report.tally, vec![(320, 0)]);
        assert!(!out.join("anim-w320.gif").exists());
    }

    #[tokio::test]
    async fn test_unit_failure_does_not_stop_the_run() {
        let temp_dir = TempDir::new().unwrap();
        let broken = temp_dir.path().join("broken.png");
        let good = temp_dir.path().join("good.png");
        std::fs::write(&broken, b"?").unwrap();
        std::fs::write(&good, b"png").unwrap();
        let out = temp_dir.path().join("out");

        let log = CallLog::default();
        let options = options(json!({
            "widths": [100],
            "optimize": { "svg": false, "rasterInput": false, "rasterOutput": false }
        }));
        let groups = vec![
            group(&broken, &out.join("broken.png")),
            group(&good, &out.join("good.png")),
        ];
        let report = assert_ok!(pipeline(options, groups, fake_engines(&log, true)).run().await);

        assert_eq!(report.outputs, vec![out.join("good-w100.png")]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, broken);
        assert_eq!(report.failures[0].width, Some(100));
        assert!(report.failures[0].message.contains("no decode delegate"));
        assert_eq!(report.produced_for(100), Some(1));
    }

    #[tokio::test]
    async fn test_missing_optimizer_is_fatal_before_processing() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("a.png");
        std::fs::write(&src, b"png").unwrap();

        let log = CallLog::default();
        let options = options(json!({ "widths": [320] }));
        let err = assert_err!(
            pipeline(
                options,
                vec![group(&src, &temp_dir.path().join("out/a.png"))],
                fake_engines(&log, false),
            )
            .run()
            .await
        );

        assert!(err.is_fatal());
        assert_eq!(entries(&log), vec!["lossless lookup".to_string()]);
        assert!(!temp_dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_validation_failures_are_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("a.png");
        let groups = vec![group(&src, &temp_dir.path().join("out/a.png"))];
        let log = CallLog::default();

        let err = pipeline(options(json!({ "quality": 0 })), groups.clone(), fake_engines(&log, true))
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, RespimgError::InvalidQuality(0)));

        let err = pipeline(options(json!({ "widths": [] })), groups.clone(), fake_engines(&log, true))
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, RespimgError::NoWidths));

        let err = pipeline(options(json!({})), Vec::new(), fake_engines(&log, true))
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, RespimgError::NoFileGroups));

        assert!(entries(&log).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_width_only_skips_that_width() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("a.png");
        std::fs::write(&src, b"png").unwrap();
        let out = temp_dir.path().join("out");

        let log = CallLog::default();
        let options = options(json!({
            "widths": ["12.5", 320, "640", -3],
            "optimize": { "svg": false, "rasterInput": false, "rasterOutput": false }
        }));
        let report = pipeline(options, vec![group(&src, &out.join("a.png"))], fake_engines(&log, true))
            .run()
            .await
            .unwrap();

        assert_eq!(report.tally, vec![(320, 1), (640, 1)]);
        assert_eq!(report.rejected_widths, vec!["12.5".to_string(), "-3".to_string()]);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let raster = temp_dir.path().join("a.png");
        let vector = temp_dir.path().join("b.svg");
        std::fs::write(&raster, b"png").unwrap();
        std::fs::write(&vector, "<svg width=\"10\" height=\"10\"><rect/></svg>").unwrap();
        let out = temp_dir.path().join("out");
        let groups = vec![
            group(&raster, &out.join("a.png")),
            group(&vector, &out.join("b.svg")),
        ];

        let log = CallLog::default();
        let options = options(json!({ "widths": [320, 640] }));
        let first = pipeline(options.clone(), groups.clone(), fake_engines(&log, true))
            .run()
            .await
            .unwrap();
        let second = pipeline(options, groups, fake_engines(&log, true))
            .run()
            .await
            .unwrap();

        assert_eq!(first.outputs, second.outputs);
        assert_eq!(first.tally, second.tally);
        assert_eq!(first.tally, vec![(320, 2), (640, 2)]);
    }

    #[tokio::test]
    async fn test_output_paths_follow_naming_rule() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("photo.jpg");
        let logo = temp_dir.path().join("logo.svg");
        std::fs::write(&src, b"jpeg").unwrap();
        std::fs::write(&logo, "<svg width=\"4\" height=\"3\"/>").unwrap();
        let out = temp_dir.path().join("dist/img");

        let log = CallLog::default();
        let options = options(json!({
            "widths": [480],
            "optimize": { "svg": false, "rasterInput": false, "rasterOutput": false }
        }));
        let settings = RunSettings {
            workers: 1,
            ..RunSettings::default()
        };
        let report = Pipeline::new(
            "naming",
            options,
            vec![group(&src, &out.join("photo.jpg")), group(&logo, &out.join("logo.svg"))],
            fake_engines(&log, true),
            settings,
        )
        .run()
        .await
        .unwrap();

        assert_eq!(
            report.outputs,
            vec![out.join("photo-w480.jpg"), out.join("logo-w480.png")]
        );
        // the rasterizer reads the untouched source when svg optimization is off
        assert!(entries(&log).contains(&format!("rasterize {} 480", logo.display())));
    }
}
