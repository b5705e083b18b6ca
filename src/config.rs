//! # Configuration Management Module
//!
//! Questo modulo gestisce tutta la configurazione dell'applicazione.
//!
//! ## Responsabilità:
//! - Definisce `OptionSet`, l'insieme di opzioni risolto e immutabile per una esecuzione
//! - Risolve le opzioni a livelli: default < opzioni condivise < target < invocazione
//! - Sostituisce il profilo "no-optimization" quando `optimize.rasterOutput` è false
//! - Carica il file di configurazione JSON (opzioni, target, gruppi di file, engine)
//!
//! ## Precedenza:
//! Ogni livello sovrascrive il precedente chiave per chiave, in modo shallow:
//! un oggetto `unsharp` o `optimize` fornito dall'utente sostituisce per intero
//! quello di default. Le chiavi sconosciute vengono preservate.
//!
//! ## Esempio file:
//! ```json
//! {
//!   "options": { "quality": 82 },
//!   "targets": {
//!     "site": {
//!       "options": { "widths": [320, 640] },
//!       "files": [ { "src": ["img/a.png"], "dest": "out/a.png" } ]
//!     }
//!   }
//! }
//! ```

use crate::error::{Result, RespimgError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A flat JSON object of option overrides.
pub type Overrides = Map<String, Value>;

/// Fully resolved options for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionSet {
    /// Output quality (1-100). Kept signed so out-of-range input reaches validation.
    pub quality: i64,
    /// Output widths as given by the user, validated per entry.
    #[serde(default)]
    pub widths: Option<Vec<Value>>,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub filter_support: Option<f64>,
    #[serde(default)]
    pub resize_function: Option<String>,
    #[serde(default)]
    pub unsharp: Option<Unsharp>,
    #[serde(default)]
    pub dither: Option<String>,
    #[serde(default)]
    pub posterize: Option<u32>,
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub alpha: Option<String>,
    #[serde(default)]
    pub colorspace: Option<String>,
    #[serde(default)]
    pub interlace: Option<String>,
    #[serde(default)]
    pub png_compression_filter: Option<u32>,
    #[serde(default)]
    pub png_compression_level: Option<u32>,
    #[serde(default)]
    pub png_compression_strategy: Option<u32>,
    #[serde(default)]
    pub png_exclude_chunk: Option<String>,
    #[serde(default)]
    pub png_preserve_colormap: Option<bool>,
    #[serde(default)]
    pub jpeg_fancy_upsampling: Option<String>,
    #[serde(default)]
    pub strip: Option<bool>,
    #[serde(default)]
    pub optimize: OptimizeFlags,
    #[serde(default)]
    pub svgo_plugins: Vec<PluginToggle>,
    /// Keys this crate does not know about, passed through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Unsharp mask parameters. Presence is cumulative: `sigma` only counts
/// when `radius` is set, `gain` when `sigma` is, and so on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Unsharp {
    #[serde(default)]
    pub radius: Option<f64>,
    #[serde(default)]
    pub sigma: Option<f64>,
    #[serde(default)]
    pub gain: Option<f64>,
    #[serde(default)]
    pub threshold: Option<f64>,
}

/// Gates for the three optimization stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeFlags {
    #[serde(default = "enabled")]
    pub svg: bool,
    #[serde(default = "enabled")]
    pub raster_input: bool,
    #[serde(default = "enabled")]
    pub raster_output: bool,
}

fn enabled() -> bool {
    true
}

impl Default for OptimizeFlags {
    fn default() -> Self {
        Self {
            svg: true,
            raster_input: true,
            raster_output: true,
        }
    }
}

/// One `{ "pluginName": enabled }` entry of the vector optimizer plugin list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, bool>", into = "BTreeMap<String, bool>")]
pub struct PluginToggle {
    pub name: String,
    pub enabled: bool,
}

impl PluginToggle {
    pub fn new(name: impl Into<String>, enabled: bool) -> Self {
        Self {
            name: name.into(),
            enabled,
        }
    }
}

impl TryFrom<BTreeMap<String, bool>> for PluginToggle {
    type Error = String;

    fn try_from(map: BTreeMap<String, bool>) -> std::result::Result<Self, Self::Error> {
        let mut entries = map.into_iter();
        match (entries.next(), entries.next()) {
            (Some((name, enabled)), None) => Ok(Self { name, enabled }),
            _ => Err("each plugin entry must have exactly one `name: bool` pair".to_string()),
        }
    }
}

impl From<PluginToggle> for BTreeMap<String, bool> {
    fn from(toggle: PluginToggle) -> Self {
        BTreeMap::from([(toggle.name, toggle.enabled)])
    }
}

/// Base defaults, used whether or not output optimization runs.
pub fn default_options() -> Overrides {
    let value = json!({
        "quality": 82,
        "widths": [320, 640, 1280],
        "filter": "Triangle",
        "filterSupport": 2,
        "resizeFunction": "thumbnail",
        "unsharp": { "radius": 0.25, "sigma": 0.08, "gain": 8.3, "threshold": 0.045 },
        "dither": null,
        "posterize": null,
        "background": null,
        "alpha": null,
        "colorspace": null,
        "interlace": null,
        "pngCompressionFilter": null,
        "pngCompressionLevel": null,
        "pngCompressionStrategy": null,
        "pngExcludeChunk": null,
        "pngPreserveColormap": null,
        "jpegFancyUpsampling": "off",
        "strip": true,
        "optimize": { "svg": true, "rasterInput": true, "rasterOutput": true },
        "svgoPlugins": [
            { "removeXMLProcInst": true },
            { "removeDoctype": true },
            { "removeComments": true },
            { "removeMetadata": true },
            { "removeTitle": true },
            { "removeDesc": true },
            { "removeEditorsNSData": true },
            { "cleanupAttrs": true },
            { "removeEmptyAttrs": true },
            { "removeEmptyText": true },
            { "removeEmptyContainers": true },
            { "collapseWhitespace": true }
        ]
    });
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Fields the raster engine has to take care of itself when no lossless
/// optimizer runs over its output.
pub fn no_optimization_profile() -> Overrides {
    let value = json!({
        "alpha": "Background",
        "background": "Black",
        "colorspace": "sRGB",
        "dither": "None",
        "interlace": "None",
        "posterize": 136,
        "pngCompressionFilter": 5,
        "pngCompressionLevel": 9,
        "pngCompressionStrategy": 1,
        "pngExcludeChunk": "all"
    });
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Shallow per-key merge of `layers` over `base`, later layers winning.
pub fn merge(base: &Overrides, layers: &[&Overrides]) -> Overrides {
    let mut merged = base.clone();
    for layer in layers {
        for (key, value) in layer.iter() {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

fn raster_output_enabled(merged: &Overrides) -> bool {
    merged
        .get("optimize")
        .and_then(|optimize| optimize.get("rasterOutput"))
        .and_then(Value::as_bool)
        .unwrap_or(true)
}

/// Resolve the option set from override layers given in increasing precedence.
///
/// When the first merge disables raster-output optimization, the merge is
/// redone on top of the no-optimization profile so the user's explicit
/// values still win.
pub fn resolve_with(
    defaults: &Overrides,
    no_optimization: &Overrides,
    layers: &[&Overrides],
) -> Result<OptionSet> {
    let mut merged = merge(defaults, layers);
    if !raster_output_enabled(&merged) {
        let base = merge(defaults, &[no_optimization]);
        merged = merge(&base, layers);
    }
    serde_json::from_value(Value::Object(merged))
        .map_err(|e| RespimgError::Config(format!("invalid options: {}", e)))
}

/// Resolve against the built-in defaults.
pub fn resolve(layers: &[&Overrides]) -> Result<OptionSet> {
    resolve_with(&default_options(), &no_optimization_profile(), layers)
}

/// A file group as written in the configuration file, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileGroupSpec {
    #[serde(default)]
    pub src: Option<Vec<PathBuf>>,
    pub dest: PathBuf,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

/// A validated file group: exactly one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileGroup {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub cwd: PathBuf,
}

/// One named target: its own options plus its file groups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default)]
    pub options: Overrides,
    #[serde(default)]
    pub files: Vec<FileGroupSpec>,
}

/// External engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Number of concurrent resize units within a width
    pub workers: usize,
    /// Upper bound on a single engine subprocess
    pub engine_timeout_secs: u64,
    /// Program used to render vector sources (receives the render script first)
    pub rasterizer: String,
    /// Render script passed to the rasterizer; the bundled one when unset
    pub rasterizer_script: Option<PathBuf>,
    /// Force a raster processor (`magick` or `convert`) instead of detecting one
    pub raster_processor: Option<String>,
    /// Where to look for the lossless optimizer; built-in list when empty
    pub optimizer_candidates: Vec<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            engine_timeout_secs: 300,
            rasterizer: "phantomjs".to_string(),
            rasterizer_script: None,
            raster_processor: None,
            optimizer_candidates: Vec::new(),
        }
    }
}

impl EngineSettings {
    /// Validate engine parameters
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(RespimgError::Config(
                "Number of workers must be greater than 0".to_string(),
            ));
        }
        if self.engine_timeout_secs == 0 {
            return Err(RespimgError::Config(
                "Engine timeout must be greater than 0 seconds".to_string(),
            ));
        }
        if let Some(ref processor) = self.raster_processor {
            if processor != "magick" && processor != "convert" {
                return Err(RespimgError::Config(format!(
                    "Raster processor must be `magick` or `convert`, got `{}`",
                    processor
                )));
            }
        }
        Ok(())
    }
}

/// The configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    /// Options shared by every target
    #[serde(default)]
    pub options: Overrides,
    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,
    #[serde(default)]
    pub engines: EngineSettings,
}

impl RunConfig {
    /// Load configuration from file. Relative `cwd`s resolve against the file's directory.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut config: RunConfig =
            serde_json::from_str(&content).map_err(|source| RespimgError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;

        let base_dir = path.parent().unwrap_or(Path::new("")).to_path_buf();
        for target in config.targets.values_mut() {
            for group in target.files.iter_mut() {
                group.cwd = Some(match group.cwd.take() {
                    Some(cwd) if cwd.is_absolute() => cwd,
                    Some(cwd) => base_dir.join(cwd),
                    None => base_dir.clone(),
                });
            }
        }

        config.engines.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| RespimgError::Config(e.to_string()))?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Targets selected for this invocation: the named one, or all of them in name order.
    pub fn select_targets(&self, name: Option<&str>) -> Result<Vec<(&str, &TargetConfig)>> {
        match name {
            Some(name) => self
                .targets
                .get_key_value(name)
                .map(|(k, v)| vec![(k.as_str(), v)])
                .ok_or_else(|| RespimgError::UnreadableTarget(format!("target `{}`", name))),
            None => Ok(self
                .targets
                .iter()
                .map(|(k, v)| (k.as_str(), v))
                .collect()),
        }
    }

    /// Resolve the option set for one target, with invocation-level overrides on top.
    pub fn options_for(&self, target: &TargetConfig, invocation: &Overrides) -> Result<OptionSet> {
        resolve(&[&self.options, &target.options, invocation])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn overrides(value: Value) -> Overrides {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_defaults_resolve() {
        let options = resolve(&[]).unwrap();
        assert_eq!(options.quality, 82);
        assert_eq!(options.filter.as_deref(), Some("Triangle"));
        assert_eq!(options.filter_support, Some(2.0));
        assert_eq!(options.resize_function.as_deref(), Some("thumbnail"));
        assert_eq!(options.widths.as_ref().map(Vec::len), Some(3));
        assert!(options.optimize.svg && options.optimize.raster_input && options.optimize.raster_output);
        assert_eq!(options.alpha, None);
        assert_eq!(options.posterize, None);
        assert_eq!(options.svgo_plugins.len(), 12);
        assert!(options.extra.is_empty());
    }

    #[test]
    fn test_precedence_later_layers_win() {
        let shared = overrides(json!({ "quality": 70, "filter": "Lanczos" }));
        let target = overrides(json!({ "quality": 75 }));
        let task = overrides(json!({ "quality": 90 }));

        let options = resolve(&[&shared, &target, &task]).unwrap();
        assert_eq!(options.quality, 90);
        assert_eq!(options.filter.as_deref(), Some("Lanczos"));

        let options = resolve(&[&shared, &target]).unwrap();
        assert_eq!(options.quality, 75);
    }

    #[test]
    fn test_root_options_sit_below_target_and_invocation() {
        let config = RunConfig {
            options: overrides(json!({ "quality": 60, "filter": "Lanczos", "strip": false })),
            ..RunConfig::default()
        };
        let target = TargetConfig {
            options: overrides(json!({ "quality": 70, "filter": "Mitchell" })),
            files: Vec::new(),
        };

        let options = config.options_for(&target, &Overrides::new()).unwrap();
        assert_eq!(options.quality, 70);
        assert_eq!(options.filter.as_deref(), Some("Mitchell"));
        assert_eq!(options.strip, Some(false));

        let invocation = overrides(json!({ "quality": 90 }));
        let options = config.options_for(&target, &invocation).unwrap();
        assert_eq!(options.quality, 90);
        assert_eq!(options.filter.as_deref(), Some("Mitchell"));
    }

    #[test]
    fn test_nested_objects_replace_wholesale() {
        let task = overrides(json!({ "unsharp": { "radius": 1.5 } }));
        let options = resolve(&[&task]).unwrap();
        let unsharp = options.unsharp.unwrap();
        assert_eq!(unsharp.radius, Some(1.5));
        assert_eq!(unsharp.sigma, None);
        assert_eq!(unsharp.gain, None);
        assert_eq!(unsharp.threshold, None);
    }

    #[test]
    fn test_no_optimization_profile_swapped_in() {
        let task = overrides(json!({
            "optimize": { "svg": false, "rasterInput": false, "rasterOutput": false }
        }));
        let options = resolve(&[&task]).unwrap();
        assert_eq!(options.alpha.as_deref(), Some("Background"));
        assert_eq!(options.background.as_deref(), Some("Black"));
        assert_eq!(options.colorspace.as_deref(), Some("sRGB"));
        assert_eq!(options.dither.as_deref(), Some("None"));
        assert_eq!(options.interlace.as_deref(), Some("None"));
        assert_eq!(options.posterize, Some(136));
        assert_eq!(options.png_compression_filter, Some(5));
        assert_eq!(options.png_compression_level, Some(9));
        assert_eq!(options.png_compression_strategy, Some(1));
        assert_eq!(options.png_exclude_chunk.as_deref(), Some("all"));
    }

    #[test]
    fn test_user_values_beat_no_optimization_profile() {
        let target = overrides(json!({ "background": "White" }));
        let task = overrides(json!({ "optimize": { "rasterOutput": false } }));
        let options = resolve(&[&target, &task]).unwrap();
        assert_eq!(options.background.as_deref(), Some("White"));
        assert_eq!(options.alpha.as_deref(), Some("Background"));
        // partial optimize objects keep the missing gates enabled
        assert!(options.optimize.svg);
        assert!(options.optimize.raster_input);
        assert!(!options.optimize.raster_output);
    }

    #[test]
    fn test_resolution_does_not_leak_between_runs() {
        let task = overrides(json!({ "optimize": { "rasterOutput": false } }));
        let first = resolve(&[&task]).unwrap();
        assert_eq!(first.colorspace.as_deref(), Some("sRGB"));

        let second = resolve(&[]).unwrap();
        assert_eq!(second.colorspace, None);
        assert_eq!(second.alpha, None);
    }

    #[test]
    fn test_unknown_keys_pass_through() {
        let task = overrides(json!({ "customFlag": { "a": 1 } }));
        let options = resolve(&[&task]).unwrap();
        assert_eq!(options.extra.get("customFlag"), Some(&json!({ "a": 1 })));
    }

    #[test]
    fn test_wrong_type_is_config_error() {
        let task = overrides(json!({ "quality": "high" }));
        let err = resolve(&[&task]).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_plugin_toggle_shape() {
        let toggles: Vec<PluginToggle> =
            serde_json::from_value(json!([{ "removeTitle": false }, { "removeDesc": true }])).unwrap();
        assert_eq!(toggles[0], PluginToggle::new("removeTitle", false));
        assert_eq!(toggles[1], PluginToggle::new("removeDesc", true));

        let bad: std::result::Result<Vec<PluginToggle>, _> =
            serde_json::from_value(json!([{ "a": true, "b": false }]));
        assert!(bad.is_err());
    }

    #[test]
    fn test_engine_settings_validation() {
        let mut engines = EngineSettings::default();
        assert!(engines.validate().is_ok());

        engines.workers = 0;
        assert!(engines.validate().is_err());

        engines.workers = 2;
        engines.raster_processor = Some("gm".to_string());
        assert!(engines.validate().is_err());
    }

    #[tokio::test]
    async fn test_config_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("respimg.json");

        let mut config = RunConfig::default();
        config.options.insert("quality".into(), json!(60));
        config.targets.insert(
            "site".into(),
            TargetConfig {
                options: overrides(json!({ "widths": [100] })),
                files: vec![FileGroupSpec {
                    src: Some(vec![PathBuf::from("a.png")]),
                    dest: PathBuf::from("out/a.png"),
                    cwd: None,
                }],
            },
        );
        config.save_to_file(&config_path).await.unwrap();

        let loaded = RunConfig::from_file(&config_path).await.unwrap();
        let (name, target) = loaded.select_targets(Some("site")).unwrap()[0];
        assert_eq!(name, "site");
        assert_eq!(target.files[0].cwd.as_deref(), Some(temp_dir.path()));

        let options = loaded.options_for(target, &Overrides::new()).unwrap();
        assert_eq!(options.quality, 60);
        assert_eq!(options.widths, Some(vec![json!(100)]));

        assert!(loaded.select_targets(Some("missing")).is_err());
    }
}
