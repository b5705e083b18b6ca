//! # Tool Path Resolver
//!
//! This module handles finding the external engines in different environments:
//! - Tools bundled next to the executable (`tools/{platform}/…`)
//! - A tools directory named by the `TOOLS_DIR` environment variable
//! - System-installed tools on `PATH`

use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Every engine this crate may drive, grouped for the tools report.
pub const ENGINE_TOOLS: &[(&str, &[&str])] = &[
    ("Raster transform", &["magick", "convert", "identify"]),
    ("Vector rasterizer", &["phantomjs"]),
    ("Lossless optimizer", &["imageoptim"]),
];

/// Tool path resolver for different deployment environments
pub struct ToolPathResolver {
    /// Base directory where tools are bundled
    tools_dir: Option<PathBuf>,
}

impl ToolPathResolver {
    /// Create a new path resolver
    pub fn new() -> Self {
        Self {
            tools_dir: Self::detect_bundled_tools_dir(),
        }
    }

    /// Create a resolver that looks in an explicit tools directory before `PATH`
    pub fn with_tools_dir(tools_dir: impl Into<PathBuf>) -> Self {
        Self {
            tools_dir: Some(tools_dir.into()),
        }
    }

    /// Detect the bundled tools directory
    fn detect_bundled_tools_dir() -> Option<PathBuf> {
        // Strategy 1: TOOLS_DIR environment variable (direct override)
        if let Ok(tools_dir) = env::var("TOOLS_DIR") {
            let tools_path = PathBuf::from(tools_dir);
            debug!("Checking TOOLS_DIR environment variable: {:?}", tools_path);
            if tools_path.exists() {
                return Some(tools_path);
            }
        }

        // Strategy 2: next to the executable
        if let Ok(exe_path) = env::current_exe() {
            if let Some(app_dir) = exe_path.parent() {
                let possible_paths = [app_dir.join("tools"), app_dir.join("resources").join("tools")];

                for path in &possible_paths {
                    debug!("Checking bundled path: {:?}", path);
                    if path.exists() {
                        debug!("Found bundled tools directory: {:?}", path);
                        return Some(path.clone());
                    }
                }
            }
        }

        debug!("No bundled tools directory found");
        None
    }

    /// Resolve the path to a specific tool: bundled first, then `PATH`.
    pub fn resolve_tool(&self, tool_name: &str) -> Option<PathBuf> {
        if let Some(ref tools_dir) = self.tools_dir {
            if let Some(bundled_path) = Self::find_bundled_tool(tools_dir, tool_name) {
                debug!("Using bundled tool: {} -> {:?}", tool_name, bundled_path);
                return Some(bundled_path);
            }
        }

        if let Some(system_path) = Self::find_in_system_path(tool_name) {
            debug!("Using system tool: {} -> {:?}", tool_name, system_path);
            return Some(system_path);
        }

        warn!("Tool not found: {}", tool_name);
        None
    }

    /// Look for a bundled tool, either directly in the platform folder or in
    /// its own subfolder.
    fn find_bundled_tool(tools_dir: &Path, tool_name: &str) -> Option<PathBuf> {
        let platform = if cfg!(target_os = "windows") {
            "windows"
        } else if cfg!(target_os = "macos") {
            "darwin"
        } else {
            env::consts::OS
        };
        let executable = format!("{}{}", tool_name, env::consts::EXE_SUFFIX);

        // tools/{platform}/{tool}, then tools/{platform}/{tool}/{tool}
        [
            tools_dir.join(platform).join(&executable),
            tools_dir.join(platform).join(tool_name).join(&executable),
        ]
        .into_iter()
        .find(|path| path.is_file())
    }

    /// Find tool in system PATH
    fn find_in_system_path(tool_name: &str) -> Option<PathBuf> {
        let executable = format!("{}{}", tool_name, env::consts::EXE_SUFFIX);
        let path_var = env::var_os("PATH")?;
        env::split_paths(&path_var)
            .map(|dir| dir.join(&executable))
            .find(|path| path.is_file())
    }

    /// Check if a specific tool is available
    pub fn is_tool_available(&self, tool_name: &str) -> bool {
        self.resolve_tool(tool_name).is_some()
    }

    /// Get installation instructions for a tool
    pub fn install_instructions(tool_name: &str) -> String {
        match tool_name {
            "magick" | "convert" | "identify" => {
                "install ImageMagick (e.g. `sudo apt-get install imagemagick` or `brew install imagemagick`)"
                    .to_string()
            }
            "phantomjs" => "install PhantomJS (e.g. `npm install -g phantomjs-prebuilt`)".to_string(),
            "imageoptim" => {
                "install ImageOptim and imageoptim-cli (e.g. `brew install imageoptim-cli`)".to_string()
            }
            _ => format!("install `{}` and make sure it is on PATH", tool_name),
        }
    }

    /// Check if a tool is available and provide installation instructions if not
    pub fn check_tool_with_instructions(&self, tool_name: &str) -> Result<PathBuf, String> {
        self.resolve_tool(tool_name).ok_or_else(|| {
            format!(
                "Tool '{}' not found. To install: {}",
                tool_name,
                Self::install_instructions(tool_name)
            )
        })
    }

    /// Get a report of tool availability
    pub fn get_tools_report(&self) -> String {
        let mut report = String::new();
        report.push_str("Tool Path Resolver Report\n");
        report.push_str(&format!("Bundled tools dir: {:?}\n", self.tools_dir));
        report.push_str("\nTool Availability:\n");

        for (category, tool_list) in ENGINE_TOOLS {
            report.push_str(&format!("\n{}:\n", category));
            for tool in tool_list.iter() {
                match self.check_tool_with_instructions(tool) {
                    Ok(path) => report.push_str(&format!("  ✅ {} -> {:?}\n", tool, path)),
                    Err(_) => report.push_str(&format!(
                        "  ❌ {} ({})\n",
                        tool,
                        Self::install_instructions(tool)
                    )),
                }
            }
        }

        report
    }
}

impl Default for ToolPathResolver {
    fn default() -> Self {
        Self::new()
    }
}
