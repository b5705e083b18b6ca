//! # Platform-specific utilities
//!
//! Questo modulo centralizza la logica per la gestione cross-platform dei
//! comandi esterni: nomi degli eseguibili, disponibilità dei tool e la scelta
//! della generazione di ImageMagick installata.

use crate::tool_resolver::ToolPathResolver;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Which ImageMagick command-line flavour is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagickFlavor {
    /// ImageMagick 7.x: `magick <in> … <out>` and `magick identify`
    Magick7,
    /// ImageMagick 6.x: `convert <in> … <out>` and `identify`
    Legacy,
}

impl MagickFlavor {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "magick" => Some(Self::Magick7),
            "convert" => Some(Self::Legacy),
            _ => None,
        }
    }

    /// Base name of the transform command
    pub fn transform_tool(&self) -> &'static str {
        match self {
            Self::Magick7 => "magick",
            Self::Legacy => "convert",
        }
    }

    /// Base name of the identify command and its leading arguments
    pub fn identify_tool(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            Self::Magick7 => ("magick", &["identify"]),
            Self::Legacy => ("identify", &[]),
        }
    }
}

/// Platform-specific command manager with tool resolution
pub struct PlatformCommands {
    tool_resolver: ToolPathResolver,
}

impl PlatformCommands {
    /// Get the singleton instance
    pub fn instance() -> &'static Self {
        static INSTANCE: OnceLock<PlatformCommands> = OnceLock::new();
        INSTANCE.get_or_init(|| Self {
            tool_resolver: ToolPathResolver::new(),
        })
    }

    /// Platform-specific executable name for a base tool name
    pub fn get_command(&self, base_name: &str) -> String {
        format!("{}{}", base_name, std::env::consts::EXE_SUFFIX)
    }

    /// Check if a command is available on the system or bundled
    pub fn is_command_available(&self, base_name: &str) -> bool {
        self.tool_resolver.is_tool_available(base_name)
    }

    /// Get the resolved path to a tool, falling back to the bare executable
    /// name so a later spawn reports the missing binary.
    pub fn tool_path_or_name(&self, base_name: &str) -> PathBuf {
        self.tool_resolver
            .resolve_tool(base_name)
            .unwrap_or_else(|| PathBuf::from(self.get_command(base_name)))
    }

    /// Get the resolved path to a tool (bundled or system)
    pub fn get_tool_path(&self, base_name: &str) -> Option<PathBuf> {
        self.tool_resolver.resolve_tool(base_name)
    }

    /// Prefer ImageMagick 7 and fall back to the legacy `convert`.
    ///
    /// When neither is installed the IM7 flavour is returned; spawning it
    /// then fails with a typed missing-engine error per unit.
    pub fn detect_magick(&self) -> MagickFlavor {
        if self.is_command_available("magick") {
            MagickFlavor::Magick7
        } else if self.is_command_available("convert") {
            MagickFlavor::Legacy
        } else {
            MagickFlavor::Magick7
        }
    }

    /// Get a report of all available tools
    pub fn get_tools_report(&self) -> String {
        self.tool_resolver.get_tools_report()
    }

    /// Get system information for debugging
    pub fn system_info() -> SystemInfo {
        SystemInfo {
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            family: std::env::consts::FAMILY,
        }
    }
}

/// System information structure
#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub os: &'static str,
    pub arch: &'static str,
    pub family: &'static str,
}

impl std::fmt::Display for SystemInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({})", self.os, self.arch, self.family)
    }
}
