//! # Path Resolution Module
//!
//! Centralizza il calcolo dei path di output per ogni coppia (gruppo, width).

use crate::error::Result;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Calcola i path di output in modo deterministico
pub struct PathResolver;

impl PathResolver {
    /// `dirname(dest)/basename(src, ext)-w{width}{ext}` where `ext` is the
    /// extension of the destination template. The source name only loses
    /// `ext` when it actually ends with it.
    pub fn destination_path(src: &Path, dest_template: &Path, width: u32) -> PathBuf {
        let ext = dest_template
            .extension()
            .map(|e| {
                let mut dotted = OsString::from(".");
                dotted.push(e);
                dotted.to_string_lossy().into_owned()
            })
            .unwrap_or_default();

        let file_name = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let base_name = match file_name.strip_suffix(ext.as_str()) {
            Some(stripped) if !ext.is_empty() && !stripped.is_empty() => stripped,
            _ => file_name.as_str(),
        };

        let dir_name = dest_template.parent().unwrap_or(Path::new(""));
        dir_name.join(format!("{}-w{}{}", base_name, width, ext))
    }

    /// Like [`PathResolver::destination_path`], creating the destination
    /// directory when absent.
    pub async fn resolve(src: &Path, dest_template: &Path, width: u32) -> Result<PathBuf> {
        let path = Self::destination_path(src, dest_template, width);
        Self::ensure_parent_dirs(&path).await?;
        debug!("Resolved output path: {} -> {}", src.display(), path.display());
        Ok(path)
    }

    /// Crea le directory parent se necessario
    pub async fn ensure_parent_dirs(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }

    /// The raster path a vector source is rendered to.
    pub fn rasterized_path(dest: &Path) -> PathBuf {
        dest.with_extension("png")
    }
}
