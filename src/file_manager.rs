//! # File Management Module
//!
//! Questo modulo gestisce la discovery delle immagini sorgente e le utilità
//! sui file.
//!
//! ## Responsabilità:
//! - Discovery ricorsiva delle immagini in una directory (modalità `--input`)
//! - Classificazione vettoriale (SVG) vs raster
//! - Costruzione dei gruppi di file che rispecchiano l'albero di input
//! - Formattazione human-readable delle dimensioni
//!
//! ## Formati supportati:
//! - **Raster**: JPG, JPEG, PNG, GIF, WebP, TIFF
//! - **Vettoriali**: SVG

use crate::config::FileGroupSpec;
use image::ImageFormat;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Manages file discovery and classification
pub struct FileManager;

impl FileManager {
    /// Find all supported images in a directory, in a stable order
    pub fn find_image_files(input_dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(input_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|path| Self::is_supported_format(path))
            .collect();
        files.sort();
        files
    }

    /// One file group per image under `input_dir`, mirroring relative paths
    /// under `output_dir`.
    pub fn groups_for_directory(input_dir: &Path, output_dir: &Path) -> Vec<FileGroupSpec> {
        Self::find_image_files(input_dir)
            .into_iter()
            .filter_map(|path| {
                let relative = path.strip_prefix(input_dir).ok()?.to_path_buf();
                Some(FileGroupSpec {
                    dest: output_dir.join(&relative),
                    src: Some(vec![path]),
                    cwd: None,
                })
            })
            .collect()
    }

    /// Check if a file format is supported
    pub fn is_supported_format(path: &Path) -> bool {
        Self::is_vector(path) || Self::is_raster(path)
    }

    /// Vector sources are recognised by their `.svg` extension
    pub fn is_vector(path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("svg"))
            .unwrap_or(false)
    }

    /// Raster formats the transform engine is asked to handle
    pub fn is_raster(path: &Path) -> bool {
        matches!(
            ImageFormat::from_path(path),
            Ok(ImageFormat::Jpeg
                | ImageFormat::Png
                | ImageFormat::Gif
                | ImageFormat::WebP
                | ImageFormat::Tiff)
        )
    }

    /// Get human-readable file size
    pub fn format_size(size: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = size as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }

    /// Calculate percentage reduction
    pub fn calculate_reduction(original_size: u64, new_size: u64) -> f64 {
        if original_size == 0 {
            0.0
        } else {
            ((original_size as f64 - new_size as f64) / original_size as f64) * 100.0
        }
    }
}
