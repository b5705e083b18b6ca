//! # Validation Module
//!
//! Checks widths, quality and file-group shape before any engine is spawned.
//!
//! - An empty or missing widths list, a quality outside 1-100, an empty
//!   file-group list, a group without `src` or a group with several
//!   sources abort the run.
//! - A single malformed width only skips that width.

use crate::config::{FileGroup, FileGroupSpec};
use crate::error::{Result, RespimgError};
use serde_json::Value;
use std::path::PathBuf;
use tracing::warn;

/// Outcome of validating the widths list: usable widths in order, plus the
/// entries that were rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WidthCheck {
    pub valid: Vec<u32>,
    pub rejected: Vec<String>,
}

/// Validate one width entry. Accepts positive integers given as a JSON
/// number or as a digit-only string.
pub fn validate_width(width: &Value) -> Result<u32> {
    let parsed = match width {
        Value::Number(n) => n.as_u64(),
        Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
            s.parse::<u64>().ok()
        }
        _ => None,
    };

    match parsed {
        Some(w) if w > 0 && w <= u32::MAX as u64 => Ok(w as u32),
        _ => Err(RespimgError::InvalidWidth(display_value(width))),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Validate the widths list. A missing or empty list is fatal; a bad entry is
/// reported and left out.
pub fn validate_widths(widths: Option<&[Value]>) -> Result<WidthCheck> {
    let widths = match widths {
        Some(widths) if !widths.is_empty() => widths,
        _ => return Err(RespimgError::NoWidths),
    };

    let mut check = WidthCheck::default();
    for width in widths {
        match validate_width(width) {
            Ok(w) => check.valid.push(w),
            Err(e) => {
                warn!("{}", e);
                check.rejected.push(display_value(width));
            }
        }
    }
    Ok(check)
}

/// Quality must be within 1-100.
pub fn validate_quality(quality: i64) -> Result<u8> {
    if (1..=100).contains(&quality) {
        Ok(quality as u8)
    } else {
        Err(RespimgError::InvalidQuality(quality))
    }
}

/// Turn raw file-group specs into validated groups with paths resolved
/// against each group's working directory.
pub fn validate_file_groups(groups: &[FileGroupSpec]) -> Result<Vec<FileGroup>> {
    if groups.is_empty() {
        return Err(RespimgError::NoFileGroups);
    }

    groups
        .iter()
        .map(|group| {
            let sources = group
                .src
                .as_ref()
                .ok_or_else(|| RespimgError::UnreadableTarget(group.dest.display().to_string()))?;

            let source = match sources.as_slice() {
                [single] => single,
                [] => {
                    return Err(RespimgError::UnreadableTarget(
                        group.dest.display().to_string(),
                    ))
                }
                many => {
                    return Err(RespimgError::MultipleSources {
                        dest: group.dest.clone(),
                        count: many.len(),
                    })
                }
            };

            let cwd = group.cwd.clone().unwrap_or_else(|| PathBuf::from("."));
            Ok(FileGroup {
                source: cwd.join(source),
                destination: cwd.join(&group.dest),
                cwd,
            })
        })
        .collect()
}
