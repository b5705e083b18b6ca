//! # Progress Module
//!
//! Progress bar visuale con `indicatif` sulle unità di resize.
//!
//! ```text
//! ⠋ [00:00:04] [========================>---------------] 24/40 (60%) [OK] logo-w640.png
//! ```
//!
//! In modalità JSON, o quando la progress bar è disabilitata, la barra è
//! nascosta e i metodi non hanno effetto visibile.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Manages the progress bar for resize units
#[derive(Clone)]
pub struct ProgressManager {
    bar: ProgressBar,
}

impl ProgressManager {
    /// Create a new progress manager
    pub fn new(total_units: u64, visible: bool) -> Self {
        if !visible {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }

        let bar = ProgressBar::new(total_units);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update progress with a message
    pub fn update(&self, message: &str) {
        self.bar.inc(1);
        self.bar.set_message(message.to_string());
    }

    /// Finish with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_bar_still_counts() {
        let progress = ProgressManager::new(3, false);
        progress.update("a");
        progress.update("b");
        assert_eq!(progress.position(), 2);
        progress.finish("done");
    }
}
