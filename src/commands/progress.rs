// src/commands/progress.rs

//! Progress bar for pipeline runs
//!
//! Draws a single percentage bar whose message follows the current stage
//! and item. Major steps are also printed above the bar so the stage
//! history stays visible after the run.

use indicatif::{ProgressBar, ProgressStyle};
use modweave::progress::{ProgressReport, ProgressSink};
use std::time::Duration;

pub struct RunProgress {
    bar: ProgressBar,
}

impl RunProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.green/dim}] {pos:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    /// A bar that draws nothing, for non-interactive output
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }
}

impl ProgressSink for RunProgress {
    fn report(&mut self, report: &ProgressReport) {
        self.bar.set_position(u64::from(report.percent()));
        if report.detail.is_empty() {
            self.bar.set_message(report.title.clone());
        } else {
            self.bar
                .set_message(format!("{}: {}", report.title, report.detail));
        }
        if report.major {
            self.bar.println(format!("  {}", report));
        }
    }

    fn finish(&mut self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_progress_tracks_position() {
        let mut progress = RunProgress::hidden();
        progress.report(&ProgressReport::minor(0.42, "Indexing", "MechDef:atlas"));
        assert_eq!(progress.bar.position(), 42);
        assert_eq!(progress.bar.message(), "Indexing: MechDef:atlas");

        progress.finish("Run complete");
        assert!(progress.bar.is_finished());
    }
}
