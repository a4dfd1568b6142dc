// src/progress.rs

//! Progress reporting for pipeline runs
//!
//! A run is drained one step at a time; every step yields a
//! [`ProgressReport`]. What happens to reports is up to the caller, who
//! passes them to a [`ProgressSink`]:
//! - `SilentProgress`: counts reports, prints nothing
//! - `LogProgress`: logs major steps at info, throttles minor ones
//! - `CallbackProgress`: hands each report to a closure
//!
//! The CLI adds an indicatif bar on top of the same trait.

use std::fmt;
use tracing::{debug, info};

/// One completed step of a run
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    /// Overall completion, 0.0 to 1.0
    pub fraction: f32,
    /// Stage title, e.g. "Indexing"
    pub title: String,
    /// Current item, e.g. a package name or resource key
    pub detail: String,
    /// Stage boundaries are major steps
    pub major: bool,
}

impl ProgressReport {
    pub fn major(fraction: f32, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            fraction: fraction.clamp(0.0, 1.0),
            title: title.into(),
            detail: detail.into(),
            major: true,
        }
    }

    pub fn minor(fraction: f32, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            major: false,
            ..Self::major(fraction, title, detail)
        }
    }

    pub fn percent(&self) -> u32 {
        (self.fraction * 100.0).round() as u32
    }
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "[{:>3}%] {}", self.percent(), self.title)
        } else {
            write!(f, "[{:>3}%] {}: {}", self.percent(), self.title, self.detail)
        }
    }
}

/// Consumer of progress reports
pub trait ProgressSink {
    fn report(&mut self, report: &ProgressReport);

    /// Called once after the last step
    fn finish(&mut self, _message: &str) {}
}

/// Silent sink (no-op apart from counting)
#[derive(Debug, Default)]
pub struct SilentProgress {
    reports: usize,
    last: Option<ProgressReport>,
}

impl SilentProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> usize {
        self.reports
    }

    pub fn last(&self) -> Option<&ProgressReport> {
        self.last.as_ref()
    }
}

impl ProgressSink for SilentProgress {
    fn report(&mut self, report: &ProgressReport) {
        self.reports += 1;
        self.last = Some(report.clone());
    }
}

/// Logging sink
///
/// Major steps are logged at info. Minor steps are logged at info only when
/// they cross another tenth of the run, otherwise at debug.
#[derive(Debug)]
pub struct LogProgress {
    name: String,
    /// Log interval in percent
    log_interval: u32,
    last_logged: Option<u32>,
}

impl LogProgress {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            log_interval: 10,
            last_logged: None,
        }
    }

    pub fn with_log_interval(mut self, percent: u32) -> Self {
        self.log_interval = percent.max(1);
        self
    }
}

impl ProgressSink for LogProgress {
    fn report(&mut self, report: &ProgressReport) {
        let bucket = report.percent() / self.log_interval;
        if report.major || self.last_logged.is_none_or(|last| bucket > last) {
            info!("{}: {}", self.name, report);
            self.last_logged = Some(bucket);
        } else {
            debug!("{}: {}", self.name, report);
        }
    }

    fn finish(&mut self, message: &str) {
        info!("{}: {}", self.name, message);
    }
}

/// Callback sink, for hosts that render progress themselves
pub struct CallbackProgress<F>
where
    F: FnMut(&ProgressReport),
{
    callback: F,
}

impl<F> CallbackProgress<F>
where
    F: FnMut(&ProgressReport),
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressSink for CallbackProgress<F>
where
    F: FnMut(&ProgressReport),
{
    fn report(&mut self, report: &ProgressReport) {
        (self.callback)(report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_clamps_and_formats() {
        let report = ProgressReport::minor(1.7, "Indexing", "MechDef:atlas");
        assert_eq!(report.fraction, 1.0);
        assert!(!report.major);
        assert_eq!(report.to_string(), "[100%] Indexing: MechDef:atlas");

        let report = ProgressReport::major(0.25, "Resolving", "");
        assert_eq!(report.to_string(), "[ 25%] Resolving");
    }

    #[test]
    fn test_silent_progress() {
        let mut progress = SilentProgress::new();
        progress.report(&ProgressReport::major(0.1, "Discovering", ""));
        progress.report(&ProgressReport::minor(0.2, "Loading", "A"));

        assert_eq!(progress.reports(), 2);
        assert_eq!(progress.last().unwrap().detail, "A");
    }

    #[test]
    fn test_log_progress() {
        let mut progress = LogProgress::new("run").with_log_interval(0);
        progress.report(&ProgressReport::minor(0.5, "Merging", "x"));
        progress.report(&ProgressReport::minor(0.5, "Merging", "y"));
        assert_eq!(progress.last_logged, Some(50));
        progress.finish("done");
    }

    #[test]
    fn test_callback_progress() {
        let mut titles = Vec::new();
        {
            let mut progress = CallbackProgress::new(|report: &ProgressReport| {
                titles.push(report.title.clone());
            });
            progress.report(&ProgressReport::major(0.0, "Discovering", ""));
            progress.report(&ProgressReport::major(1.0, "Done", ""));
        }
        assert_eq!(titles, vec!["Discovering", "Done"]);
    }
}
