//! Diagnostic emission.
//!
//! Every message goes to `tracing` and, when one is installed, to the
//! caller's reporter callback. Emission never fails and never panics out
//! of the caller's control flow.

use crate::config::LogConfig;
use crate::error::SqlqError;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Diagnostic sink: `(error, message)`.
pub type ReporterFn = Arc<dyn Fn(Option<&SqlqError>, &str) + Send + Sync>;

/// Shorten `s` to at most `length` characters, noting the original size.
pub fn abbreviate(s: &str, length: usize) -> String {
    let total = s.chars().count();
    if total <= length {
        return s.to_string();
    }
    let suffix = format!("… ({} chars)", total);
    let keep = length.saturating_sub(suffix.chars().count());
    let mut out: String = s.chars().take(keep).collect();
    out.push_str(&suffix);
    out
}

#[derive(Clone, Default)]
pub(crate) struct Diagnostics {
    reporter: Option<ReporterFn>,
    log: LogConfig,
}

impl Diagnostics {
    pub fn new(log: LogConfig) -> Self {
        Self {
            reporter: None,
            log,
        }
    }

    pub fn set_reporter(&mut self, reporter: ReporterFn) {
        self.reporter = Some(reporter);
    }

    /// Whether query text and timings should be logged for `name`.
    pub fn logs_queries(&self, name: &str) -> bool {
        self.log.queries && self.log.matches(name)
    }

    /// Whether result payloads should be logged for `name`.
    pub fn logs_results(&self, name: &str) -> bool {
        self.log.results && self.log.matches(name)
    }

    pub fn debug(&self, message: &str) {
        tracing::debug!("{}", message);
        self.forward(None, message);
    }

    pub fn error(&self, err: &SqlqError, message: &str) {
        tracing::warn!(error = %err, "{}", message);
        self.forward(Some(err), message);
    }

    fn forward(&self, err: Option<&SqlqError>, message: &str) {
        if let Some(reporter) = &self.reporter {
            if catch_unwind(AssertUnwindSafe(|| reporter(err, message))).is_err() {
                tracing::error!("reporter callback panicked");
            }
        }
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("reporter", &self.reporter.is_some())
            .field("log", &self.log)
            .finish()
    }
}
