//! Leveled diagnostics sink shared by every pipeline stage.
//!
//! Messages are forwarded to `tracing` under the `irmut` target. A sink can
//! additionally capture messages in memory, which is how tests observe which
//! stages ran.

mod ide;

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub use ide::{IdeDiagnostics, IdeDiagnosticsKind, NormalIdeDiagnostics, NullIdeDiagnostics};

/// Severity of a diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Verbose detail, off by default.
    Debug,
    /// Stage progress and completion.
    Info,
    /// Recoverable problem; the pipeline continues.
    Warning,
    /// A stage failed on some input.
    Error,
}

/// One captured message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity.
    pub level: Level,
    /// Message text.
    pub message: String,
}

/// Diagnostics sink. One instance spans one driver run.
#[derive(Debug, Default)]
pub struct Diagnostics {
    captured: Option<Mutex<Vec<Diagnostic>>>,
    warnings: AtomicUsize,
    errors: AtomicUsize,
}

impl Diagnostics {
    /// Sink that only forwards to `tracing`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that also keeps every message for later inspection.
    pub fn capturing() -> Self {
        Self {
            captured: Some(Mutex::new(Vec::new())),
            ..Self::default()
        }
    }

    /// Emit a debug message.
    pub fn debug(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(target: "irmut", "{message}");
        self.capture(Level::Debug, message);
    }

    /// Emit an informational message.
    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(target: "irmut", "{message}");
        self.capture(Level::Info, message);
    }

    /// Emit a warning.
    pub fn warning(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(target: "irmut", "{message}");
        self.warnings.fetch_add(1, Ordering::Relaxed);
        self.capture(Level::Warning, message);
    }

    /// Emit an error. Errors never alter control flow on their own.
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(target: "irmut", "{message}");
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.capture(Level::Error, message);
    }

    /// Report stage progress. Only the final tick of a stage is captured.
    pub fn progress(&self, label: &str, done: usize, total: usize) {
        tracing::trace!(target: "irmut", label, done, total, "progress");
        if done == total {
            self.capture(Level::Debug, format!("{label}: {done}/{total}"));
        }
    }

    /// Number of warnings emitted so far.
    pub fn warning_count(&self) -> usize {
        self.warnings.load(Ordering::Relaxed)
    }

    /// Number of errors emitted so far.
    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }

    /// Captured messages, oldest first. Empty for non-capturing sinks.
    pub fn messages(&self) -> Vec<Diagnostic> {
        match &self.captured {
            Some(captured) => captured
                .lock()
                .map(|messages| messages.clone())
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// True if any captured message at `level` contains `fragment`.
    pub fn contains(&self, level: Level, fragment: &str) -> bool {
        self.messages()
            .iter()
            .any(|d| d.level == level && d.message.contains(fragment))
    }

    fn capture(&self, level: Level, message: String) {
        if let Some(captured) = &self.captured {
            if let Ok(mut messages) = captured.lock() {
                messages.push(Diagnostic { level, message });
            }
        }
    }
}
