//! Pipeline configuration.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diagnostics::IdeDiagnosticsKind;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("cannot read config {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// File is not valid configuration JSON.
    #[error("cannot parse config {path}: {source}")]
    Parse {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
}

fn available_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Worker pool sizes per stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelizationConfig {
    /// General pool: compilation, filtering, discovery, application.
    pub workers: usize,
    /// Coverage discovery pool.
    pub test_execution_workers: usize,
    /// Mutant execution pool.
    pub mutant_execution_workers: usize,
}

impl Default for ParallelizationConfig {
    fn default() -> Self {
        let workers = available_workers();
        Self {
            workers,
            test_execution_workers: workers,
            mutant_execution_workers: workers,
        }
    }
}

impl ParallelizationConfig {
    /// Same size for every pool.
    pub fn uniform(workers: usize) -> Self {
        Self {
            workers,
            test_execution_workers: workers,
            mutant_execution_workers: workers,
        }
        .normalized()
    }

    /// Raise every pool to at least one worker.
    pub fn normalized(mut self) -> Self {
        self.workers = self.workers.max(1);
        self.test_execution_workers = self.test_execution_workers.max(1);
        self.mutant_execution_workers = self.mutant_execution_workers.max(1);
        self
    }
}

/// Configuration for one driver run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Pool sizes.
    pub parallelization: ParallelizationConfig,
    /// Skip compilation and execution of mutants.
    pub dry_run_enabled: bool,
    /// IDE diagnostics emission mode.
    pub diagnostics: IdeDiagnosticsKind,
    /// Wall-clock limit per test run, in milliseconds.
    pub timeout_ms: u64,
    /// Directory for cached non-instrumented objects.
    pub cache_directory: Option<PathBuf>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            parallelization: ParallelizationConfig::default(),
            dry_run_enabled: false,
            diagnostics: IdeDiagnosticsKind::None,
            timeout_ms: 3000,
            cache_directory: None,
        }
    }
}

impl Configuration {
    /// Load from a JSON file. Missing keys take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config.normalized())
    }

    /// Raise every pool to at least one worker.
    pub fn normalized(mut self) -> Self {
        self.parallelization = self.parallelization.normalized();
        self
    }

    /// Set the general pool size.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.parallelization.workers = workers.max(1);
        self
    }

    /// Set the coverage discovery pool size.
    pub fn with_test_execution_workers(mut self, workers: usize) -> Self {
        self.parallelization.test_execution_workers = workers.max(1);
        self
    }

    /// Set the mutant execution pool size.
    pub fn with_mutant_execution_workers(mut self, workers: usize) -> Self {
        self.parallelization.mutant_execution_workers = workers.max(1);
        self
    }

    /// Enable or disable dry-run mode.
    pub fn with_dry_run(mut self, enabled: bool) -> Self {
        self.dry_run_enabled = enabled;
        self
    }

    /// Set the IDE diagnostics mode.
    pub fn with_diagnostics(mut self, kind: IdeDiagnosticsKind) -> Self {
        self.diagnostics = kind;
        self
    }

    /// Set the per-test timeout in milliseconds.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Cache non-instrumented objects under `directory`.
    pub fn with_cache_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.cache_directory = Some(directory.into());
        self
    }
}
