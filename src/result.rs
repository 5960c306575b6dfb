//! Execution outcomes and the final pipeline result.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mutation_point::MutationPoint;
use crate::test_framework::Test;

/// Verdict of running one program variant under one test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Internal inconsistency. Never part of a completed run.
    Invalid,
    /// Test passed; a mutant under this status survived.
    Passed,
    /// Test failed; the mutant was killed.
    Failed,
    /// Process-level fault; counts as killed.
    Crashed,
    /// Wall-clock limit hit; counts as killed.
    Timedout,
    /// Synthetic result of a dry run.
    DryRun,
}

impl ExecutionStatus {
    /// True if this status kills a mutant.
    pub fn is_killed(self) -> bool {
        matches!(self, Self::Failed | Self::Crashed | Self::Timedout)
    }

    /// Lowercase name used in reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Crashed => "crashed",
            Self::Timedout => "timedout",
            Self::DryRun => "dry_run",
        }
    }
}

/// Outcome of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Verdict.
    pub status: ExecutionStatus,
    /// Wall-clock time spent.
    pub running_time: Duration,
    /// Value returned by the test entry point, when it returned.
    pub exit_status: Option<i64>,
    /// Captured output.
    pub stdout: String,
    /// Captured fault description.
    pub stderr: String,
}

impl ExecutionResult {
    /// Result with `status` and nothing else.
    pub fn new(status: ExecutionStatus) -> Self {
        Self {
            status,
            running_time: Duration::ZERO,
            exit_status: None,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Process-level fault.
    pub fn crashed(stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            ..Self::new(ExecutionStatus::Crashed)
        }
    }

    /// Killed by the wall-clock limit.
    pub fn timed_out() -> Self {
        Self {
            stderr: "timed out".to_string(),
            ..Self::new(ExecutionStatus::Timedout)
        }
    }

    /// Internal inconsistency.
    pub fn invalid(stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            ..Self::new(ExecutionStatus::Invalid)
        }
    }

    /// Synthetic dry-run result.
    pub fn dry_run() -> Self {
        Self::new(ExecutionStatus::DryRun)
    }

    /// Replace the running time.
    pub fn with_running_time(mut self, running_time: Duration) -> Self {
        self.running_time = running_time;
        self
    }
}

/// A mutation point paired with its controlling execution result.
#[derive(Debug, Clone)]
pub struct MutationResult {
    point: Arc<MutationPoint>,
    result: ExecutionResult,
}

impl MutationResult {
    /// Pair a point with its result.
    pub fn new(point: Arc<MutationPoint>, result: ExecutionResult) -> Self {
        Self { point, result }
    }

    /// Mutation point.
    pub fn point(&self) -> &Arc<MutationPoint> {
        &self.point
    }

    /// Controlling result.
    pub fn result(&self) -> &ExecutionResult {
        &self.result
    }

    /// True if some reaching test detected the mutant.
    pub fn is_killed(&self) -> bool {
        self.result.status.is_killed()
    }
}

/// Output of one driver run.
#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    tests: Vec<Test>,
    mutation_results: Vec<MutationResult>,
    mutation_points: Vec<Arc<MutationPoint>>,
}

impl PipelineResult {
    /// Assemble a result.
    pub fn new(
        tests: Vec<Test>,
        mutation_results: Vec<MutationResult>,
        mutation_points: Vec<Arc<MutationPoint>>,
    ) -> Self {
        Self {
            tests,
            mutation_results,
            mutation_points,
        }
    }

    /// Discovered tests.
    pub fn tests(&self) -> &[Test] {
        &self.tests
    }

    /// One result per surviving mutation point, ordered by point id.
    pub fn mutation_results(&self) -> &[MutationResult] {
        &self.mutation_results
    }

    /// Mutation points that survived filtering.
    pub fn mutation_points(&self) -> &[Arc<MutationPoint>] {
        &self.mutation_points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn killing_statuses() {
        assert!(ExecutionStatus::Failed.is_killed());
        assert!(ExecutionStatus::Crashed.is_killed());
        assert!(ExecutionStatus::Timedout.is_killed());
        assert!(!ExecutionStatus::Passed.is_killed());
        assert!(!ExecutionStatus::DryRun.is_killed());
        assert!(!ExecutionStatus::Invalid.is_killed());
    }

    #[test]
    fn constructors_set_status_and_message() {
        let crashed = ExecutionResult::crashed("division by zero");
        assert_eq!(crashed.status, ExecutionStatus::Crashed);
        assert_eq!(crashed.stderr, "division by zero");

        let timed = ExecutionResult::timed_out().with_running_time(Duration::from_millis(5));
        assert_eq!(timed.status, ExecutionStatus::Timedout);
        assert_eq!(timed.running_time, Duration::from_millis(5));

        let status_json = serde_json::to_string(&ExecutionStatus::DryRun).expect("serialize");
        assert_eq!(status_json, "\"dry_run\"");
    }
}
