use std::sync::Arc;
use std::time::Duration;

use crate::diagnostics::IdeDiagnostics;
use crate::execution::ProcessSandbox;
use crate::mutation_point::MutationPoint;
use crate::parallelization::{Task, TaskError};
use crate::result::{ExecutionResult, ExecutionStatus, MutationResult};
use crate::test_framework::{RunContext, Test, TestRunner};
use crate::toolchain::Image;

/// Runs every reaching test against one mutant.
///
/// The first result that is not `Passed` controls the verdict and stops the
/// remaining tests; the running time is summed over the tests that ran.
pub struct MutantExecutionTask<'a> {
    sandbox: &'a dyn ProcessSandbox,
    runner: &'a dyn TestRunner,
    image: &'a Image,
    tests: &'a [Test],
    timeout: Duration,
    ide_diagnostics: &'a dyn IdeDiagnostics,
}

impl<'a> MutantExecutionTask<'a> {
    /// Task executing mutants hosted in `image`.
    pub fn new(
        sandbox: &'a dyn ProcessSandbox,
        runner: &'a dyn TestRunner,
        image: &'a Image,
        tests: &'a [Test],
        timeout: Duration,
        ide_diagnostics: &'a dyn IdeDiagnostics,
    ) -> Self {
        Self {
            sandbox,
            runner,
            image,
            tests,
            timeout,
            ide_diagnostics,
        }
    }

    fn run_tests(&self, point: &MutationPoint) -> ExecutionResult {
        if point.reachable_tests().is_empty() {
            return ExecutionResult::invalid(format!("no test reaches {}", point.id()));
        }

        let runner = self.runner;
        let image = self.image;
        let mut total = Duration::ZERO;
        let mut last = None;
        for test_id in point.reachable_tests() {
            let Some(test) = self.tests.get(test_id.0) else {
                return ExecutionResult::invalid(format!("unknown test {}", test_id.0));
            };
            let result = self.sandbox.run(
                &|watchdog| {
                    runner.run_test(
                        image,
                        test,
                        &RunContext {
                            selector: Some(point.id()),
                            watchdog,
                            trace: None,
                        },
                    )
                },
                self.timeout,
            );
            total += result.running_time;
            let passed = result.status == ExecutionStatus::Passed;
            last = Some(result);
            if !passed {
                break;
            }
        }

        last.map(|result| result.with_running_time(total))
            .unwrap_or_else(|| ExecutionResult::invalid("no test ran"))
    }
}

impl Task for MutantExecutionTask<'_> {
    type Input = Arc<MutationPoint>;
    type Output = MutationResult;

    fn process(
        &mut self,
        point: Arc<MutationPoint>,
        outputs: &mut Vec<MutationResult>,
    ) -> Result<(), TaskError> {
        let result = self.run_tests(&point);
        if result.status != ExecutionStatus::Invalid {
            self.ide_diagnostics.report(&point, result.status.is_killed());
        }
        outputs.push(MutationResult::new(point, result));
        Ok(())
    }
}

/// Produces a synthetic result per point without compiling or running
/// anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunMutantExecutionTask;

impl Task for DryRunMutantExecutionTask {
    type Input = Arc<MutationPoint>;
    type Output = MutationResult;

    fn process(
        &mut self,
        point: Arc<MutationPoint>,
        outputs: &mut Vec<MutationResult>,
    ) -> Result<(), TaskError> {
        outputs.push(MutationResult::new(point, ExecutionResult::dry_run()));
        Ok(())
    }
}
