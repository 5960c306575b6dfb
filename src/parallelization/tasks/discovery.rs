use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use crate::diagnostics::Diagnostics;
use crate::execution::{CallTrace, Instrumentation, ProcessSandbox};
use crate::filters::{FunctionFilter, InstructionFilter, MutationPointFilter};
use crate::ir::Op;
use crate::mutation_point::MutationPoint;
use crate::mutators::Mutator;
use crate::parallelization::{Task, TaskError};
use crate::program::Program;
use crate::reachable::{FunctionUnderTest, ReachableFunction};
use crate::result::ExecutionStatus;
use crate::test_framework::{RunContext, Test, TestRunner};
use crate::toolchain::Image;

/// Runs each original test against the instrumented image and records the
/// functions it reaches.
pub struct OriginalTestExecutionTask<'a> {
    diagnostics: &'a Diagnostics,
    instrumentation: &'a Instrumentation,
    sandbox: &'a dyn ProcessSandbox,
    runner: &'a dyn TestRunner,
    image: &'a Image,
    timeout: Duration,
}

impl<'a> OriginalTestExecutionTask<'a> {
    /// Task running tests from `image` under `sandbox`.
    pub fn new(
        diagnostics: &'a Diagnostics,
        instrumentation: &'a Instrumentation,
        sandbox: &'a dyn ProcessSandbox,
        runner: &'a dyn TestRunner,
        image: &'a Image,
        timeout: Duration,
    ) -> Self {
        Self {
            diagnostics,
            instrumentation,
            sandbox,
            runner,
            image,
            timeout,
        }
    }
}

impl<'a> Task for OriginalTestExecutionTask<'a> {
    type Input = &'a Test;
    type Output = ReachableFunction;

    fn process(
        &mut self,
        test: &'a Test,
        outputs: &mut Vec<ReachableFunction>,
    ) -> Result<(), TaskError> {
        let trace = CallTrace::new();
        let runner = self.runner;
        let image = self.image;
        let result = self.sandbox.run(
            &|watchdog| {
                runner.run_test(
                    image,
                    test,
                    &RunContext {
                        selector: None,
                        watchdog,
                        trace: Some(&trace),
                    },
                )
            },
            self.timeout,
        );

        if result.status != ExecutionStatus::Passed {
            self.diagnostics.warning(format!(
                "Original test '{}' did not pass ({}): {}",
                test.name,
                result.status.as_str(),
                result.stderr
            ));
            return Ok(());
        }

        for (probe, depth) in trace.hits() {
            // Depth 0 is the test entry point itself.
            if depth == 0 {
                continue;
            }
            if let Some(function) = self.instrumentation.function(probe) {
                outputs.push(ReachableFunction {
                    function: function.clone(),
                    test: test.id,
                    distance: depth,
                });
            }
        }
        Ok(())
    }
}

/// One stage of the function filter chain.
pub struct FunctionFilterTask<'a> {
    filter: &'a dyn FunctionFilter,
    program: &'a Program,
}

impl<'a> FunctionFilterTask<'a> {
    /// Task applying `filter`.
    pub fn new(filter: &'a dyn FunctionFilter, program: &'a Program) -> Self {
        Self { filter, program }
    }
}

impl Task for FunctionFilterTask<'_> {
    type Input = FunctionUnderTest;
    type Output = FunctionUnderTest;

    fn process(
        &mut self,
        candidate: FunctionUnderTest,
        outputs: &mut Vec<FunctionUnderTest>,
    ) -> Result<(), TaskError> {
        let Some(function) = self.program.function(&candidate.function) else {
            return Ok(());
        };
        if !self.filter.should_skip(&candidate, function) {
            outputs.push(candidate);
        }
        Ok(())
    }
}

/// Annotates each function with the instructions every instruction filter
/// accepts.
pub struct InstructionSelectionTask<'a> {
    filters: &'a [Arc<dyn InstructionFilter>],
    program: &'a Program,
}

impl<'a> InstructionSelectionTask<'a> {
    /// Task applying the whole instruction chain.
    pub fn new(filters: &'a [Arc<dyn InstructionFilter>], program: &'a Program) -> Self {
        Self { filters, program }
    }
}

impl<'a> Task for InstructionSelectionTask<'a> {
    type Input = &'a mut FunctionUnderTest;
    type Output = Infallible;

    fn process(
        &mut self,
        candidate: &'a mut FunctionUnderTest,
        _outputs: &mut Vec<Infallible>,
    ) -> Result<(), TaskError> {
        let Some(function) = self.program.function(&candidate.function) else {
            candidate.selected_instructions.clear();
            return Ok(());
        };
        candidate.selected_instructions = function
            .body
            .iter()
            .enumerate()
            .filter(|(_, inst)| !matches!(inst.op, Op::Dispatch { .. }))
            .filter(|(_, inst)| self.filters.iter().all(|f| f.valid_instruction(inst)))
            .map(|(index, _)| index)
            .collect();
        Ok(())
    }
}

/// Expands functions into mutation points: selected instruction times
/// applicable operator.
pub struct SearchMutationPointsTask<'a> {
    program: &'a Program,
    mutators: &'a [Arc<dyn Mutator>],
}

impl<'a> SearchMutationPointsTask<'a> {
    /// Task searching with `mutators`.
    pub fn new(program: &'a Program, mutators: &'a [Arc<dyn Mutator>]) -> Self {
        Self { program, mutators }
    }
}

impl Task for SearchMutationPointsTask<'_> {
    type Input = FunctionUnderTest;
    type Output = MutationPoint;

    fn process(
        &mut self,
        candidate: FunctionUnderTest,
        outputs: &mut Vec<MutationPoint>,
    ) -> Result<(), TaskError> {
        let key = &candidate.function;
        let bitcode = self
            .program
            .bitcode_for(key.module)
            .ok_or(TaskError::UnknownModule(key.module))?;
        let Some(function) = bitcode.module().function(&key.name) else {
            return Ok(());
        };
        let tests: Vec<_> = candidate.tests.iter().copied().collect();

        for &index in &candidate.selected_instructions {
            let Some(inst) = function.body.get(index) else {
                continue;
            };
            for mutator in self.mutators {
                if !mutator.can_be_applied(&inst.op) {
                    continue;
                }
                let point = MutationPoint::new(
                    Arc::clone(mutator),
                    key.module,
                    bitcode.module().name.clone(),
                    key.name.clone(),
                    index,
                    inst.location.clone(),
                )
                .with_reachability(tests.clone(), candidate.distance);
                outputs.push(point);
            }
        }
        Ok(())
    }
}

/// One stage of the mutation-point filter chain.
pub struct MutationFilterTask<'a> {
    filter: &'a dyn MutationPointFilter,
}

impl<'a> MutationFilterTask<'a> {
    /// Task applying `filter`.
    pub fn new(filter: &'a dyn MutationPointFilter) -> Self {
        Self { filter }
    }
}

impl Task for MutationFilterTask<'_> {
    type Input = Arc<MutationPoint>;
    type Output = Arc<MutationPoint>;

    fn process(
        &mut self,
        point: Arc<MutationPoint>,
        outputs: &mut Vec<Arc<MutationPoint>>,
    ) -> Result<(), TaskError> {
        if !self.filter.should_skip(&point) {
            outputs.push(point);
        }
        Ok(())
    }
}
