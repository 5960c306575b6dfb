//! The driver: sequences every pipeline stage and owns cross-stage state.
//!
//! A run goes through the following stages:
//!
//! 1. compile the program with coverage probes;
//! 2. load dynamic libraries;
//! 3. discover tests;
//! 4. find mutation points: coverage discovery, function filters,
//!    instruction selection, point discovery;
//! 5. filter mutation points;
//! 6. run mutants, either for real or as a dry run.
//!
//! The program is exclusively owned by the driver and is only mutated in
//! the mutation application steps, one step at a time.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::Configuration;
use crate::diagnostics::{
    Diagnostics, IdeDiagnostics, IdeDiagnosticsKind, NormalIdeDiagnostics, NullIdeDiagnostics,
};
use crate::execution::{Instrumentation, ProcessSandbox, WatchdogSandbox};
use crate::filters::Filters;
use crate::mutation_point::MutationPoint;
use crate::mutations_finder::MutationsFinder;
use crate::parallelization::{
    ApplyMutationTask, CloneMutatedFunctionsTask, DeleteOriginalFunctionsTask,
    DryRunMutantExecutionTask, FunctionFilterTask, InsertMutationTrampolinesTask,
    InstructionSelectionTask, InstrumentedCompilationTask, MutantExecutionTask,
    MutationFilterTask, OriginalCompilationTask, OriginalTestExecutionTask, SingleTaskExecutor,
    TaskExecutor,
};
use crate::program::{ApplicationError, ApplicationStage, Bitcode, FunctionKey, Program};
use crate::reachable::{FunctionUnderTest, merge_reachable_functions};
use crate::result::{ExecutionStatus, MutationResult, PipelineResult};
use crate::test_framework::{SimpleTestFramework, Test, TestFramework};
use crate::toolchain::{Image, JitEngine, LinkError, ObjectFile, Toolchain};

/// Fatal pipeline errors. Per-mutant faults are outcomes, never errors.
#[derive(Debug, Error)]
pub enum DriverError {
    /// A link set could not be resolved.
    #[error("link error: {0}")]
    Link(#[from] LinkError),
    /// A module is not where the application sequence expects it.
    #[error("mutation application error: {0}")]
    Application(#[from] ApplicationError),
    /// A stage produced fewer items than it was given.
    #[error("{label}: expected {expected} items, got {actual}")]
    StageIncomplete {
        /// Stage label.
        label: String,
        /// Expected item count.
        expected: usize,
        /// Produced item count.
        actual: usize,
    },
    /// The test runner returned without loading the instrumented program.
    #[error("instrumented program was not loaded")]
    EngineNotLoaded,
    /// Some surviving points have no result.
    #[error("expected {expected} mutation results, got {actual}")]
    MissingResults {
        /// Surviving points.
        expected: usize,
        /// Results produced.
        actual: usize,
    },
    /// A completed run carried the internal `Invalid` status.
    #[error("mutant {point} produced an invalid result: {reason}")]
    InvalidResult {
        /// Mutation point id.
        point: String,
        /// Recorded reason.
        reason: String,
    },
}

/// Sequences the pipeline over one program.
pub struct Driver<'a> {
    diagnostics: &'a Diagnostics,
    config: &'a Configuration,
    program: Program,
    toolchain: Toolchain,
    framework: Option<Box<dyn TestFramework>>,
    filters: Filters,
    finder: MutationsFinder,
    sandbox: Box<dyn ProcessSandbox>,
    ide_diagnostics: Box<dyn IdeDiagnostics>,
}

impl<'a> Driver<'a> {
    /// Driver with the default toolchain, test framework, operators and
    /// sandbox, and no filters.
    pub fn new(program: Program, config: &'a Configuration, diagnostics: &'a Diagnostics) -> Self {
        let mut toolchain = Toolchain::default();
        if let Some(directory) = &config.cache_directory {
            toolchain = toolchain.with_cache_directory(directory.clone());
        }
        let ide_diagnostics: Box<dyn IdeDiagnostics> = match config.diagnostics {
            IdeDiagnosticsKind::None => Box::new(NullIdeDiagnostics),
            kind => Box::new(NormalIdeDiagnostics::new(kind)),
        };
        Self {
            diagnostics,
            config,
            program,
            toolchain,
            framework: None,
            filters: Filters::default(),
            finder: MutationsFinder::default(),
            sandbox: Box::new(WatchdogSandbox::default()),
            ide_diagnostics,
        }
    }

    /// Replace the toolchain. Without an explicit test framework the
    /// default one follows this toolchain's mangler.
    pub fn with_toolchain(mut self, toolchain: Toolchain) -> Self {
        self.toolchain = toolchain;
        self
    }

    /// Replace the filter chains.
    pub fn with_filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    /// Replace the operator set.
    pub fn with_mutations_finder(mut self, finder: MutationsFinder) -> Self {
        self.finder = finder;
        self
    }

    /// Replace the test framework.
    pub fn with_test_framework(mut self, framework: Box<dyn TestFramework>) -> Self {
        self.framework = Some(framework);
        self
    }

    /// Replace the sandbox.
    pub fn with_sandbox(mut self, sandbox: Box<dyn ProcessSandbox>) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Replace the IDE diagnostics sink.
    pub fn with_ide_diagnostics(mut self, ide_diagnostics: Box<dyn IdeDiagnostics>) -> Self {
        self.ide_diagnostics = ide_diagnostics;
        self
    }

    /// Run the whole pipeline.
    pub fn run(mut self) -> Result<PipelineResult, DriverError> {
        let framework: Box<dyn TestFramework> = match self.framework.take() {
            Some(framework) => framework,
            None => Box::new(SimpleTestFramework::new(self.toolchain.mangler().clone())),
        };

        let instrumentation = Instrumentation::record_functions(&self.program);
        let instrumented = self.compile_instrumented(&instrumentation)?;
        let libraries = self.load_dynamic_libraries();

        let tests = SingleTaskExecutor::new(self.diagnostics).execute("Searching tests", || {
            framework
                .finder()
                .find_tests(&self.program, self.diagnostics)
        });
        self.diagnostics.info(format!(
            "Found {} tests with {}",
            tests.len(),
            framework.name()
        ));

        let points = self.find_mutation_points(
            framework.as_ref(),
            &instrumentation,
            instrumented,
            &libraries,
            &tests,
        )?;
        let points = self.filter_mutations(points);
        self.diagnostics
            .info(format!("{} mutants survived filtering", points.len()));

        let results = self.run_mutations(framework.as_ref(), &libraries, &tests, &points)?;
        Ok(PipelineResult::new(tests, results, points))
    }

    fn workers(&self) -> usize {
        self.config.parallelization.workers.max(1)
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    fn compile_instrumented(
        &self,
        instrumentation: &Instrumentation,
    ) -> Result<Vec<ObjectFile>, DriverError> {
        let label = "Compiling instrumented code";
        let tasks = (0..self.workers())
            .map(|_| {
                InstrumentedCompilationTask::new(self.diagnostics, instrumentation, &self.toolchain)
            })
            .collect();
        let objects = TaskExecutor::new(self.diagnostics, label, tasks)
            .execute(self.program.bitcode().iter().collect());
        ensure_count(label, self.program.bitcode().len(), objects.len())?;
        Ok(objects)
    }

    fn load_dynamic_libraries(&self) -> Vec<ObjectFile> {
        SingleTaskExecutor::new(self.diagnostics).execute("Loading dynamic libraries", || {
            let mut libraries = Vec::new();
            for path in self.program.dynamic_library_paths() {
                match ObjectFile::read_from(path) {
                    Ok(object) => libraries.push(object),
                    Err(err) => self.diagnostics.warning(format!(
                        "Cannot load dynamic library '{}': {err}",
                        path.display()
                    )),
                }
            }
            libraries
        })
    }

    /// Coverage discovery through mutation point discovery. The JIT engine
    /// and the instrumented objects live only for the duration of this call.
    fn find_mutation_points(
        &self,
        framework: &dyn TestFramework,
        instrumentation: &Instrumentation,
        instrumented: Vec<ObjectFile>,
        libraries: &[ObjectFile],
        tests: &[Test],
    ) -> Result<Vec<Arc<MutationPoint>>, DriverError> {
        if tests.is_empty() {
            self.diagnostics
                .warning("No tests found, skipping mutation point discovery");
            return Ok(Vec::new());
        }

        let mut jit = JitEngine::new();
        SingleTaskExecutor::new(self.diagnostics).execute("Preparing original test run", || {
            let objects: Vec<&ObjectFile> = instrumented
                .iter()
                .chain(libraries)
                .chain(self.program.precompiled_objects())
                .collect();
            framework.runner().load_instrumented_program(&objects, &mut jit)
        })?;
        let image = jit.image().ok_or(DriverError::EngineNotLoaded)?;

        let tasks = (0..self.config.parallelization.test_execution_workers.max(1))
            .map(|_| {
                OriginalTestExecutionTask::new(
                    self.diagnostics,
                    instrumentation,
                    self.sandbox.as_ref(),
                    framework.runner(),
                    image,
                    self.timeout(),
                )
            })
            .collect();
        let reachable = TaskExecutor::new(self.diagnostics, "Running original tests", tasks)
            .execute(tests.iter().collect());
        drop(jit);
        drop(instrumented);

        let mut functions = merge_reachable_functions(reachable);
        for filter in &self.filters.function_filters {
            let tasks = (0..self.workers())
                .map(|_| FunctionFilterTask::new(filter.as_ref(), &self.program))
                .collect();
            functions = TaskExecutor::new(
                self.diagnostics,
                format!("Applying function filter: {}", filter.name()),
                tasks,
            )
            .execute(functions);
        }

        self.select_instructions(&mut functions);

        Ok(self.finder.get_mutation_points(
            self.diagnostics,
            &self.program,
            functions,
            self.workers(),
        ))
    }

    fn select_instructions(&self, functions: &mut [FunctionUnderTest]) {
        let tasks = (0..self.workers())
            .map(|_| {
                InstructionSelectionTask::new(&self.filters.instruction_filters, &self.program)
            })
            .collect();
        TaskExecutor::new(self.diagnostics, "Instruction selection", tasks)
            .execute(functions.iter_mut().collect());
    }

    fn filter_mutations(&self, mut points: Vec<Arc<MutationPoint>>) -> Vec<Arc<MutationPoint>> {
        for filter in &self.filters.mutation_filters {
            let tasks = (0..self.workers())
                .map(|_| MutationFilterTask::new(filter.as_ref()))
                .collect();
            points = TaskExecutor::new(
                self.diagnostics,
                format!("Applying filter: {}", filter.name()),
                tasks,
            )
            .execute(points);
        }
        points.sort_by(|a, b| a.id().cmp(b.id()));
        points
    }

    fn run_mutations(
        &mut self,
        framework: &dyn TestFramework,
        libraries: &[ObjectFile],
        tests: &[Test],
        points: &[Arc<MutationPoint>],
    ) -> Result<Vec<MutationResult>, DriverError> {
        if points.is_empty() {
            return Ok(Vec::new());
        }

        let mut results = if self.config.dry_run_enabled {
            self.dry_run_mutations(points)
        } else {
            self.normal_run_mutations(framework, libraries, tests, points)?
        };

        results.sort_by(|a, b| a.point().id().cmp(b.point().id()));
        if results.len() != points.len() {
            return Err(DriverError::MissingResults {
                expected: points.len(),
                actual: results.len(),
            });
        }
        if let Some(invalid) = results
            .iter()
            .find(|r| r.result().status == ExecutionStatus::Invalid)
        {
            return Err(DriverError::InvalidResult {
                point: invalid.point().id().to_string(),
                reason: invalid.result().stderr.clone(),
            });
        }
        Ok(results)
    }

    fn dry_run_mutations(&self, points: &[Arc<MutationPoint>]) -> Vec<MutationResult> {
        let tasks = (0..self.config.parallelization.mutant_execution_workers.max(1))
            .map(|_| DryRunMutantExecutionTask)
            .collect();
        TaskExecutor::new(self.diagnostics, "Running mutants (dry run)", tasks)
            .execute(points.to_vec())
    }

    fn normal_run_mutations(
        &mut self,
        framework: &dyn TestFramework,
        libraries: &[ObjectFile],
        tests: &[Test],
        points: &[Arc<MutationPoint>],
    ) -> Result<Vec<MutationResult>, DriverError> {
        let diagnostics = self.diagnostics;
        let workers = self.workers();

        SingleTaskExecutor::new(diagnostics).execute("Prepare mutations", || {
            for point in points {
                let bitcode = self
                    .program
                    .bitcode_for_mut(point.module())
                    .ok_or_else(|| ApplicationError::ForeignPoint {
                        point: point.id().to_string(),
                        module: point.module_name().to_string(),
                    })?;
                bitcode.add_mutation(Arc::clone(point))?;
            }
            Ok::<(), ApplicationError>(())
        })?;

        let label = "Cloning functions for mutation";
        let tasks = (0..workers).map(|_| CloneMutatedFunctionsTask::new()).collect();
        let cloned = TaskExecutor::new(diagnostics, label, tasks)
            .execute(self.program.bitcode_mut().iter_mut().collect());
        let mutated: BTreeSet<FunctionKey> = points
            .iter()
            .map(|p| FunctionKey::new(p.module(), p.function()))
            .collect();
        ensure_count(label, mutated.len(), cloned.len())?;

        let label = "Removing original functions";
        let tasks = (0..workers).map(|_| DeleteOriginalFunctionsTask::new()).collect();
        TaskExecutor::new(diagnostics, label, tasks)
            .execute(self.program.bitcode_mut().iter_mut().collect());
        ensure_stage(label, self.program.bitcode(), ApplicationStage::Excised)?;

        let label = "Redirect mutated functions";
        let tasks = (0..workers).map(|_| InsertMutationTrampolinesTask::new()).collect();
        TaskExecutor::new(diagnostics, label, tasks)
            .execute(self.program.bitcode_mut().iter_mut().collect());
        ensure_stage(label, self.program.bitcode(), ApplicationStage::Redirected)?;

        let label = "Applying mutations";
        let applied = TaskExecutor::new(diagnostics, label, vec![ApplyMutationTask::new(
            &mut self.program,
        )])
        .execute(points.to_vec());
        ensure_count(label, points.len(), applied.len())?;

        let label = "Compiling original code";
        let tasks = (0..workers)
            .map(|_| OriginalCompilationTask::new(diagnostics, &self.toolchain))
            .collect();
        let objects = TaskExecutor::new(diagnostics, label, tasks)
            .execute(self.program.bitcode().iter().collect());
        ensure_count(label, self.program.bitcode().len(), objects.len())?;

        let image = SingleTaskExecutor::new(diagnostics).execute("Linking mutants", || {
            let link_set: Vec<&ObjectFile> = objects
                .iter()
                .chain(libraries)
                .chain(self.program.precompiled_objects())
                .collect();
            Image::link(&link_set)
        })?;

        let tasks = (0..self.config.parallelization.mutant_execution_workers.max(1))
            .map(|_| {
                MutantExecutionTask::new(
                    self.sandbox.as_ref(),
                    framework.runner(),
                    &image,
                    tests,
                    self.timeout(),
                    self.ide_diagnostics.as_ref(),
                )
            })
            .collect();
        Ok(TaskExecutor::new(diagnostics, "Running mutants", tasks).execute(points.to_vec()))
    }
}

fn ensure_count(label: &str, expected: usize, actual: usize) -> Result<(), DriverError> {
    if expected == actual {
        return Ok(());
    }
    Err(DriverError::StageIncomplete {
        label: label.to_string(),
        expected,
        actual,
    })
}

/// Every module carrying mutations must have reached `stage`.
fn ensure_stage(
    label: &str,
    modules: &[Bitcode],
    stage: ApplicationStage,
) -> Result<(), DriverError> {
    let mutated: Vec<&Bitcode> = modules
        .iter()
        .filter(|b| !b.mutations().is_empty())
        .collect();
    let reached = mutated.iter().filter(|b| b.stage() == stage).count();
    ensure_count(label, mutated.len(), reached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Level;
    use crate::execution::InlineSandbox;
    use crate::ir::{BinaryOp, CmpPredicate, FunctionBuilder, Module};
    use crate::result::ExecutionResult;
    use crate::test_framework::{RunContext, TestFinder, TestRunner};

    /// `sum(a, b) = a + b` and `test_sum` asserting `sum(130, -7) == 123`.
    fn sum_program() -> Program {
        let mut sum = FunctionBuilder::new("sum", 2);
        sum.at("sum.c", 2, 12);
        let total = sum.binary(BinaryOp::Add, sum.param(0), sum.param(1));
        sum.ret(total);

        let mut test = FunctionBuilder::new("test_sum", 0);
        test.at("sum_test.c", 5, 3);
        let a = test.constant(130);
        let b = test.constant(-7);
        let got = test.call("sum", &[a, b]);
        let want = test.constant(123);
        let differs = test.compare(CmpPredicate::Ne, got, want);
        test.ret(differs);

        Program::new(vec![
            Module::new("sum.c").with_function(sum.finish().expect("sum should build")),
            Module::new("sum_test.c").with_function(test.finish().expect("test should build")),
        ])
    }

    fn config() -> Configuration {
        Configuration::default().with_workers(2).with_timeout_ms(2000)
    }

    fn add_to_sub() -> MutationsFinder {
        MutationsFinder::from_ids(&["add_to_sub"]).expect("id should resolve")
    }

    /// The built-in framework, except that every mutant run comes back
    /// `Invalid`.
    struct InvalidMutantRuns(SimpleTestFramework);

    impl TestFramework for InvalidMutantRuns {
        fn name(&self) -> &str {
            "invalid mutant runs"
        }

        fn finder(&self) -> &dyn TestFinder {
            self.0.finder()
        }

        fn runner(&self) -> &dyn TestRunner {
            self
        }
    }

    impl TestRunner for InvalidMutantRuns {
        fn load_instrumented_program(
            &self,
            objects: &[&ObjectFile],
            jit: &mut JitEngine,
        ) -> Result<(), LinkError> {
            self.0.runner().load_instrumented_program(objects, jit)
        }

        fn run_test(
            &self,
            image: &Image,
            test: &Test,
            context: &RunContext<'_>,
        ) -> ExecutionResult {
            match context.selector {
                Some(_) => ExecutionResult::invalid("selector was not observed"),
                None => self.0.runner().run_test(image, test, context),
            }
        }
    }

    struct PanickingIdeDiagnostics;

    impl IdeDiagnostics for PanickingIdeDiagnostics {
        fn report(&self, point: &MutationPoint, _killed: bool) {
            panic!("cannot report {}", point.id());
        }
    }

    #[test]
    fn sign_sensitive_test_kills_add_to_sub() {
        let config = config();
        let diagnostics = Diagnostics::capturing();
        let result = Driver::new(sum_program(), &config, &diagnostics)
            .with_sandbox(Box::new(InlineSandbox))
            .with_mutations_finder(
                MutationsFinder::from_ids(&["add_to_sub"]).expect("id should resolve"),
            )
            .run()
            .expect("pipeline should run");

        assert_eq!(result.tests().len(), 1);
        assert_eq!(result.mutation_points().len(), 1);
        let only = &result.mutation_results()[0];
        assert_eq!(only.point().id(), "add_to_sub:sum.c:sum:0");
        assert_eq!(only.result().status, ExecutionStatus::Failed);
        assert!(diagnostics.contains(Level::Debug, "Running mutants: 1/1"));
        assert_eq!(diagnostics.error_count(), 0);
    }

    #[test]
    fn dry_run_skips_compilation_of_mutants() {
        let config = config().with_dry_run(true);
        let diagnostics = Diagnostics::capturing();
        let result = Driver::new(sum_program(), &config, &diagnostics)
            .with_mutations_finder(
                MutationsFinder::from_ids(&["add_to_sub"]).expect("id should resolve"),
            )
            .run()
            .expect("pipeline should run");

        assert_eq!(result.mutation_results().len(), 1);
        assert_eq!(
            result.mutation_results()[0].result().status,
            ExecutionStatus::DryRun
        );
        assert!(diagnostics.contains(Level::Debug, "Running mutants (dry run): 1/1"));
        assert!(!diagnostics.contains(Level::Debug, "Compiling original code"));
    }

    #[test]
    fn unresolvable_link_set_is_fatal() {
        let mut orphan = FunctionBuilder::new("test_orphan", 0);
        let value = orphan.call("missing", &[]);
        orphan.ret(value);
        let program = Program::new(vec![
            Module::new("orphan.c").with_function(orphan.finish().expect("test should build")),
        ]);

        let config = config();
        let diagnostics = Diagnostics::capturing();
        let err = Driver::new(program, &config, &diagnostics)
            .run()
            .expect_err("link should fail");
        assert!(matches!(err, DriverError::Link(LinkError::UndefinedSymbol { .. })));
    }

    #[test]
    fn stage_checks_report_shortfall() {
        let err = ensure_count("Compiling original code", 3, 2).expect_err("should fail");
        assert_eq!(
            err.to_string(),
            "Compiling original code: expected 3 items, got 2"
        );
        assert!(
            ensure_stage("Removing original functions", &[], ApplicationStage::Excised).is_ok()
        );
    }

    #[test]
    fn missing_dynamic_library_only_warns() {
        let program =
            sum_program().with_dynamic_libraries(vec!["/nonexistent/libsum.irobj".into()]);
        let config = config();
        let diagnostics = Diagnostics::capturing();
        let result = Driver::new(program, &config, &diagnostics)
            .with_sandbox(Box::new(InlineSandbox))
            .with_mutations_finder(add_to_sub())
            .run()
            .expect("pipeline should run");

        assert_eq!(result.mutation_results().len(), 1);
        assert_eq!(
            result.mutation_results()[0].result().status,
            ExecutionStatus::Failed
        );
        assert!(diagnostics.contains(
            Level::Warning,
            "Cannot load dynamic library '/nonexistent/libsum.irobj'"
        ));
    }

    #[test]
    fn invalid_mutant_result_is_fatal() {
        let config = config();
        let diagnostics = Diagnostics::capturing();
        let err = Driver::new(sum_program(), &config, &diagnostics)
            .with_sandbox(Box::new(InlineSandbox))
            .with_test_framework(Box::new(InvalidMutantRuns(SimpleTestFramework::default())))
            .with_mutations_finder(add_to_sub())
            .run()
            .expect_err("an invalid result should abort the run");

        match err {
            DriverError::InvalidResult { point, reason } => {
                assert_eq!(point, "add_to_sub:sum.c:sum:0");
                assert_eq!(reason, "selector was not observed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn lost_worker_output_is_reported_as_missing_results() {
        let config = config().with_mutant_execution_workers(2);
        let diagnostics = Diagnostics::capturing();
        let err = Driver::new(sum_program(), &config, &diagnostics)
            .with_sandbox(Box::new(InlineSandbox))
            .with_ide_diagnostics(Box::new(PanickingIdeDiagnostics))
            .with_mutations_finder(add_to_sub())
            .run()
            .expect_err("a lost result should abort the run");

        assert!(matches!(
            err,
            DriverError::MissingResults {
                expected: 1,
                actual: 0
            }
        ));
        assert!(diagnostics.contains(Level::Error, "Running mutants: worker panicked"));
    }
}
