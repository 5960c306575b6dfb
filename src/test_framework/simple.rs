use super::{RunContext, Test, TestFinder, TestFramework, TestId, TestRunner};
use crate::diagnostics::Diagnostics;
use crate::execution::{Machine, Trap};
use crate::program::Program;
use crate::result::{ExecutionResult, ExecutionStatus};
use crate::toolchain::{Image, JitEngine, LinkError, Mangler, ObjectFile};

const TEST_PREFIX: &str = "test_";

/// Every zero-parameter function named `test_*` is a test. Returning 0
/// passes, any other value fails and a trap crashes.
#[derive(Debug, Clone, Default)]
pub struct SimpleTestFramework {
    mangler: Mangler,
}

impl SimpleTestFramework {
    /// Framework locating entry points through `mangler`.
    pub fn new(mangler: Mangler) -> Self {
        Self { mangler }
    }
}

impl TestFramework for SimpleTestFramework {
    fn name(&self) -> &str {
        "simple"
    }

    fn finder(&self) -> &dyn TestFinder {
        self
    }

    fn runner(&self) -> &dyn TestRunner {
        self
    }
}

impl TestFinder for SimpleTestFramework {
    fn find_tests(&self, program: &Program, diagnostics: &Diagnostics) -> Vec<Test> {
        let mut tests = Vec::new();
        for bitcode in program.bitcode() {
            for function in &bitcode.module().functions {
                if !function.name.starts_with(TEST_PREFIX) {
                    continue;
                }
                if function.params != 0 {
                    diagnostics.warning(format!(
                        "Skipping {}: tests take no parameters",
                        function.name
                    ));
                    continue;
                }
                tests.push(Test {
                    id: TestId(tests.len()),
                    name: function.name.clone(),
                    symbol: self.mangler.mangle(&function.name),
                    module: bitcode.id(),
                    location: function.location.clone(),
                });
            }
        }
        tests
    }
}

impl TestRunner for SimpleTestFramework {
    fn load_instrumented_program(
        &self,
        objects: &[&ObjectFile],
        jit: &mut JitEngine,
    ) -> Result<(), LinkError> {
        jit.load(objects)
    }

    fn run_test(&self, image: &Image, test: &Test, context: &RunContext<'_>) -> ExecutionResult {
        let Some(entry) = image.symbol(&test.symbol) else {
            return ExecutionResult::invalid(format!("test symbol `{}` not found", test.symbol));
        };

        let mut machine = Machine::new(image)
            .with_selector(context.selector)
            .with_trace(context.trace)
            .with_watchdog(context.watchdog);
        let outcome = machine.call(entry, &[]);
        let exit_status = outcome.as_ref().ok().copied();

        let mut result = match outcome {
            Ok(0) => ExecutionResult::new(ExecutionStatus::Passed),
            Ok(_) => ExecutionResult::new(ExecutionStatus::Failed),
            Err(Trap::Timeout) => ExecutionResult::timed_out(),
            Err(trap) => ExecutionResult::crashed(trap.to_string()),
        };
        result.exit_status = exit_status;
        result.stdout = machine.stdout().to_string();
        result
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::execution::Watchdog;
    use crate::ir::{CmpPredicate, FunctionBuilder, Module};
    use crate::toolchain::Compiler;

    fn program() -> Program {
        let mut pass = FunctionBuilder::new("test_pass", 0);
        pass.at("t.c", 1, 1);
        let zero = pass.constant(0);
        pass.ret(zero);

        let mut fail = FunctionBuilder::new("test_fail", 0);
        let one = fail.constant(1);
        let two = fail.constant(2);
        let eq = fail.compare(CmpPredicate::Ne, one, two);
        fail.ret(eq);

        let mut crash = FunctionBuilder::new("test_crash", 0);
        crash.trap("assertion failed");

        let mut helper = FunctionBuilder::new("test_helper_with_args", 1);
        helper.ret_void();

        let mut not_a_test = FunctionBuilder::new("check", 0);
        not_a_test.ret_void();

        Program::new(vec![
            Module::new("t.c")
                .with_function(pass.finish().expect("pass builds"))
                .with_function(fail.finish().expect("fail builds"))
                .with_function(crash.finish().expect("crash builds"))
                .with_function(helper.finish().expect("helper builds"))
                .with_function(not_a_test.finish().expect("check builds")),
        ])
    }

    #[test]
    fn finder_selects_parameterless_test_functions() {
        let framework = SimpleTestFramework::new(Mangler::with_prefix("_"));
        let diagnostics = Diagnostics::capturing();
        let tests = framework.finder().find_tests(&program(), &diagnostics);
        let names: Vec<&str> = tests.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["test_pass", "test_fail", "test_crash"]);
        assert_eq!(tests[2].id, TestId(2));
        assert_eq!(tests[0].symbol, "_test_pass");
        assert!(tests[0].location.is_some());
        assert_eq!(diagnostics.warning_count(), 1);
    }

    #[test]
    fn runner_maps_outcomes_to_statuses() {
        let mangler = Mangler::with_prefix("");
        let framework = SimpleTestFramework::new(mangler.clone());
        let program = program();
        let tests = framework
            .finder()
            .find_tests(&program, &Diagnostics::new());
        let object = Compiler::new(mangler)
            .compile(&program.bitcode()[0], None)
            .expect("program should compile");
        let image = Image::link(&[&object]).expect("program should link");
        let watchdog = Watchdog::new(Duration::from_secs(5));
        let context = RunContext {
            selector: None,
            watchdog: &watchdog,
            trace: None,
        };

        let statuses: Vec<ExecutionStatus> = tests
            .iter()
            .map(|t| framework.runner().run_test(&image, t, &context).status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                ExecutionStatus::Passed,
                ExecutionStatus::Failed,
                ExecutionStatus::Crashed
            ]
        );

        let missing = Test {
            symbol: "test_gone".to_string(),
            ..tests[0].clone()
        };
        assert_eq!(
            framework.runner().run_test(&image, &missing, &context).status,
            ExecutionStatus::Invalid
        );
    }
}
