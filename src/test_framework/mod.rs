//! Test discovery and execution contracts, plus the built-in framework.

mod simple;

use serde::{Deserialize, Serialize};

pub use simple::SimpleTestFramework;

use crate::diagnostics::Diagnostics;
use crate::execution::{CallTrace, Watchdog};
use crate::ir::SourceLocation;
use crate::program::{ModuleId, Program};
use crate::result::ExecutionResult;
use crate::toolchain::{Image, JitEngine, LinkError, ObjectFile};

/// Index of a test in discovery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TestId(pub usize);

/// One discovered test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Test {
    /// Position in discovery order.
    pub id: TestId,
    /// Test name.
    pub name: String,
    /// Entry point symbol.
    pub symbol: String,
    /// Defining module.
    pub module: ModuleId,
    /// Declaration position.
    pub location: Option<SourceLocation>,
}

/// Per-run parameters handed to a [`TestRunner`].
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    /// Active mutant, if any.
    pub selector: Option<&'a str>,
    /// Wall-clock limit to observe.
    pub watchdog: &'a Watchdog,
    /// Coverage sink for instrumented runs.
    pub trace: Option<&'a CallTrace>,
}

/// Discovers tests in a program.
pub trait TestFinder: Send + Sync {
    /// Tests in a stable order; `TestId`s are indices into the result.
    fn find_tests(&self, program: &Program, diagnostics: &Diagnostics) -> Vec<Test>;
}

/// Loads program variants and executes single tests.
pub trait TestRunner: Send + Sync {
    /// Link the instrumented objects into the engine.
    fn load_instrumented_program(
        &self,
        objects: &[&ObjectFile],
        jit: &mut JitEngine,
    ) -> Result<(), LinkError>;

    /// Run `test` against `image`.
    fn run_test(&self, image: &Image, test: &Test, context: &RunContext<'_>) -> ExecutionResult;
}

/// A finder and a runner for one test-authoring convention.
pub trait TestFramework: Send + Sync {
    /// Framework name.
    fn name(&self) -> &str;
    /// Test discovery.
    fn finder(&self) -> &dyn TestFinder;
    /// Test execution.
    fn runner(&self) -> &dyn TestRunner;
}
