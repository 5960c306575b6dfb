use crate::diagnostics::Diagnostics;
use crate::execution::Instrumentation;
use crate::parallelization::{Task, TaskError};
use crate::program::Bitcode;
use crate::toolchain::{ObjectFile, Toolchain};

/// Compiles pristine modules with coverage probes.
pub struct InstrumentedCompilationTask<'a> {
    diagnostics: &'a Diagnostics,
    instrumentation: &'a Instrumentation,
    toolchain: &'a Toolchain,
}

impl<'a> InstrumentedCompilationTask<'a> {
    /// Task compiling with `instrumentation`.
    pub fn new(
        diagnostics: &'a Diagnostics,
        instrumentation: &'a Instrumentation,
        toolchain: &'a Toolchain,
    ) -> Self {
        Self {
            diagnostics,
            instrumentation,
            toolchain,
        }
    }
}

impl<'a> Task for InstrumentedCompilationTask<'a> {
    type Input = &'a Bitcode;
    type Output = ObjectFile;

    fn process(
        &mut self,
        bitcode: &'a Bitcode,
        outputs: &mut Vec<ObjectFile>,
    ) -> Result<(), TaskError> {
        let object =
            self.toolchain
                .compile(bitcode, Some(self.instrumentation), self.diagnostics)?;
        outputs.push(object);
        Ok(())
    }
}

/// Compiles modules, mutated or not, without instrumentation.
pub struct OriginalCompilationTask<'a> {
    diagnostics: &'a Diagnostics,
    toolchain: &'a Toolchain,
}

impl<'a> OriginalCompilationTask<'a> {
    /// Task compiling through `toolchain`.
    pub fn new(diagnostics: &'a Diagnostics, toolchain: &'a Toolchain) -> Self {
        Self {
            diagnostics,
            toolchain,
        }
    }
}

impl<'a> Task for OriginalCompilationTask<'a> {
    type Input = &'a Bitcode;
    type Output = ObjectFile;

    fn process(
        &mut self,
        bitcode: &'a Bitcode,
        outputs: &mut Vec<ObjectFile>,
    ) -> Result<(), TaskError> {
        outputs.push(self.toolchain.compile(bitcode, None, self.diagnostics)?);
        Ok(())
    }
}
