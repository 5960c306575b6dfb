use std::convert::Infallible;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::mutation_point::MutationPoint;
use crate::parallelization::{Task, TaskError};
use crate::program::{Bitcode, FunctionKey, Program};

/// Clone step over every module. Emits the mutated functions.
#[derive(Debug, Default)]
pub struct CloneMutatedFunctionsTask<'a> {
    modules: PhantomData<&'a mut Bitcode>,
}

impl CloneMutatedFunctionsTask<'_> {
    /// New task.
    pub fn new() -> Self {
        Self {
            modules: PhantomData,
        }
    }
}

impl<'a> Task for CloneMutatedFunctionsTask<'a> {
    type Input = &'a mut Bitcode;
    type Output = FunctionKey;

    fn process(
        &mut self,
        bitcode: &'a mut Bitcode,
        outputs: &mut Vec<FunctionKey>,
    ) -> Result<(), TaskError> {
        let module = bitcode.id();
        let names = bitcode.clone_mutated_functions()?;
        outputs.extend(names.into_iter().map(|name| FunctionKey::new(module, name)));
        Ok(())
    }
}

/// Excise step over every module.
#[derive(Debug, Default)]
pub struct DeleteOriginalFunctionsTask<'a> {
    modules: PhantomData<&'a mut Bitcode>,
}

impl DeleteOriginalFunctionsTask<'_> {
    /// New task.
    pub fn new() -> Self {
        Self {
            modules: PhantomData,
        }
    }
}

impl<'a> Task for DeleteOriginalFunctionsTask<'a> {
    type Input = &'a mut Bitcode;
    type Output = Infallible;

    fn process(
        &mut self,
        bitcode: &'a mut Bitcode,
        _outputs: &mut Vec<Infallible>,
    ) -> Result<(), TaskError> {
        bitcode.delete_original_functions()?;
        Ok(())
    }
}

/// Trampoline step over every module.
#[derive(Debug, Default)]
pub struct InsertMutationTrampolinesTask<'a> {
    modules: PhantomData<&'a mut Bitcode>,
}

impl InsertMutationTrampolinesTask<'_> {
    /// New task.
    pub fn new() -> Self {
        Self {
            modules: PhantomData,
        }
    }
}

impl<'a> Task for InsertMutationTrampolinesTask<'a> {
    type Input = &'a mut Bitcode;
    type Output = Infallible;

    fn process(
        &mut self,
        bitcode: &'a mut Bitcode,
        _outputs: &mut Vec<Infallible>,
    ) -> Result<(), TaskError> {
        bitcode.insert_trampolines()?;
        Ok(())
    }
}

/// Apply step. Points of one module share its IR, so this task holds the
/// whole program and runs as the only worker.
pub struct ApplyMutationTask<'a> {
    program: &'a mut Program,
}

impl<'a> ApplyMutationTask<'a> {
    /// Task rewriting clones inside `program`.
    pub fn new(program: &'a mut Program) -> Self {
        Self { program }
    }
}

impl Task for ApplyMutationTask<'_> {
    type Input = Arc<MutationPoint>;
    type Output = Arc<MutationPoint>;

    fn process(
        &mut self,
        point: Arc<MutationPoint>,
        outputs: &mut Vec<Arc<MutationPoint>>,
    ) -> Result<(), TaskError> {
        let bitcode = self
            .program
            .bitcode_for_mut(point.module())
            .ok_or(TaskError::UnknownModule(point.module()))?;
        bitcode.apply_mutation(&point)?;
        outputs.push(point);
        Ok(())
    }
}
