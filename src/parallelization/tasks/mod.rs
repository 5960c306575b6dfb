//! The pipeline stages, each expressed as a [`Task`](super::Task).

mod application;
mod compilation;
mod discovery;
mod execution;

pub use application::{
    ApplyMutationTask, CloneMutatedFunctionsTask, DeleteOriginalFunctionsTask,
    InsertMutationTrampolinesTask,
};
pub use compilation::{InstrumentedCompilationTask, OriginalCompilationTask};
pub use discovery::{
    FunctionFilterTask, InstructionSelectionTask, MutationFilterTask, OriginalTestExecutionTask,
    SearchMutationPointsTask,
};
pub use execution::{DryRunMutantExecutionTask, MutantExecutionTask};
