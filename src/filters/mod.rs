//! Function, mutation-point and instruction filter chains.
//!
//! Each chain is applied in the order it was built. Filters are pure
//! predicates and must not assume anything about the other filters in the
//! chain.

mod builtin;

use std::sync::Arc;

pub use builtin::{DistanceFilter, FilePathFilter, FunctionNameFilter, NoDebugInfoFilter};

use crate::ir::{Function, Instruction};
use crate::mutation_point::MutationPoint;
use crate::reachable::FunctionUnderTest;

/// Drops whole functions before mutation points are searched.
pub trait FunctionFilter: Send + Sync {
    /// Name used in progress messages.
    fn name(&self) -> &str;
    /// True if `candidate` must not be mutated.
    fn should_skip(&self, candidate: &FunctionUnderTest, function: &Function) -> bool;
}

/// Drops individual mutation points.
pub trait MutationPointFilter: Send + Sync {
    /// Name used in progress messages.
    fn name(&self) -> &str;
    /// True if `point` must be discarded.
    fn should_skip(&self, point: &MutationPoint) -> bool;
}

/// Narrows the instructions of a surviving function.
pub trait InstructionFilter: Send + Sync {
    /// Name used in progress messages.
    fn name(&self) -> &str;
    /// True if `instruction` may host a mutation.
    fn valid_instruction(&self, instruction: &Instruction) -> bool;
}

/// The three ordered filter chains.
#[derive(Clone, Default)]
pub struct Filters {
    /// Function-level chain.
    pub function_filters: Vec<Arc<dyn FunctionFilter>>,
    /// Mutation-point chain.
    pub mutation_filters: Vec<Arc<dyn MutationPointFilter>>,
    /// Instruction chain.
    pub instruction_filters: Vec<Arc<dyn InstructionFilter>>,
}

impl Filters {
    /// Empty chains.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a function filter.
    pub fn with_function_filter(mut self, filter: impl FunctionFilter + 'static) -> Self {
        self.function_filters.push(Arc::new(filter));
        self
    }

    /// Append a mutation-point filter.
    pub fn with_mutation_filter(mut self, filter: impl MutationPointFilter + 'static) -> Self {
        self.mutation_filters.push(Arc::new(filter));
        self
    }

    /// Append an instruction filter.
    pub fn with_instruction_filter(mut self, filter: impl InstructionFilter + 'static) -> Self {
        self.instruction_filters.push(Arc::new(filter));
        self
    }

    /// True if every chain is empty.
    pub fn is_empty(&self) -> bool {
        self.function_filters.is_empty()
            && self.mutation_filters.is_empty()
            && self.instruction_filters.is_empty()
    }
}

impl std::fmt::Debug for Filters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filters")
            .field(
                "function_filters",
                &self.function_filters.iter().map(|x| x.name()).collect::<Vec<_>>(),
            )
            .field(
                "mutation_filters",
                &self.mutation_filters.iter().map(|x| x.name()).collect::<Vec<_>>(),
            )
            .field(
                "instruction_filters",
                &self.instruction_filters.iter().map(|x| x.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
