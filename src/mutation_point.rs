//! Candidate mutation sites.

use std::fmt;
use std::sync::Arc;

use crate::ir::SourceLocation;
use crate::mutators::Mutator;
use crate::program::ModuleId;
use crate::test_framework::TestId;

/// One (function, instruction, operator) triple eligible for mutation.
///
/// A point refers to its module by [`ModuleId`] only; the module arena in
/// [`Program`](crate::program::Program) owns the IR.
#[derive(Clone)]
pub struct MutationPoint {
    id: String,
    module: ModuleId,
    module_name: String,
    function: String,
    instruction: usize,
    mutator: Arc<dyn Mutator>,
    location: Option<SourceLocation>,
    reachable_tests: Vec<TestId>,
    distance: u32,
}

impl MutationPoint {
    /// Build a point. The id is derived from the operator and the site.
    pub fn new(
        mutator: Arc<dyn Mutator>,
        module: ModuleId,
        module_name: impl Into<String>,
        function: impl Into<String>,
        instruction: usize,
        location: Option<SourceLocation>,
    ) -> Self {
        let module_name = module_name.into();
        let function = function.into();
        let id = format!("{}:{}:{}:{}", mutator.id(), module_name, function, instruction);
        Self {
            id,
            module,
            module_name,
            function,
            instruction,
            mutator,
            location,
            reachable_tests: Vec::new(),
            distance: 0,
        }
    }

    /// Attach the tests that reach this point's function.
    pub fn with_reachability(mut self, tests: Vec<TestId>, distance: u32) -> Self {
        self.reachable_tests = tests;
        self.distance = distance;
        self
    }

    /// Stable identifier, also the mutant selector value.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Owning module.
    pub fn module(&self) -> ModuleId {
        self.module
    }

    /// Owning module's name.
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Mutated function.
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Instruction index inside the function body.
    pub fn instruction(&self) -> usize {
        self.instruction
    }

    /// Operator.
    pub fn mutator(&self) -> &Arc<dyn Mutator> {
        &self.mutator
    }

    /// Source location of the mutated instruction.
    pub fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }

    /// Tests reaching the mutated function, in discovery order.
    pub fn reachable_tests(&self) -> &[TestId] {
        &self.reachable_tests
    }

    /// Shortest call distance from any reaching test.
    pub fn distance(&self) -> u32 {
        self.distance
    }

    /// Name of the clone hosting this mutant. The `$` separator keeps it
    /// clear of ordinary C identifiers.
    pub fn clone_name(&self) -> String {
        let sanitized: String = self
            .id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{}$mut${}", self.function, sanitized)
    }
}

impl fmt::Debug for MutationPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationPoint")
            .field("id", &self.id)
            .field("module", &self.module)
            .field("location", &self.location)
            .field("reachable_tests", &self.reachable_tests)
            .field("distance", &self.distance)
            .finish()
    }
}

impl PartialEq for MutationPoint {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.module == other.module
    }
}

impl Eq for MutationPoint {}
