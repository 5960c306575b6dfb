//! Mutation point discovery over functions under test.

use std::sync::Arc;

use crate::diagnostics::Diagnostics;
use crate::mutation_point::MutationPoint;
use crate::mutators::{Mutator, MutatorError, Mutators};
use crate::parallelization::{SearchMutationPointsTask, TaskExecutor};
use crate::program::Program;
use crate::reachable::FunctionUnderTest;

/// Expands functions under test into mutation points using a fixed operator
/// set.
#[derive(Debug, Clone)]
pub struct MutationsFinder {
    mutators: Vec<Arc<dyn Mutator>>,
}

impl Default for MutationsFinder {
    fn default() -> Self {
        let empty: [&str; 0] = [];
        Self {
            mutators: Mutators::from_ids(&empty).unwrap_or_default(),
        }
    }
}

impl MutationsFinder {
    /// Finder using `mutators`.
    pub fn new(mutators: Vec<Arc<dyn Mutator>>) -> Self {
        Self { mutators }
    }

    /// Finder using catalog ids and group names.
    pub fn from_ids<S: AsRef<str>>(ids: &[S]) -> Result<Self, MutatorError> {
        Ok(Self::new(Mutators::from_ids(ids)?))
    }

    /// Operators in use.
    pub fn mutators(&self) -> &[Arc<dyn Mutator>] {
        &self.mutators
    }

    /// Every (selected instruction, applicable operator) pair of `functions`,
    /// ordered by point id.
    pub fn get_mutation_points(
        &self,
        diagnostics: &Diagnostics,
        program: &Program,
        functions: Vec<FunctionUnderTest>,
        workers: usize,
    ) -> Vec<Arc<MutationPoint>> {
        let tasks = (0..workers.max(1))
            .map(|_| SearchMutationPointsTask::new(program, &self.mutators))
            .collect();
        let mut points =
            TaskExecutor::new(diagnostics, "Searching mutants across functions", tasks)
                .execute(functions);
        points.sort_by(|a, b| a.id().cmp(b.id()));
        points.into_iter().map(Arc::new).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, CmpPredicate, FunctionBuilder, Module};
    use crate::program::{FunctionKey, ModuleId};
    use crate::test_framework::TestId;

    #[test]
    fn points_cover_selected_instructions_only() {
        let mut f = FunctionBuilder::new("f", 2);
        f.at("f.c", 1, 1);
        let sum = f.binary(BinaryOp::Add, f.param(0), f.param(1));
        let diff = f.binary(BinaryOp::Sub, sum, f.param(1));
        let lt = f.compare(CmpPredicate::Slt, diff, sum);
        f.ret(lt);
        let program = Program::new(vec![Module::new("f.c").with_function(
            f.finish().expect("f should build"),
        )]);

        let mut candidate = FunctionUnderTest::new(FunctionKey::new(ModuleId(0), "f"), 1);
        candidate.tests.insert(TestId(0));
        candidate.selected_instructions = vec![0, 2, 3];

        let finder = MutationsFinder::from_ids(&["add_to_sub", "sub_to_add", "negate_condition"])
            .expect("ids should resolve");
        let points = finder.get_mutation_points(
            &Diagnostics::new(),
            &program,
            vec![candidate],
            2,
        );
        let ids: Vec<&str> = points.iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec!["add_to_sub:f.c:f:0", "negate_condition:f.c:f:2"]);
        assert_eq!(points[0].reachable_tests(), &[TestId(0)]);
        assert_eq!(points[0].distance(), 1);
    }
}
