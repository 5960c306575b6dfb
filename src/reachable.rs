//! Coverage records and their merge into functions under test.

use std::collections::{BTreeMap, BTreeSet};

use crate::program::FunctionKey;
use crate::test_framework::TestId;

/// A function reached while running one test.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReachableFunction {
    /// Reached function.
    pub function: FunctionKey,
    /// Test that reached it.
    pub test: TestId,
    /// Call depth below the test entry point.
    pub distance: u32,
}

/// A function together with every test that reaches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionUnderTest {
    /// Function identity.
    pub function: FunctionKey,
    /// Reaching tests.
    pub tests: BTreeSet<TestId>,
    /// Shortest call distance from any reaching test.
    pub distance: u32,
    /// Instruction indices eligible for mutation. Empty until instruction
    /// selection runs.
    pub selected_instructions: Vec<usize>,
}

impl FunctionUnderTest {
    /// Entry for a function reached by nothing yet.
    pub fn new(function: FunctionKey, distance: u32) -> Self {
        Self {
            function,
            tests: BTreeSet::new(),
            distance,
            selected_instructions: Vec::new(),
        }
    }
}

/// Merge coverage records by function identity. The result is ordered by
/// function key and independent of the input order.
pub fn merge_reachable_functions(
    records: impl IntoIterator<Item = ReachableFunction>,
) -> Vec<FunctionUnderTest> {
    let mut merged: BTreeMap<FunctionKey, FunctionUnderTest> = BTreeMap::new();
    for record in records {
        let entry = merged
            .entry(record.function.clone())
            .or_insert_with(|| FunctionUnderTest::new(record.function, record.distance));
        entry.tests.insert(record.test);
        entry.distance = entry.distance.min(record.distance);
    }
    merged.into_values().collect()
}
