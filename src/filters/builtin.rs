use super::{FunctionFilter, InstructionFilter, MutationPointFilter};
use crate::ir::{Function, Instruction, Op};
use crate::mutation_point::MutationPoint;
use crate::reachable::FunctionUnderTest;

/// Skips code without a source location: functions without a declaration
/// position, instructions without a location and points derived from them.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDebugInfoFilter;

impl FunctionFilter for NoDebugInfoFilter {
    fn name(&self) -> &str {
        "no debug info"
    }

    fn should_skip(&self, _candidate: &FunctionUnderTest, function: &Function) -> bool {
        function.location.is_none()
    }
}

impl MutationPointFilter for NoDebugInfoFilter {
    fn name(&self) -> &str {
        "no debug info"
    }

    fn should_skip(&self, point: &MutationPoint) -> bool {
        point.location().is_none()
    }
}

impl InstructionFilter for NoDebugInfoFilter {
    fn name(&self) -> &str {
        "no debug info"
    }

    fn valid_instruction(&self, instruction: &Instruction) -> bool {
        instruction.location.is_some() && !matches!(instruction.op, Op::Dispatch { .. })
    }
}

/// Skips functions whose name contains any excluded fragment.
#[derive(Debug, Default, Clone)]
pub struct FunctionNameFilter {
    excluded: Vec<String>,
}

impl FunctionNameFilter {
    /// Filter excluding `fragments`.
    pub fn excluding<S: Into<String>>(fragments: impl IntoIterator<Item = S>) -> Self {
        Self {
            excluded: fragments.into_iter().map(Into::into).collect(),
        }
    }
}

impl FunctionFilter for FunctionNameFilter {
    fn name(&self) -> &str {
        "function name"
    }

    fn should_skip(&self, _candidate: &FunctionUnderTest, function: &Function) -> bool {
        self.excluded
            .iter()
            .any(|fragment| function.name.contains(fragment.as_str()))
    }
}

/// Filters mutation points by source file. Exclusions win; when inclusions
/// are present a point must match one of them.
#[derive(Debug, Default, Clone)]
pub struct FilePathFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl FilePathFilter {
    /// Empty filter, keeps everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only files containing `fragment` (or another include).
    pub fn include(mut self, fragment: impl Into<String>) -> Self {
        self.include.push(fragment.into());
        self
    }

    /// Drop files containing `fragment`.
    pub fn exclude(mut self, fragment: impl Into<String>) -> Self {
        self.exclude.push(fragment.into());
        self
    }

    fn path_of(point: &MutationPoint) -> &str {
        point
            .location()
            .map(|l| l.file.as_str())
            .unwrap_or_else(|| point.module_name())
    }
}

impl MutationPointFilter for FilePathFilter {
    fn name(&self) -> &str {
        "file path"
    }

    fn should_skip(&self, point: &MutationPoint) -> bool {
        let path = Self::path_of(point);
        if self.exclude.iter().any(|f| path.contains(f.as_str())) {
            return true;
        }
        !self.include.is_empty() && !self.include.iter().any(|f| path.contains(f.as_str()))
    }
}

/// Skips functions reached only deeper than `max_distance` calls below a
/// test entry point.
#[derive(Debug, Clone, Copy)]
pub struct DistanceFilter {
    max_distance: u32,
}

impl DistanceFilter {
    /// Filter with an inclusive limit.
    pub fn new(max_distance: u32) -> Self {
        Self { max_distance }
    }
}

impl FunctionFilter for DistanceFilter {
    fn name(&self) -> &str {
        "distance"
    }

    fn should_skip(&self, candidate: &FunctionUnderTest, _function: &Function) -> bool {
        candidate.distance > self.max_distance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::SourceLocation;
    use crate::mutation_point::tests::sample_point;
    use crate::program::{FunctionKey, ModuleId};

    fn function(name: &str, located: bool) -> Function {
        Function {
            name: name.to_string(),
            params: 0,
            body: vec![Instruction::new(Op::Return { value: None })],
            location: located.then(|| SourceLocation::new("src/a.c", 1, 1)),
        }
    }

    fn candidate(distance: u32) -> FunctionUnderTest {
        FunctionUnderTest::new(FunctionKey::new(ModuleId(0), "f"), distance)
    }

    #[test]
    fn no_debug_info_applies_to_every_level() {
        let filter = NoDebugInfoFilter;
        assert!(FunctionFilter::should_skip(&filter, &candidate(1), &function("f", false)));
        assert!(!FunctionFilter::should_skip(&filter, &candidate(1), &function("f", true)));

        assert!(MutationPointFilter::should_skip(&filter, &sample_point(None)));
        let located = sample_point(Some(SourceLocation::new("sum.c", 1, 1)));
        assert!(!MutationPointFilter::should_skip(&filter, &located));

        let mut inst = Instruction::new(Op::Nop);
        assert!(!filter.valid_instruction(&inst));
        inst.location = Some(SourceLocation::new("a.c", 1, 1));
        assert!(filter.valid_instruction(&inst));
    }

    #[test]
    fn name_and_distance_filters() {
        let by_name = FunctionNameFilter::excluding(["log_", "debug"]);
        assert!(by_name.should_skip(&candidate(1), &function("log_value", true)));
        assert!(!by_name.should_skip(&candidate(1), &function("sum", true)));

        let by_distance = DistanceFilter::new(2);
        assert!(!by_distance.should_skip(&candidate(2), &function("f", true)));
        assert!(by_distance.should_skip(&candidate(3), &function("f", true)));
    }

    #[test]
    fn file_path_exclusions_win_over_inclusions() {
        let in_src = sample_point(Some(SourceLocation::new("src/sum.c", 1, 1)));
        let in_vendor = sample_point(Some(SourceLocation::new("src/vendor/sum.c", 1, 1)));
        let unlocated = sample_point(None);

        let filter = FilePathFilter::new().include("src/").exclude("vendor");
        assert!(!filter.should_skip(&in_src));
        assert!(filter.should_skip(&in_vendor));
        // Falls back to the module name, "sum.c".
        assert!(filter.should_skip(&unlocated));
        assert!(!FilePathFilter::new().should_skip(&unlocated));
    }
}
