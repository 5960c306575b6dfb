//! Summary and rendering of a [`PipelineResult`].

use serde::Serialize;

use crate::result::{ExecutionStatus, MutationResult, PipelineResult};

/// Supported output formats for run reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// Markdown summary.
    Markdown,
    /// JSON summary with all mutants inline.
    Json,
}

/// Per-mutant report entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutantReport {
    /// Mutation point id.
    pub id: String,
    /// Operator id.
    pub mutator: String,
    /// Operator description.
    pub description: String,
    /// Module the point lives in.
    pub module: String,
    /// Mutated function.
    pub function: String,
    /// Source file, if known.
    pub source_file: Option<String>,
    /// Source line, if known.
    pub source_line: Option<u32>,
    /// Execution status.
    pub status: ExecutionStatus,
    /// Whether the mutant was killed.
    pub killed: bool,
    /// Tests reaching the point.
    pub tests: usize,
    /// Duration in milliseconds.
    pub duration_ms: u64,
    /// Fault description from the controlling run.
    pub stderr: Option<String>,
}

impl From<&MutationResult> for MutantReport {
    fn from(result: &MutationResult) -> Self {
        let point = result.point();
        let execution = result.result();
        Self {
            id: point.id().to_string(),
            mutator: point.mutator().id().to_string(),
            description: point.mutator().description().to_string(),
            module: point.module_name().to_string(),
            function: point.function().to_string(),
            source_file: point.location().map(|l| l.file.clone()),
            source_line: point.location().map(|l| l.line),
            status: execution.status,
            killed: result.is_killed(),
            tests: point.reachable_tests().len(),
            duration_ms: execution.running_time.as_millis() as u64,
            stderr: (!execution.stderr.is_empty()).then(|| execution.stderr.clone()),
        }
    }
}

/// Aggregated run counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Discovered tests.
    pub tests: usize,
    /// Mutation results.
    pub total: usize,
    /// Killed mutants (failed, crashed or timed out).
    pub killed: usize,
    /// Surviving mutants.
    pub survived: usize,
    /// Killed by a failing test.
    pub failed: usize,
    /// Killed by a fault.
    pub crashed: usize,
    /// Killed by the wall-clock limit.
    pub timedout: usize,
    /// Not executed (dry run).
    pub dry_run: usize,
    /// Killed over executed mutants, percentage.
    pub mutation_score: f64,
}

impl RunSummary {
    /// Build summary from a pipeline result.
    pub fn from_result(result: &PipelineResult) -> Self {
        let mut out = Self {
            tests: result.tests().len(),
            total: result.mutation_results().len(),
            killed: 0,
            survived: 0,
            failed: 0,
            crashed: 0,
            timedout: 0,
            dry_run: 0,
            mutation_score: 0.0,
        };

        for mutant in result.mutation_results() {
            match mutant.result().status {
                ExecutionStatus::Passed => out.survived += 1,
                ExecutionStatus::Failed => out.failed += 1,
                ExecutionStatus::Crashed => out.crashed += 1,
                ExecutionStatus::Timedout => out.timedout += 1,
                ExecutionStatus::DryRun => out.dry_run += 1,
                ExecutionStatus::Invalid => {}
            }
        }
        out.killed = out.failed + out.crashed + out.timedout;

        let executed = out.killed + out.survived;
        out.mutation_score = if executed > 0 {
            (out.killed as f64) * 100.0 / (executed as f64)
        } else {
            100.0
        };
        out
    }
}

/// Render run report in requested format.
pub fn render_report(result: &PipelineResult, format: ReportFormat) -> String {
    let summary = RunSummary::from_result(result);
    let mutants: Vec<MutantReport> = result
        .mutation_results()
        .iter()
        .map(MutantReport::from)
        .collect();
    let tests: Vec<&str> = result.tests().iter().map(|t| t.name.as_str()).collect();

    match format {
        ReportFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
            "summary": summary,
            "tests": tests,
            "mutants": mutants,
        }))
        .expect("report JSON should serialize"),
        ReportFormat::Markdown => {
            let mut out = String::from("# Mutation Testing Report\n\n");

            out.push_str("## Summary\n\n| metric | count |\n|---|---:|\n");
            out.push_str(&format!("| tests | {} |\n", summary.tests));
            out.push_str(&format!("| mutants | {} |\n", summary.total));
            out.push_str(&format!("| killed | {} |\n", summary.killed));
            out.push_str(&format!("| survived | {} |\n", summary.survived));
            out.push_str(&format!("| failed | {} |\n", summary.failed));
            out.push_str(&format!("| crashed | {} |\n", summary.crashed));
            out.push_str(&format!("| timedout | {} |\n", summary.timedout));
            out.push_str(&format!("| dry run | {} |\n", summary.dry_run));
            out.push_str(&format!(
                "| mutation score | {:.2}% |\n",
                summary.mutation_score
            ));

            let survivors: Vec<&MutantReport> = mutants
                .iter()
                .filter(|m| m.status == ExecutionStatus::Passed)
                .collect();
            if !survivors.is_empty() {
                out.push_str("\n## Survived\n\n");
                for m in survivors {
                    let location = match (&m.source_file, m.source_line) {
                        (Some(file), Some(line)) => format!("{file}:{line}"),
                        _ => m.module.clone(),
                    };
                    out.push_str(&format!(
                        "- `{}` {} in `{}` ({})\n",
                        m.mutator, m.description, m.function, location
                    ));
                }
            }

            if !mutants.is_empty() {
                out.push_str("\n## Mutants\n\n");
                out.push_str("| id | status | tests | duration |\n|---|---|---:|---:|\n");
                for m in &mutants {
                    out.push_str(&format!(
                        "| {} | {} | {} | {}ms |\n",
                        m.id,
                        m.status.as_str(),
                        m.tests,
                        m.duration_ms
                    ));
                }
            }

            out
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ir::SourceLocation;
    use crate::mutation_point::tests::sample_point;
    use crate::result::ExecutionResult;

    fn result_with_statuses(statuses: &[ExecutionStatus]) -> PipelineResult {
        let point = Arc::new(sample_point(Some(SourceLocation::new("sum.c", 2, 12))));
        let results = statuses
            .iter()
            .map(|status| MutationResult::new(Arc::clone(&point), ExecutionResult::new(*status)))
            .collect();
        PipelineResult::new(Vec::new(), results, vec![point])
    }

    #[test]
    fn summary_counts_all_statuses() {
        let result = result_with_statuses(&[
            ExecutionStatus::Passed,
            ExecutionStatus::Failed,
            ExecutionStatus::Crashed,
            ExecutionStatus::Timedout,
            ExecutionStatus::DryRun,
        ]);
        let summary = RunSummary::from_result(&result);
        assert_eq!(summary.total, 5);
        assert_eq!(summary.killed, 3);
        assert_eq!(summary.survived, 1);
        assert_eq!(summary.dry_run, 1);
        assert!((summary.mutation_score - 75.0).abs() < 1e-12);
    }

    #[test]
    fn summary_handles_no_executed_mutants() {
        let summary = RunSummary::from_result(&result_with_statuses(&[ExecutionStatus::DryRun]));
        assert_eq!(summary.mutation_score, 100.0);
    }

    #[test]
    fn report_renders_json_and_markdown() {
        let result = result_with_statuses(&[ExecutionStatus::Passed]);
        let md = render_report(&result, ReportFormat::Markdown);
        assert!(md.contains("# Mutation Testing Report"));
        assert!(md.contains("| survived | 1 |"));
        assert!(md.contains("- `add_to_sub`"));
        assert!(md.contains("(sum.c:2)"));

        let json = render_report(&result, ReportFormat::Json);
        assert!(json.contains("\"survived\": 1"));
        assert!(json.contains("\"status\": \"passed\""));
        assert!(json.contains("\"id\": \"add_to_sub:sum.c:sum:0\""));
    }
}
