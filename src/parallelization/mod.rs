//! Fixed-size worker pools over pre-partitioned inputs.
//!
//! A [`TaskExecutor`] owns one task instance per worker. Inputs are split
//! into contiguous, disjoint slices; each worker feeds its slice through its
//! own task and the per-worker outputs are concatenated. Callers must not
//! rely on output order.

mod tasks;

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;

use thiserror::Error;

pub use tasks::{
    ApplyMutationTask, CloneMutatedFunctionsTask, DeleteOriginalFunctionsTask,
    DryRunMutantExecutionTask, FunctionFilterTask, InsertMutationTrampolinesTask,
    InstructionSelectionTask, InstrumentedCompilationTask, MutantExecutionTask,
    MutationFilterTask, OriginalCompilationTask, OriginalTestExecutionTask,
    SearchMutationPointsTask,
};

use crate::diagnostics::Diagnostics;
use crate::program::{ApplicationError, ModuleId};
use crate::toolchain::CompileError;

/// Failure while processing one input. Aborts the rest of that worker's
/// slice only.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Compilation failed.
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
    /// A mutation application step failed.
    #[error("mutation application error: {0}")]
    Application(#[from] ApplicationError),
    /// A point references a module that does not exist.
    #[error("unknown module {0:?}")]
    UnknownModule(ModuleId),
}

/// Unit of work run by every worker of a [`TaskExecutor`].
pub trait Task: Send {
    /// One queue item.
    type Input: Send;
    /// Items appended per input; use `std::convert::Infallible` for stages
    /// that only transform in place.
    type Output: Send;

    /// Process one input, appending any number of outputs.
    fn process(
        &mut self,
        input: Self::Input,
        outputs: &mut Vec<Self::Output>,
    ) -> Result<(), TaskError>;
}

/// Split `len` items into `workers` contiguous ranges whose sizes differ by
/// at most one. Earlier ranges get the extra items.
pub fn partition(len: usize, workers: usize) -> Vec<Range<usize>> {
    let workers = workers.max(1);
    let base = len / workers;
    let extra = len % workers;
    let mut start = 0;
    (0..workers)
        .map(|i| {
            let size = base + usize::from(i < extra);
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}

/// Runs one task instance per worker over a shared input sequence.
pub struct TaskExecutor<'d, T: Task> {
    diagnostics: &'d Diagnostics,
    label: String,
    tasks: Vec<T>,
}

impl<'d, T: Task> TaskExecutor<'d, T> {
    /// Executor with one worker per task.
    pub fn new(diagnostics: &'d Diagnostics, label: impl Into<String>, tasks: Vec<T>) -> Self {
        Self {
            diagnostics,
            label: label.into(),
            tasks,
        }
    }

    /// Run every input through the pool and collect all outputs.
    pub fn execute(self, inputs: Vec<T::Input>) -> Vec<T::Output> {
        let Self {
            diagnostics,
            label,
            tasks,
        } = self;
        let total = inputs.len();
        let started = Instant::now();

        if tasks.is_empty() {
            diagnostics.error(format!("{label}: no workers"));
            return Vec::new();
        }
        diagnostics.debug(format!("{label} ({total} items, {} workers)", tasks.len()));

        let mut slices = Vec::with_capacity(tasks.len());
        let mut inputs = inputs.into_iter();
        for range in partition(total, tasks.len()) {
            slices.push(inputs.by_ref().take(range.len()).collect::<Vec<_>>());
        }

        let done = AtomicUsize::new(0);
        let mut outputs = Vec::new();
        if tasks.len() == 1 {
            for (task, slice) in tasks.into_iter().zip(slices) {
                outputs.extend(run_worker(task, slice, diagnostics, &label, &done, total));
            }
        } else {
            thread::scope(|scope| {
                let handles: Vec<_> = tasks
                    .into_iter()
                    .zip(slices)
                    .filter(|(_, slice)| !slice.is_empty())
                    .map(|(task, slice)| {
                        let label = label.as_str();
                        let done = &done;
                        scope.spawn(move || {
                            run_worker(task, slice, diagnostics, label, done, total)
                        })
                    })
                    .collect();
                for handle in handles {
                    match handle.join() {
                        Ok(worker_outputs) => outputs.extend(worker_outputs),
                        Err(_) => diagnostics.error(format!("{label}: worker panicked")),
                    }
                }
            });
        }

        if total == 0 {
            diagnostics.progress(&label, 0, 0);
        }
        diagnostics.debug(format!(
            "{label}. Finished in {}ms",
            started.elapsed().as_millis()
        ));
        outputs
    }
}

fn run_worker<T: Task>(
    mut task: T,
    slice: Vec<T::Input>,
    diagnostics: &Diagnostics,
    label: &str,
    done: &AtomicUsize,
    total: usize,
) -> Vec<T::Output> {
    let mut outputs = Vec::new();
    for input in slice {
        if let Err(err) = task.process(input, &mut outputs) {
            diagnostics.error(format!("{label}: {err}"));
            break;
        }
        let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
        diagnostics.progress(label, finished, total);
    }
    outputs
}

/// Runs one labelled, inherently sequential step.
#[derive(Debug, Clone, Copy)]
pub struct SingleTaskExecutor<'d> {
    diagnostics: &'d Diagnostics,
}

impl<'d> SingleTaskExecutor<'d> {
    /// Executor reporting through `diagnostics`.
    pub fn new(diagnostics: &'d Diagnostics) -> Self {
        Self { diagnostics }
    }

    /// Run `job` once, reporting start and completion under `label`.
    pub fn execute<R>(&self, label: &str, job: impl FnOnce() -> R) -> R {
        let started = Instant::now();
        self.diagnostics.debug(label.to_string());
        let result = job();
        self.diagnostics.progress(label, 1, 1);
        self.diagnostics.debug(format!(
            "{label}. Finished in {}ms",
            started.elapsed().as_millis()
        ));
        result
    }
}
