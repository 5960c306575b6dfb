use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use super::Watchdog;
use crate::result::ExecutionResult;

/// One sandboxed test run.
pub type SandboxJob<'a> = dyn Fn(&Watchdog) -> ExecutionResult + Sync + 'a;

/// Fault and time isolation for one test run.
///
/// The job must observe the [`Watchdog`] it is given. A panic inside the job
/// is reported as `Crashed`; exceeding `timeout` is reported as `Timedout`
/// for that run only. The returned running time is measured by the sandbox.
pub trait ProcessSandbox: Send + Sync {
    /// Run `job` under a wall-clock limit.
    fn run(&self, job: &SandboxJob<'_>, timeout: Duration) -> ExecutionResult;
}

/// Runs the job on the calling worker thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineSandbox;

impl ProcessSandbox for InlineSandbox {
    fn run(&self, job: &SandboxJob<'_>, timeout: Duration) -> ExecutionResult {
        let watchdog = Watchdog::new(timeout);
        let start = Instant::now();
        let result = match panic::catch_unwind(AssertUnwindSafe(|| job(&watchdog))) {
            Ok(result) => result,
            Err(payload) => ExecutionResult::crashed(panic_message(payload.as_ref())),
        };
        result.with_running_time(start.elapsed())
    }
}

/// Runs each job on a dedicated thread and cancels it once the deadline
/// passes. Siblings on other workers are unaffected.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogSandbox {
    stack_size: usize,
}

impl Default for WatchdogSandbox {
    fn default() -> Self {
        Self {
            stack_size: 16 * 1024 * 1024,
        }
    }
}

impl WatchdogSandbox {
    /// Sandbox whose job threads get `stack_size` bytes of stack.
    pub fn with_stack_size(stack_size: usize) -> Self {
        Self { stack_size }
    }
}

impl ProcessSandbox for WatchdogSandbox {
    fn run(&self, job: &SandboxJob<'_>, timeout: Duration) -> ExecutionResult {
        let watchdog = Watchdog::new(timeout);
        let start = Instant::now();

        let result = thread::scope(|scope| {
            let (tx, rx) = mpsc::channel();
            let watchdog = &watchdog;
            let spawned = thread::Builder::new()
                .name("irmut-sandbox".to_string())
                .stack_size(self.stack_size)
                .spawn_scoped(scope, move || {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(watchdog)))
                        .map_err(|payload| panic_message(payload.as_ref()));
                    let _ = tx.send(outcome);
                });
            if let Err(err) = spawned {
                return ExecutionResult::crashed(format!("cannot start sandbox thread: {err}"));
            }

            match rx.recv_timeout(timeout) {
                Ok(Ok(result)) => result,
                Ok(Err(message)) => ExecutionResult::crashed(message),
                Err(RecvTimeoutError::Timeout) => {
                    watchdog.cancel();
                    ExecutionResult::timed_out()
                }
                Err(RecvTimeoutError::Disconnected) => {
                    ExecutionResult::crashed("sandbox thread exited without a result")
                }
            }
        });

        result.with_running_time(start.elapsed())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}
