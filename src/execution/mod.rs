//! Running linked images: the interpreter, coverage instrumentation and the
//! sandboxes that isolate test runs.

mod instrumentation;
mod machine;
mod sandbox;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;

pub use instrumentation::{CallTrace, Instrumentation};
pub use machine::{DEFAULT_MAX_DEPTH, Machine};
pub use sandbox::{InlineSandbox, ProcessSandbox, SandboxJob, WatchdogSandbox};

/// Process-level faults raised while interpreting.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Trap {
    /// Signed division or remainder by zero.
    #[error("division by zero in `{0}`")]
    DivisionByZero(String),
    /// Explicit `trap` instruction.
    #[error("trap in `{function}`: {message}")]
    Explicit {
        /// Trapping function.
        function: String,
        /// Trap message.
        message: String,
    },
    /// Call depth limit reached.
    #[error("stack overflow: call depth exceeded {0}")]
    StackOverflow(usize),
    /// The watchdog expired.
    #[error("execution cancelled by watchdog")]
    Timeout,
    /// Entry call with the wrong number of arguments.
    #[error("`{symbol}` takes {expected} arguments, got {given}")]
    ArityMismatch {
        /// Called symbol.
        symbol: String,
        /// Declared parameters.
        expected: u32,
        /// Passed arguments.
        given: usize,
    },
    /// Entry symbol is not in the image.
    #[error("undefined symbol `{0}`")]
    UndefinedSymbol(String),
    /// Code that a verified compiler never produces.
    #[error("malformed code in `{function}`: {detail}")]
    Malformed {
        /// Function.
        function: String,
        /// What went wrong.
        detail: String,
    },
}

/// Wall-clock limit of one sandboxed run, observed cooperatively.
#[derive(Debug)]
pub struct Watchdog {
    deadline: Option<Instant>,
    cancelled: AtomicBool,
}

impl Watchdog {
    /// Watchdog expiring `timeout` from now.
    pub fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Watchdog that only expires when cancelled.
    pub fn unlimited() -> Self {
        Self {
            deadline: None,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Expire immediately.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// True once cancelled or past the deadline.
    pub fn is_expired(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watchdog_expires_on_deadline_or_cancel() {
        assert!(Watchdog::new(Duration::ZERO).is_expired());
        let unlimited = Watchdog::unlimited();
        assert!(!unlimited.is_expired());
        unlimited.cancel();
        assert!(unlimited.is_expired());
        assert!(!Watchdog::new(Duration::from_secs(60)).is_expired());
    }
}
