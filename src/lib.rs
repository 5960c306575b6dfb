//! # irmut
//!
//! `irmut` is a mutation-testing engine for programs delivered in a small
//! register-based IR. It is organized around:
//! - `driver`: the pipeline, from coverage discovery to mutant execution
//! - `program` / `ir`: the bitcode arena and the mutation application steps
//! - `toolchain` / `execution`: compilation, linking, interpretation and sandboxes
//! - `mutators` / `filters` / `test_framework`: the pluggable collaborators
//! - `parallelization`: the worker pools every stage runs on
//!
//! A run compiles every module once with all surviving mutants hosted side
//! by side behind trampolines; each test execution selects a single mutant
//! by id.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

pub mod config;
pub mod diagnostics;
pub mod driver;
pub mod execution;
pub mod filters;
pub mod ir;
pub mod mutation_point;
pub mod mutations_finder;
pub mod mutators;
pub mod parallelization;
pub mod program;
pub mod reachable;
pub mod report;
pub mod result;
pub mod test_framework;
pub mod toolchain;

pub use config::{ConfigError, Configuration, ParallelizationConfig};
pub use driver::{Driver, DriverError};
pub use result::{ExecutionResult, ExecutionStatus, MutationResult, PipelineResult};
