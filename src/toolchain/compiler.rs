//! Bitcode to object code.

use std::collections::BTreeSet;

use thiserror::Error;

use super::Mangler;
use super::object::{CompiledFunction, ObjectFile, ObjectOp};
use crate::execution::Instrumentation;
use crate::ir::{Function, Op};
use crate::program::Bitcode;

/// Verification failures found while compiling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    /// Function has no instructions.
    #[error("{module}: function `{function}` has an empty body")]
    EmptyBody {
        /// Module name.
        module: String,
        /// Function name.
        function: String,
    },
    /// Last instruction does not end the body.
    #[error("{module}: function `{function}` does not end with a terminator")]
    MissingTerminator {
        /// Module name.
        module: String,
        /// Function name.
        function: String,
    },
    /// A jump or branch leaves the body.
    #[error("{module}: function `{function}` instruction {instruction} jumps to {target}")]
    BranchOutOfRange {
        /// Module name.
        module: String,
        /// Function name.
        function: String,
        /// Offending instruction.
        instruction: usize,
        /// Target index.
        target: usize,
    },
    /// Two definitions share a name.
    #[error("{module}: function `{function}` is defined twice")]
    DuplicateFunction {
        /// Module name.
        module: String,
        /// Function name.
        function: String,
    },
}

/// Lowers bitcode modules into object files.
#[derive(Debug, Clone)]
pub struct Compiler {
    mangler: Mangler,
}

impl Compiler {
    /// Compiler emitting symbols through `mangler`.
    pub fn new(mangler: Mangler) -> Self {
        Self { mangler }
    }

    /// Verify and lower one module. With `instrumentation`, each function
    /// carries its coverage probe.
    pub fn compile(
        &self,
        bitcode: &Bitcode,
        instrumentation: Option<&Instrumentation>,
    ) -> Result<ObjectFile, CompileError> {
        let module = bitcode.module();
        let mut seen = BTreeSet::new();
        let mut functions = Vec::with_capacity(module.functions.len());

        for function in &module.functions {
            if !seen.insert(function.name.as_str()) {
                return Err(CompileError::DuplicateFunction {
                    module: module.name.clone(),
                    function: function.name.clone(),
                });
            }
            verify(&module.name, function)?;
            functions.push(CompiledFunction {
                symbol: self.mangler.mangle(&function.name),
                params: function.params,
                registers: function.register_count(),
                probe: instrumentation.and_then(|i| i.probe_for(bitcode.id(), &function.name)),
                code: function
                    .body
                    .iter()
                    .map(|inst| self.lower(&inst.op))
                    .collect(),
            });
        }

        Ok(ObjectFile {
            name: module.name.clone(),
            source_hash: bitcode.current_hash(),
            instrumented: instrumentation.is_some(),
            functions,
        })
    }

    fn lower(&self, op: &Op) -> ObjectOp {
        match op {
            Op::Const { dst, value } => ObjectOp::Const {
                dst: *dst,
                value: *value,
            },
            Op::Binary {
                dst,
                kind,
                lhs,
                rhs,
            } => ObjectOp::Binary {
                dst: *dst,
                kind: *kind,
                lhs: *lhs,
                rhs: *rhs,
            },
            Op::Compare {
                dst,
                pred,
                lhs,
                rhs,
            } => ObjectOp::Compare {
                dst: *dst,
                pred: *pred,
                lhs: *lhs,
                rhs: *rhs,
            },
            Op::Call { dst, callee, args } => ObjectOp::Call {
                dst: *dst,
                symbol: self.mangler.mangle(callee),
                args: args.clone(),
            },
            Op::Jump { target } => ObjectOp::Jump(*target),
            Op::Branch {
                cond,
                then_target,
                else_target,
            } => ObjectOp::Branch {
                cond: *cond,
                then_target: *then_target,
                else_target: *else_target,
            },
            Op::Return { value } => ObjectOp::Return(*value),
            Op::Print { value } => ObjectOp::Print(*value),
            Op::Trap { message } => ObjectOp::Trap(message.clone()),
            Op::Nop => ObjectOp::Nop,
            Op::Dispatch { pristine, targets } => ObjectOp::Dispatch {
                pristine: self.mangler.mangle(pristine),
                targets: targets
                    .iter()
                    .map(|t| (t.mutation_id.clone(), self.mangler.mangle(&t.callee)))
                    .collect(),
            },
        }
    }
}

fn verify(module: &str, function: &Function) -> Result<(), CompileError> {
    let Some(last) = function.body.last() else {
        return Err(CompileError::EmptyBody {
            module: module.to_string(),
            function: function.name.clone(),
        });
    };
    if !last.op.is_terminator() {
        return Err(CompileError::MissingTerminator {
            module: module.to_string(),
            function: function.name.clone(),
        });
    }

    let len = function.body.len();
    for (index, inst) in function.body.iter().enumerate() {
        let targets = match &inst.op {
            Op::Jump { target } => vec![*target],
            Op::Branch {
                then_target,
                else_target,
                ..
            } => vec![*then_target, *else_target],
            _ => continue,
        };
        if let Some(target) = targets.into_iter().find(|t| *t >= len) {
            return Err(CompileError::BranchOutOfRange {
                module: module.to_string(),
                function: function.name.clone(),
                instruction: index,
                target,
            });
        }
    }
    Ok(())
}
