//! Linking object files into an executable image.

use std::collections::HashMap;

use thiserror::Error;

use super::object::{ObjectFile, ObjectOp};
use crate::ir::{BinaryOp, CmpPredicate, Reg};

/// Link failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    /// Two objects define the same symbol.
    #[error("duplicate symbol `{symbol}` in {first} and {second}")]
    DuplicateSymbol {
        /// Symbol.
        symbol: String,
        /// Object defining it first.
        first: String,
        /// Object defining it again.
        second: String,
    },
    /// A call or dispatch names a symbol nobody defines.
    #[error("undefined symbol `{symbol}` referenced from `{from}`")]
    UndefinedSymbol {
        /// Missing symbol.
        symbol: String,
        /// Referencing function.
        from: String,
    },
    /// Caller and callee disagree on the parameter count.
    #[error("`{from}` calls `{symbol}` with {given} arguments, it takes {expected}")]
    ArityMismatch {
        /// Callee.
        symbol: String,
        /// Caller.
        from: String,
        /// Declared parameters.
        expected: u32,
        /// Passed arguments.
        given: u32,
    },
}

/// Linked instruction: every symbolic reference is a function index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inst {
    /// `dst = value`
    Const {
        /// Destination.
        dst: Reg,
        /// Immediate.
        value: i64,
    },
    /// `dst = lhs <kind> rhs`
    Binary {
        /// Destination.
        dst: Reg,
        /// Operation.
        kind: BinaryOp,
        /// Left operand.
        lhs: Reg,
        /// Right operand.
        rhs: Reg,
    },
    /// `dst = lhs <pred> rhs`
    Compare {
        /// Destination.
        dst: Reg,
        /// Predicate.
        pred: CmpPredicate,
        /// Left operand.
        lhs: Reg,
        /// Right operand.
        rhs: Reg,
    },
    /// Direct call.
    Call {
        /// Result register.
        dst: Option<Reg>,
        /// Callee index.
        callee: usize,
        /// Argument registers.
        args: Vec<Reg>,
    },
    /// Jump.
    Jump(usize),
    /// Conditional jump.
    Branch {
        /// Condition.
        cond: Reg,
        /// Taken target.
        then_target: usize,
        /// Fallthrough target.
        else_target: usize,
    },
    /// Return.
    Return(Option<Reg>),
    /// Print.
    Print(Reg),
    /// Fault.
    Trap(String),
    /// No operation.
    Nop,
    /// Trampoline: forward to the body matching the selector.
    Dispatch {
        /// Pristine body.
        pristine: usize,
        /// `(mutation id, body)` pairs.
        targets: Vec<(String, usize)>,
    },
}

/// Function inside an [`Image`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedFunction {
    /// Symbol.
    pub symbol: String,
    /// Parameter count.
    pub params: u32,
    /// Frame size.
    pub registers: u32,
    /// Coverage probe.
    pub probe: Option<u32>,
    /// Code.
    pub code: Vec<Inst>,
}

/// Fully resolved program, immutable once linked and shareable between
/// threads.
#[derive(Debug, Clone, Default)]
pub struct Image {
    functions: Vec<LinkedFunction>,
    symbols: HashMap<String, usize>,
}

impl Image {
    /// Link `objects`, resolving every call and dispatch target.
    pub fn link(objects: &[&ObjectFile]) -> Result<Self, LinkError> {
        let mut symbols = HashMap::new();
        let mut owners: Vec<&str> = Vec::new();
        let mut defs = Vec::new();
        for object in objects {
            for function in &object.functions {
                if let Some(existing) = symbols.insert(function.symbol.clone(), defs.len()) {
                    return Err(LinkError::DuplicateSymbol {
                        symbol: function.symbol.clone(),
                        first: owners[existing].to_string(),
                        second: object.name.clone(),
                    });
                }
                owners.push(&object.name);
                defs.push(function);
            }
        }

        let resolve = |symbol: &str, from: &str| {
            symbols
                .get(symbol)
                .copied()
                .ok_or_else(|| LinkError::UndefinedSymbol {
                    symbol: symbol.to_string(),
                    from: from.to_string(),
                })
        };
        let check_arity = |callee: usize, given: usize, from: &str| {
            let expected = defs[callee].params;
            if expected as usize != given {
                return Err(LinkError::ArityMismatch {
                    symbol: defs[callee].symbol.clone(),
                    from: from.to_string(),
                    expected,
                    given: given as u32,
                });
            }
            Ok(())
        };

        let mut functions = Vec::with_capacity(defs.len());
        for def in &defs {
            let from = def.symbol.as_str();
            let mut code = Vec::with_capacity(def.code.len());
            for op in &def.code {
                let inst = match op {
                    ObjectOp::Const { dst, value } => Inst::Const {
                        dst: *dst,
                        value: *value,
                    },
                    ObjectOp::Binary {
                        dst,
                        kind,
                        lhs,
                        rhs,
                    } => Inst::Binary {
                        dst: *dst,
                        kind: *kind,
                        lhs: *lhs,
                        rhs: *rhs,
                    },
                    ObjectOp::Compare {
                        dst,
                        pred,
                        lhs,
                        rhs,
                    } => Inst::Compare {
                        dst: *dst,
                        pred: *pred,
                        lhs: *lhs,
                        rhs: *rhs,
                    },
                    ObjectOp::Call { dst, symbol, args } => {
                        let callee = resolve(symbol, from)?;
                        check_arity(callee, args.len(), from)?;
                        Inst::Call {
                            dst: *dst,
                            callee,
                            args: args.clone(),
                        }
                    }
                    ObjectOp::Jump(target) => Inst::Jump(*target),
                    ObjectOp::Branch {
                        cond,
                        then_target,
                        else_target,
                    } => Inst::Branch {
                        cond: *cond,
                        then_target: *then_target,
                        else_target: *else_target,
                    },
                    ObjectOp::Return(value) => Inst::Return(*value),
                    ObjectOp::Print(value) => Inst::Print(*value),
                    ObjectOp::Trap(message) => Inst::Trap(message.clone()),
                    ObjectOp::Nop => Inst::Nop,
                    ObjectOp::Dispatch { pristine, targets } => {
                        let pristine = resolve(pristine, from)?;
                        check_arity(pristine, def.params as usize, from)?;
                        let mut resolved = Vec::with_capacity(targets.len());
                        for (mutation_id, symbol) in targets {
                            let body = resolve(symbol, from)?;
                            check_arity(body, def.params as usize, from)?;
                            resolved.push((mutation_id.clone(), body));
                        }
                        Inst::Dispatch {
                            pristine,
                            targets: resolved,
                        }
                    }
                };
                code.push(inst);
            }
            functions.push(LinkedFunction {
                symbol: def.symbol.clone(),
                params: def.params,
                registers: def.registers,
                probe: def.probe,
                code,
            });
        }

        Ok(Self { functions, symbols })
    }

    /// Index of a symbol.
    pub fn symbol(&self, symbol: &str) -> Option<usize> {
        self.symbols.get(symbol).copied()
    }

    /// Function by index.
    pub fn function(&self, index: usize) -> Option<&LinkedFunction> {
        self.functions.get(index)
    }

    /// All functions in link order.
    pub fn functions(&self) -> &[LinkedFunction] {
        &self.functions
    }
}

/// The single image loaded for coverage discovery. Dropping the engine
/// releases the instrumented code.
#[derive(Debug, Default)]
pub struct JitEngine {
    image: Option<Image>,
}

impl JitEngine {
    /// Empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Link and load `objects`, replacing anything loaded before.
    pub fn load(&mut self, objects: &[&ObjectFile]) -> Result<(), LinkError> {
        self.image = Some(Image::link(objects)?);
        Ok(())
    }

    /// Loaded image.
    pub fn image(&self) -> Option<&Image> {
        self.image.as_ref()
    }

    /// Drop the loaded image.
    pub fn unload(&mut self) {
        self.image = None;
    }
}
