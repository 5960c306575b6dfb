//! Register-based intermediate representation that programs under test are
//! delivered in.
//!
//! Every register holds an `i64`. A function with `params` parameters receives
//! its arguments in registers `0..params`. Bodies are flat instruction lists;
//! control flow jumps to instruction indices.

mod builder;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use builder::{FunctionBuilder, Label};

/// Register index.
pub type Reg = u32;

/// IR construction errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IrError {
    /// A label was referenced but never bound to an instruction.
    #[error("function `{function}` references unbound label {label}")]
    UnboundLabel {
        /// Function being built.
        function: String,
        /// Label number.
        label: usize,
    },
    /// A label was bound twice.
    #[error("function `{function}` binds label {label} twice")]
    LabelRebound {
        /// Function being built.
        function: String,
        /// Label number.
        label: usize,
    },
}

/// Position in the original source the IR was lowered from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Source file path.
    pub file: String,
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

impl SourceLocation {
    /// Build a location.
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Two-operand integer operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    /// Wrapping addition.
    Add,
    /// Wrapping subtraction.
    Sub,
    /// Wrapping multiplication.
    Mul,
    /// Signed division; traps on zero.
    SDiv,
    /// Signed remainder; traps on zero.
    SRem,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise xor.
    Xor,
    /// Shift left.
    Shl,
    /// Logical shift right.
    LShr,
    /// Arithmetic shift right.
    AShr,
}

impl BinaryOp {
    /// Source-level spelling.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::SDiv => "/",
            Self::SRem => "%",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
            Self::Shl => "<<",
            Self::LShr | Self::AShr => ">>",
        }
    }
}

/// Signed comparison predicate. Comparisons produce 1 or 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpPredicate {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Slt,
    /// `<=`
    Sle,
    /// `>`
    Sgt,
    /// `>=`
    Sge,
}

impl CmpPredicate {
    /// Logical negation of the predicate.
    pub fn negated(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Slt => Self::Sge,
            Self::Sge => Self::Slt,
            Self::Sle => Self::Sgt,
            Self::Sgt => Self::Sle,
        }
    }

    /// Source-level spelling.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Slt => "<",
            Self::Sle => "<=",
            Self::Sgt => ">",
            Self::Sge => ">=",
        }
    }
}

/// One selectable body behind a trampoline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchTarget {
    /// Mutation point id that selects this body.
    pub mutation_id: String,
    /// Function implementing the mutant.
    pub callee: String,
}

/// Instruction payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    /// `dst = value`
    Const {
        /// Destination register.
        dst: Reg,
        /// Immediate.
        value: i64,
    },
    /// `dst = lhs <op> rhs`
    Binary {
        /// Destination register.
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
        /// Destination register.
        dst: Reg,
        /// Predicate.
        pred: CmpPredicate,
        /// Left operand.
        lhs: Reg,
        /// Right operand.
        rhs: Reg,
    },
    /// Call a function by name.
    Call {
        /// Register receiving the return value, if used.
        #[serde(default)]
        dst: Option<Reg>,
        /// Callee name.
        callee: String,
        /// Argument registers.
        #[serde(default)]
        args: Vec<Reg>,
    },
    /// Unconditional jump.
    Jump {
        /// Target instruction index.
        target: usize,
    },
    /// Jump to `then_target` if `cond != 0`, else to `else_target`.
    Branch {
        /// Condition register.
        cond: Reg,
        /// Taken target.
        then_target: usize,
        /// Fallthrough target.
        else_target: usize,
    },
    /// Return from the function; no value returns 0.
    Return {
        /// Returned register.
        #[serde(default)]
        value: Option<Reg>,
    },
    /// Append a register value to captured stdout.
    Print {
        /// Printed register.
        value: Reg,
    },
    /// Abort the execution as a process-level fault.
    Trap {
        /// Fault description.
        message: String,
    },
    /// No operation.
    Nop,
    /// Trampoline body: forward the arguments to the body selected by the
    /// active mutant selector, or to `pristine` when no target matches.
    Dispatch {
        /// Unmutated body.
        pristine: String,
        /// Mutant bodies.
        targets: Vec<DispatchTarget>,
    },
}

impl Op {
    /// True for instructions that end a body.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Jump { .. }
                | Self::Branch { .. }
                | Self::Return { .. }
                | Self::Trap { .. }
                | Self::Dispatch { .. }
        )
    }

    /// Registers read or written by this instruction.
    pub fn registers(&self) -> Vec<Reg> {
        match self {
            Self::Const { dst, .. } => vec![*dst],
            Self::Binary { dst, lhs, rhs, .. } | Self::Compare { dst, lhs, rhs, .. } => {
                vec![*dst, *lhs, *rhs]
            }
            Self::Call { dst, args, .. } => dst.iter().chain(args.iter()).copied().collect(),
            Self::Branch { cond, .. } => vec![*cond],
            Self::Return { value } => value.iter().copied().collect(),
            Self::Print { value } => vec![*value],
            Self::Jump { .. } | Self::Trap { .. } | Self::Nop | Self::Dispatch { .. } => Vec::new(),
        }
    }
}

/// Instruction with optional debug location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Payload.
    #[serde(flatten)]
    pub op: Op,
    /// Source position, absent for synthesized code.
    #[serde(default)]
    pub location: Option<SourceLocation>,
}

impl Instruction {
    /// Instruction without a location.
    pub fn new(op: Op) -> Self {
        Self { op, location: None }
    }
}

/// Function definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    /// Unmangled name.
    pub name: String,
    /// Number of parameters.
    #[serde(default)]
    pub params: u32,
    /// Instruction list.
    pub body: Vec<Instruction>,
    /// Declaration position.
    #[serde(default)]
    pub location: Option<SourceLocation>,
}

impl Function {
    /// Registers needed to execute this body.
    pub fn register_count(&self) -> u32 {
        self.body
            .iter()
            .flat_map(|inst| inst.op.registers())
            .map(|reg| reg + 1)
            .max()
            .unwrap_or(0)
            .max(self.params)
    }

    /// Copy of this function under another name.
    pub fn cloned_as(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

/// A translation unit: the unit of compilation and of mutation bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Module {
    /// Module name, typically the source path.
    pub name: String,
    /// Function definitions.
    pub functions: Vec<Function>,
}

impl Module {
    /// Empty module.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    /// Builder-style function append.
    pub fn with_function(mut self, function: Function) -> Self {
        self.functions.push(function);
        self
    }

    /// Look up a function by name.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Mutable lookup by name.
    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    /// Remove a function by name, returning it.
    pub fn remove_function(&mut self, name: &str) -> Option<Function> {
        let index = self.functions.iter().position(|f| f.name == name)?;
        Some(self.functions.remove(index))
    }

    /// Parse a module from JSON.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_count_covers_params_and_body() {
        let function = Function {
            name: "f".to_string(),
            params: 2,
            body: vec![
                Instruction::new(Op::Const { dst: 5, value: 1 }),
                Instruction::new(Op::Return { value: Some(5) }),
            ],
            location: None,
        };
        assert_eq!(function.register_count(), 6);

        let leaf = Function {
            name: "g".to_string(),
            params: 3,
            body: vec![Instruction::new(Op::Return { value: None })],
            location: None,
        };
        assert_eq!(leaf.register_count(), 3);
    }

    #[test]
    fn predicate_negation_is_an_involution() {
        for pred in [
            CmpPredicate::Eq,
            CmpPredicate::Ne,
            CmpPredicate::Slt,
            CmpPredicate::Sle,
            CmpPredicate::Sgt,
            CmpPredicate::Sge,
        ] {
            assert_eq!(pred.negated().negated(), pred);
            assert_ne!(pred.negated(), pred);
        }
    }

    #[test]
    fn module_json_uses_tagged_ops() {
        let json = r#"{
            "name": "m.c",
            "functions": [{
                "name": "f",
                "params": 1,
                "body": [
                    {"op": "const", "dst": 1, "value": 7},
                    {
                        "op": "return",
                        "value": 1,
                        "location": {"file": "m.c", "line": 2, "column": 3}
                    }
                ]
            }]
        }"#;
        let module = Module::from_json(json).expect("module json should parse");
        let f = module.function("f").expect("function should exist");
        assert_eq!(f.body[0].op, Op::Const { dst: 1, value: 7 });
        assert_eq!(
            f.body[1].location,
            Some(SourceLocation::new("m.c", 2, 3))
        );
    }
}
