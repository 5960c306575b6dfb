use super::{BinaryOp, CmpPredicate, Function, Instruction, IrError, Op, Reg, SourceLocation};

/// Forward-referenceable jump target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Incremental function construction with fresh registers and labels.
///
/// ```
/// use irmut::ir::{BinaryOp, FunctionBuilder};
///
/// let mut f = FunctionBuilder::new("sum", 2);
/// f.at("sum.c", 3, 11);
/// let total = f.binary(BinaryOp::Add, f.param(0), f.param(1));
/// f.ret(total);
/// let sum = f.finish().unwrap();
/// assert_eq!(sum.body.len(), 2);
/// ```
#[derive(Debug)]
pub struct FunctionBuilder {
    name: String,
    params: u32,
    next_reg: Reg,
    body: Vec<Instruction>,
    labels: Vec<Option<usize>>,
    // (instruction index, label, which target slot)
    fixups: Vec<(usize, Label, Slot)>,
    location: Option<SourceLocation>,
    declared_at: Option<SourceLocation>,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Jump,
    Then,
    Else,
}

impl FunctionBuilder {
    /// Start a function with `params` parameters.
    pub fn new(name: impl Into<String>, params: u32) -> Self {
        Self {
            name: name.into(),
            params,
            next_reg: params,
            body: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
            location: None,
            declared_at: None,
        }
    }

    /// Set the location attached to subsequently emitted instructions. The
    /// first location set also becomes the function's declaration location.
    pub fn at(&mut self, file: &str, line: u32, column: u32) -> &mut Self {
        let location = SourceLocation::new(file, line, column);
        if self.declared_at.is_none() {
            self.declared_at = Some(location.clone());
        }
        self.location = Some(location);
        self
    }

    /// Emit subsequent instructions without a location.
    pub fn without_location(&mut self) -> &mut Self {
        self.location = None;
        self
    }

    /// Register holding parameter `index`.
    pub fn param(&self, index: u32) -> Reg {
        assert!(index < self.params, "parameter {index} out of range");
        index
    }

    fn fresh(&mut self) -> Reg {
        let reg = self.next_reg;
        self.next_reg += 1;
        reg
    }

    fn emit(&mut self, op: Op) -> usize {
        self.body.push(Instruction {
            op,
            location: self.location.clone(),
        });
        self.body.len() - 1
    }

    /// `constant value` into a fresh register.
    pub fn constant(&mut self, value: i64) -> Reg {
        let dst = self.fresh();
        self.emit(Op::Const { dst, value });
        dst
    }

    /// `lhs <kind> rhs` into a fresh register.
    pub fn binary(&mut self, kind: BinaryOp, lhs: Reg, rhs: Reg) -> Reg {
        let dst = self.fresh();
        self.emit(Op::Binary { dst, kind, lhs, rhs });
        dst
    }

    /// `lhs <kind> rhs` into an existing register; loops update their
    /// induction variables this way.
    pub fn binary_into(&mut self, dst: Reg, kind: BinaryOp, lhs: Reg, rhs: Reg) {
        self.emit(Op::Binary { dst, kind, lhs, rhs });
    }

    /// `lhs <pred> rhs` into a fresh register.
    pub fn compare(&mut self, pred: CmpPredicate, lhs: Reg, rhs: Reg) -> Reg {
        let dst = self.fresh();
        self.emit(Op::Compare { dst, pred, lhs, rhs });
        dst
    }

    /// Call returning a value.
    pub fn call(&mut self, callee: &str, args: &[Reg]) -> Reg {
        let dst = self.fresh();
        self.emit(Op::Call {
            dst: Some(dst),
            callee: callee.to_string(),
            args: args.to_vec(),
        });
        dst
    }

    /// Call whose result is discarded.
    pub fn call_void(&mut self, callee: &str, args: &[Reg]) {
        self.emit(Op::Call {
            dst: None,
            callee: callee.to_string(),
            args: args.to_vec(),
        });
    }

    /// Print a register.
    pub fn print(&mut self, value: Reg) {
        self.emit(Op::Print { value });
    }

    /// Allocate an unbound label.
    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the next emitted instruction.
    pub fn bind(&mut self, label: Label) -> Result<(), IrError> {
        let slot = &mut self.labels[label.0];
        if slot.is_some() {
            return Err(IrError::LabelRebound {
                function: self.name.clone(),
                label: label.0,
            });
        }
        *slot = Some(self.body.len());
        Ok(())
    }

    /// Unconditional jump.
    pub fn jump(&mut self, target: Label) {
        let at = self.emit(Op::Jump { target: 0 });
        self.fixups.push((at, target, Slot::Jump));
    }

    /// Conditional branch.
    pub fn branch(&mut self, cond: Reg, then_label: Label, else_label: Label) {
        let at = self.emit(Op::Branch {
            cond,
            then_target: 0,
            else_target: 0,
        });
        self.fixups.push((at, then_label, Slot::Then));
        self.fixups.push((at, else_label, Slot::Else));
    }

    /// Return a register.
    pub fn ret(&mut self, value: Reg) {
        self.emit(Op::Return { value: Some(value) });
    }

    /// Return 0.
    pub fn ret_void(&mut self) {
        self.emit(Op::Return { value: None });
    }

    /// Process-level fault.
    pub fn trap(&mut self, message: &str) {
        self.emit(Op::Trap {
            message: message.to_string(),
        });
    }

    /// Resolve labels and produce the function.
    pub fn finish(mut self) -> Result<Function, IrError> {
        for (at, label, slot) in std::mem::take(&mut self.fixups) {
            let Some(target) = self.labels[label.0] else {
                return Err(IrError::UnboundLabel {
                    function: self.name,
                    label: label.0,
                });
            };
            match (&mut self.body[at].op, slot) {
                (Op::Jump { target: t }, Slot::Jump) => *t = target,
                (Op::Branch { then_target, .. }, Slot::Then) => *then_target = target,
                (Op::Branch { else_target, .. }, Slot::Else) => *else_target = target,
                _ => unreachable!("fixup recorded for a non-branch instruction"),
            }
        }
        Ok(Function {
            name: self.name,
            params: self.params,
            body: self.body,
            location: self.declared_at,
        })
    }
}
