//! Mutation operators.
//!
//! The pipeline only depends on the [`Mutator`] contract. The catalog below
//! is plain data: each operator is a named list of IR rewrite rules.

use std::fmt::Debug;
use std::sync::Arc;

use thiserror::Error;

use crate::ir::{BinaryOp, CmpPredicate, Op};

/// Operator lookup errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MutatorError {
    /// Neither an operator id nor a group name.
    #[error("unknown mutator or group `{0}`")]
    Unknown(String),
}

/// A mutation operator.
pub trait Mutator: Debug + Send + Sync {
    /// Stable identifier, part of every mutation point id.
    fn id(&self) -> &str;
    /// What the operator does.
    fn description(&self) -> &str;
    /// Source-level replacement text.
    fn replacement(&self) -> &str;
    /// Message shown for a mutant of this operator.
    fn diagnostics(&self) -> &str;
    /// Whether `op` is a site for this operator.
    fn can_be_applied(&self, op: &Op) -> bool;
    /// Rewrite `op` in place. Returns false if `op` is not a site.
    fn apply(&self, op: &mut Op) -> bool;
}

/// Single IR rewrite rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrMutation {
    /// Replace one binary operation with another.
    SwapBinary {
        /// Matched operation.
        from: BinaryOp,
        /// Replacement.
        to: BinaryOp,
    },
    /// Replace every comparison with its negation.
    NegatePredicate,
    /// Replace a value-returning call with a constant.
    ReplaceCallWith(i64),
    /// Drop a call whose result is unused.
    RemoveVoidCall,
}

impl IrMutation {
    fn matches(&self, op: &Op) -> bool {
        match (self, op) {
            (Self::SwapBinary { from, .. }, Op::Binary { kind, .. }) => kind == from,
            (Self::NegatePredicate, Op::Compare { .. }) => true,
            (Self::ReplaceCallWith(_), Op::Call { dst, .. }) => dst.is_some(),
            (Self::RemoveVoidCall, Op::Call { dst, .. }) => dst.is_none(),
            _ => false,
        }
    }

    fn rewrite(&self, op: &mut Op) -> bool {
        if !self.matches(op) {
            return false;
        }
        match (self, op) {
            (Self::SwapBinary { to, .. }, Op::Binary { kind, .. }) => *kind = *to,
            (Self::NegatePredicate, Op::Compare { pred, .. }) => *pred = pred.negated(),
            (Self::ReplaceCallWith(value), op @ Op::Call { .. }) => {
                if let Op::Call { dst: Some(dst), .. } = op {
                    let dst = *dst;
                    *op = Op::Const { dst, value: *value };
                }
            }
            (Self::RemoveVoidCall, op @ Op::Call { .. }) => *op = Op::Nop,
            _ => return false,
        }
        true
    }
}

/// Operator defined entirely by its rewrite rules. The first matching rule
/// is applied.
#[derive(Debug, Clone)]
pub struct TrivialMutator {
    id: &'static str,
    description: &'static str,
    replacement: &'static str,
    diagnostics: &'static str,
    rules: Vec<IrMutation>,
}

impl TrivialMutator {
    /// Build an operator.
    pub fn new(
        id: &'static str,
        description: &'static str,
        replacement: &'static str,
        diagnostics: &'static str,
        rules: Vec<IrMutation>,
    ) -> Self {
        Self {
            id,
            description,
            replacement,
            diagnostics,
            rules,
        }
    }
}

impl Mutator for TrivialMutator {
    fn id(&self) -> &str {
        self.id
    }

    fn description(&self) -> &str {
        self.description
    }

    fn replacement(&self) -> &str {
        self.replacement
    }

    fn diagnostics(&self) -> &str {
        self.diagnostics
    }

    fn can_be_applied(&self, op: &Op) -> bool {
        self.rules.iter().any(|rule| rule.matches(op))
    }

    fn apply(&self, op: &mut Op) -> bool {
        self.rules.iter().any(|rule| rule.rewrite(op))
    }
}

fn swap(from: BinaryOp, to: BinaryOp) -> IrMutation {
    IrMutation::SwapBinary { from, to }
}

fn catalog() -> Vec<TrivialMutator> {
    use BinaryOp::*;

    vec![
        TrivialMutator::new(
            "add_to_sub",
            "Replaces + with -",
            "-",
            "Replaced + with -",
            vec![swap(Add, Sub)],
        ),
        TrivialMutator::new(
            "sub_to_add",
            "Replaces - with +",
            "+",
            "Replaced - with +",
            vec![swap(Sub, Add)],
        ),
        TrivialMutator::new(
            "mul_to_div",
            "Replaces * with /",
            "/",
            "Replaced * with /",
            vec![swap(Mul, SDiv)],
        ),
        TrivialMutator::new(
            "div_to_mul",
            "Replaces / with *",
            "*",
            "Replaced / with *",
            vec![swap(SDiv, Mul)],
        ),
        TrivialMutator::new(
            "rem_to_div",
            "Replaces % with /",
            "/",
            "Replaced % with /",
            vec![swap(SRem, SDiv)],
        ),
        TrivialMutator::new(
            "lshift_to_rshift",
            "Replaces << with >>",
            ">>",
            "Replaced << with >>",
            vec![swap(Shl, LShr)],
        ),
        TrivialMutator::new(
            "rshift_to_lshift",
            "Replaces >> with <<",
            "<<",
            "Replaced >> with <<",
            vec![swap(LShr, Shl), swap(AShr, Shl)],
        ),
        TrivialMutator::new(
            "or_to_and",
            "Replaces | with &",
            "&",
            "Replaced | with &",
            vec![swap(Or, And)],
        ),
        TrivialMutator::new(
            "and_to_or",
            "Replaces & with |",
            "|",
            "Replaced & with |",
            vec![swap(And, Or)],
        ),
        TrivialMutator::new(
            "xor_to_or",
            "Replaces ^ with |",
            "|",
            "Replaced ^ with |",
            vec![swap(Xor, Or)],
        ),
        TrivialMutator::new(
            "negate_condition",
            "Negates a comparison",
            "!",
            "Negated comparison",
            vec![IrMutation::NegatePredicate],
        ),
        TrivialMutator::new(
            "replace_scalar_call",
            "Replaces a call with the constant 42",
            "42",
            "Replaced call with 42",
            vec![IrMutation::ReplaceCallWith(42)],
        ),
        TrivialMutator::new(
            "remove_void_call",
            "Removes a call whose result is unused",
            "",
            "Removed call",
            vec![IrMutation::RemoveVoidCall],
        ),
    ]
}

fn group(name: &str) -> Option<&'static [&'static str]> {
    const ARITHMETIC: &[&str] = &[
        "add_to_sub",
        "sub_to_add",
        "mul_to_div",
        "div_to_mul",
        "rem_to_div",
    ];
    const BITWISE: &[&str] = &[
        "lshift_to_rshift",
        "rshift_to_lshift",
        "or_to_and",
        "and_to_or",
        "xor_to_or",
    ];
    const COMPARISON: &[&str] = &["negate_condition"];
    const CALLS: &[&str] = &["replace_scalar_call", "remove_void_call"];
    const DEFAULT: &[&str] = &["add_to_sub", "sub_to_add", "negate_condition", "remove_void_call"];
    const ALL: &[&str] = &[
        "add_to_sub",
        "sub_to_add",
        "mul_to_div",
        "div_to_mul",
        "rem_to_div",
        "lshift_to_rshift",
        "rshift_to_lshift",
        "or_to_and",
        "and_to_or",
        "xor_to_or",
        "negate_condition",
        "replace_scalar_call",
        "remove_void_call",
    ];

    match name {
        "arithmetic" => Some(ARITHMETIC),
        "bitwise" => Some(BITWISE),
        "comparison" => Some(COMPARISON),
        "calls" => Some(CALLS),
        "default" => Some(DEFAULT),
        "all" => Some(ALL),
        _ => None,
    }
}

/// Operator catalog lookups.
pub struct Mutators;

impl Mutators {
    /// Every operator in the catalog.
    pub fn all() -> Vec<Arc<dyn Mutator>> {
        catalog()
            .into_iter()
            .map(|m| Arc::new(m) as Arc<dyn Mutator>)
            .collect()
    }

    /// One operator by id.
    pub fn by_id(id: &str) -> Option<Arc<dyn Mutator>> {
        catalog()
            .into_iter()
            .find(|m| m.id == id)
            .map(|m| Arc::new(m) as Arc<dyn Mutator>)
    }

    /// Expand operator ids and group names, dropping duplicates while keeping
    /// first-mention order. An empty list selects the `default` group.
    pub fn from_ids<S: AsRef<str>>(ids: &[S]) -> Result<Vec<Arc<dyn Mutator>>, MutatorError> {
        let requested: Vec<&str> = if ids.is_empty() {
            vec!["default"]
        } else {
            ids.iter().map(|s| s.as_ref()).collect()
        };

        let mut expanded: Vec<&str> = Vec::new();
        for id in requested {
            let members: Vec<&str> = match group(id) {
                Some(members) => members.to_vec(),
                None => vec![id],
            };
            for member in members {
                if !expanded.contains(&member) {
                    expanded.push(member);
                }
            }
        }

        expanded
            .into_iter()
            .map(|id| Self::by_id(id).ok_or_else(|| MutatorError::Unknown(id.to_string())))
            .collect()
    }
}
