use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use super::{ModuleId, stable_hash};
use crate::ir::{DispatchTarget, Function, Instruction, Module, Op};
use crate::mutation_point::MutationPoint;

/// Position of a module in the mutation application sequence.
///
/// Steps run strictly in declaration order over the whole surviving point
/// set. Modules that never receive a mutation stay `Pristine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApplicationStage {
    /// No mutation registered.
    Pristine,
    /// Points attached, IR untouched.
    Registered,
    /// One pristine clone and one clone per point exist.
    Cloned,
    /// Original definitions removed.
    Excised,
    /// Trampolines installed under the original names.
    Redirected,
    /// At least one mutation rewritten into its clone.
    Applied,
}

/// Mutation application errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    /// A step ran before its predecessor.
    #[error("module `{module}`: cannot {step} while {actual:?}")]
    OutOfOrder {
        /// Module name.
        module: String,
        /// Attempted step.
        step: &'static str,
        /// Current stage.
        actual: ApplicationStage,
    },
    /// A function the step needs is absent.
    #[error("module `{module}` has no function `{function}`")]
    MissingFunction {
        /// Module name.
        module: String,
        /// Function name.
        function: String,
    },
    /// A clone name is already taken.
    #[error("module `{module}` already defines `{name}`")]
    NameCollision {
        /// Module name.
        module: String,
        /// Colliding name.
        name: String,
    },
    /// The operator does not match the instruction it was recorded for.
    #[error("mutation `{point}` cannot be applied to its instruction")]
    NotApplicable {
        /// Mutation point id.
        point: String,
    },
    /// The point belongs to a different module.
    #[error("mutation `{point}` does not belong to module `{module}`")]
    ForeignPoint {
        /// Mutation point id.
        point: String,
        /// Module name.
        module: String,
    },
}

/// One bitcode module together with its pending mutations.
#[derive(Debug)]
pub struct Bitcode {
    id: ModuleId,
    module: Module,
    unique_identifier: String,
    stage: ApplicationStage,
    mutations: BTreeMap<String, Vec<Arc<MutationPoint>>>,
}

impl Bitcode {
    /// Wrap a module.
    pub fn new(id: ModuleId, module: Module) -> Self {
        let unique_identifier = content_hash(&module);
        Self {
            id,
            module,
            unique_identifier,
            stage: ApplicationStage::Pristine,
            mutations: BTreeMap::new(),
        }
    }

    /// Arena index.
    pub fn id(&self) -> ModuleId {
        self.id
    }

    /// Current IR.
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Content hash of the module as loaded.
    pub fn unique_identifier(&self) -> &str {
        &self.unique_identifier
    }

    /// Content hash of the module as it is now.
    pub fn current_hash(&self) -> String {
        content_hash(&self.module)
    }

    /// Current application stage.
    pub fn stage(&self) -> ApplicationStage {
        self.stage
    }

    /// Pending mutations keyed by function name.
    pub fn mutations(&self) -> &BTreeMap<String, Vec<Arc<MutationPoint>>> {
        &self.mutations
    }

    fn out_of_order(&self, step: &'static str) -> ApplicationError {
        ApplicationError::OutOfOrder {
            module: self.module.name.clone(),
            step,
            actual: self.stage,
        }
    }

    fn missing(&self, function: &str) -> ApplicationError {
        ApplicationError::MissingFunction {
            module: self.module.name.clone(),
            function: function.to_string(),
        }
    }

    fn ensure_free(&self, name: &str) -> Result<(), ApplicationError> {
        if self.module.function(name).is_some() {
            return Err(ApplicationError::NameCollision {
                module: self.module.name.clone(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Register: attach a point to this module. The IR is not touched.
    pub fn add_mutation(&mut self, point: Arc<MutationPoint>) -> Result<(), ApplicationError> {
        if point.module() != self.id {
            return Err(ApplicationError::ForeignPoint {
                point: point.id().to_string(),
                module: self.module.name.clone(),
            });
        }
        if self.stage > ApplicationStage::Registered {
            return Err(self.out_of_order("register a mutation"));
        }
        self.mutations
            .entry(point.function().to_string())
            .or_default()
            .push(point);
        self.stage = ApplicationStage::Registered;
        Ok(())
    }

    /// Clone: for each mutated function add its pristine clone and one clone
    /// per pending point. Returns the names of the mutated functions.
    pub fn clone_mutated_functions(&mut self) -> Result<Vec<String>, ApplicationError> {
        if self.mutations.is_empty() {
            return Ok(Vec::new());
        }
        if self.stage != ApplicationStage::Registered {
            return Err(self.out_of_order("clone functions"));
        }

        let mut clones = Vec::new();
        for (name, points) in &self.mutations {
            let original = self.module.function(name).ok_or_else(|| self.missing(name))?;
            let pristine_name = pristine_name(name);
            self.ensure_free(&pristine_name)?;
            let mut batch = vec![original.cloned_as(pristine_name)];
            for point in points {
                let clone_name = point.clone_name();
                self.ensure_free(&clone_name)?;
                if batch.iter().any(|f| f.name == clone_name) {
                    return Err(ApplicationError::NameCollision {
                        module: self.module.name.clone(),
                        name: clone_name,
                    });
                }
                batch.push(original.cloned_as(clone_name));
            }
            clones.push(batch);
        }
        for batch in clones {
            self.module.functions.extend(batch);
        }

        self.stage = ApplicationStage::Cloned;
        Ok(self.mutations.keys().cloned().collect())
    }

    /// Excise: delete the original definitions superseded by clones.
    pub fn delete_original_functions(&mut self) -> Result<(), ApplicationError> {
        if self.mutations.is_empty() {
            return Ok(());
        }
        if self.stage != ApplicationStage::Cloned {
            return Err(self.out_of_order("delete original functions"));
        }
        let names: Vec<String> = self.mutations.keys().cloned().collect();
        for name in names {
            if self.module.remove_function(&name).is_none() {
                return Err(self.missing(&name));
            }
        }
        self.stage = ApplicationStage::Excised;
        Ok(())
    }

    /// Trampoline insertion: define each original name as a dispatcher over
    /// the pristine clone and the mutant clones.
    pub fn insert_trampolines(&mut self) -> Result<(), ApplicationError> {
        if self.mutations.is_empty() {
            return Ok(());
        }
        if self.stage != ApplicationStage::Excised {
            return Err(self.out_of_order("insert trampolines"));
        }

        let mut trampolines = Vec::with_capacity(self.mutations.len());
        for (name, points) in &self.mutations {
            self.ensure_free(name)?;
            let pristine = pristine_name(name);
            let params = self
                .module
                .function(&pristine)
                .ok_or_else(|| self.missing(&pristine))?
                .params;
            let targets = points
                .iter()
                .map(|point| DispatchTarget {
                    mutation_id: point.id().to_string(),
                    callee: point.clone_name(),
                })
                .collect();
            trampolines.push(Function {
                name: name.clone(),
                params,
                body: vec![Instruction::new(Op::Dispatch { pristine, targets })],
                location: None,
            });
        }
        self.module.functions.extend(trampolines);

        self.stage = ApplicationStage::Redirected;
        Ok(())
    }

    /// Apply: rewrite the point's instruction inside its own clone only.
    pub fn apply_mutation(&mut self, point: &MutationPoint) -> Result<(), ApplicationError> {
        if point.module() != self.id {
            return Err(ApplicationError::ForeignPoint {
                point: point.id().to_string(),
                module: self.module.name.clone(),
            });
        }
        if !matches!(
            self.stage,
            ApplicationStage::Redirected | ApplicationStage::Applied
        ) {
            return Err(self.out_of_order("apply a mutation"));
        }

        let clone_name = point.clone_name();
        let module_name = self.module.name.clone();
        let clone = self
            .module
            .function_mut(&clone_name)
            .ok_or(ApplicationError::MissingFunction {
                module: module_name,
                function: clone_name,
            })?;
        let applied = clone
            .body
            .get_mut(point.instruction())
            .is_some_and(|inst| point.mutator().apply(&mut inst.op));
        if !applied {
            return Err(ApplicationError::NotApplicable {
                point: point.id().to_string(),
            });
        }

        self.stage = ApplicationStage::Applied;
        Ok(())
    }
}

/// Name of the unmutated copy of `function`.
pub(crate) fn pristine_name(function: &str) -> String {
    format!("{function}$original")
}

fn content_hash(module: &Module) -> String {
    let bytes = serde_json::to_vec(module).unwrap_or_default();
    format!("{:016x}", stable_hash(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, FunctionBuilder};
    use crate::mutators::Mutators;

    fn sum_module() -> Module {
        let mut f = FunctionBuilder::new("sum", 2);
        f.at("sum.c", 1, 1);
        let total = f.binary(BinaryOp::Add, f.param(0), f.param(1));
        f.ret(total);
        Module::new("sum.c").with_function(f.finish().expect("sum should build"))
    }

    fn add_point(module: ModuleId) -> Arc<MutationPoint> {
        let mutator = Mutators::by_id("add_to_sub").expect("add_to_sub should exist");
        Arc::new(MutationPoint::new(mutator, module, "sum.c", "sum", 0, None))
    }

    #[test]
    fn full_sequence_produces_dispatcher_and_mutated_clone() {
        let mut bitcode = Bitcode::new(ModuleId(0), sum_module());
        let point = add_point(ModuleId(0));

        bitcode.add_mutation(point.clone()).expect("register");
        assert_eq!(
            bitcode.clone_mutated_functions().expect("clone"),
            vec!["sum".to_string()]
        );
        bitcode.delete_original_functions().expect("excise");
        bitcode.insert_trampolines().expect("redirect");
        bitcode.apply_mutation(&point).expect("apply");
        assert_eq!(bitcode.stage(), ApplicationStage::Applied);

        let module = bitcode.module();
        let pristine = module.function("sum$original").expect("pristine clone");
        assert!(matches!(
            pristine.body[0].op,
            Op::Binary {
                kind: BinaryOp::Add,
                ..
            }
        ));
        let mutant = module.function(&point.clone_name()).expect("mutant clone");
        assert!(matches!(
            mutant.body[0].op,
            Op::Binary {
                kind: BinaryOp::Sub,
                ..
            }
        ));
        let trampoline = module.function("sum").expect("trampoline");
        assert_eq!(trampoline.params, 2);
        match &trampoline.body[0].op {
            Op::Dispatch { pristine, targets } => {
                assert_eq!(pristine, "sum$original");
                assert_eq!(targets.len(), 1);
                assert_eq!(targets[0].mutation_id, point.id());
            }
            other => panic!("expected dispatch, got {other:?}"),
        }
    }

    #[test]
    fn steps_out_of_order_are_rejected() {
        let mut bitcode = Bitcode::new(ModuleId(0), sum_module());
        let point = add_point(ModuleId(0));
        bitcode.add_mutation(point.clone()).expect("register");

        assert!(matches!(
            bitcode.delete_original_functions(),
            Err(ApplicationError::OutOfOrder { .. })
        ));
        assert!(matches!(
            bitcode.apply_mutation(&point),
            Err(ApplicationError::OutOfOrder { .. })
        ));
        bitcode.clone_mutated_functions().expect("clone");
        assert!(matches!(
            bitcode.add_mutation(point),
            Err(ApplicationError::OutOfOrder { .. })
        ));
    }

    #[test]
    fn modules_without_mutations_are_left_alone() {
        let mut bitcode = Bitcode::new(ModuleId(0), sum_module());
        let before = bitcode.module().clone();
        assert!(bitcode.clone_mutated_functions().expect("clone").is_empty());
        bitcode.delete_original_functions().expect("excise");
        bitcode.insert_trampolines().expect("redirect");
        assert_eq!(bitcode.module(), &before);
        assert_eq!(bitcode.stage(), ApplicationStage::Pristine);
    }

    #[test]
    fn duplicate_points_collide() {
        let mut bitcode = Bitcode::new(ModuleId(0), sum_module());
        bitcode.add_mutation(add_point(ModuleId(0))).expect("register");
        bitcode.add_mutation(add_point(ModuleId(0))).expect("register");
        assert!(matches!(
            bitcode.clone_mutated_functions(),
            Err(ApplicationError::NameCollision { .. })
        ));
    }

    #[test]
    fn user_functions_never_shadow_derived_names() {
        let mut module = sum_module();
        for name in ["sum_original_", "sum_add_to_sub_sum_c_sum_0"] {
            let mut f = FunctionBuilder::new(name, 0);
            let zero = f.constant(0);
            f.ret(zero);
            module = module.with_function(f.finish().expect("function should build"));
        }
        let mut bitcode = Bitcode::new(ModuleId(0), module);
        let point = add_point(ModuleId(0));

        bitcode.add_mutation(point.clone()).expect("register");
        bitcode.clone_mutated_functions().expect("clone");
        bitcode.delete_original_functions().expect("excise");
        bitcode.insert_trampolines().expect("redirect");
        bitcode.apply_mutation(&point).expect("apply");

        let module = bitcode.module();
        assert!(module.function("sum$original").is_some());
        assert!(module.function(&point.clone_name()).is_some());
        assert_eq!(module.function("sum_original_").map(|f| f.params), Some(0));
    }

    #[test]
    fn derived_name_collisions_are_still_detected() {
        let mut f = FunctionBuilder::new("sum$original", 0);
        let zero = f.constant(0);
        f.ret(zero);
        let module = sum_module().with_function(f.finish().expect("function should build"));
        let mut bitcode = Bitcode::new(ModuleId(0), module);

        bitcode.add_mutation(add_point(ModuleId(0))).expect("register");
        assert!(matches!(
            bitcode.clone_mutated_functions(),
            Err(ApplicationError::NameCollision { name, .. }) if name == "sum$original"
        ));
    }

    #[test]
    fn foreign_points_are_rejected() {
        let mut bitcode = Bitcode::new(ModuleId(0), sum_module());
        assert!(matches!(
            bitcode.add_mutation(add_point(ModuleId(3))),
            Err(ApplicationError::ForeignPoint { .. })
        ));
    }

    #[test]
    fn hash_tracks_content() {
        let mut bitcode = Bitcode::new(ModuleId(0), sum_module());
        let original = bitcode.unique_identifier().to_string();
        assert_eq!(bitcode.current_hash(), original);
        let point = add_point(ModuleId(0));
        bitcode.add_mutation(point).expect("register");
        bitcode.clone_mutated_functions().expect("clone");
        assert_ne!(bitcode.current_hash(), original);
        assert_eq!(bitcode.unique_identifier(), original);
    }
}
