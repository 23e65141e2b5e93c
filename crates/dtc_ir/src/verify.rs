//! Deferred semantic checks over a module.
//!
//! The builder only fails fast on structural mistakes (no insertion point,
//! module-level name collisions); everything type-shaped is collected here
//! and reported with the offending entity. The IR itself never throws
//! during mutation.

use std::collections::HashSet;

use log::debug;
use thiserror::Error;

use crate::{inst::InstKind, value::Use, Block, Func, Global, Inst, Module};

// ---------------------------------------------------------------------------
// Diagnostic
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Diagnostic {
    /// An operand's carried type disagrees with its referent's declared
    /// type, a literal fails its ascription, or a branch argument list does
    /// not match the target block's parameters.
    #[error("{0}: operand type disagrees with its referent")]
    TypeMismatch(Inst),
    #[error("{0}: operand references a removed instruction")]
    DanglingUse(Inst),
    #[error("{0}: initializer disagrees with the declared type")]
    GlobalTypeMismatch(Global),
    /// The block is empty, does not end in a terminator, or holds a
    /// terminator before its last position.
    #[error("{0}: malformed terminator layout")]
    MalformedTerminator(Block),
    #[error("{0}: control transfer targets a block of another function")]
    ForeignTarget(Inst),
    /// An instruction is named without producing a value, or produces a
    /// value without a name.
    #[error("{0}: naming disagrees with the result type")]
    NamingViolation(Inst),
    #[error("name `{name}` bound more than once in {func}")]
    DuplicateName { func: Func, name: String },
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct VerifierResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl VerifierResult {
    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Verifier
// ---------------------------------------------------------------------------

pub struct Verifier<'m> {
    module: &'m Module,
    result: VerifierResult,
}

impl<'m> Verifier<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            result: VerifierResult::default(),
        }
    }

    pub fn verify(mut self) -> VerifierResult {
        for (global, data) in self.module.globals() {
            if let Some(init) = &data.init {
                let ok = match init {
                    Use::Literal(ty, literal) => literal.fits(ty) && *ty == data.ty,
                    other => *other.ty() == data.ty,
                };
                if !ok {
                    self.result
                        .diagnostics
                        .push(Diagnostic::GlobalTypeMismatch(global));
                }
            }
        }
        let funcs: Vec<Func> = self.module.funcs.keys().collect();
        for func in funcs {
            self.check_name_scope(func);
            let blocks = self.module.func(func).blocks.clone();
            for block in blocks {
                self.check_block(func, block);
            }
        }
        debug!(
            "verified module `{}`: {} diagnostic(s)",
            self.module.name,
            self.result.diagnostics.len()
        );
        self.result
    }

    /// Invariant: argument names, block names, and named instruction names
    /// form one injective set per function.
    fn check_name_scope(&mut self, func: Func) {
        let mut seen = HashSet::new();
        let mut duplicated = Vec::new();
        for block in &self.module.func(func).blocks {
            let data = self.module.block(*block);
            if !seen.insert(data.name) {
                duplicated.push(data.name);
            }
            for arg in &data.args {
                let name = self.module.arg(*arg).name;
                if !seen.insert(name) {
                    duplicated.push(name);
                }
            }
            for inst in &data.insts {
                if let Some(name) = self.module.inst(*inst).name {
                    if !seen.insert(name) {
                        duplicated.push(name);
                    }
                }
            }
        }
        for name in duplicated {
            self.result.diagnostics.push(Diagnostic::DuplicateName {
                func,
                name: self.module.resolve(name).to_string(),
            });
        }
    }

    fn check_block(&mut self, func: Func, block: Block) {
        let insts = self.module.block(block).insts.clone();
        match insts.last() {
            None => self
                .result
                .diagnostics
                .push(Diagnostic::MalformedTerminator(block)),
            Some(last) => {
                let misplaced = insts[..insts.len() - 1]
                    .iter()
                    .any(|i| self.module.inst(*i).kind.is_terminator());
                if misplaced || !self.module.inst(*last).kind.is_terminator() {
                    self.result
                        .diagnostics
                        .push(Diagnostic::MalformedTerminator(block));
                }
            }
        }
        for inst in insts {
            self.check_inst(func, inst);
        }
    }

    fn check_inst(&mut self, func: Func, inst: Inst) {
        let data = self.module.inst(inst);
        let named = data.name.is_some();
        let ty = data.ty.clone();
        let kind = data.kind.clone();

        if named == ty.is_void() {
            self.result
                .diagnostics
                .push(Diagnostic::NamingViolation(inst));
        }
        if ty != kind.result_ty(self.module) {
            self.result.diagnostics.push(Diagnostic::TypeMismatch(inst));
        }
        // A shape cast may rearrange dimensions but never element count.
        if let InstKind::ShapeCast { operand, shape } = &kind {
            if let Some((from, _)) = self.module.canonical_ty(operand.ty()).as_tensor() {
                if from.element_count() != shape.element_count() {
                    self.result.diagnostics.push(Diagnostic::TypeMismatch(inst));
                }
            }
        }

        self.check_kind_uses(inst, &kind);
        self.check_targets(func, inst, &kind);
    }

    fn check_kind_uses(&mut self, inst: Inst, kind: &InstKind) {
        let mut uses = Vec::new();
        kind.collect_uses(&mut uses);
        for u in uses {
            self.check_use(inst, u);
        }
    }

    fn check_use(&mut self, inst: Inst, u: &Use) {
        let ok = match u {
            Use::Inst(ty, def) => {
                if self.module.is_removed(*def) {
                    self.result.diagnostics.push(Diagnostic::DanglingUse(inst));
                    return;
                }
                *ty == self.module.inst(*def).ty
            }
            Use::Argument(ty, arg) => *ty == self.module.arg(*arg).ty,
            Use::Global(ty, global) => *ty == self.module.global(*global).ty,
            Use::Function(ty, func) => *ty == self.module.func_ty(*func),
            Use::Literal(ty, literal) => literal.fits(ty),
            Use::Constant(ty, kind) => {
                self.check_kind_uses(inst, kind);
                *ty == kind.result_ty(self.module)
            }
        };
        if !ok {
            self.result.diagnostics.push(Diagnostic::TypeMismatch(inst));
        }
    }

    /// Branch and conditional targets live in the same function and their
    /// argument lists match the target's parameter types.
    fn check_targets(&mut self, func: Func, inst: Inst, kind: &InstKind) {
        let edges: Vec<(Block, &[Use])> = match kind {
            InstKind::Branch { target, arguments } => vec![(*target, arguments.as_slice())],
            InstKind::Conditional {
                then_target,
                then_arguments,
                else_target,
                else_arguments,
                ..
            } => vec![
                (*then_target, then_arguments.as_slice()),
                (*else_target, else_arguments.as_slice()),
            ],
            _ => return,
        };
        for (target, arguments) in edges {
            let data = self.module.block(target);
            if data.func != func {
                self.result.diagnostics.push(Diagnostic::ForeignTarget(inst));
                continue;
            }
            let matches = data.args.len() == arguments.len()
                && data
                    .args
                    .iter()
                    .zip(arguments)
                    .all(|(arg, u)| self.module.arg(*arg).ty == *u.ty());
            if !matches {
                self.result.diagnostics.push(Diagnostic::TypeMismatch(inst));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder::Builder,
        ty::{DataType, Type},
        value::{Literal, ScalarLiteral},
    };

    fn f32s() -> Type {
        Type::scalar(DataType::float(32))
    }

    /// `@g(%a: f32, %b: f32) -> f32` with an open entry block.
    fn adder(module: &mut Module) -> (crate::Func, Use, Use) {
        let mut b = Builder::new(module);
        let func = b
            .build_function("g", &[("a", f32s()), ("b", f32s())], f32s(), Vec::new())
            .unwrap();
        let entry = b.module().entry(func);
        b.move_to(Some(entry));
        let m = b.module();
        let (a, b_) = (m.arg_use(m.func(func).args[0]), m.arg_use(m.func(func).args[1]));
        (func, a, b_)
    }

    #[test]
    fn well_formed_module_passes() {
        let mut module = Module::new("M");
        let (func, a, b_) = adder(&mut module);
        let entry = module.entry(func);
        let mut b = Builder::new(&mut module);
        b.move_to(Some(entry));
        let v = b.add(a, b_).unwrap();
        let v_use = b.module().inst_use(v);
        b.ret(Some(v_use)).unwrap();

        assert!(Verifier::new(&module).verify().is_ok());
    }

    #[test]
    fn use_with_wrong_ascription_is_a_type_mismatch() {
        let mut module = Module::new("M");
        let (func, a, b_) = adder(&mut module);
        let entry = module.entry(func);
        let mut b = Builder::new(&mut module);
        b.move_to(Some(entry));
        let v = b.add(a, b_).unwrap();
        assert_eq!(module.inst(v).ty, f32s());

        let mut b = Builder::new(&mut module);
        b.move_to(Some(entry));
        let i32s = Type::scalar(DataType::int(32));
        let bad = Use::Inst(i32s.clone(), v);
        let w = b.add(bad.clone(), bad).unwrap();
        let w_use = b.module().inst_use(w);
        b.ret(Some(w_use)).unwrap();

        let result = Verifier::new(&module).verify();
        assert!(result
            .diagnostics
            .contains(&Diagnostic::TypeMismatch(w)));
    }

    #[test]
    fn removed_definition_leaves_dangling_uses() {
        let mut module = Module::new("M");
        let (func, a, b_) = adder(&mut module);
        let entry = module.entry(func);
        let mut b = Builder::new(&mut module);
        b.move_to(Some(entry));
        let v0 = b.add(a, b_).unwrap();
        let v0_use = b.module().inst_use(v0);
        let v1 = b.add(v0_use.clone(), v0_use).unwrap();
        let v1_use = b.module().inst_use(v1);
        b.ret(Some(v1_use)).unwrap();

        module.remove_inst(v0);

        let result = Verifier::new(&module).verify();
        assert!(result.diagnostics.contains(&Diagnostic::DanglingUse(v1)));
    }

    #[test]
    fn unterminated_and_misordered_blocks_are_flagged() {
        let mut module = Module::new("M");
        let (func, a, b_) = adder(&mut module);
        let entry = module.entry(func);
        {
            let mut b = Builder::new(&mut module);
            b.move_to(Some(entry));
            b.add(a, b_).unwrap();
        }
        let result = Verifier::new(&module).verify();
        assert!(result
            .diagnostics
            .contains(&Diagnostic::MalformedTerminator(entry)));

        let mut b = Builder::new(&mut module);
        b.move_to(Some(entry));
        b.ret(None).unwrap();
        b.ret(None).unwrap();
        let result = Verifier::new(&module).verify();
        assert!(result
            .diagnostics
            .contains(&Diagnostic::MalformedTerminator(entry)));
    }

    #[test]
    fn branch_into_another_function_is_foreign() {
        let mut module = Module::new("M");
        let mut b = Builder::new(&mut module);
        let f1 = b.build_function("f1", &[], Type::Void, Vec::new()).unwrap();
        let f2 = b.build_function("f2", &[], Type::Void, Vec::new()).unwrap();
        let e1 = b.module().entry(f1);
        let e2 = b.module().entry(f2);
        b.move_to(Some(e1));
        let br = b.branch(e2, Vec::new()).unwrap();
        b.move_to(Some(e2));
        b.ret(None).unwrap();

        let result = Verifier::new(&module).verify();
        assert!(result.diagnostics.contains(&Diagnostic::ForeignTarget(br)));
    }

    #[test]
    fn branch_arguments_must_match_block_parameters() {
        let mut module = Module::new("M");
        let mut b = Builder::new(&mut module);
        let func = b.build_function("f", &[], Type::Void, Vec::new()).unwrap();
        let entry = b.module().entry(func);
        let body = b.build_block("body", &[("x", f32s())], func);
        b.move_to(Some(entry));
        let wrong = b.module().literal_use(
            Type::scalar(DataType::int(32)),
            Literal::Scalar(ScalarLiteral::Int(0)),
        );
        let br = b.branch(body, vec![wrong]).unwrap();
        b.move_to(Some(body));
        b.ret(None).unwrap();

        let result = Verifier::new(&module).verify();
        assert!(result.diagnostics.contains(&Diagnostic::TypeMismatch(br)));
    }

    #[test]
    fn global_initializer_must_fit_the_declared_type() {
        let mut module = Module::new("M");
        let mut b = Builder::new(&mut module);
        let bad = b
            .build_global(
                "w",
                crate::GlobalKind::Variable,
                Type::tensor(vec![4], DataType::float(32)),
                Some(Use::Literal(
                    Type::tensor(vec![4], DataType::float(32)),
                    Literal::Scalar(ScalarLiteral::Bool(true)),
                )),
            )
            .unwrap();

        let result = Verifier::new(&module).verify();
        assert!(result
            .diagnostics
            .contains(&Diagnostic::GlobalTypeMismatch(bad)));
    }

    #[test]
    fn shape_cast_must_preserve_element_count() {
        let mut module = Module::new("M");
        let t = Type::tensor(vec![2, 3], DataType::float(32));
        let mut b = Builder::new(&mut module);
        let func = b
            .build_function("c", &[("x", t.clone())], Type::Void, Vec::new())
            .unwrap();
        let entry = b.module().entry(func);
        b.move_to(Some(entry));
        let x = {
            let m = b.module();
            m.arg_use(m.func(func).args[0])
        };
        let bad = b.shape_cast(x, crate::Shape(vec![7])).unwrap();
        b.ret(None).unwrap();

        let result = Verifier::new(&module).verify();
        assert!(result.diagnostics.contains(&Diagnostic::TypeMismatch(bad)));
    }

    #[test]
    fn stripped_name_on_a_value_is_a_naming_violation() {
        let mut module = Module::new("M");
        let (func, a, b_) = adder(&mut module);
        let entry = module.entry(func);
        let mut b = Builder::new(&mut module);
        b.move_to(Some(entry));
        let v = b.add(a, b_).unwrap();
        let v_use = b.module().inst_use(v);
        b.ret(Some(v_use)).unwrap();

        module.inst_mut(v).name = None;

        let result = Verifier::new(&module).verify();
        assert!(result
            .diagnostics
            .contains(&Diagnostic::NamingViolation(v)));
    }
}
