use std::collections::HashSet;

use log::{debug, trace};
use string_interner::DefaultSymbol;
use thiserror::Error;

use crate::{
    inst::{ArithmeticOp, BinaryOp, BooleanOp, ComparisonOp, InstKind, UnaryOp},
    ty::{DataType, ElementKey, Shape, Type},
    value::Use,
    Alias, AliasData, ArgData, Block, BlockData, Func, FuncData, FunctionAttribute, Global,
    GlobalData, GlobalKind, Inst, InstData, Module, Struct, StructAttribute, StructData,
};

// ---------------------------------------------------------------------------
// BuilderError
// ---------------------------------------------------------------------------

/// Fail-fast construction errors. Deeper semantic invariants (branch
/// typing, use consistency) are the verifier's responsibility.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuilderError {
    #[error("no insertion point: the builder is not positioned on a block")]
    NoInsertionPoint,
    #[error("duplicate name `{0}` in its scope")]
    DuplicateName(String),
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Incrementally constructs a well-formed module.
///
/// The builder tracks an insertion point (a current block) and the function
/// it belongs to. Auto-generated value names count up per function:
/// repositioning into a different function resets the counter to zero.
pub struct Builder<'m> {
    module: &'m mut Module,
    block: Option<Block>,
    func: Option<Func>,
    next_var: u32,
}

impl<'m> Builder<'m> {
    pub fn new(module: &'m mut Module) -> Self {
        Self {
            module,
            block: None,
            func: None,
            next_var: 0,
        }
    }

    #[inline]
    pub fn module(&self) -> &Module {
        self.module
    }

    #[inline]
    pub fn current_block(&self) -> Option<Block> {
        self.block
    }

    #[inline]
    pub fn current_func(&self) -> Option<Func> {
        self.func
    }

    /// Positions the insertion point. Moving into a block of a different
    /// function resets the auto-name counter; `None` disables insertion.
    pub fn move_to(&mut self, block: Option<Block>) {
        if let Some(block) = block {
            let func = self.module.block(block).func;
            if self.func != Some(func) {
                trace!("moving into {:?}, auto-name counter reset", func);
                self.func = Some(func);
                self.next_var = 0;
            }
        }
        self.block = block;
    }

    /// Claims `base` in the function's name scope, appending the smallest
    /// suffix `.1`, `.2`, ... when the bare name is taken.
    fn disambiguate(&mut self, func: Func, base: &str) -> DefaultSymbol {
        let sym = self.module.intern(base);
        if self.module.funcs[func].names.insert(sym) {
            return sym;
        }
        let mut n = 1u32;
        loop {
            let candidate = format!("{}.{}", base, n);
            let sym = self.module.intern(&candidate);
            if self.module.funcs[func].names.insert(sym) {
                return sym;
            }
            n += 1;
        }
    }

    // ---------------------------------------------------------------------------
    // Module-level entities
    // ---------------------------------------------------------------------------

    /// Declares a struct type. Fails on a module-level name collision or a
    /// repeated field name within the struct.
    pub fn build_struct(
        &mut self,
        name: &str,
        fields: &[(&str, Type)],
        attributes: Vec<StructAttribute>,
    ) -> Result<Struct, BuilderError> {
        let sym = self.module.intern(name);
        if self.module.struct_names.contains_key(&sym) {
            return Err(BuilderError::DuplicateName(name.to_string()));
        }
        let mut seen = HashSet::new();
        let mut interned = Vec::with_capacity(fields.len());
        for (field, ty) in fields {
            let field_sym = self.module.intern(field);
            if !seen.insert(field_sym) {
                return Err(BuilderError::DuplicateName(field.to_string()));
            }
            interned.push((field_sym, ty.clone()));
        }
        let st = self.module.structs.push(StructData {
            name: sym,
            fields: interned,
            attributes,
        });
        self.module.struct_names.insert(sym, st);
        Ok(st)
    }

    /// Declares a type alias; `ty` of `None` forward-declares an opaque
    /// alias.
    pub fn build_alias(&mut self, name: &str, ty: Option<Type>) -> Result<Alias, BuilderError> {
        let sym = self.module.intern(name);
        if self.module.alias_names.contains_key(&sym) {
            return Err(BuilderError::DuplicateName(name.to_string()));
        }
        let alias = self.module.aliases.push(AliasData { name: sym, ty });
        self.module.alias_names.insert(sym, alias);
        Ok(alias)
    }

    /// Declares a global value.
    pub fn build_global(
        &mut self,
        name: &str,
        kind: GlobalKind,
        ty: Type,
        init: Option<Use>,
    ) -> Result<Global, BuilderError> {
        let sym = self.module.intern(name);
        if self.module.global_names.contains_key(&sym) {
            return Err(BuilderError::DuplicateName(name.to_string()));
        }
        let global = self.module.globals.push(GlobalData {
            name: sym,
            kind,
            ty,
            init,
        });
        self.module.global_names.insert(sym, global);
        Ok(global)
    }

    /// Creates a function together with its entry block; the entry block's
    /// parameter list is the function's argument list.
    pub fn build_function(
        &mut self,
        name: &str,
        args: &[(&str, Type)],
        result: Type,
        attributes: Vec<FunctionAttribute>,
    ) -> Result<Func, BuilderError> {
        let sym = self.module.intern(name);
        if self.module.func_names.contains_key(&sym) {
            return Err(BuilderError::DuplicateName(name.to_string()));
        }
        let func = self.module.funcs.push(FuncData {
            name: sym,
            args: Vec::new(),
            result,
            attributes,
            blocks: Vec::new(),
            names: HashSet::new(),
        });
        self.module.func_names.insert(sym, func);

        let entry_sym = self.disambiguate(func, "entry");
        let entry = self.module.blocks.push(BlockData {
            name: entry_sym,
            args: Vec::new(),
            insts: Vec::new(),
            func,
        });
        self.module.funcs[func].blocks.push(entry);

        let mut arg_refs = Vec::with_capacity(args.len());
        for (arg_name, ty) in args {
            let arg_sym = self.disambiguate(func, arg_name);
            arg_refs.push(self.module.args.push(ArgData {
                name: arg_sym,
                ty: ty.clone(),
                block: entry,
            }));
        }
        self.module.blocks[entry].args = arg_refs.clone();
        self.module.funcs[func].args = arg_refs;

        debug!("built function @{} with {} argument(s)", name, args.len());
        Ok(func)
    }

    /// Creates a block in `func`. Asking for `"entry"` returns the
    /// function's pre-existing entry block unchanged, ignoring `args`;
    /// any other name (and the argument names) are disambiguated against
    /// the function scope.
    pub fn build_block(&mut self, name: &str, args: &[(&str, Type)], func: Func) -> Block {
        if name == "entry" {
            return self.module.entry(func);
        }
        let sym = self.disambiguate(func, name);
        let block = self.module.blocks.push(BlockData {
            name: sym,
            args: Vec::new(),
            insts: Vec::new(),
            func,
        });
        self.module.funcs[func].blocks.push(block);
        for (arg_name, ty) in args {
            let arg_sym = self.disambiguate(func, arg_name);
            let arg = self.module.args.push(ArgData {
                name: arg_sym,
                ty: ty.clone(),
                block,
            });
            self.module.blocks[block].args.push(arg);
        }
        block
    }

    /// Appends an instruction at the insertion point.
    ///
    /// Void-typed kinds are unnamed regardless of `name`; for value-typed
    /// kinds, the requested name (or a fresh `v{N}`) is claimed after
    /// disambiguation. The counter behind `v{N}` advances only when a fresh
    /// name is minted.
    pub fn build_inst(
        &mut self,
        kind: InstKind,
        name: Option<&str>,
    ) -> Result<Inst, BuilderError> {
        let block = self.block.ok_or(BuilderError::NoInsertionPoint)?;
        let func = self.module.block(block).func;
        let ty = kind.result_ty(self.module);
        let name = if ty.is_void() {
            None
        } else {
            match name {
                Some(requested) => Some(self.disambiguate(func, requested)),
                None => {
                    let fresh = format!("v{}", self.next_var);
                    self.next_var += 1;
                    Some(self.disambiguate(func, &fresh))
                }
            }
        };
        let inst = self.module.insts.push(InstData {
            name,
            ty,
            kind,
            block,
        });
        self.module.blocks[block].insts.push(inst);
        Ok(inst)
    }

    // ---------------------------------------------------------------------------
    // Convenience constructors
    // ---------------------------------------------------------------------------

    fn arithmetic(&mut self, op: ArithmeticOp, lhs: Use, rhs: Use) -> Result<Inst, BuilderError> {
        self.build_inst(
            InstKind::Binary {
                op: BinaryOp::Arithmetic(op),
                lhs,
                rhs,
                broadcasting: None,
            },
            None,
        )
    }

    pub fn add(&mut self, lhs: Use, rhs: Use) -> Result<Inst, BuilderError> {
        self.arithmetic(ArithmeticOp::Add, lhs, rhs)
    }

    pub fn subtract(&mut self, lhs: Use, rhs: Use) -> Result<Inst, BuilderError> {
        self.arithmetic(ArithmeticOp::Subtract, lhs, rhs)
    }

    pub fn multiply(&mut self, lhs: Use, rhs: Use) -> Result<Inst, BuilderError> {
        self.arithmetic(ArithmeticOp::Multiply, lhs, rhs)
    }

    pub fn divide(&mut self, lhs: Use, rhs: Use) -> Result<Inst, BuilderError> {
        self.arithmetic(ArithmeticOp::Divide, lhs, rhs)
    }

    pub fn power(&mut self, lhs: Use, rhs: Use) -> Result<Inst, BuilderError> {
        self.arithmetic(ArithmeticOp::Power, lhs, rhs)
    }

    pub fn and(&mut self, lhs: Use, rhs: Use) -> Result<Inst, BuilderError> {
        self.build_inst(
            InstKind::Binary {
                op: BinaryOp::Boolean(BooleanOp::And),
                lhs,
                rhs,
                broadcasting: None,
            },
            None,
        )
    }

    pub fn or(&mut self, lhs: Use, rhs: Use) -> Result<Inst, BuilderError> {
        self.build_inst(
            InstKind::Binary {
                op: BinaryOp::Boolean(BooleanOp::Or),
                lhs,
                rhs,
                broadcasting: None,
            },
            None,
        )
    }

    pub fn compare(&mut self, op: ComparisonOp, lhs: Use, rhs: Use) -> Result<Inst, BuilderError> {
        self.build_inst(
            InstKind::Binary {
                op: BinaryOp::Comparison(op),
                lhs,
                rhs,
                broadcasting: None,
            },
            None,
        )
    }

    pub fn matrix_multiply(&mut self, lhs: Use, rhs: Use) -> Result<Inst, BuilderError> {
        self.build_inst(InstKind::MatrixMultiply { lhs, rhs }, None)
    }

    pub fn transpose(&mut self, operand: Use) -> Result<Inst, BuilderError> {
        self.build_inst(InstKind::Transpose { operand }, None)
    }

    /// An elementwise unary transform.
    pub fn transform(&mut self, op: UnaryOp, operand: Use) -> Result<Inst, BuilderError> {
        self.build_inst(InstKind::Unary { op, operand }, None)
    }

    pub fn reduce(&mut self, op: BinaryOp, operand: Use, axis: usize) -> Result<Inst, BuilderError> {
        self.build_inst(InstKind::Reduce { op, operand, axis }, None)
    }

    pub fn scan(&mut self, op: BinaryOp, operand: Use, axis: usize) -> Result<Inst, BuilderError> {
        self.build_inst(InstKind::Scan { op, operand, axis }, None)
    }

    pub fn concatenate(&mut self, operands: Vec<Use>, axis: usize) -> Result<Inst, BuilderError> {
        self.build_inst(InstKind::Concatenate { operands, axis }, None)
    }

    pub fn shape_cast(&mut self, operand: Use, shape: Shape) -> Result<Inst, BuilderError> {
        self.build_inst(InstKind::ShapeCast { operand, shape }, None)
    }

    pub fn data_type_cast(
        &mut self,
        operand: Use,
        data_type: DataType,
    ) -> Result<Inst, BuilderError> {
        self.build_inst(InstKind::DataTypeCast { operand, data_type }, None)
    }

    pub fn bit_cast(&mut self, operand: Use, target: Type) -> Result<Inst, BuilderError> {
        self.build_inst(InstKind::BitCast { operand, target }, None)
    }

    pub fn tuple(&mut self, operands: Vec<Use>) -> Result<Inst, BuilderError> {
        self.build_inst(InstKind::Tuple { operands }, None)
    }

    pub fn extract(&mut self, source: Use, keys: Vec<ElementKey>) -> Result<Inst, BuilderError> {
        self.build_inst(InstKind::Extract { source, keys }, None)
    }

    pub fn insert(
        &mut self,
        value: Use,
        destination: Use,
        keys: Vec<ElementKey>,
    ) -> Result<Inst, BuilderError> {
        self.build_inst(
            InstKind::Insert {
                value,
                destination,
                keys,
            },
            None,
        )
    }

    pub fn element_pointer(
        &mut self,
        source: Use,
        keys: Vec<ElementKey>,
    ) -> Result<Inst, BuilderError> {
        self.build_inst(InstKind::ElementPointer { source, keys }, None)
    }

    pub fn load(&mut self, source: Use) -> Result<Inst, BuilderError> {
        self.build_inst(InstKind::Load { source }, None)
    }

    pub fn store(&mut self, value: Use, destination: Use) -> Result<Inst, BuilderError> {
        self.build_inst(InstKind::Store { value, destination }, None)
    }

    pub fn allocate_heap(&mut self, ty: Type, count: Use) -> Result<Inst, BuilderError> {
        self.build_inst(InstKind::AllocateHeap { ty, count }, None)
    }

    pub fn allocate_box(&mut self, ty: Type) -> Result<Inst, BuilderError> {
        self.build_inst(InstKind::AllocateBox { ty }, None)
    }

    pub fn project_box(&mut self, operand: Use) -> Result<Inst, BuilderError> {
        self.build_inst(InstKind::ProjectBox { operand }, None)
    }

    pub fn deallocate(&mut self, operand: Use) -> Result<Inst, BuilderError> {
        self.build_inst(InstKind::Deallocate { operand }, None)
    }

    pub fn apply(&mut self, callee: Use, arguments: Vec<Use>) -> Result<Inst, BuilderError> {
        self.build_inst(InstKind::Apply { callee, arguments }, None)
    }

    pub fn gradient(
        &mut self,
        function: Use,
        from: usize,
        wrt: Vec<usize>,
        keeping: Vec<usize>,
    ) -> Result<Inst, BuilderError> {
        self.build_inst(
            InstKind::Gradient {
                function,
                from,
                wrt,
                keeping,
            },
            None,
        )
    }

    pub fn pull(&mut self, source: Global) -> Result<Inst, BuilderError> {
        self.build_inst(InstKind::Pull { source }, None)
    }

    pub fn yield_to(&mut self, value: Use, to: Global) -> Result<Inst, BuilderError> {
        self.build_inst(InstKind::Yield { value, to }, None)
    }

    pub fn branch(&mut self, target: Block, arguments: Vec<Use>) -> Result<Inst, BuilderError> {
        self.build_inst(InstKind::Branch { target, arguments }, None)
    }

    pub fn conditional(
        &mut self,
        condition: Use,
        then_target: Block,
        then_arguments: Vec<Use>,
        else_target: Block,
        else_arguments: Vec<Use>,
    ) -> Result<Inst, BuilderError> {
        self.build_inst(
            InstKind::Conditional {
                condition,
                then_target,
                then_arguments,
                else_target,
                else_arguments,
            },
            None,
        )
    }

    pub fn ret(&mut self, value: Option<Use>) -> Result<Inst, BuilderError> {
        self.build_inst(InstKind::Return { value }, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ty::DataType;

    fn f32s() -> Type {
        Type::scalar(DataType::float(32))
    }

    fn sample_function(module: &mut Module) -> Func {
        let mut b = Builder::new(module);
        b.build_function("g", &[("a", f32s()), ("b", f32s())], f32s(), Vec::new())
            .unwrap()
    }

    #[test]
    fn auto_names_are_sequential() {
        let mut module = Module::new("M");
        let func = sample_function(&mut module);
        let entry = module.entry(func);
        let (a, b) = (module.func(func).args[0], module.func(func).args[1]);
        let (ua, ub) = (module.arg_use(a), module.arg_use(b));

        let mut builder = Builder::new(&mut module);
        builder.move_to(Some(entry));
        let v0 = builder.add(ua.clone(), ub.clone()).unwrap();
        let v1 = builder.add(ua, ub).unwrap();

        assert_eq!(module.resolve(module.inst(v0).name.unwrap()), "v0");
        assert_eq!(module.resolve(module.inst(v1).name.unwrap()), "v1");
    }

    #[test]
    fn requested_names_get_dot_suffixes() {
        let mut module = Module::new("M");
        let func = sample_function(&mut module);
        let entry = module.entry(func);
        let (a, b) = (module.func(func).args[0], module.func(func).args[1]);
        let (ua, ub) = (module.arg_use(a), module.arg_use(b));

        let mut builder = Builder::new(&mut module);
        builder.move_to(Some(entry));
        let kind = InstKind::Binary {
            op: BinaryOp::Arithmetic(ArithmeticOp::Add),
            lhs: ua,
            rhs: ub,
            broadcasting: None,
        };
        let first = builder.build_inst(kind.clone(), Some("x")).unwrap();
        let names: Vec<Inst> = (0..3)
            .map(|_| builder.build_inst(kind.clone(), Some("x")).unwrap())
            .collect();

        assert_eq!(module.resolve(module.inst(first).name.unwrap()), "x");
        let got: Vec<&str> = names
            .iter()
            .map(|i| module.resolve(module.inst(*i).name.unwrap()))
            .collect();
        assert_eq!(got, vec!["x.1", "x.2", "x.3"]);
    }

    #[test]
    fn entry_block_is_reused() {
        let mut module = Module::new("M");
        let mut builder = Builder::new(&mut module);
        let func = builder
            .build_function("h", &[("a", f32s())], f32s(), Vec::new())
            .unwrap();
        let entry = builder.module().entry(func);

        let again = builder.build_block("entry", &[("ignored", f32s())], func);
        assert_eq!(again, entry);

        let args = &module.func(func).args;
        assert_eq!(args.len(), 1);
        assert_eq!(module.resolve(module.arg(args[0]).name), "a");
        assert_eq!(module.arg(args[0]).ty, f32s());
        assert_eq!(module.block(entry).args.len(), 1);
    }

    #[test]
    fn counter_resets_when_changing_function() {
        let mut module = Module::new("M");
        let f1 = sample_function(&mut module);
        let mut builder = Builder::new(&mut module);
        let f2 = builder
            .build_function("g2", &[("a", f32s()), ("b", f32s())], f32s(), Vec::new())
            .unwrap();

        let e1 = builder.module().entry(f1);
        let e2 = builder.module().entry(f2);

        builder.move_to(Some(e1));
        let (a, b) = {
            let m = builder.module();
            (m.arg_use(m.func(f1).args[0]), m.arg_use(m.func(f1).args[1]))
        };
        let v = builder.add(a, b).unwrap();

        builder.move_to(Some(e2));
        let (a2, b2) = {
            let m = builder.module();
            (m.arg_use(m.func(f2).args[0]), m.arg_use(m.func(f2).args[1]))
        };
        let w = builder.add(a2, b2).unwrap();

        assert_eq!(module.resolve(module.inst(v).name.unwrap()), "v0");
        assert_eq!(module.resolve(module.inst(w).name.unwrap()), "v0");
    }

    #[test]
    fn void_instructions_stay_unnamed() {
        let mut module = Module::new("M");
        let func = sample_function(&mut module);
        let entry = module.entry(func);

        let mut builder = Builder::new(&mut module);
        builder.move_to(Some(entry));
        let ret = builder
            .build_inst(InstKind::Return { value: None }, Some("ignored"))
            .unwrap();
        assert!(module.inst(ret).name.is_none());
    }

    #[test]
    fn building_without_a_position_fails() {
        let mut module = Module::new("M");
        let mut builder = Builder::new(&mut module);
        let err = builder.ret(None).unwrap_err();
        assert_eq!(err, BuilderError::NoInsertionPoint);
    }

    #[test]
    fn duplicate_module_names_fail_fast() {
        let mut module = Module::new("M");
        let mut builder = Builder::new(&mut module);
        builder
            .build_function("f", &[], Type::Void, Vec::new())
            .unwrap();
        assert_eq!(
            builder.build_function("f", &[], Type::Void, Vec::new()),
            Err(BuilderError::DuplicateName("f".to_string()))
        );

        builder.build_alias("t", None).unwrap();
        assert!(builder.build_alias("t", Some(f32s())).is_err());
    }

    #[test]
    fn duplicate_struct_fields_fail_fast() {
        let mut module = Module::new("M");
        let mut builder = Builder::new(&mut module);
        let err = builder
            .build_struct("point", &[("x", f32s()), ("x", f32s())], Vec::new())
            .unwrap_err();
        assert_eq!(err, BuilderError::DuplicateName("x".to_string()));
    }

    #[test]
    fn block_names_are_disambiguated() {
        let mut module = Module::new("M");
        let mut builder = Builder::new(&mut module);
        let func = builder
            .build_function("f", &[], Type::Void, Vec::new())
            .unwrap();
        let b1 = builder.build_block("body", &[], func);
        let b2 = builder.build_block("body", &[], func);
        assert_eq!(module.resolve(module.block(b1).name), "body");
        assert_eq!(module.resolve(module.block(b2).name), "body.1");
    }
}
