//! Deterministic textual form of every IR node.
//!
//! Printing streams into any [`std::fmt::Write`] sink and never mutates the
//! IR. Names are taken as-is: a value-producing instruction without a name
//! is a builder-invariant violation upstream, and the printer falls back to
//! the raw entity id rather than inventing one.

use std::fmt::{self, Write};

use crate::{
    inst::InstKind,
    ty::{ElementKey, Type},
    value::Use,
    AliasData, Arg, Block, FuncData, FunctionAttribute, Global, GlobalData, GlobalKind, Inst,
    Module, StructAttribute, StructData,
};

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// An indenting wrapper over a character sink. One indentation level is
/// four spaces, written at explicit line starts.
pub struct Emitter<W: Write> {
    out: W,
    level: u8,
}

impl<W: Write> Write for Emitter<W> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.out.write_str(s)
    }
}

impl<W: Write> Emitter<W> {
    pub fn new(out: W) -> Self {
        Self { out, level: 0 }
    }

    #[inline]
    pub fn indent(&mut self) {
        self.level += 1;
    }

    #[inline]
    pub fn dedent(&mut self) {
        self.level -= 1;
    }

    fn line_start(&mut self) -> fmt::Result {
        for _ in 0..self.level {
            self.out.write_str("    ")?;
        }
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

// ---------------------------------------------------------------------------
// Module surface
// ---------------------------------------------------------------------------

/// Prints a module: the header, a blank line, the declarations (struct
/// types, aliases, globals, one per line), a blank line, then each function
/// followed by two newlines.
pub fn write_module<W: Write>(module: &Module, out: &mut W) -> fmt::Result {
    let mut e = Emitter::new(out);
    writeln!(e, "module {}", module.name)?;
    writeln!(e)?;
    for (_, data) in module.structs() {
        write_struct(module, data, &mut e)?;
    }
    for (_, data) in module.aliases() {
        write_alias(module, data, &mut e)?;
    }
    for (_, data) in module.globals() {
        write_global(module, data, &mut e)?;
    }
    writeln!(e)?;
    for (_, data) in module.funcs() {
        write_func(module, data, &mut e)?;
        e.write_str("\n\n")?;
    }
    Ok(())
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_module(self, f)
    }
}

fn write_struct<W: Write>(module: &Module, data: &StructData, e: &mut Emitter<W>) -> fmt::Result {
    for attr in &data.attributes {
        match attr {
            StructAttribute::Packed => e.write_str("packed ")?,
        }
    }
    write!(e, "struct ${}", module.resolve(data.name))?;
    if data.fields.is_empty() {
        return writeln!(e, " {{}}");
    }
    e.write_str(" { ")?;
    for (i, (field, ty)) in data.fields.iter().enumerate() {
        if i > 0 {
            e.write_str(", ")?;
        }
        write!(e, "{}: ", module.resolve(*field))?;
        write_ty(module, ty, e)?;
    }
    writeln!(e, " }}")
}

fn write_alias<W: Write>(module: &Module, data: &AliasData, e: &mut Emitter<W>) -> fmt::Result {
    write!(e, "type ${}", module.resolve(data.name))?;
    if let Some(ty) = &data.ty {
        e.write_str(" = ")?;
        write_ty(module, ty, e)?;
    }
    writeln!(e)
}

fn write_global<W: Write>(module: &Module, data: &GlobalData, e: &mut Emitter<W>) -> fmt::Result {
    write!(
        e,
        "declare {} {}{} : ",
        data.kind,
        global_sigil(data.kind),
        module.resolve(data.name)
    )?;
    write_ty(module, &data.ty, e)?;
    if let Some(init) = &data.init {
        e.write_str(" = ")?;
        match init {
            // Initializers at a declared type elide the ascription.
            Use::Literal(_, literal) => write!(e, "{}", literal)?,
            other => write_use(module, other, e)?,
        }
    }
    writeln!(e)
}

fn global_sigil(kind: GlobalKind) -> char {
    match kind {
        GlobalKind::Placeholder => '%',
        _ => '@',
    }
}

fn write_func<W: Write>(module: &Module, data: &FuncData, e: &mut Emitter<W>) -> fmt::Result {
    for attr in &data.attributes {
        match attr {
            FunctionAttribute::Differentiable => e.write_str("differentiable ")?,
            FunctionAttribute::Inline => e.write_str("inline ")?,
        }
    }
    write!(e, "func @{}(", module.resolve(data.name))?;
    write_params(module, &data.args, e)?;
    e.write_str(")")?;
    if !data.result.is_void() {
        e.write_str(" -> ")?;
        write_ty(module, &data.result, e)?;
    }
    writeln!(e, " {{")?;
    for block in &data.blocks {
        write_block(module, *block, e)?;
    }
    writeln!(e, "}}")
}

fn write_block<W: Write>(module: &Module, block: Block, e: &mut Emitter<W>) -> fmt::Result {
    let data = module.block(block);
    write!(e, "{}(", module.resolve(data.name))?;
    write_params(module, &data.args, e)?;
    writeln!(e, "):")?;
    e.indent();
    for inst in &data.insts {
        write_inst(module, *inst, e)?;
    }
    e.dedent();
    Ok(())
}

fn write_params<W: Write>(module: &Module, args: &[Arg], e: &mut Emitter<W>) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            e.write_str(", ")?;
        }
        let data = module.arg(*arg);
        write!(e, "%{}: ", module.resolve(data.name))?;
        write_ty(module, &data.ty, e)?;
    }
    Ok(())
}

fn write_inst<W: Write>(module: &Module, inst: Inst, e: &mut Emitter<W>) -> fmt::Result {
    let data = module.inst(inst);
    e.line_start()?;
    if let Some(name) = data.name {
        write!(e, "%{} = ", module.resolve(name))?;
    }
    write_kind(module, &data.kind, e)?;
    writeln!(e)
}

// ---------------------------------------------------------------------------
// Types, uses, operations
// ---------------------------------------------------------------------------

fn write_ty<W: Write>(module: &Module, ty: &Type, out: &mut W) -> fmt::Result {
    match ty {
        Type::Void => out.write_str("void"),
        Type::Tensor(shape, dt) if shape.is_scalar() => write!(out, "{}", dt),
        Type::Tensor(shape, dt) => write!(out, "{} {}", dt, shape),
        Type::Tuple(items) => {
            out.write_str("(")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.write_str(", ")?;
                }
                write_ty(module, item, out)?;
            }
            out.write_str(")")
        }
        Type::Array(elem) => {
            out.write_str("[")?;
            write_ty(module, elem, out)?;
            out.write_str("]")
        }
        Type::Pointer(target) => {
            out.write_str("*")?;
            write_ty(module, target, out)
        }
        Type::Box(target) => {
            out.write_str("box(")?;
            write_ty(module, target, out)?;
            out.write_str(")")
        }
        Type::Alias(alias) => write!(out, "${}", module.resolve(module.alias(*alias).name)),
        Type::Struct(st) => write!(out, "${}", module.resolve(module.struct_ty(*st).name)),
        Type::Function(args, result) => {
            out.write_str("(")?;
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.write_str(", ")?;
                }
                write_ty(module, arg, out)?;
            }
            out.write_str(") -> ")?;
            write_ty(module, result, out)
        }
        Type::Invalid => out.write_str("invalid"),
    }
}

fn write_use<W: Write>(module: &Module, u: &Use, out: &mut W) -> fmt::Result {
    match u {
        Use::Argument(ty, arg) => {
            write_ty(module, ty, out)?;
            write!(out, " %{}", module.resolve(module.arg(*arg).name))
        }
        Use::Inst(ty, inst) => {
            write_ty(module, ty, out)?;
            match module.inst(*inst).name {
                Some(name) => write!(out, " %{}", module.resolve(name)),
                None => write!(out, " {}", inst),
            }
        }
        Use::Global(ty, global) => {
            write_ty(module, ty, out)?;
            let data = module.global(*global);
            write!(out, " {}{}", global_sigil(data.kind), module.resolve(data.name))
        }
        Use::Function(ty, func) => {
            write_ty(module, ty, out)?;
            write!(out, " @{}", module.resolve(module.func(*func).name))
        }
        Use::Literal(ty, literal) => {
            write_ty(module, ty, out)?;
            write!(out, " {}", literal)
        }
        Use::Constant(ty, kind) => {
            write_ty(module, ty, out)?;
            out.write_str(" (")?;
            write_kind(module, kind, out)?;
            out.write_str(")")
        }
    }
}

fn write_use_list<W: Write>(module: &Module, uses: &[Use], out: &mut W) -> fmt::Result {
    for (i, u) in uses.iter().enumerate() {
        if i > 0 {
            out.write_str(", ")?;
        }
        write_use(module, u, out)?;
    }
    Ok(())
}

fn write_keys<W: Write>(keys: &[ElementKey], out: &mut W) -> fmt::Result {
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            out.write_str(", ")?;
        }
        write!(out, "{}", key)?;
    }
    Ok(())
}

fn write_target<W: Write>(
    module: &Module,
    block: Block,
    arguments: &[Use],
    out: &mut W,
) -> fmt::Result {
    write!(out, "%{}(", module.resolve(module.block(block).name))?;
    write_use_list(module, arguments, out)?;
    out.write_str(")")
}

fn write_global_ref<W: Write>(module: &Module, global: Global, out: &mut W) -> fmt::Result {
    let data = module.global(global);
    write_ty(module, &data.ty, out)?;
    write!(out, " {}{}", global_sigil(data.kind), module.resolve(data.name))
}

fn write_kind<W: Write>(module: &Module, kind: &InstKind, out: &mut W) -> fmt::Result {
    match kind {
        InstKind::Binary { op, lhs, rhs, .. } => {
            write!(out, "{} ", op)?;
            write_use(module, lhs, out)?;
            out.write_str(", ")?;
            write_use(module, rhs, out)
        }
        InstKind::Unary { op, operand } => {
            write!(out, "{} ", op)?;
            write_use(module, operand, out)
        }
        InstKind::MatrixMultiply { lhs, rhs } => {
            out.write_str("matrixMultiply ")?;
            write_use(module, lhs, out)?;
            out.write_str(", ")?;
            write_use(module, rhs, out)
        }
        InstKind::Transpose { operand } => {
            out.write_str("transpose ")?;
            write_use(module, operand, out)
        }
        InstKind::Reduce { op, operand, axis } => {
            write!(out, "reduce {} ", op)?;
            write_use(module, operand, out)?;
            write!(out, " along {}", axis)
        }
        InstKind::Scan { op, operand, axis } => {
            write!(out, "scan {} ", op)?;
            write_use(module, operand, out)?;
            write!(out, " along {}", axis)
        }
        InstKind::Concatenate { operands, axis } => {
            out.write_str("concatenate ")?;
            write_use_list(module, operands, out)?;
            write!(out, " along {}", axis)
        }
        InstKind::ShapeCast { operand, shape } => {
            out.write_str("shapeCast ")?;
            write_use(module, operand, out)?;
            write!(out, " to {}", shape)
        }
        InstKind::DataTypeCast { operand, data_type } => {
            out.write_str("dataTypeCast ")?;
            write_use(module, operand, out)?;
            write!(out, " to {}", data_type)
        }
        InstKind::BitCast { operand, target } => {
            out.write_str("bitCast ")?;
            write_use(module, operand, out)?;
            out.write_str(" to ")?;
            write_ty(module, target, out)
        }
        InstKind::Tuple { operands } => {
            out.write_str("tuple ")?;
            write_use_list(module, operands, out)
        }
        InstKind::Extract { source, keys } => {
            let keyword = match keys.first() {
                Some(ElementKey::Index(_)) => "subtensor",
                _ => "element",
            };
            write!(out, "{} ", keyword)?;
            write_use(module, source, out)?;
            out.write_str(" at ")?;
            write_keys(keys, out)
        }
        InstKind::Insert {
            value,
            destination,
            keys,
        } => {
            out.write_str("insert ")?;
            write_use(module, value, out)?;
            out.write_str(" to ")?;
            write_use(module, destination, out)?;
            out.write_str(" at ")?;
            write_keys(keys, out)
        }
        InstKind::ElementPointer { source, keys } => {
            out.write_str("elementPointer ")?;
            write_use(module, source, out)?;
            out.write_str(" at ")?;
            write_keys(keys, out)
        }
        InstKind::Load { source } => {
            out.write_str("load ")?;
            write_use(module, source, out)
        }
        InstKind::Store { value, destination } => {
            out.write_str("store ")?;
            write_use(module, value, out)?;
            out.write_str(" to ")?;
            write_use(module, destination, out)
        }
        InstKind::AllocateHeap { ty, count } => {
            out.write_str("allocateHeap ")?;
            write_ty(module, ty, out)?;
            out.write_str(" count ")?;
            write_use(module, count, out)
        }
        InstKind::AllocateBox { ty } => {
            out.write_str("allocateBox ")?;
            write_ty(module, ty, out)
        }
        InstKind::ProjectBox { operand } => {
            out.write_str("projectBox ")?;
            write_use(module, operand, out)
        }
        InstKind::Deallocate { operand } => {
            out.write_str("deallocate ")?;
            write_use(module, operand, out)
        }
        InstKind::Apply { callee, arguments } => {
            out.write_str("call ")?;
            write_use(module, callee, out)?;
            out.write_str("(")?;
            write_use_list(module, arguments, out)?;
            out.write_str(")")
        }
        InstKind::Gradient {
            function,
            from,
            wrt,
            keeping,
        } => {
            out.write_str("gradient ")?;
            write_use(module, function, out)?;
            write!(out, " from {}", from)?;
            if !wrt.is_empty() {
                out.write_str(" wrt ")?;
                for (i, idx) in wrt.iter().enumerate() {
                    if i > 0 {
                        out.write_str(", ")?;
                    }
                    write!(out, "{}", idx)?;
                }
            }
            if !keeping.is_empty() {
                out.write_str(" keeping ")?;
                for (i, idx) in keeping.iter().enumerate() {
                    if i > 0 {
                        out.write_str(", ")?;
                    }
                    write!(out, "{}", idx)?;
                }
            }
            Ok(())
        }
        InstKind::Pull { source } => {
            out.write_str("pull ")?;
            write_global_ref(module, *source, out)
        }
        InstKind::Yield { value, to } => {
            out.write_str("yield ")?;
            write_use(module, value, out)?;
            out.write_str(" to ")?;
            write_global_ref(module, *to, out)
        }
        InstKind::Branch { target, arguments } => {
            out.write_str("branch ")?;
            write_target(module, *target, arguments, out)
        }
        InstKind::Conditional {
            condition,
            then_target,
            then_arguments,
            else_target,
            else_arguments,
        } => {
            out.write_str("conditional ")?;
            write_use(module, condition, out)?;
            out.write_str(" then ")?;
            write_target(module, *then_target, then_arguments, out)?;
            out.write_str(" else ")?;
            write_target(module, *else_target, else_arguments, out)
        }
        InstKind::Return { value } => match value {
            None => out.write_str("return"),
            Some(value) => {
                out.write_str("return ")?;
                write_use(module, value, out)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder::Builder,
        ty::{DataType, Shape},
        value::{Literal, ScalarLiteral},
    };

    #[test]
    fn minimal_function_prints_exactly() {
        let mut module = Module::new("M");
        let mut b = Builder::new(&mut module);
        let func = b.build_function("f", &[], Type::Void, Vec::new()).unwrap();
        let entry = b.module().entry(func);
        b.move_to(Some(entry));
        b.ret(None).unwrap();

        assert_eq!(
            module.to_string(),
            "module M\n\n\nfunc @f() {\nentry():\n    return\n}\n\n\n"
        );
    }

    #[test]
    fn sample_module_prints_exactly() {
        let t = Type::tensor(vec![32, 32], DataType::float(32));
        let mut module = Module::new("M");
        let mut b = Builder::new(&mut module);
        b.build_global("x", crate::GlobalKind::Placeholder, t.clone(), None)
            .unwrap();
        let w = b
            .build_global(
                "w",
                crate::GlobalKind::Variable,
                t.clone(),
                Some(Use::Literal(
                    t.clone(),
                    Literal::Repeating(ScalarLiteral::Float(0.0)),
                )),
            )
            .unwrap();
        b.build_global("y", crate::GlobalKind::Output, t.clone(), None)
            .unwrap();

        let func = b
            .build_function(
                "f",
                &[("a", t.clone()), ("b", t.clone())],
                t.clone(),
                vec![FunctionAttribute::Differentiable],
            )
            .unwrap();
        let entry = b.module().entry(func);
        b.move_to(Some(entry));
        let (ua, ub) = {
            let m = b.module();
            let args = &m.func(func).args;
            (m.arg_use(args[0]), m.arg_use(args[1]))
        };
        let v0 = b.add(ua, ub).unwrap();
        let v0_use = b.module().inst_use(v0);
        let uw = b.module().global_use(w);
        let v1 = b.matrix_multiply(v0_use, uw).unwrap();
        let v1_use = b.module().inst_use(v1);
        b.ret(Some(v1_use)).unwrap();

        let expected = "\
module M

declare placeholder %x : f32 [32x32]
declare variable @w : f32 [32x32] = repeating 0.0
declare output @y : f32 [32x32]

differentiable func @f(%a: f32 [32x32], %b: f32 [32x32]) -> f32 [32x32] {
entry(%a: f32 [32x32], %b: f32 [32x32]):
    %v0 = add f32 [32x32] %a, f32 [32x32] %b
    %v1 = matrixMultiply f32 [32x32] %v0, f32 [32x32] @w
    return f32 [32x32] %v1
}


";
        assert_eq!(module.to_string(), expected);
    }

    #[test]
    fn control_flow_renders_targets_with_arguments() {
        let f32s = Type::scalar(DataType::float(32));
        let mut module = Module::new("M");
        let mut b = Builder::new(&mut module);
        let func = b
            .build_function("loop", &[("n", f32s.clone())], Type::Void, Vec::new())
            .unwrap();
        let entry = b.module().entry(func);
        let body = b.build_block("body", &[("i", f32s.clone())], func);
        b.move_to(Some(entry));
        let n = {
            let m = b.module();
            m.arg_use(m.func(func).args[0])
        };
        b.branch(body, vec![n]).unwrap();
        b.move_to(Some(body));
        b.ret(None).unwrap();

        let printed = module.to_string();
        assert!(printed.contains("    branch %body(f32 %n)\n"));
        assert!(printed.contains("body(%i: f32):\n"));
    }

    #[test]
    fn aggregate_operations_render_fixed_keywords() {
        let f32s = Type::scalar(DataType::float(32));
        let pair = Type::Tuple(vec![f32s.clone(), f32s.clone()]);
        let mut module = Module::new("M");
        let mut b = Builder::new(&mut module);
        let func = b
            .build_function("agg", &[("p", pair.clone())], Type::Void, Vec::new())
            .unwrap();
        let entry = b.module().entry(func);
        b.move_to(Some(entry));
        let p = {
            let m = b.module();
            m.arg_use(m.func(func).args[0])
        };
        b.extract(p.clone(), vec![crate::ty::ElementKey::Position(1)])
            .unwrap();
        let v = {
            let m = b.module();
            m.literal_use(
                Type::tensor(vec![4], DataType::float(32)),
                Literal::Elements(vec![
                    Literal::Scalar(ScalarLiteral::Float(1.0)),
                    Literal::Scalar(ScalarLiteral::Float(2.0)),
                    Literal::Scalar(ScalarLiteral::Float(3.0)),
                    Literal::Scalar(ScalarLiteral::Float(4.0)),
                ]),
            )
        };
        b.extract(v, vec![crate::ty::ElementKey::Index(2)]).unwrap();
        b.ret(None).unwrap();

        let printed = module.to_string();
        assert!(printed.contains("%v0 = element (f32, f32) %p at 1\n"));
        assert!(printed
            .contains("%v1 = subtensor f32 [4] elements [ 1.0, 2.0, 3.0, 4.0 ] at 2\n"));
    }

    #[test]
    fn type_declarations_render_before_globals() {
        let f32s = Type::scalar(DataType::float(32));
        let mut module = Module::new("M");
        let mut b = Builder::new(&mut module);
        b.build_struct("point", &[("x", f32s.clone()), ("y", f32s.clone())], Vec::new())
            .unwrap();
        b.build_alias("probability", Some(f32s.clone())).unwrap();
        b.build_alias("opaque", None).unwrap();
        b.build_global("w", crate::GlobalKind::Variable, f32s, None)
            .unwrap();

        let expected = "\
module M

struct $point { x: f32, y: f32 }
type $probability = f32
type $opaque
declare variable @w : f32

";
        assert_eq!(module.to_string(), expected);
    }

    #[test]
    fn shape_and_cast_rendering() {
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
        b.shape_cast(x.clone(), Shape(vec![6])).unwrap();
        b.data_type_cast(x, DataType::int(32)).unwrap();
        b.ret(None).unwrap();

        let printed = module.to_string();
        assert!(printed.contains("%v0 = shapeCast f32 [2x3] %x to [6]\n"));
        assert!(printed.contains("%v1 = dataTypeCast f32 [2x3] %x to i32\n"));
    }
}
