//! In-memory IR for a differentiable tensor-program compiler.
//!
//! A [`Module`] owns per-kind arenas of functions, basic blocks,
//! instructions, block arguments, globals, struct types, and type aliases;
//! entities address each other with plain [`dtc_entity`] references, so the
//! upward parent links are non-owning ids. Programs are constructed through
//! the [`builder::Builder`], walked with the [`graph`] traversals, printed
//! by [`print`], and checked by the deferred [`verify`] pass.

pub mod builder;
pub mod graph;
pub mod inst;
pub mod print;
pub mod ty;
pub mod value;
pub mod verify;

use std::collections::{HashMap, HashSet};

use dtc_entity::{entity_impl, PrimaryMap};
use string_interner::{DefaultStringInterner, DefaultSymbol};

pub use builder::{Builder, BuilderError};
pub use inst::{ArithmeticOp, BinaryOp, BooleanOp, ComparisonOp, InstKind, UnaryOp};
pub use ty::{BroadcastingConfig, DataType, DataTypeBase, ElementKey, Shape, Type};
pub use value::{Literal, ScalarLiteral, Use};
pub use verify::{Diagnostic, Verifier, VerifierResult};

// ---------------------------------------------------------------------------
// Entity references
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Func(u32);
entity_impl!(Func, "@fn");

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Block(u32);
entity_impl!(Block, "bb");

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Inst(u32);
entity_impl!(Inst, "%");

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Arg(u32);
entity_impl!(Arg, "%arg");

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Global(u32);
entity_impl!(Global, "@gv");

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Struct(u32);
entity_impl!(Struct, "$struct");

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Alias(u32);
entity_impl!(Alias, "$alias");

// ---------------------------------------------------------------------------
// Entity data
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionAttribute {
    Differentiable,
    Inline,
}

#[derive(Debug, Clone)]
pub struct FuncData {
    pub name: DefaultSymbol,
    /// Ordered typed arguments; also the parameter list of the entry block.
    pub args: Vec<Arg>,
    pub result: Type,
    pub attributes: Vec<FunctionAttribute>,
    /// Ordered blocks; `blocks[0]` is always the entry block.
    pub blocks: Vec<Block>,
    /// Every name claimed in this function: arguments, blocks, and named
    /// instructions share one injective scope.
    pub(crate) names: HashSet<DefaultSymbol>,
}

impl FuncData {
    pub fn is_differentiable(&self) -> bool {
        self.attributes.contains(&FunctionAttribute::Differentiable)
    }
}

#[derive(Debug, Clone)]
pub struct BlockData {
    pub name: DefaultSymbol,
    pub args: Vec<Arg>,
    pub insts: Vec<Inst>,
    pub func: Func,
}

#[derive(Debug, Clone)]
pub struct InstData {
    /// Present iff the result type is non-void.
    pub name: Option<DefaultSymbol>,
    /// Result type, computed from the kind at construction time.
    pub ty: Type,
    pub kind: InstKind,
    pub block: Block,
}

#[derive(Debug, Clone)]
pub struct ArgData {
    pub name: DefaultSymbol,
    pub ty: Type,
    pub block: Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalKind {
    Placeholder,
    Constant,
    Variable,
    Output,
}

impl std::fmt::Display for GlobalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GlobalKind::Placeholder => write!(f, "placeholder"),
            GlobalKind::Constant => write!(f, "constant"),
            GlobalKind::Variable => write!(f, "variable"),
            GlobalKind::Output => write!(f, "output"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GlobalData {
    pub name: DefaultSymbol,
    pub kind: GlobalKind,
    pub ty: Type,
    /// Placeholders and outputs carry no initializer.
    pub init: Option<Use>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructAttribute {
    Packed,
}

#[derive(Debug, Clone)]
pub struct StructData {
    pub name: DefaultSymbol,
    pub fields: Vec<(DefaultSymbol, Type)>,
    pub attributes: Vec<StructAttribute>,
}

#[derive(Debug, Clone)]
pub struct AliasData {
    pub name: DefaultSymbol,
    /// `None` is an opaque forward declaration.
    pub ty: Option<Type>,
}

// ---------------------------------------------------------------------------
// Module
// ---------------------------------------------------------------------------

/// The top-level IR container.
///
/// Owns every entity; all lookups go through it. Mutation happens through a
/// [`Builder`] positioned on the module.
pub struct Module {
    pub name: String,
    pub(crate) interner: DefaultStringInterner,
    pub(crate) funcs: PrimaryMap<Func, FuncData>,
    pub(crate) blocks: PrimaryMap<Block, BlockData>,
    pub(crate) insts: PrimaryMap<Inst, InstData>,
    pub(crate) args: PrimaryMap<Arg, ArgData>,
    pub(crate) globals: PrimaryMap<Global, GlobalData>,
    pub(crate) structs: PrimaryMap<Struct, StructData>,
    pub(crate) aliases: PrimaryMap<Alias, AliasData>,
    pub(crate) func_names: HashMap<DefaultSymbol, Func>,
    pub(crate) global_names: HashMap<DefaultSymbol, Global>,
    pub(crate) struct_names: HashMap<DefaultSymbol, Struct>,
    pub(crate) alias_names: HashMap<DefaultSymbol, Alias>,
    /// Instructions unlinked by transformation passes. Their slots stay
    /// allocated; uses still pointing at them are dangling.
    pub(crate) insts_free: HashSet<Inst>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interner: DefaultStringInterner::new(),
            funcs: PrimaryMap::new(),
            blocks: PrimaryMap::new(),
            insts: PrimaryMap::new(),
            args: PrimaryMap::new(),
            globals: PrimaryMap::new(),
            structs: PrimaryMap::new(),
            aliases: PrimaryMap::new(),
            func_names: HashMap::new(),
            global_names: HashMap::new(),
            struct_names: HashMap::new(),
            alias_names: HashMap::new(),
            insts_free: HashSet::new(),
        }
    }

    // ---------------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------------

    pub fn func(&self, func: Func) -> &FuncData {
        &self.funcs[func]
    }

    pub fn block(&self, block: Block) -> &BlockData {
        &self.blocks[block]
    }

    pub fn inst(&self, inst: Inst) -> &InstData {
        &self.insts[inst]
    }

    pub fn arg(&self, arg: Arg) -> &ArgData {
        &self.args[arg]
    }

    pub fn global(&self, global: Global) -> &GlobalData {
        &self.globals[global]
    }

    pub fn struct_ty(&self, st: Struct) -> &StructData {
        &self.structs[st]
    }

    pub fn alias(&self, alias: Alias) -> &AliasData {
        &self.aliases[alias]
    }

    pub fn inst_mut(&mut self, inst: Inst) -> &mut InstData {
        &mut self.insts[inst]
    }

    /// The entry block of a function.
    pub fn entry(&self, func: Func) -> Block {
        self.funcs[func].blocks[0]
    }

    pub(crate) fn intern(&mut self, name: &str) -> DefaultSymbol {
        self.interner.get_or_intern(name)
    }

    /// Resolves an interned name. Unknown symbols resolve to the empty
    /// string; they cannot occur for names created through this module.
    pub fn resolve(&self, sym: DefaultSymbol) -> &str {
        self.interner.resolve(sym).unwrap_or("")
    }

    // ---------------------------------------------------------------------------
    // Named lookup
    // ---------------------------------------------------------------------------

    pub fn func_by_name(&self, name: &str) -> Option<Func> {
        self.interner
            .get(name)
            .and_then(|sym| self.func_names.get(&sym).copied())
    }

    pub fn global_by_name(&self, name: &str) -> Option<Global> {
        self.interner
            .get(name)
            .and_then(|sym| self.global_names.get(&sym).copied())
    }

    pub fn struct_by_name(&self, name: &str) -> Option<Struct> {
        self.interner
            .get(name)
            .and_then(|sym| self.struct_names.get(&sym).copied())
    }

    pub fn alias_by_name(&self, name: &str) -> Option<Alias> {
        self.interner
            .get(name)
            .and_then(|sym| self.alias_names.get(&sym).copied())
    }

    // ---------------------------------------------------------------------------
    // Iteration
    // ---------------------------------------------------------------------------

    pub fn funcs(&self) -> impl Iterator<Item = (Func, &FuncData)> {
        self.funcs.iter()
    }

    pub fn globals(&self) -> impl Iterator<Item = (Global, &GlobalData)> {
        self.globals.iter()
    }

    pub fn structs(&self) -> impl Iterator<Item = (Struct, &StructData)> {
        self.structs.iter()
    }

    pub fn aliases(&self) -> impl Iterator<Item = (Alias, &AliasData)> {
        self.aliases.iter()
    }

    // ---------------------------------------------------------------------------
    // Typed uses
    // ---------------------------------------------------------------------------

    /// A use of an instruction's result, carrying its declared type.
    pub fn inst_use(&self, inst: Inst) -> Use {
        Use::Inst(self.insts[inst].ty.clone(), inst)
    }

    /// A use of a block argument, carrying its declared type.
    pub fn arg_use(&self, arg: Arg) -> Use {
        Use::Argument(self.args[arg].ty.clone(), arg)
    }

    /// A use of a global value, carrying its declared type.
    pub fn global_use(&self, global: Global) -> Use {
        Use::Global(self.globals[global].ty.clone(), global)
    }

    /// A use of a function, carrying its function type.
    pub fn func_use(&self, func: Func) -> Use {
        Use::Function(self.func_ty(func), func)
    }

    /// A literal use at a type ascription.
    pub fn literal_use(&self, ty: Type, literal: Literal) -> Use {
        Use::Literal(ty, literal)
    }

    /// The function type of a function: its argument types and result.
    pub fn func_ty(&self, func: Func) -> Type {
        let data = &self.funcs[func];
        let args = data.args.iter().map(|a| self.args[*a].ty.clone()).collect();
        Type::Function(args, Box::new(data.result.clone()))
    }

    // ---------------------------------------------------------------------------
    // Type queries
    // ---------------------------------------------------------------------------

    /// Follows alias bindings to the underlying type. Opaque aliases are
    /// their own canonical type.
    pub fn canonical_ty<'a>(&'a self, mut ty: &'a Type) -> &'a Type {
        while let Type::Alias(alias) = ty {
            match &self.aliases[*alias].ty {
                Some(target) => ty = target,
                None => break,
            }
        }
        ty
    }

    /// The type reached by stepping through an aggregate along `keys`:
    /// tuple and struct fields by position, tensors and arrays by
    /// subscript.
    pub fn element_ty(&self, ty: &Type, keys: &[ElementKey]) -> Option<Type> {
        let mut current = self.canonical_ty(ty).clone();
        for key in keys {
            current = match (self.canonical_ty(&current), key) {
                (Type::Tuple(items), ElementKey::Position(i)) => items.get(*i)?.clone(),
                (Type::Struct(st), ElementKey::Position(i)) => {
                    self.structs[*st].fields.get(*i)?.1.clone()
                }
                (Type::Tensor(shape, dt), ElementKey::Index(i)) => {
                    if shape.is_scalar() || *i >= shape.0[0] {
                        return None;
                    }
                    Type::Tensor(shape.dropping_first(), *dt)
                }
                (Type::Array(elem), ElementKey::Index(_)) => (**elem).clone(),
                _ => return None,
            };
        }
        Some(current)
    }

    // ---------------------------------------------------------------------------
    // Control flow
    // ---------------------------------------------------------------------------

    /// The blocks this block's terminator transfers to. Empty when the
    /// block is unterminated or returns.
    pub fn block_successors(&self, block: Block) -> Vec<Block> {
        self.blocks[block]
            .insts
            .last()
            .map(|inst| self.insts[*inst].kind.targets())
            .unwrap_or_default()
    }

    // ---------------------------------------------------------------------------
    // Removal
    // ---------------------------------------------------------------------------

    /// Unlinks an instruction from its block. The arena slot stays
    /// allocated; any remaining use of the instruction is dangling and is
    /// reported by the verifier.
    pub fn remove_inst(&mut self, inst: Inst) {
        let block = self.insts[inst].block;
        self.blocks[block].insts.retain(|i| *i != inst);
        self.insts_free.insert(inst);
    }

    pub fn is_removed(&self, inst: Inst) -> bool {
        self.insts_free.contains(&inst)
    }
}
