use std::collections::HashMap;

use crate::{
    ty::{BroadcastingConfig, DataType, ElementKey, Shape, Type},
    value::Use,
    Block, Global, Inst, Module,
};

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Modulo,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BooleanOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Equal,
    NotEqual,
}

/// Binary operators, grouped by result behavior: associative and boolean
/// operators keep the broadcast element type, comparisons always produce a
/// boolean tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Arithmetic(ArithmeticOp),
    Boolean(BooleanOp),
    Comparison(ComparisonOp),
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(self, BinaryOp::Comparison(_))
    }
}

/// Elementwise unary transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Sigmoid,
    Tanh,
    Relu,
    Exp,
    Log,
    Sin,
    Cos,
    Sqrt,
    Negate,
    Not,
}

impl std::fmt::Display for ArithmeticOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArithmeticOp::Add => write!(f, "add"),
            ArithmeticOp::Subtract => write!(f, "subtract"),
            ArithmeticOp::Multiply => write!(f, "multiply"),
            ArithmeticOp::Divide => write!(f, "divide"),
            ArithmeticOp::Power => write!(f, "power"),
            ArithmeticOp::Modulo => write!(f, "modulo"),
            ArithmeticOp::Min => write!(f, "min"),
            ArithmeticOp::Max => write!(f, "max"),
        }
    }
}

impl std::fmt::Display for BooleanOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BooleanOp::And => write!(f, "and"),
            BooleanOp::Or => write!(f, "or"),
        }
    }
}

impl std::fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComparisonOp::LessThan => write!(f, "lessThan"),
            ComparisonOp::LessThanOrEqual => write!(f, "lessThanOrEqual"),
            ComparisonOp::GreaterThan => write!(f, "greaterThan"),
            ComparisonOp::GreaterThanOrEqual => write!(f, "greaterThanOrEqual"),
            ComparisonOp::Equal => write!(f, "equal"),
            ComparisonOp::NotEqual => write!(f, "notEqual"),
        }
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinaryOp::Arithmetic(op) => write!(f, "{}", op),
            BinaryOp::Boolean(op) => write!(f, "{}", op),
            BinaryOp::Comparison(op) => write!(f, "{}", op),
        }
    }
}

impl std::fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnaryOp::Sigmoid => write!(f, "sigmoid"),
            UnaryOp::Tanh => write!(f, "tanh"),
            UnaryOp::Relu => write!(f, "relu"),
            UnaryOp::Exp => write!(f, "exp"),
            UnaryOp::Log => write!(f, "log"),
            UnaryOp::Sin => write!(f, "sin"),
            UnaryOp::Cos => write!(f, "cos"),
            UnaryOp::Sqrt => write!(f, "sqrt"),
            UnaryOp::Negate => write!(f, "negate"),
            UnaryOp::Not => write!(f, "not"),
        }
    }
}

// ---------------------------------------------------------------------------
// InstKind
// ---------------------------------------------------------------------------

/// The closed sum of all operations.
///
/// Every kind deterministically computes a result type from its operand
/// types via [`InstKind::result_ty`]; ill-typed combinations yield
/// [`Type::Invalid`] rather than failing, and are reported by the verifier.
#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    Binary {
        op: BinaryOp,
        lhs: Use,
        rhs: Use,
        broadcasting: Option<BroadcastingConfig>,
    },
    Unary {
        op: UnaryOp,
        operand: Use,
    },
    MatrixMultiply {
        lhs: Use,
        rhs: Use,
    },
    Transpose {
        operand: Use,
    },
    Reduce {
        op: BinaryOp,
        operand: Use,
        axis: usize,
    },
    Scan {
        op: BinaryOp,
        operand: Use,
        axis: usize,
    },
    Concatenate {
        operands: Vec<Use>,
        axis: usize,
    },
    ShapeCast {
        operand: Use,
        shape: Shape,
    },
    DataTypeCast {
        operand: Use,
        data_type: DataType,
    },
    BitCast {
        operand: Use,
        target: Type,
    },
    Tuple {
        operands: Vec<Use>,
    },
    Extract {
        source: Use,
        keys: Vec<ElementKey>,
    },
    Insert {
        value: Use,
        destination: Use,
        keys: Vec<ElementKey>,
    },
    ElementPointer {
        source: Use,
        keys: Vec<ElementKey>,
    },
    Load {
        source: Use,
    },
    Store {
        value: Use,
        destination: Use,
    },
    AllocateHeap {
        ty: Type,
        count: Use,
    },
    AllocateBox {
        ty: Type,
    },
    ProjectBox {
        operand: Use,
    },
    Deallocate {
        operand: Use,
    },
    Apply {
        callee: Use,
        arguments: Vec<Use>,
    },
    /// The reverse-mode derivative of a function, with respect to the
    /// `wrt`-selected arguments (all of them when empty), differentiating
    /// the `from`-th output and additionally keeping the `keeping`-selected
    /// primal outputs.
    Gradient {
        function: Use,
        from: usize,
        wrt: Vec<usize>,
        keeping: Vec<usize>,
    },
    /// Reads the current value of a placeholder or variable global.
    Pull {
        source: Global,
    },
    /// Writes a value into an output global.
    Yield {
        value: Use,
        to: Global,
    },
    Branch {
        target: Block,
        arguments: Vec<Use>,
    },
    Conditional {
        condition: Use,
        then_target: Block,
        then_arguments: Vec<Use>,
        else_target: Block,
        else_arguments: Vec<Use>,
    },
    Return {
        value: Option<Use>,
    },
}

impl InstKind {
    /// A terminator ends a basic block by transferring control.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Branch { .. } | InstKind::Conditional { .. } | InstKind::Return { .. }
        )
    }

    /// Computes the result type of this kind from its operand types.
    ///
    /// The module resolves aliases, struct fields, and referenced globals.
    pub fn result_ty(&self, module: &Module) -> Type {
        match self {
            InstKind::Binary {
                op,
                lhs,
                rhs,
                broadcasting,
            } => {
                let lt = module.canonical_ty(lhs.ty());
                let rt = module.canonical_ty(rhs.ty());
                match lt.broadcast(rt, *broadcasting) {
                    Some(Type::Tensor(shape, _)) if op.is_comparison() => {
                        Type::Tensor(shape, DataType::bool())
                    }
                    Some(ty) => ty,
                    None => Type::Invalid,
                }
            }
            InstKind::Unary { operand, .. } => operand.ty().clone(),
            InstKind::MatrixMultiply { lhs, rhs } => {
                let lt = module.canonical_ty(lhs.ty());
                let rt = module.canonical_ty(rhs.ty());
                lt.matmul(rt).unwrap_or(Type::Invalid)
            }
            InstKind::Transpose { operand } => {
                match module.canonical_ty(operand.ty()).as_tensor() {
                    Some((shape, dt)) => Type::Tensor(shape.transposed(), dt),
                    None => Type::Invalid,
                }
            }
            InstKind::Reduce { operand, axis, .. } => {
                match module.canonical_ty(operand.ty()).as_tensor() {
                    Some((shape, dt)) => match shape.dropping(*axis) {
                        Some(shape) => Type::Tensor(shape, dt),
                        None => Type::Invalid,
                    },
                    None => Type::Invalid,
                }
            }
            InstKind::Scan { operand, axis, .. } => {
                match module.canonical_ty(operand.ty()).as_tensor() {
                    Some((shape, _)) if *axis < shape.rank() => operand.ty().clone(),
                    _ => Type::Invalid,
                }
            }
            InstKind::Concatenate { operands, axis } => {
                concatenate_ty(module, operands, *axis).unwrap_or(Type::Invalid)
            }
            InstKind::ShapeCast { operand, shape } => {
                match module.canonical_ty(operand.ty()).as_tensor() {
                    Some((_, dt)) => Type::Tensor(shape.clone(), dt),
                    None => Type::Invalid,
                }
            }
            InstKind::DataTypeCast { operand, data_type } => {
                match module.canonical_ty(operand.ty()).as_tensor() {
                    Some((shape, _)) => Type::Tensor(shape.clone(), *data_type),
                    None => Type::Invalid,
                }
            }
            InstKind::BitCast { target, .. } => target.clone(),
            InstKind::Tuple { operands } => {
                Type::Tuple(operands.iter().map(|u| u.ty().clone()).collect())
            }
            InstKind::Extract { source, keys } => module
                .element_ty(source.ty(), keys)
                .unwrap_or(Type::Invalid),
            InstKind::Insert { destination, .. } => destination.ty().clone(),
            InstKind::ElementPointer { source, keys } => {
                let base = module.canonical_ty(source.ty());
                let inner = base.pointee().unwrap_or(base);
                match module.element_ty(inner, keys) {
                    Some(elem) => Type::Pointer(Box::new(elem)),
                    None => Type::Invalid,
                }
            }
            InstKind::Load { source } => module
                .canonical_ty(source.ty())
                .pointee()
                .cloned()
                .unwrap_or(Type::Invalid),
            InstKind::AllocateHeap { ty, .. } => Type::Array(Box::new(ty.clone())),
            InstKind::AllocateBox { ty } => Type::Box(Box::new(ty.clone())),
            InstKind::ProjectBox { operand } => module
                .canonical_ty(operand.ty())
                .pointee()
                .cloned()
                .unwrap_or(Type::Invalid),
            InstKind::Apply { callee, .. } => match module.canonical_ty(callee.ty()) {
                Type::Function(_, result) => (**result).clone(),
                _ => Type::Invalid,
            },
            InstKind::Gradient {
                function,
                from,
                wrt,
                keeping,
            } => gradient_ty(module, function, *from, wrt, keeping).unwrap_or(Type::Invalid),
            InstKind::Pull { source } => module.global(*source).ty.clone(),
            InstKind::Store { .. }
            | InstKind::Deallocate { .. }
            | InstKind::Yield { .. }
            | InstKind::Branch { .. }
            | InstKind::Conditional { .. }
            | InstKind::Return { .. } => Type::Void,
        }
    }

    /// Collects references to every direct operand use. Constant expression
    /// uses are not descended into; callers that care recurse themselves.
    pub fn collect_uses<'a>(&'a self, out: &mut Vec<&'a Use>) {
        self.for_each_use(&mut |u| out.push(u));
    }

    fn for_each_use<'a>(&'a self, f: &mut impl FnMut(&'a Use)) {
        match self {
            InstKind::Binary { lhs, rhs, .. } | InstKind::MatrixMultiply { lhs, rhs } => {
                f(lhs);
                f(rhs);
            }
            InstKind::Unary { operand, .. }
            | InstKind::Transpose { operand }
            | InstKind::Reduce { operand, .. }
            | InstKind::Scan { operand, .. }
            | InstKind::ShapeCast { operand, .. }
            | InstKind::DataTypeCast { operand, .. }
            | InstKind::BitCast { operand, .. }
            | InstKind::ProjectBox { operand }
            | InstKind::Deallocate { operand } => f(operand),
            InstKind::Concatenate { operands, .. } | InstKind::Tuple { operands } => {
                operands.iter().for_each(&mut *f)
            }
            InstKind::Extract { source, .. } | InstKind::ElementPointer { source, .. } => f(source),
            InstKind::Insert {
                value, destination, ..
            }
            | InstKind::Store { value, destination } => {
                f(value);
                f(destination);
            }
            InstKind::Load { source } => f(source),
            InstKind::AllocateHeap { count, .. } => f(count),
            InstKind::AllocateBox { .. } | InstKind::Pull { .. } => {}
            InstKind::Apply { callee, arguments } => {
                f(callee);
                arguments.iter().for_each(&mut *f);
            }
            InstKind::Gradient { function, .. } => f(function),
            InstKind::Yield { value, .. } => f(value),
            InstKind::Branch { arguments, .. } => arguments.iter().for_each(&mut *f),
            InstKind::Conditional {
                condition,
                then_arguments,
                else_arguments,
                ..
            } => {
                f(condition);
                then_arguments.iter().for_each(&mut *f);
                else_arguments.iter().for_each(&mut *f);
            }
            InstKind::Return { value } => {
                if let Some(value) = value {
                    f(value)
                }
            }
        }
    }

    /// Rewrites every use of a replaced instruction to the mapped use.
    /// Transformation passes call this after unlinking definitions.
    pub fn replace_uses(&mut self, map: &HashMap<Inst, Use>) {
        self.for_each_use_mut(&mut |u| {
            if let Use::Inst(_, inst) = u {
                if let Some(replacement) = map.get(inst) {
                    *u = replacement.clone();
                }
            }
        });
    }

    fn for_each_use_mut(&mut self, f: &mut impl FnMut(&mut Use)) {
        match self {
            InstKind::Binary { lhs, rhs, .. } | InstKind::MatrixMultiply { lhs, rhs } => {
                f(lhs);
                f(rhs);
            }
            InstKind::Unary { operand, .. }
            | InstKind::Transpose { operand }
            | InstKind::Reduce { operand, .. }
            | InstKind::Scan { operand, .. }
            | InstKind::ShapeCast { operand, .. }
            | InstKind::DataTypeCast { operand, .. }
            | InstKind::BitCast { operand, .. }
            | InstKind::ProjectBox { operand }
            | InstKind::Deallocate { operand } => f(operand),
            InstKind::Concatenate { operands, .. } | InstKind::Tuple { operands } => {
                operands.iter_mut().for_each(&mut *f)
            }
            InstKind::Extract { source, .. } | InstKind::ElementPointer { source, .. } => f(source),
            InstKind::Insert {
                value, destination, ..
            }
            | InstKind::Store { value, destination } => {
                f(value);
                f(destination);
            }
            InstKind::Load { source } => f(source),
            InstKind::AllocateHeap { count, .. } => f(count),
            InstKind::AllocateBox { .. } | InstKind::Pull { .. } => {}
            InstKind::Apply { callee, arguments } => {
                f(callee);
                arguments.iter_mut().for_each(&mut *f);
            }
            InstKind::Gradient { function, .. } => f(function),
            InstKind::Yield { value, .. } => f(value),
            InstKind::Branch { arguments, .. } => arguments.iter_mut().for_each(&mut *f),
            InstKind::Conditional {
                condition,
                then_arguments,
                else_arguments,
                ..
            } => {
                f(condition);
                then_arguments.iter_mut().for_each(&mut *f);
                else_arguments.iter_mut().for_each(&mut *f);
            }
            InstKind::Return { value } => {
                if let Some(value) = value {
                    f(value)
                }
            }
        }
    }

    /// The control-flow successors of this kind, if it is a terminator.
    pub fn targets(&self) -> Vec<Block> {
        match self {
            InstKind::Branch { target, .. } => vec![*target],
            InstKind::Conditional {
                then_target,
                else_target,
                ..
            } => vec![*then_target, *else_target],
            _ => Vec::new(),
        }
    }
}

fn concatenate_ty(module: &Module, operands: &[Use], axis: usize) -> Option<Type> {
    let first = module.canonical_ty(operands.first()?.ty());
    let (first_shape, dt) = first.as_tensor()?;
    if axis >= first_shape.rank() {
        return None;
    }
    let mut dims = first_shape.0.clone();
    for operand in &operands[1..] {
        let (shape, odt) = module.canonical_ty(operand.ty()).as_tensor()?;
        if odt != dt || shape.rank() != first_shape.rank() {
            return None;
        }
        for (i, (a, b)) in first_shape.0.iter().zip(shape.0.iter()).enumerate() {
            if i == axis {
                dims[axis] += b;
            } else if a != b {
                return None;
            }
        }
    }
    Some(Type::Tensor(Shape(dims), dt))
}

fn gradient_ty(
    module: &Module,
    function: &Use,
    from: usize,
    wrt: &[usize],
    keeping: &[usize],
) -> Option<Type> {
    let Type::Function(arguments, result) = module.canonical_ty(function.ty()) else {
        return None;
    };
    let outputs: Vec<&Type> = match &**result {
        Type::Tuple(items) => items.iter().collect(),
        ty => vec![ty],
    };
    if from >= outputs.len() {
        return None;
    }
    let mut items = Vec::new();
    if wrt.is_empty() {
        items.extend(arguments.iter().cloned());
    } else {
        for &i in wrt {
            items.push(arguments.get(i)?.clone());
        }
    }
    for &i in keeping {
        items.push((*outputs.get(i)?).clone());
    }
    Some(Type::Tuple(items))
}
