use crate::{
    inst::InstKind,
    ty::{DataTypeBase, Type},
    Arg, Func, Global, Inst,
};

// ---------------------------------------------------------------------------
// ScalarLiteral
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarLiteral {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl ScalarLiteral {
    /// Whether this scalar can inhabit an element of the given base kind.
    /// Integer literals are accepted at floating-point element types.
    pub fn fits_base(&self, base: DataTypeBase) -> bool {
        match self {
            ScalarLiteral::Bool(_) => base == DataTypeBase::Bool,
            ScalarLiteral::Int(_) => matches!(base, DataTypeBase::Int | DataTypeBase::Float),
            ScalarLiteral::Float(_) => base == DataTypeBase::Float,
        }
    }
}

impl std::fmt::Display for ScalarLiteral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarLiteral::Bool(b) => write!(f, "{}", b),
            ScalarLiteral::Int(i) => write!(f, "{}", i),
            // Floats always carry a decimal point in the textual IR.
            ScalarLiteral::Float(v) if v.is_finite() && v.fract() == 0.0 => {
                write!(f, "{:.1}", v)
            }
            ScalarLiteral::Float(v) => write!(f, "{}", v),
        }
    }
}

// ---------------------------------------------------------------------------
// Literal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Scalar(ScalarLiteral),
    /// A tensor spelled out element by element along the leading dimension.
    Elements(Vec<Literal>),
    /// A tensor holding the same scalar in every element.
    Repeating(ScalarLiteral),
    /// A tensor drawn uniformly from a half-open range.
    Random(ScalarLiteral, ScalarLiteral),
}

impl Literal {
    /// Checks this literal against a type ascription. Used when verifying
    /// `Use::Literal`, whose carried type is the ascription the literal is
    /// checked against rather than a type derived from the literal itself.
    pub fn fits(&self, ty: &Type) -> bool {
        let Some((shape, dt)) = ty.as_tensor() else {
            return false;
        };
        match self {
            Literal::Scalar(s) => shape.is_scalar() && s.fits_base(dt.base),
            Literal::Repeating(s) => s.fits_base(dt.base),
            Literal::Random(lo, hi) => {
                dt.is_numeric() && lo.fits_base(dt.base) && hi.fits_base(dt.base)
            }
            Literal::Elements(items) => {
                if shape.is_scalar() || items.len() != shape.0[0] {
                    return false;
                }
                let elem = Type::Tensor(shape.dropping_first(), dt);
                items.iter().all(|item| item.fits(&elem))
            }
        }
    }
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Scalar(s) => write!(f, "{}", s),
            Literal::Repeating(s) => write!(f, "repeating {}", s),
            Literal::Random(lo, hi) => write!(f, "random from {} to {}", lo, hi),
            Literal::Elements(items) => {
                write!(f, "elements [ ")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, " ]")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Use
// ---------------------------------------------------------------------------

/// A typed, non-owning reference from an operand to its producer.
///
/// The carried type must equal the referent's declared type; for `Literal`
/// it is the ascription the raw literal is checked against. The invariant
/// is maintained by constructing uses through the typed helpers on
/// [`Module`](crate::Module) and enforced by the verifier.
#[derive(Debug, Clone, PartialEq)]
pub enum Use {
    Argument(Type, Arg),
    Inst(Type, Inst),
    Global(Type, Global),
    Function(Type, Func),
    Literal(Type, Literal),
    /// A compile-time-computable instruction expression used as a value.
    Constant(Type, Box<InstKind>),
}

impl Use {
    pub fn ty(&self) -> &Type {
        match self {
            Use::Argument(ty, _)
            | Use::Inst(ty, _)
            | Use::Global(ty, _)
            | Use::Function(ty, _)
            | Use::Literal(ty, _)
            | Use::Constant(ty, _) => ty,
        }
    }
}
