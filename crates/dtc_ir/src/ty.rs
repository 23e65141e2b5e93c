use crate::{Alias, Struct};

// ---------------------------------------------------------------------------
// DataType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataTypeBase {
    Bool,
    Int,
    Float,
}

/// A scalar element type: a base kind together with a bit width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataType {
    pub base: DataTypeBase,
    pub bits: u16,
}

impl DataType {
    pub const fn bool() -> Self {
        Self {
            base: DataTypeBase::Bool,
            bits: 1,
        }
    }

    pub const fn int(bits: u16) -> Self {
        Self {
            base: DataTypeBase::Int,
            bits,
        }
    }

    pub const fn float(bits: u16) -> Self {
        Self {
            base: DataTypeBase::Float,
            bits,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.base, DataTypeBase::Int | DataTypeBase::Float)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let letter = match self.base {
            DataTypeBase::Bool => 'b',
            DataTypeBase::Int => 'i',
            DataTypeBase::Float => 'f',
        };
        write!(f, "{}{}", letter, self.bits)
    }
}

// ---------------------------------------------------------------------------
// Shape
// ---------------------------------------------------------------------------

/// A tensor shape: a finite sequence of positive dimensions. The empty
/// sequence is the scalar shape.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct Shape(pub Vec<usize>);

/// Restricts which operand of a broadcasting operation may be expanded.
/// Without a config, size-1 expansion is allowed on either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BroadcastingConfig {
    Left,
    Right,
}

impl Shape {
    pub fn scalar() -> Self {
        Shape(Vec::new())
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_scalar(&self) -> bool {
        self.0.is_empty()
    }

    pub fn element_count(&self) -> usize {
        self.0.iter().product()
    }

    /// Drops the leading dimension, yielding the shape of one subtensor.
    pub fn dropping_first(&self) -> Shape {
        Shape(self.0[1..].to_vec())
    }

    /// Broadcasts two shapes by aligning trailing dimensions. Dimensions
    /// pair up when equal or when the side allowed by `config` is 1; the
    /// shorter shape is padded on the left.
    pub fn broadcast(&self, other: &Shape, config: Option<BroadcastingConfig>) -> Option<Shape> {
        let rank = self.rank().max(other.rank());
        let mut dims = vec![0; rank];
        for i in 0..rank {
            let l = if i < self.rank() {
                Some(self.0[self.rank() - 1 - i])
            } else {
                None
            };
            let r = if i < other.rank() {
                Some(other.0[other.rank() - 1 - i])
            } else {
                None
            };
            let d = match (l, r) {
                (Some(l), Some(r)) if l == r => l,
                (Some(1), Some(r)) if config != Some(BroadcastingConfig::Right) => r,
                (Some(l), Some(1)) if config != Some(BroadcastingConfig::Left) => l,
                (Some(l), None) => l,
                (None, Some(r)) => r,
                _ => return None,
            };
            dims[rank - 1 - i] = d;
        }
        Some(Shape(dims))
    }

    /// Matrix-multiplication result shape: the last dimension of `self`
    /// contracts with the first dimension of `rhs`; the remaining
    /// dimensions concatenate.
    pub fn matmul(&self, rhs: &Shape) -> Option<Shape> {
        let (l, r) = (self.0.last()?, rhs.0.first()?);
        if l != r {
            return None;
        }
        let mut dims = self.0[..self.rank() - 1].to_vec();
        dims.extend_from_slice(&rhs.0[1..]);
        Some(Shape(dims))
    }

    /// The shape with the last two dimensions reversed. Shapes of rank
    /// below 2 are unchanged.
    pub fn transposed(&self) -> Shape {
        let mut dims = self.0.clone();
        let n = dims.len();
        if n >= 2 {
            dims.swap(n - 2, n - 1);
        }
        Shape(dims)
    }

    /// The shape with `axis` removed, if present.
    pub fn dropping(&self, axis: usize) -> Option<Shape> {
        if axis >= self.rank() {
            return None;
        }
        let mut dims = self.0.clone();
        dims.remove(axis);
        Some(Shape(dims))
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape(dims)
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "x")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

// ---------------------------------------------------------------------------
// ElementKey
// ---------------------------------------------------------------------------

/// One step of an aggregate access path: a tuple/struct field position or a
/// tensor/array subscript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKey {
    Position(usize),
    Index(usize),
}

impl std::fmt::Display for ElementKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElementKey::Position(i) | ElementKey::Index(i) => write!(f, "{}", i),
        }
    }
}

// ---------------------------------------------------------------------------
// Type
// ---------------------------------------------------------------------------

/// The closed sum of IR types.
///
/// Equality is structural except for `Alias` and `Struct`, which are
/// nominal and compare by reference identity.
#[derive(Debug, Default, Clone, PartialEq)]
pub enum Type {
    #[default]
    Void,
    Tensor(Shape, DataType),
    Tuple(Vec<Type>),
    Array(Box<Type>),
    Pointer(Box<Type>),
    Box(Box<Type>),
    Alias(Alias),
    Struct(Struct),
    Function(Vec<Type>, Box<Type>),
    /// Sentinel produced for ill-typed operand combinations; only the
    /// verifier and the printer ever look at it.
    Invalid,
}

impl Type {
    /// A scalar tensor of the given element type.
    pub fn scalar(dt: DataType) -> Self {
        Type::Tensor(Shape::scalar(), dt)
    }

    pub fn tensor(dims: Vec<usize>, dt: DataType) -> Self {
        Type::Tensor(Shape(dims), dt)
    }

    #[inline]
    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    #[inline]
    pub fn is_tensor(&self) -> bool {
        matches!(self, Type::Tensor(..))
    }

    /// A scalar is a zero-dimensional tensor.
    pub fn is_scalar(&self) -> bool {
        matches!(self, Type::Tensor(s, _) if s.is_scalar())
    }

    pub fn as_tensor(&self) -> Option<(&Shape, DataType)> {
        match self {
            Type::Tensor(s, dt) => Some((s, *dt)),
            _ => None,
        }
    }

    /// Unwraps one level of indirection: the target of a pointer or the
    /// value inside a box.
    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Pointer(t) | Type::Box(t) => Some(t),
            _ => None,
        }
    }

    /// Checks whether two tensor types broadcast together, and returns the
    /// resulting tensor type. The data types must agree.
    pub fn broadcast(&self, other: &Type, config: Option<BroadcastingConfig>) -> Option<Type> {
        let (ls, ld) = self.as_tensor()?;
        let (rs, rd) = other.as_tensor()?;
        if ld != rd {
            return None;
        }
        Some(Type::Tensor(ls.broadcast(rs, config)?, ld))
    }

    /// Matrix-multiplication result type.
    pub fn matmul(&self, rhs: &Type) -> Option<Type> {
        let (ls, ld) = self.as_tensor()?;
        let (rs, rd) = rhs.as_tensor()?;
        if ld != rd {
            return None;
        }
        Some(Type::Tensor(ls.matmul(rs)?, ld))
    }
}
