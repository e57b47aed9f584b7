//! The scalar, shape, and layout vocabulary of the accelerator graph IR,
//! without being tied to any particular host engine's tensor metadata.
//!
//! Host engines each carry their own dtype and dimension descriptors; lowering
//! converts those into the types here, with the knowledge that these are
//! static and restricted to what the accelerator's compiler can actually
//! consume.

use std::fmt::{Display, Formatter};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// The semantic precision of a value in the accelerator IR.
///
/// This enum **does not** match any host engine's dtype lattice 1:1; it is
/// restricted to the precisions the accelerator can natively operate on.
///
/// # Value Semantics
///
/// It is intended that this type is used as having value semantics, and not
/// ever have a reference returned to it.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    /// The single-bit boolean type, used for masks and predicates.
    Bool,

    /// The IEEE-754 `binary16` floating-point type.
    Float16,

    /// The IEEE-754 `binary32` floating-point type.
    Float32,

    /// The 32-bit wide signed integer type.
    Int32,

    /// The 64-bit wide signed integer type, used for index tensors.
    Int64,
}

impl Display for Precision {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Precision::Bool => "bool",
            Precision::Float16 => "float16",
            Precision::Float32 => "float32",
            Precision::Int32 => "int32",
            Precision::Int64 => "int64",
        };
        write!(f, "{name}")
    }
}

/// The memory ordering convention for a tensor's dimensions.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// The channel-first (`NCHW`-style) ordering that the accelerator's
    /// compute primitives expect.
    ChannelFirst,

    /// No particular ordering; used for values whose layout is irrelevant,
    /// such as flat index lists.
    Any,
}

impl Display for Layout {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Layout::ChannelFirst => "channel-first",
            Layout::Any => "any",
        };
        write!(f, "{name}")
    }
}

/// The shape of a value in the accelerator IR.
///
/// Shapes here are always fully resolved: every dimension is a concrete
/// non-negative extent. Inferred (`-1`) dimensions exist only in reshape
/// _specifications_ and are resolved by the builder at construction time.
#[derive(Clone, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Shape(Vec<i64>);

impl Shape {
    /// Constructs a shape from the provided concrete dimensions.
    #[must_use]
    pub fn new(dims: Vec<i64>) -> Self {
        Self(dims)
    }

    /// Constructs a scalar (rank-0) shape.
    #[must_use]
    pub fn scalar() -> Self {
        Self(Vec::new())
    }

    /// Converts a host engine's `usize` dimension list into an IR shape.
    #[must_use]
    pub fn from_host(dims: &[usize]) -> Self {
        #[allow(clippy::cast_possible_wrap)] // Host extents never reach i64::MAX.
        Self(dims.iter().map(|&d| d as i64).collect())
    }

    /// Returns the number of dimensions in this shape.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Returns the dimensions of this shape.
    #[must_use]
    pub fn dims(&self) -> &[i64] {
        &self.0
    }

    /// Returns the total number of elements described by this shape.
    ///
    /// The element count of a rank-0 shape is 1.
    #[must_use]
    pub fn element_count(&self) -> i64 {
        self.0.iter().product()
    }
}

impl From<Vec<i64>> for Shape {
    fn from(dims: Vec<i64>) -> Self {
        Self::new(dims)
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.0.iter().join(", "))
    }
}

/// The payload of a constant node, embedded into the IR by value.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum TensorData {
    /// A buffer of `binary32` floating-point values.
    F32(Vec<f32>),

    /// A buffer of 64-bit signed integers.
    I64(Vec<i64>),
}

impl TensorData {
    /// Returns the number of scalar elements in the payload.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(v) => v.len(),
            TensorData::I64(v) => v.len(),
        }
    }

    /// Returns true iff the payload contains no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the precision of the scalars in the payload.
    #[must_use]
    pub fn precision(&self) -> Precision {
        match self {
            TensorData::F32(_) => Precision::Float32,
            TensorData::I64(_) => Precision::Int64,
        }
    }
}

/// The element-wise unary operations the accelerator provides.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    /// Rectified linear unit: `max(x, 0)`.
    Relu,

    /// The logistic function: `1 / (1 + exp(-x))`.
    Sigmoid,

    /// Hyperbolic tangent.
    Tanh,
}

impl Display for UnaryOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UnaryOp::Relu => "relu",
            UnaryOp::Sigmoid => "sigmoid",
            UnaryOp::Tanh => "tanh",
        };
        write!(f, "{name}")
    }
}

/// The element-wise binary operations the accelerator provides.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    /// Element-wise addition.
    Add,

    /// Element-wise multiplication.
    Mul,
}

impl Display for BinaryOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BinaryOp::Add => "add",
            BinaryOp::Mul => "mul",
        };
        write!(f, "{name}")
    }
}
