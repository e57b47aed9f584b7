//! Error types for construction of the accelerator graph IR.

use thiserror::Error;

/// The result type for use in the IR builder.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while constructing nodes in the accelerator graph
/// IR.
///
/// Every constructor on the graph builder performs full shape and type
/// inference, so an ill-formed expression is reported at the point of
/// construction rather than being discovered by the accelerator's compiler
/// much later.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Emitted when a reshape specification cannot preserve the element count
    /// of its operand.
    #[error("Cannot reshape {elements} elements into {spec}")]
    ElementCountMismatch {
        /// The number of elements in the reshaped operand.
        elements: i64,

        /// A rendering of the offending reshape specification.
        spec: String,
    },

    /// Emitted when a transpose is given an axis list that is not a
    /// permutation of the operand's axes.
    #[error("The axes {axes:?} are not a permutation of 0..{rank}")]
    InvalidPermutation {
        /// The offending axis list.
        axes: Vec<usize>,

        /// The rank of the transposed operand.
        rank: usize,
    },

    /// Emitted when a reshape specification contains more than one inferred
    /// (`-1`) dimension.
    #[error("The reshape specification {_0} contains more than one inferred dimension")]
    MultipleInferredDims(String),

    /// Emitted when a dimension that must be strictly positive is not.
    #[error("The dimension {_0} must be strictly positive")]
    NonPositiveDim(i64),

    /// Emitted when a constant node's payload does not match the declared
    /// shape.
    #[error("A payload of {actual} elements cannot fill a constant of shape {shape}")]
    PayloadSizeMismatch {
        /// The number of elements in the provided payload.
        actual: usize,

        /// A rendering of the declared constant shape.
        shape: String,
    },

    /// Emitted when an operation requires operands of a specific rank.
    #[error("{op} requires a rank-{expected} operand but was given rank {actual}")]
    RankMismatch {
        /// The name of the operation being constructed.
        op: &'static str,

        /// The rank the operation requires.
        expected: usize,

        /// The rank of the offending operand.
        actual: usize,
    },

    /// Emitted when the shapes of two operands cannot be combined by the
    /// operation being constructed.
    #[error("{op} cannot combine operand shapes {lhs} and {rhs}")]
    ShapeMismatch {
        /// The name of the operation being constructed.
        op: &'static str,

        /// A rendering of the left operand's shape.
        lhs: String,

        /// A rendering of the right operand's shape.
        rhs: String,
    },

    /// Emitted when an operation is asked to work over an axis it does not
    /// support.
    #[error("{op} does not support axis {axis} for a rank-{rank} operand")]
    UnsupportedAxis {
        /// The name of the operation being constructed.
        op: &'static str,

        /// The requested axis.
        axis: i64,

        /// The rank of the operand.
        rank: usize,
    },
}
