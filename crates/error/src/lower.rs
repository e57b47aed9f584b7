//! Error types for the lowering of portable operators into the accelerator
//! graph IR.

use thiserror::Error;

use crate::build;

/// The result type for use in the lowering subsystem.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while lowering a portable operator graph into the
/// accelerator IR.
///
/// These are distinct from an operator being merely _unsupported_ by the
/// accelerator: an unsupported configuration is a normal outcome (the
/// operator stays on the host), while every variant here indicates a bug in
/// the graph handed to the lowering pass or in the ordering of converter
/// invocations. None of them are retried, as lowering is deterministic.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Emitted when an attribute is present on an operator but carries a
    /// value of a different type than the converter expects.
    #[error("The attribute `{name}` on operator `{op}` is not of type {expected}")]
    AttributeTypeMismatch {
        /// The type name of the operator being lowered.
        op: String,

        /// The name of the offending attribute.
        name: String,

        /// The type the converter expected the attribute to have.
        expected: &'static str,
    },

    /// A shape or type error raised by the IR builder while a converter was
    /// emitting nodes.
    #[error(transparent)]
    Builder(#[from] build::Error),

    /// Emitted when a tensor must be embedded by value but its descriptor
    /// carries no backing data.
    #[error("The tensor `{_0}` has no backing data to embed as a constant")]
    ConstantWithoutData(String),

    /// Emitted when a converter requires an attribute that is not present on
    /// the operator being lowered.
    #[error("The operator `{op}` is missing the required attribute `{name}`")]
    MissingAttribute {
        /// The type name of the operator being lowered.
        op: String,

        /// The name of the missing attribute.
        name: String,
    },

    /// Emitted when an operator declares no variable in an input slot the
    /// converter reads.
    #[error("The operator `{op}` has no variable bound to input slot `{slot}`")]
    MissingInput {
        /// The type name of the operator being lowered.
        op: String,

        /// The name of the empty input slot.
        slot: String,
    },

    /// Emitted when an operator declares no variable in an output slot the
    /// converter writes.
    #[error("The operator `{op}` has no variable bound to output slot `{slot}`")]
    MissingOutput {
        /// The type name of the operator being lowered.
        op: String,

        /// The name of the empty output slot.
        slot: String,
    },

    /// Emitted when looking up an IR node that has not been registered in the
    /// graph cache.
    ///
    /// This indicates a converter ran before the converter producing its
    /// input, which is an ordering bug in the calling pass.
    #[error("No IR node is registered under the name `{_0}`")]
    NodeNotFound(String),

    /// Emitted when a variable name cannot be resolved in the host scope.
    #[error("The variable `{_0}` is not defined in the current scope")]
    UndefinedVariable(String),

    /// Emitted for operator configurations that violate assumptions the rest
    /// of the pipeline relies on, as opposed to configurations that are
    /// merely not offloadable.
    #[error("The operator `{op}` cannot be lowered: {reason}")]
    UnsupportedOperator {
        /// The type name of the operator being lowered.
        op: String,

        /// A human-readable description of the violated assumption.
        reason: String,
    },
}
