//! The per-operator-type lowering routines ("converters").
//!
//! Each converter reads one portable operator's metadata and tensors, emits
//! the equivalent accelerator-IR expressions through the [`Graph`] cache, and
//! registers the result under the operator's output variable name so that
//! downstream converters can find it.
//!
//! # Converter Contract
//!
//! Converters are invoked by the subgraph pass in the topological order of
//! the portable graph, and are idempotent with respect to the [`Graph`]:
//! invoking the same converter twice over unchanged inputs re-registers the
//! same names, as registration overwrites rather than appends.
//!
//! Three kinds of failure are kept strictly apart:
//!
//! - A configuration the accelerator cannot express is a normal outcome
//!   ([`Outcome::Unsupported`]); the caller leaves the operator on the host.
//!   No node is registered under the operator's output name on this path.
//! - A mismatch between a tensor's declared precision/layout and what the
//!   converter supports is an invariant that upstream validation guarantees;
//!   converters assert it and abort on violation.
//! - Everything else (undefined variables, missing attributes, builder shape
//!   errors) is an unrecoverable [`karst_errors::lower::Error`] indicating a
//!   bug in the calling pass; it is never retried.

pub mod activation;
pub mod elementwise;
pub mod lookup_table;
pub mod matmul;
pub mod mul;
pub mod softmax;

use karst_errors::lower::Result;
use karst_ir::{Layout, Node, Precision, Shape};

use crate::{
    graph::Graph,
    host::{KernelContract, OpDescriptor, Scope},
};

/// The result of lowering one operator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The operator was lowered into the accelerator graph.
    Lowered,

    /// The operator was lowered, but the lowering embeds the current input
    /// shapes as compile-time constants and must be redone whenever those
    /// shapes change between inference calls.
    RebuildOnShapeChange,

    /// The operator's configuration cannot be expressed on the accelerator;
    /// the caller must fall back to host execution for it.
    Unsupported,
}

/// Everything a converter may read about the operator being lowered.
#[derive(Clone, Copy, Debug)]
pub struct OpContext<'a> {
    /// The operator's type name, slots, and attributes.
    pub op: &'a OpDescriptor,

    /// The variable-name to tensor mapping of the surrounding subgraph.
    pub scope: &'a Scope,

    /// The precision/layout contract of the matched kernel.
    pub contract: &'a KernelContract,
}

/// The signature shared by all converters.
pub type ConverterFn = fn(&mut Graph, OpContext) -> Result<Outcome>;

/// Returns the IR node for the variable `name`, creating and registering a
/// placeholder with the given metadata if the variable has not been lowered
/// yet.
///
/// This is the pattern every converter uses for its non-constant inputs: a
/// variable produced by an upstream operator is already in the cache, while
/// a subgraph boundary input is first seen here.
pub(crate) fn fetch_or_input(
    graph: &mut Graph,
    name: &str,
    shape: &[usize],
    precision: Precision,
    layout: Layout,
) -> Result<Node> {
    if graph.has_node(name) {
        graph.get_node(name)
    } else {
        graph.add_input(name, Shape::from_host(shape), precision, layout)
    }
}

/// Converts declared host dimensions to a reshape specification.
pub(crate) fn to_spec(dims: &[usize]) -> Vec<i64> {
    #[allow(clippy::cast_possible_wrap)] // Host extents never reach i64::MAX.
    dims.iter().map(|&d| d as i64).collect()
}
