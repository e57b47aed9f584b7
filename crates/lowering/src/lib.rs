//! This library lowers portable neural-network operator graphs — as produced
//! by a device-agnostic inference engine — into the equivalent computation
//! graph in the Karst accelerator's own IR, so the accelerator's native graph
//! compiler can execute them.
//!
//! # Process Overview
//!
//! While more information can be found in the module-level documentation of
//! each part of this codebase, a brief overview of a lowering pass can be
//! stated as follows:
//!
//! 1. The (external) subgraph-partitioning pass walks the portable graph in
//!    topological order and looks each operator up in the
//!    [`registry::ConverterRegistry`] by `(target, operator type)`.
//! 2. Each converter reads the operator's metadata and tensors through the
//!    read-only [`host`] descriptors and emits accelerator-IR expressions
//!    into the [`graph::Graph`], registering every result under a variable
//!    name so downstream converters can find it.
//! 3. Once the subgraph is fully lowered, the finished
//!    [`karst_ir::GraphBuilder`] arena is handed to the accelerator's
//!    compiler; the `Graph` context is dropped.
//!
//! The name-keyed cache inside [`graph::Graph`] is the sole communication
//! channel between converters, which is why a pass is strictly sequential:
//! a later operator's input is exactly the node an earlier operator just
//! registered. Independent subgraphs own independent `Graph` instances and
//! can be lowered concurrently without shared mutable state; the registry is
//! immutable after startup and safe to read from any number of passes.

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming

pub mod convert;
pub mod driver;
pub mod graph;
pub mod host;
pub mod registry;

pub use convert::{ConverterFn, OpContext, Outcome};
pub use driver::{lower_subgraph, LoweringReport, SubgraphOp};
pub use graph::Graph;
pub use registry::{registry, ConverterRegistry, Target};
