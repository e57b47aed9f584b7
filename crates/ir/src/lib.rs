//! The in-memory graph IR consumed by the Karst accelerator's graph
//! compiler, together with the builder used to construct it.
//!
//! Lowering passes construct expressions through the [`GraphBuilder`] and
//! hold on to [`Node`] handles; the accelerator's own compiler later ingests
//! the finished arena. All shape and type inference happens at construction
//! time, so a handle always refers to a well-formed expression.

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming

pub mod builder;
pub mod types;

pub use builder::{GraphBuilder, Node, NodeId};
pub use types::{BinaryOp, Layout, Precision, Shape, TensorData, UnaryOp};
