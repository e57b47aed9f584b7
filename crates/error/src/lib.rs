//! The error types used throughout the Karst project, organized by the stage
//! of the pipeline that can produce them.
//!
//! Each module exposes an [`enum@thiserror::Error`]-derived error type and a
//! matching `Result` alias. Errors from IR construction ([`build`]) can be
//! wrapped into lowering errors ([`lower`]) as lowering drives the builder.

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming

pub mod build;
pub mod lower;
