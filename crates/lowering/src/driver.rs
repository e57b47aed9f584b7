//! The sequential dispatch loop that lowers one subgraph's operators in
//! topological order.
//!
//! This is the consumer side of the converter contract, made concrete so the
//! CLI and tests have a single entry point. It is **not** the partitioner:
//! the operators handed in are assumed to already be the contiguous,
//! topologically ordered slice the partitioner selected for offload.

use itertools::Itertools;
use tracing::debug;

use crate::{
    convert::{OpContext, Outcome},
    graph::Graph,
    host::{KernelContract, OpDescriptor, Scope},
    registry::{ConverterRegistry, Target},
};

/// One operator of the subgraph, paired with the contract of the kernel it
/// was matched against.
#[derive(Clone, Debug)]
pub struct SubgraphOp {
    /// The operator's descriptor.
    pub descriptor: OpDescriptor,

    /// The matched kernel's precision/layout contract.
    pub contract: KernelContract,
}

/// The summary of one subgraph-lowering pass.
#[derive(Clone, Debug, Default)]
pub struct LoweringReport {
    /// The type names of the operators lowered into the accelerator graph,
    /// in lowering order.
    pub lowered: Vec<String>,

    /// The type name of the first operator that could not be offloaded, if
    /// any. Operators after it were not attempted.
    pub skipped: Option<String>,

    /// Whether any lowered operator embedded its input shapes and therefore
    /// requires the whole pass to be redone if those shapes change.
    pub rebuild_on_shape_change: bool,
}

/// Lowers `ops` for `target` into `graph`, in order, dispatching through
/// `registry`.
///
/// A registry miss or an [`Outcome::Unsupported`] converter result stops the
/// pass at that operator: its downstream consumers would be reading an IR
/// node that was never registered, so offloading cannot continue past it.
/// The operators lowered up to that point remain valid.
///
/// # Errors
///
/// - [`karst_errors::lower::Error`] if any converter hits a malformed
///   operator or an IR construction failure; these indicate bugs in the
///   handed-in subgraph and are never retried.
pub fn lower_subgraph(
    graph: &mut Graph,
    scope: &Scope,
    target: Target,
    registry: &ConverterRegistry,
    ops: &[SubgraphOp],
) -> karst_errors::lower::Result<LoweringReport> {
    debug!(
        %target,
        ops = %ops.iter().map(|op| op.descriptor.ty()).join(", "),
        "Lowering subgraph"
    );
    let mut report = LoweringReport::default();
    for op in ops {
        let ty = op.descriptor.ty();
        let Some(converter) = registry.find(target, ty) else {
            debug!(op = ty, "No converter registered; stopping offload");
            report.skipped = Some(ty.to_string());
            break;
        };
        let ctx = OpContext {
            op: &op.descriptor,
            scope,
            contract: &op.contract,
        };
        match converter(graph, ctx)? {
            Outcome::Lowered => report.lowered.push(ty.to_string()),
            Outcome::RebuildOnShapeChange => {
                report.lowered.push(ty.to_string());
                report.rebuild_on_shape_change = true;
            }
            Outcome::Unsupported => {
                debug!(op = ty, "Configuration not offloadable; stopping");
                report.skipped = Some(ty.to_string());
                break;
            }
        }
    }
    Ok(report)
}
