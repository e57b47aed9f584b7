//! Lowers the `elementwise_add` operator into the accelerator's binary
//! primitive.

use karst_errors::lower::Result;
use karst_ir::{BinaryOp, Layout, Precision};
use tracing::{debug, warn};

use crate::{
    convert::{fetch_or_input, OpContext, Outcome},
    graph::Graph,
};

/// Lowers one `elementwise_add` operator.
///
/// The accelerator's binary primitive has no implicit broadcasting, so only
/// identically-shaped operands (with the host's `axis` attribute at its `-1`
/// default or the equivalent `0`) are offloaded; anything needing a
/// broadcast stays on the host.
///
/// # Errors
///
/// Returns an error if the operator's variables or attributes are malformed;
/// see the [module documentation](crate::convert) for the failure taxonomy.
///
/// # Panics
///
/// Panics if the kernel contract contradicts the float32 channel-first types
/// this lowering supports.
pub fn convert(graph: &mut Graph, ctx: OpContext) -> Result<Outcome> {
    let op = ctx.op;
    debug!(op = op.ty(), "Converting operator");

    let x_name = op.input_front("X")?.to_string();
    let x_decl = ctx.contract.input_decl("X");
    assert_eq!(x_decl.precision, Precision::Float32);
    assert_eq!(x_decl.layout, Layout::ChannelFirst);
    let x = ctx.scope.find_tensor(&x_name)?.clone();

    let y_name = op.input_front("Y")?.to_string();
    let y_decl = ctx.contract.input_decl("Y");
    assert_eq!(y_decl.precision, Precision::Float32);
    assert_eq!(y_decl.layout, Layout::ChannelFirst);
    let y = ctx.scope.find_tensor(&y_name)?.clone();

    let out_name = op.output_front("Out")?.to_string();

    let axis = op.attr_i64("axis")?;
    if x.shape != y.shape || (axis != -1 && axis != 0) {
        warn!(axis, "Broadcasting additions are not supported");
        return Ok(Outcome::Unsupported);
    }

    let x_node = fetch_or_input(graph, &x_name, &x.shape, x_decl.precision, x_decl.layout)?;
    let y_node = fetch_or_input(graph, &y_name, &y.shape, y_decl.precision, y_decl.layout)?;
    let sum = graph.builder_mut().binary(x_node, y_node, BinaryOp::Add)?;
    graph.add_node(out_name, sum);
    Ok(Outcome::Lowered)
}
