//! Lowers the `matmul` operator into the accelerator's 2-D or batched
//! multiply primitives.

use karst_errors::lower::{Error, Result};
use karst_ir::{Layout, Node, Precision};
use tracing::debug;

use crate::{
    convert::{fetch_or_input, to_spec, OpContext, Outcome},
    graph::Graph,
    host::HostTensor,
};

/// Scale factors closer to 1 than this are folded away entirely.
///
/// The accelerator's kernels compare in f32, so the threshold is the f32
/// value widened to f64; the f64 literal `1e-6` would sit just above the
/// representable `1 + 1e-6` difference and swallow it.
const ALPHA_TOLERANCE: f64 = 1e-6_f32 as f64;

/// Lowers one `matmul` operator.
///
/// The lowering embeds the operands' current shapes as compile-time
/// constants (the reshapes below carry concrete extents), so it always
/// returns [`Outcome::RebuildOnShapeChange`]: the caller must redo it if the
/// operator's input shapes differ at a later invocation.
///
/// # Operand Normalization
///
/// For the batched case (`rank(X) > 2` and `rank(Y) >= 2`) both operands are
/// folded to rank 3 by collapsing their leading dimensions into a single
/// batch dimension. `X` is then transposed on its trailing axes iff
/// `transpose_X` is set, while `Y` is transposed iff `transpose_Y` is
/// **unset**: the accelerator's batched multiply consumes its right operand
/// row-transposed (see [`karst_ir::GraphBuilder::batch_matmul`]), so a `Y`
/// held in the conventional `[.., K, N]` order needs the transpose and a
/// pre-transposed `Y` does not.
///
/// # Errors
///
/// - [`Error::UnsupportedOperator`] for a rank-1 × rank-1 multiply, and for
///   any rank combination outside the two cases above. These violate
///   assumptions the partitioner is expected to uphold and are not treated
///   as a graceful [`Outcome::Unsupported`].
/// - Other errors if the operator's variables or attributes are malformed;
///   see the [module documentation](crate::convert) for the failure
///   taxonomy.
///
/// # Panics
///
/// Panics if the kernel contract contradicts the float32 channel-first types
/// this lowering supports.
pub fn convert(graph: &mut Graph, ctx: OpContext) -> Result<Outcome> {
    let op = ctx.op;
    debug!(op = op.ty(), "Converting operator");

    // Get input and output vars and op attributes.
    let (x_name, x) = float_operand(ctx, "X", Slot::Input)?;
    let (y_name, y) = float_operand(ctx, "Y", Slot::Input)?;
    let (out_name, out) = float_operand(ctx, "Out", Slot::Output)?;

    let transpose_x = op.attr_bool("transpose_X")?;
    let transpose_y = op.attr_bool("transpose_Y")?;
    let alpha = op.attr_f64("alpha")?;

    let m = x.rank();
    let n = y.rank();

    let mut x_node = fetch_or_input(
        graph,
        &x_name,
        &x.shape,
        Precision::Float32,
        Layout::ChannelFirst,
    )?;
    let mut y_node = fetch_or_input(
        graph,
        &y_name,
        &y.shape,
        Precision::Float32,
        Layout::ChannelFirst,
    )?;

    if m > 2 && n >= 2 {
        // x: [B, ..., M, K], y: [B, ..., K, N], out: [B, ..., M, N]
        // x: [B, M, K],      y: [K, N],         out: [B, M, N]
        let mut x_base = x_name.clone();
        if m != 3 {
            let spec = fold_to_batched(&x.shape);
            let folded = graph.builder_mut().reshape(x_node, &spec)?;
            x_base = format!("{x_name}/reshape");
            x_node = graph.add_node(&x_base, folded);
        }
        if transpose_x {
            let transposed = graph.builder_mut().transpose(x_node, &[0, 2, 1])?;
            x_node = graph.add_node(format!("{x_base}/transpose"), transposed);
        }
        let mut y_base = y_name.clone();
        if n != 3 {
            let spec = fold_to_batched(&y.shape);
            let folded = graph.builder_mut().reshape(y_node, &spec)?;
            y_base = format!("{y_name}/reshape");
            y_node = graph.add_node(&y_base, folded);
        }
        if !transpose_y {
            let transposed = graph.builder_mut().transpose(y_node, &[0, 2, 1])?;
            y_node = graph.add_node(format!("{y_base}/transpose"), transposed);
        }

        let product = graph.builder_mut().batch_matmul(x_node, y_node)?;
        let mut result = graph.add_node(&out_name, product);
        if (alpha - 1.0).abs() > ALPHA_TOLERANCE {
            result = append_scale(graph, &out_name, result, alpha)?;
        }
        if out.rank() != 3 {
            let reshaped = graph.builder_mut().reshape(result, &to_spec(&out.shape))?;
            graph.add_node(&out_name, reshaped);
        }
    } else if m == 2 && n == 2 {
        // x: [M, K], y: [K, N], out: [M, N]
        if transpose_x {
            let transposed = graph.builder_mut().transpose(x_node, &[1, 0])?;
            x_node = graph.add_node(format!("{x_name}/transpose"), transposed);
        }
        let product = graph.builder_mut().matmul(x_node, y_node, transpose_y)?;
        let result = graph.add_node(&out_name, product);
        if (alpha - 1.0).abs() > ALPHA_TOLERANCE {
            append_scale(graph, &out_name, result, alpha)?;
        }
    } else {
        // Includes the rank-1 x rank-1 case: the accelerator's multiply
        // primitives have no lowering for it.
        return Err(Error::UnsupportedOperator {
            op: op.ty().to_string(),
            reason: format!("no lowering for rank-{m} x rank-{n} operands"),
        });
    }
    Ok(Outcome::RebuildOnShapeChange)
}

/// One of the operator's slots.
#[derive(Clone, Copy)]
enum Slot {
    Input,
    Output,
}

/// Resolves a float32 channel-first operand, asserting its declared type.
fn float_operand(ctx: OpContext, slot: &str, kind: Slot) -> Result<(String, HostTensor)> {
    let (name, decl) = match kind {
        Slot::Input => (ctx.op.input_front(slot)?, ctx.contract.input_decl(slot)),
        Slot::Output => (ctx.op.output_front(slot)?, ctx.contract.output_decl(slot)),
    };
    assert_eq!(decl.precision, Precision::Float32);
    assert_eq!(decl.layout, Layout::ChannelFirst);
    let tensor = ctx.scope.find_tensor(name)?.clone();
    Ok((name.to_string(), tensor))
}

/// Builds the reshape specification folding all leading dimensions into one
/// synthetic batch dimension, keeping the trailing matrix dimensions.
fn fold_to_batched(dims: &[usize]) -> Vec<i64> {
    #[allow(clippy::cast_possible_wrap)] // Host extents never reach i64::MAX.
    let (rows, cols) = (dims[dims.len() - 2] as i64, dims[dims.len() - 1] as i64);
    vec![-1, rows, cols]
}

/// Appends a scale node under the output name.
fn append_scale(graph: &mut Graph, out_name: &str, node: Node, alpha: f64) -> Result<Node> {
    #[allow(clippy::cast_possible_truncation)] // The accelerator scales in f32.
    let scaled = graph.builder_mut().scale(node, alpha as f32)?;
    Ok(graph.add_node(out_name, scaled))
}
