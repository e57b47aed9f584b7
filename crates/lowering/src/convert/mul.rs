//! Lowers the `mul` operator (the fully-connected-style 2-D multiply) into
//! the accelerator's plain matrix-multiply primitive.

use karst_errors::lower::Result;
use karst_ir::{Layout, Precision};
use tracing::{debug, warn};

use crate::{
    convert::{fetch_or_input, to_spec, OpContext, Outcome},
    graph::Graph,
};

/// Lowers one `mul` operator.
///
/// `X` is flattened to a matrix by folding its first `x_num_col_dims`
/// dimensions into the row extent and the remainder into the column extent;
/// `Y` must already be a matrix (`y_num_col_dims == 1`). As with `matmul`,
/// the flattening embeds concrete extents, so the lowering is
/// shape-specialized.
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
    let out = ctx.scope.find_tensor(&out_name)?.clone();

    let x_num_col_dims = op.attr_i64("x_num_col_dims")?;
    let y_num_col_dims = op.attr_i64("y_num_col_dims")?;
    if y_num_col_dims != 1 || y.rank() != 2 {
        warn!(y_num_col_dims, y_rank = y.rank(), "Only 2-D Y is supported");
        return Ok(Outcome::Unsupported);
    }
    let split = usize::try_from(x_num_col_dims).unwrap_or(0);
    if split == 0 || split >= x.rank() {
        warn!(x_num_col_dims, x_rank = x.rank(), "x_num_col_dims must split X's dims");
        return Ok(Outcome::Unsupported);
    }

    let mut x_node = fetch_or_input(
        graph,
        &x_name,
        &x.shape,
        x_decl.precision,
        x_decl.layout,
    )?;
    if x.rank() != 2 {
        #[allow(clippy::cast_possible_wrap)] // Host extents never reach i64::MAX.
        let rows = x.shape[..split].iter().product::<usize>() as i64;
        let folded = graph.builder_mut().reshape(x_node, &[rows, -1])?;
        x_node = graph.add_node(format!("{x_name}/reshape"), folded);
    }
    let y_node = fetch_or_input(
        graph,
        &y_name,
        &y.shape,
        y_decl.precision,
        y_decl.layout,
    )?;

    let product = graph.builder_mut().matmul(x_node, y_node, false)?;
    let result = graph.add_node(&out_name, product);
    if out.rank() != 2 {
        let reshaped = graph.builder_mut().reshape(result, &to_spec(&out.shape))?;
        graph.add_node(&out_name, reshaped);
    }
    Ok(Outcome::RebuildOnShapeChange)
}

#[cfg(test)]
mod test {
    use karst_ir::{Layout, Precision};

    use crate::{
        convert::{mul, OpContext, Outcome},
        graph::Graph,
        host::{AttrValue, HostTensor, KernelContract, OpDescriptor, Scope},
    };

    fn float_tensor(shape: &[usize]) -> HostTensor {
        HostTensor {
            shape: shape.to_vec(),
            precision: Precision::Float32,
            layout: Layout::ChannelFirst,
            data: None,
        }
    }

    fn fixture(
        x_shape: &[usize],
        y_shape: &[usize],
        out_shape: &[usize],
        x_num_col_dims: i64,
        y_num_col_dims: i64,
    ) -> (Scope, OpDescriptor, KernelContract) {
        let mut scope = Scope::new();
        scope.insert("x", float_tensor(x_shape));
        scope.insert("y", float_tensor(y_shape));
        scope.insert("out", float_tensor(out_shape));
        let op = OpDescriptor::new("mul")
            .with_input("X", vec!["x".to_string()])
            .with_input("Y", vec!["y".to_string()])
            .with_output("Out", vec!["out".to_string()])
            .with_attr("x_num_col_dims", AttrValue::Int(x_num_col_dims))
            .with_attr("y_num_col_dims", AttrValue::Int(y_num_col_dims));
        let contract = KernelContract::new()
            .with_input("X", Precision::Float32, Layout::ChannelFirst)
            .with_input("Y", Precision::Float32, Layout::ChannelFirst)
            .with_output("Out", Precision::Float32, Layout::ChannelFirst);
        (scope, op, contract)
    }

    fn run(
        graph: &mut Graph,
        fixture: &(Scope, OpDescriptor, KernelContract),
    ) -> karst_errors::lower::Result<Outcome> {
        mul::convert(
            graph,
            OpContext {
                op: &fixture.1,
                scope: &fixture.0,
                contract: &fixture.2,
            },
        )
    }

    #[test]
    fn high_rank_x_folds_around_the_split() -> anyhow::Result<()> {
        let fixture = fixture(&[2, 3, 4], &[4, 5], &[2, 3, 5], 2, 1);
        let mut graph = Graph::new();
        let outcome = run(&mut graph, &fixture)?;
        assert_eq!(outcome, Outcome::RebuildOnShapeChange);
        assert!(graph.has_node("x/reshape"));
        let out = graph.get_node("out")?;
        assert_eq!(graph.builder().shape_of(out).dims(), &[2, 3, 5]);
        Ok(())
    }

    #[test]
    fn plain_2d_needs_no_reshape() -> anyhow::Result<()> {
        let fixture = fixture(&[6, 4], &[4, 5], &[6, 5], 1, 1);
        let mut graph = Graph::new();
        let outcome = run(&mut graph, &fixture)?;
        assert_eq!(outcome, Outcome::RebuildOnShapeChange);
        assert!(!graph.has_node("x/reshape"));
        assert_eq!(graph.node_count(), 3);
        Ok(())
    }

    #[test]
    fn non_matrix_y_is_unsupported() -> anyhow::Result<()> {
        let fixture = fixture(&[6, 4], &[4, 5, 1], &[6, 5], 1, 1);
        let mut graph = Graph::new();
        assert_eq!(run(&mut graph, &fixture)?, Outcome::Unsupported);
        assert!(!graph.has_node("out"));
        Ok(())
    }

    #[test]
    fn degenerate_split_is_unsupported() -> anyhow::Result<()> {
        let fixture = fixture(&[2, 3, 4], &[12, 5], &[2, 3, 5], 3, 1);
        let mut graph = Graph::new();
        assert_eq!(run(&mut graph, &fixture)?, Outcome::Unsupported);
        Ok(())
    }
}
