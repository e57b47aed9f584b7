//! Lowers the `softmax` operator into the accelerator's softmax primitive.

use karst_errors::lower::Result;
use karst_ir::{Layout, Precision};
use tracing::{debug, warn};

use crate::{
    convert::{fetch_or_input, OpContext, Outcome},
    graph::Graph,
};

/// Lowers one `softmax` operator.
///
/// The `axis` attribute follows the host convention: a negative axis counts
/// from the back. An axis outside `[-rank, rank)` makes the operator
/// unsupported rather than erroring, as some host frontends emit such
/// configurations for graphs the accelerator simply will not take.
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
    let out_name = op.output_front("Out")?.to_string();

    let axis = op.attr_i64("axis")?;
    #[allow(clippy::cast_possible_wrap)] // Ranks are tiny.
    let rank = x.rank() as i64;
    if axis < -rank || axis >= rank {
        warn!(axis, rank, "Softmax axis is out of range");
        return Ok(Outcome::Unsupported);
    }

    let x_node = fetch_or_input(graph, &x_name, &x.shape, x_decl.precision, x_decl.layout)?;
    let normalized = graph.builder_mut().softmax(x_node, axis)?;
    graph.add_node(out_name, normalized);
    Ok(Outcome::Lowered)
}

#[cfg(test)]
mod test {
    use karst_ir::{Layout, Precision};

    use crate::{
        convert::{softmax, OpContext, Outcome},
        graph::Graph,
        host::{AttrValue, HostTensor, KernelContract, OpDescriptor, Scope},
    };

    fn fixture(axis: i64) -> (Scope, OpDescriptor, KernelContract) {
        let mut scope = Scope::new();
        scope.insert(
            "x",
            HostTensor {
                shape: vec![2, 10],
                precision: Precision::Float32,
                layout: Layout::ChannelFirst,
                data: None,
            },
        );
        let op = OpDescriptor::new("softmax")
            .with_input("X", vec!["x".to_string()])
            .with_output("Out", vec!["out".to_string()])
            .with_attr("axis", AttrValue::Int(axis));
        let contract = KernelContract::new()
            .with_input("X", Precision::Float32, Layout::ChannelFirst)
            .with_output("Out", Precision::Float32, Layout::ChannelFirst);
        (scope, op, contract)
    }

    fn run(graph: &mut Graph, axis: i64) -> karst_errors::lower::Result<Outcome> {
        let (scope, op, contract) = fixture(axis);
        softmax::convert(
            graph,
            OpContext {
                op: &op,
                scope: &scope,
                contract: &contract,
            },
        )
    }

    #[test]
    fn trailing_axis_lowers() -> anyhow::Result<()> {
        let mut graph = Graph::new();
        assert_eq!(run(&mut graph, -1)?, Outcome::Lowered);
        let out = graph.get_node("out")?;
        assert_eq!(graph.builder().shape_of(out).dims(), &[2, 10]);
        Ok(())
    }

    #[test]
    fn out_of_range_axis_is_unsupported() -> anyhow::Result<()> {
        let mut graph = Graph::new();
        assert_eq!(run(&mut graph, 2)?, Outcome::Unsupported);
        assert!(!graph.has_node("out"));
        Ok(())
    }
}
