//! Lowers the element-wise activation operators (`relu`, `sigmoid`, `tanh`)
//! into the accelerator's unary primitives.

use karst_errors::lower::{Error, Result};
use karst_ir::{Layout, Precision, UnaryOp};
use tracing::debug;

use crate::{
    convert::{fetch_or_input, OpContext, Outcome},
    graph::Graph,
};

/// Lowers one activation operator, selecting the unary primitive by the
/// operator's type name.
///
/// # Errors
///
/// - [`Error::UnsupportedOperator`] if invoked for an operator type that is
///   not an activation; this indicates a registration bug.
/// - Other errors if the operator's variables are malformed; see the
///   [module documentation](crate::convert) for the failure taxonomy.
///
/// # Panics
///
/// Panics if the kernel contract contradicts the float32 channel-first types
/// this lowering supports.
pub fn convert(graph: &mut Graph, ctx: OpContext) -> Result<Outcome> {
    let op = ctx.op;
    debug!(op = op.ty(), "Converting operator");

    let unary = match op.ty() {
        "relu" => UnaryOp::Relu,
        "sigmoid" => UnaryOp::Sigmoid,
        "tanh" => UnaryOp::Tanh,
        other => {
            return Err(Error::UnsupportedOperator {
                op: other.to_string(),
                reason: "not an activation operator".to_string(),
            })
        }
    };

    let x_name = op.input_front("X")?.to_string();
    let x_decl = ctx.contract.input_decl("X");
    assert_eq!(x_decl.precision, Precision::Float32);
    assert_eq!(x_decl.layout, Layout::ChannelFirst);
    let x = ctx.scope.find_tensor(&x_name)?.clone();
    let out_name = op.output_front("Out")?.to_string();

    let x_node = fetch_or_input(graph, &x_name, &x.shape, x_decl.precision, x_decl.layout)?;
    let activated = graph.builder_mut().unary(x_node, unary)?;
    graph.add_node(out_name, activated);
    Ok(Outcome::Lowered)
}

#[cfg(test)]
mod test {
    use karst_errors::lower::Error;
    use karst_ir::{Layout, Precision};

    use crate::{
        convert::{activation, OpContext, Outcome},
        graph::Graph,
        host::{HostTensor, KernelContract, OpDescriptor, Scope},
    };

    fn fixture(ty: &str) -> (Scope, OpDescriptor, KernelContract) {
        let mut scope = Scope::new();
        scope.insert(
            "x",
            HostTensor {
                shape: vec![2, 8],
                precision: Precision::Float32,
                layout: Layout::ChannelFirst,
                data: None,
            },
        );
        let op = OpDescriptor::new(ty)
            .with_input("X", vec!["x".to_string()])
            .with_output("Out", vec!["out".to_string()]);
        let contract = KernelContract::new()
            .with_input("X", Precision::Float32, Layout::ChannelFirst)
            .with_output("Out", Precision::Float32, Layout::ChannelFirst);
        (scope, op, contract)
    }

    #[test]
    fn activations_lower_to_unary_nodes() -> anyhow::Result<()> {
        for ty in ["relu", "sigmoid", "tanh"] {
            let (scope, op, contract) = fixture(ty);
            let mut graph = Graph::new();
            let outcome = activation::convert(
                &mut graph,
                OpContext {
                    op: &op,
                    scope: &scope,
                    contract: &contract,
                },
            )?;
            assert_eq!(outcome, Outcome::Lowered);
            let out = graph.get_node("out")?;
            assert_eq!(graph.builder().shape_of(out).dims(), &[2, 8]);
            assert!(graph.builder().to_string().contains(ty));
        }
        Ok(())
    }

    #[test]
    fn misregistered_type_is_a_hard_error() {
        let (scope, op, contract) = fixture("softmax");
        let mut graph = Graph::new();
        let result = activation::convert(
            &mut graph,
            OpContext {
                op: &op,
                scope: &scope,
                contract: &contract,
            },
        );
        assert!(matches!(result, Err(Error::UnsupportedOperator { .. })));
    }
}
