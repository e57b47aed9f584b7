//! Lowers the `lookup_table` operator (embedding lookup) into a gather over
//! an embedded weight table.

use karst_errors::lower::Result;
use karst_ir::{Layout, Precision};
use tracing::{debug, warn};

use crate::{
    convert::{fetch_or_input, to_spec, OpContext, Outcome},
    graph::Graph,
};

/// The `padding_idx` sentinel meaning "no padding row".
const NO_PADDING: i64 = -1;

/// Lowers one `lookup_table` operator.
///
/// The index tensor is flattened to a 1-D list if necessary, the weight table
/// is embedded by value, and a leading-axis gather selects the rows. A
/// trailing reshape restores the declared output shape when the index tensor
/// was not 1-D to begin with, so the output's leading dimensions always
/// follow the original index shape.
///
/// The accelerator's gather primitive has no masking, so any `padding_idx`
/// other than the `-1` sentinel makes the operator unsupported.
///
/// # Errors
///
/// Returns an error if the operator's variables or attributes are malformed;
/// see the [module documentation](crate::convert) for the failure taxonomy.
///
/// # Panics
///
/// Panics if the kernel contract contradicts the int64/float32 channel-first
/// types this lowering supports, or if the weight table is not 2-D.
pub fn convert(graph: &mut Graph, ctx: OpContext) -> Result<Outcome> {
    let op = ctx.op;
    debug!(op = op.ty(), "Converting operator");

    // Get input and output vars and op attributes.
    let ids_name = op.input_front("Ids")?.to_string();
    let ids_decl = ctx.contract.input_decl("Ids");
    assert_eq!(ids_decl.precision, Precision::Int64);
    assert_eq!(ids_decl.layout, Layout::ChannelFirst);
    let ids = ctx.scope.find_tensor(&ids_name)?.clone();

    let w_name = op.input_front("W")?.to_string();
    let w_decl = ctx.contract.input_decl("W");
    assert_eq!(w_decl.precision, Precision::Float32);
    assert_eq!(w_decl.layout, Layout::ChannelFirst);
    let w = ctx.scope.find_tensor(&w_name)?.clone();
    assert_eq!(w.rank(), 2);

    let out_name = op.output_front("Out")?.to_string();
    let out_decl = ctx.contract.output_decl("Out");
    assert_eq!(out_decl.precision, Precision::Float32);
    assert_eq!(out_decl.layout, Layout::ChannelFirst);
    let out = ctx.scope.find_tensor(&out_name)?.clone();

    let padding_idx = op.attr_i64("padding_idx")?;
    if padding_idx != NO_PADDING {
        warn!(padding_idx, "Only padding_idx=-1 is supported");
        return Ok(Outcome::Unsupported);
    }

    // Ids node, flattened to a 1-D index list if necessary.
    let mut ids_node = fetch_or_input(
        graph,
        &ids_name,
        &ids.shape,
        ids_decl.precision,
        ids_decl.layout,
    )?;
    if ids.rank() != 1 {
        let flat = graph.builder_mut().reshape(ids_node, &[-1])?;
        ids_node = graph.add_node(format!("{ids_name}/reshape"), flat);
    }

    // The weight table is always embedded by value.
    let w_node = graph.add_constant(&w_name, &w)?;

    // Gather, then restore the declared output shape if the gather's natural
    // rank differs from it.
    let gathered = graph.builder_mut().gather(w_node, ids_node, 0)?;
    let gather_node = graph.add_node(&out_name, gathered);
    if out.rank() != 2 {
        let reshaped = graph
            .builder_mut()
            .reshape(gather_node, &to_spec(&out.shape))?;
        graph.add_node(&out_name, reshaped);
    }
    Ok(Outcome::Lowered)
}

#[cfg(test)]
mod test {
    use karst_ir::{Layout, Precision, TensorData};

    use crate::{
        convert::{lookup_table, OpContext, Outcome},
        graph::Graph,
        host::{AttrValue, HostTensor, KernelContract, OpDescriptor, Scope},
    };

    fn scope(ids_shape: &[usize], vocabulary: usize, embedding: usize) -> Scope {
        let mut scope = Scope::new();
        scope.insert(
            "ids",
            HostTensor {
                shape: ids_shape.to_vec(),
                precision: Precision::Int64,
                layout: Layout::ChannelFirst,
                data: None,
            },
        );
        scope.insert(
            "w",
            HostTensor {
                shape: vec![vocabulary, embedding],
                precision: Precision::Float32,
                layout: Layout::ChannelFirst,
                data: Some(TensorData::F32(vec![0.0; vocabulary * embedding])),
            },
        );
        let mut out_shape = ids_shape.to_vec();
        out_shape.push(embedding);
        scope.insert(
            "out",
            HostTensor {
                shape: out_shape,
                precision: Precision::Float32,
                layout: Layout::ChannelFirst,
                data: None,
            },
        );
        scope
    }

    fn descriptor(padding_idx: i64) -> OpDescriptor {
        OpDescriptor::new("lookup_table")
            .with_input("Ids", vec!["ids".to_string()])
            .with_input("W", vec!["w".to_string()])
            .with_output("Out", vec!["out".to_string()])
            .with_attr("padding_idx", AttrValue::Int(padding_idx))
    }

    fn contract() -> KernelContract {
        KernelContract::new()
            .with_input("Ids", Precision::Int64, Layout::ChannelFirst)
            .with_input("W", Precision::Float32, Layout::ChannelFirst)
            .with_output("Out", Precision::Float32, Layout::ChannelFirst)
    }

    #[test]
    fn flat_indices_lower_to_constant_and_gather() -> anyhow::Result<()> {
        let scope = scope(&[4], 100, 16);
        let op = descriptor(-1);
        let contract = contract();
        let mut graph = Graph::new();

        let outcome = lookup_table::convert(
            &mut graph,
            OpContext {
                op: &op,
                scope: &scope,
                contract: &contract,
            },
        )?;

        assert_eq!(outcome, Outcome::Lowered);
        let out = graph.get_node("out")?;
        assert_eq!(graph.builder().shape_of(out).dims(), &[4, 16]);
        // Ids placeholder, constant weight, gather; no reshape for rank-1 ids.
        assert_eq!(graph.node_count(), 3);
        Ok(())
    }

    #[test]
    fn higher_rank_indices_flatten_and_restore() -> anyhow::Result<()> {
        let scope = scope(&[2, 3], 50, 8);
        let op = descriptor(-1);
        let contract = contract();
        let mut graph = Graph::new();

        let outcome = lookup_table::convert(
            &mut graph,
            OpContext {
                op: &op,
                scope: &scope,
                contract: &contract,
            },
        )?;

        assert_eq!(outcome, Outcome::Lowered);
        let out = graph.get_node("out")?;
        assert_eq!(graph.builder().shape_of(out).dims(), &[2, 3, 8]);
        // The flattened ids live under a synthetic sub-name.
        assert!(graph.has_node("ids/reshape"));
        Ok(())
    }

    #[test]
    fn scalar_indices_obey_the_shape_law() -> anyhow::Result<()> {
        let scope = scope(&[], 10, 4);
        let op = descriptor(-1);
        let contract = contract();
        let mut graph = Graph::new();

        let outcome = lookup_table::convert(
            &mut graph,
            OpContext {
                op: &op,
                scope: &scope,
                contract: &contract,
            },
        )?;

        assert_eq!(outcome, Outcome::Lowered);
        let out = graph.get_node("out")?;
        // S ++ [D] with S = [] is just [D].
        assert_eq!(graph.builder().shape_of(out).dims(), &[4]);
        Ok(())
    }

    #[test]
    fn padding_index_makes_the_operator_unsupported() -> anyhow::Result<()> {
        let scope = scope(&[4], 100, 16);
        let op = descriptor(0);
        let contract = contract();
        let mut graph = Graph::new();

        let outcome = lookup_table::convert(
            &mut graph,
            OpContext {
                op: &op,
                scope: &scope,
                contract: &contract,
            },
        )?;

        assert_eq!(outcome, Outcome::Unsupported);
        // Nothing may be registered under the output name on this path.
        assert!(!graph.has_node("out"));
        assert_eq!(graph.node_count(), 0);
        Ok(())
    }
}
