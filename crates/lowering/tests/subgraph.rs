//! End-to-end tests driving whole subgraphs through the registry and the
//! sequential lowering loop.

use karst_ir::{Layout, Precision, TensorData};
use karst_lowering::{
    host::{AttrValue, HostTensor, KernelContract, OpDescriptor, Scope},
    lower_subgraph, registry, Graph, OpContext, Outcome, SubgraphOp, Target,
};

fn float_tensor(shape: &[usize]) -> HostTensor {
    HostTensor {
        shape: shape.to_vec(),
        precision: Precision::Float32,
        layout: Layout::ChannelFirst,
        data: None,
    }
}

fn embedding_scope() -> Scope {
    let mut scope = Scope::new();
    scope.insert(
        "ids",
        HostTensor {
            shape: vec![4],
            precision: Precision::Int64,
            layout: Layout::ChannelFirst,
            data: None,
        },
    );
    scope.insert(
        "table",
        HostTensor {
            shape: vec![100, 16],
            precision: Precision::Float32,
            layout: Layout::ChannelFirst,
            data: Some(TensorData::F32(vec![0.0; 1600])),
        },
    );
    scope.insert("embedded", float_tensor(&[4, 16]));
    scope
}

fn lookup_table_op() -> SubgraphOp {
    SubgraphOp {
        descriptor: OpDescriptor::new("lookup_table")
            .with_input("Ids", vec!["ids".to_string()])
            .with_input("W", vec!["table".to_string()])
            .with_output("Out", vec!["embedded".to_string()])
            .with_attr("padding_idx", AttrValue::Int(-1)),
        contract: KernelContract::new()
            .with_input("Ids", Precision::Int64, Layout::ChannelFirst)
            .with_input("W", Precision::Float32, Layout::ChannelFirst)
            .with_output("Out", Precision::Float32, Layout::ChannelFirst),
    }
}

#[test]
fn embedding_lookup_end_to_end() -> anyhow::Result<()> {
    let scope = embedding_scope();
    let mut graph = Graph::new();

    // The index tensor was already lowered by an upstream operator.
    graph.add_input(
        "ids",
        karst_ir::Shape::new(vec![4]),
        Precision::Int64,
        Layout::ChannelFirst,
    )?;
    let before = graph.node_count();

    let report = lower_subgraph(
        &mut graph,
        &scope,
        Target::Npu,
        registry(),
        &[lookup_table_op()],
    )?;

    assert_eq!(report.lowered, vec!["lookup_table".to_string()]);
    assert!(report.skipped.is_none());
    assert!(!report.rebuild_on_shape_change);

    let out = graph.get_node("embedded")?;
    assert_eq!(graph.builder().shape_of(out).dims(), &[4, 16]);
    // Exactly two new expressions: the constant table and the gather. The
    // rank-1 index list needs no flattening reshape.
    assert_eq!(graph.node_count() - before, 2);
    Ok(())
}

#[test]
fn converters_are_idempotent_over_the_cache() -> anyhow::Result<()> {
    let scope = embedding_scope();
    let op = lookup_table_op();
    let mut graph = Graph::new();

    let converter = registry().find(Target::Npu, "lookup_table").unwrap();
    let ctx = OpContext {
        op: &op.descriptor,
        scope: &scope,
        contract: &op.contract,
    };
    assert_eq!(converter(&mut graph, ctx)?, Outcome::Lowered);
    let first = graph.get_node("embedded")?;

    // Re-running the same operator re-registers the same names; the mapping
    // still holds exactly one current node per name.
    assert_eq!(converter(&mut graph, ctx)?, Outcome::Lowered);
    let second = graph.get_node("embedded")?;
    assert_eq!(
        graph.builder().shape_of(first),
        graph.builder().shape_of(second)
    );
    assert_eq!(second.precision(), first.precision());
    Ok(())
}

#[test]
fn chained_operators_share_nodes_through_the_cache() -> anyhow::Result<()> {
    // embedded = lookup_table(ids, table); activated = relu(embedded)
    let mut scope = embedding_scope();
    scope.insert("activated", float_tensor(&[4, 16]));
    let relu = SubgraphOp {
        descriptor: OpDescriptor::new("relu")
            .with_input("X", vec!["embedded".to_string()])
            .with_output("Out", vec!["activated".to_string()]),
        contract: KernelContract::new()
            .with_input("X", Precision::Float32, Layout::ChannelFirst)
            .with_output("Out", Precision::Float32, Layout::ChannelFirst),
    };

    let mut graph = Graph::new();
    let report = lower_subgraph(
        &mut graph,
        &scope,
        Target::Npu,
        registry(),
        &[lookup_table_op(), relu],
    )?;

    assert_eq!(report.lowered.len(), 2);
    // relu consumed the gather result rather than creating a fresh
    // placeholder for "embedded": only ids, table, gather, and relu exist.
    assert_eq!(graph.node_count(), 4);
    let out = graph.get_node("activated")?;
    assert_eq!(graph.builder().shape_of(out).dims(), &[4, 16]);
    Ok(())
}

#[test]
fn unsupported_configuration_stops_the_pass() -> anyhow::Result<()> {
    let mut scope = embedding_scope();
    scope.insert("activated", float_tensor(&[4, 16]));
    let mut padded = lookup_table_op();
    padded.descriptor = OpDescriptor::new("lookup_table")
        .with_input("Ids", vec!["ids".to_string()])
        .with_input("W", vec!["table".to_string()])
        .with_output("Out", vec!["embedded".to_string()])
        .with_attr("padding_idx", AttrValue::Int(5));
    let relu = SubgraphOp {
        descriptor: OpDescriptor::new("relu")
            .with_input("X", vec!["embedded".to_string()])
            .with_output("Out", vec!["activated".to_string()]),
        contract: KernelContract::new()
            .with_input("X", Precision::Float32, Layout::ChannelFirst)
            .with_output("Out", Precision::Float32, Layout::ChannelFirst),
    };

    let mut graph = Graph::new();
    let report = lower_subgraph(&mut graph, &scope, Target::Npu, registry(), &[padded, relu])?;

    assert!(report.lowered.is_empty());
    assert_eq!(report.skipped, Some("lookup_table".to_string()));
    assert!(!graph.has_node("embedded"));
    assert!(!graph.has_node("activated"));
    Ok(())
}

#[test]
fn unregistered_operators_stop_the_pass() -> anyhow::Result<()> {
    let mut scope = Scope::new();
    scope.insert("x", float_tensor(&[2, 2]));
    scope.insert("out", float_tensor(&[2, 2]));
    let conv = SubgraphOp {
        descriptor: OpDescriptor::new("conv2d")
            .with_input("X", vec!["x".to_string()])
            .with_output("Out", vec!["out".to_string()]),
        contract: KernelContract::new(),
    };

    let mut graph = Graph::new();
    let report = lower_subgraph(&mut graph, &scope, Target::Npu, registry(), &[conv])?;
    assert_eq!(report.skipped, Some("conv2d".to_string()));
    assert_eq!(graph.node_count(), 0);
    Ok(())
}

#[test]
fn shape_specialized_lowerings_flag_the_report() -> anyhow::Result<()> {
    let mut scope = Scope::new();
    scope.insert("x", float_tensor(&[4, 5, 8]));
    scope.insert("y", float_tensor(&[8, 3]));
    scope.insert("out", float_tensor(&[4, 5, 3]));
    let matmul = SubgraphOp {
        descriptor: OpDescriptor::new("matmul")
            .with_input("X", vec!["x".to_string()])
            .with_input("Y", vec!["y".to_string()])
            .with_output("Out", vec!["out".to_string()])
            .with_attr("transpose_X", AttrValue::Bool(false))
            .with_attr("transpose_Y", AttrValue::Bool(false))
            .with_attr("alpha", AttrValue::Float(1.0)),
        contract: KernelContract::new()
            .with_input("X", Precision::Float32, Layout::ChannelFirst)
            .with_input("Y", Precision::Float32, Layout::ChannelFirst)
            .with_output("Out", Precision::Float32, Layout::ChannelFirst),
    };

    let mut graph = Graph::new();
    let report = lower_subgraph(&mut graph, &scope, Target::Npu, registry(), &[matmul])?;
    assert!(report.rebuild_on_shape_change);
    let out = graph.get_node("out")?;
    assert_eq!(graph.builder().shape_of(out).dims(), &[4, 5, 3]);
    Ok(())
}
