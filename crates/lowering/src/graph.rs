//! The per-subgraph lowering context: an IR builder together with a
//! name-keyed cache of the nodes registered so far.

use std::collections::HashMap;

use karst_errors::lower::{Error, Result};
use karst_ir::{GraphBuilder, Layout, Node, Precision, Shape};

use crate::host::HostTensor;

/// The accelerator graph being built for one subgraph, addressed by variable
/// name.
///
/// The cache maps each variable name to the *most recently registered* node
/// for that name. Registering under an existing name shadows the previous
/// mapping without touching the previous node's builder-side data, which
/// gives converters two properties they rely on:
///
/// - A tensor referenced by several downstream operators is lowered exactly
///   once: later converters find it with [`Self::get_node`].
/// - A converter chaining several IR operations can register each
///   intermediate step under a synthetic sub-name (`"{var}/reshape"`, …) and
///   repeatedly re-register refinements under the operator's true output
///   name; only the final registration is visible downstream.
///
/// One `Graph` is created per subgraph-compilation pass and dropped once the
/// accelerator IR has been handed off. Independent passes own independent
/// instances and share nothing.
#[derive(Debug, Default)]
pub struct Graph {
    builder: GraphBuilder,
    nodes: HashMap<String, Node>,
}

impl Graph {
    /// Creates an empty lowering context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true iff a node is currently registered under `name`.
    #[must_use]
    pub fn has_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Returns the node currently registered under `name`.
    ///
    /// # Errors
    ///
    /// - [`Error::NodeNotFound`] if no node is registered under `name`,
    ///   which indicates a converter ran before the one producing its input.
    pub fn get_node(&self, name: &str) -> Result<Node> {
        self.nodes
            .get(name)
            .copied()
            .ok_or_else(|| Error::NodeNotFound(name.to_string()))
    }

    /// Creates a fresh placeholder node with the given shape, precision, and
    /// layout, and registers it under `name`.
    ///
    /// Used for tensors encountered for the first time whose values arrive at
    /// execution time.
    ///
    /// # Errors
    ///
    /// - [`Error::Builder`] if the shape is ill-formed.
    pub fn add_input(
        &mut self,
        name: impl Into<String>,
        shape: Shape,
        precision: Precision,
        layout: Layout,
    ) -> Result<Node> {
        let node = self.builder.input(shape, precision, layout)?;
        Ok(self.add_node(name, node))
    }

    /// Creates a constant node whose value is copied from the host tensor's
    /// buffer, and registers it under `name`.
    ///
    /// The precision is taken from the buffer and the layout from the
    /// tensor's descriptor. Used for weights and other constants that are
    /// embedded into the accelerator graph by value.
    ///
    /// # Errors
    ///
    /// - [`Error::ConstantWithoutData`] if the tensor carries no backing
    ///   data.
    /// - [`Error::Builder`] if the buffer does not fill the tensor's shape.
    pub fn add_constant(&mut self, name: impl Into<String>, tensor: &HostTensor) -> Result<Node> {
        let name = name.into();
        let data = tensor
            .data
            .clone()
            .ok_or_else(|| Error::ConstantWithoutData(name.clone()))?;
        let node = self
            .builder
            .constant(Shape::from_host(&tensor.shape), tensor.layout, data)?;
        Ok(self.add_node(name, node))
    }

    /// Registers an already-built expression under `name`, overwriting any
    /// prior mapping, and returns it.
    ///
    /// This is how converters build up multi-step lowerings: intermediate
    /// steps go under synthetic sub-names while the final step goes under
    /// the operator's output variable name.
    pub fn add_node(&mut self, name: impl Into<String>, node: Node) -> Node {
        self.nodes.insert(name.into(), node);
        node
    }

    /// Returns a shared reference to the underlying IR builder.
    #[must_use]
    pub fn builder(&self) -> &GraphBuilder {
        &self.builder
    }

    /// Returns an exclusive reference to the underlying IR builder, for
    /// constructing expressions to register with [`Self::add_node`].
    pub fn builder_mut(&mut self) -> &mut GraphBuilder {
        &mut self.builder
    }

    /// Returns the number of IR expressions created so far.
    ///
    /// Note that this counts builder-side expressions, not name mappings:
    /// shadowed registrations keep their builder data.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.builder.node_count()
    }
}

#[cfg(test)]
mod test {
    use karst_errors::lower::Error;
    use karst_ir::{Layout, Precision, Shape, TensorData};

    use crate::{graph::Graph, host::HostTensor};

    #[test]
    fn lookup_of_unregistered_name_fails() {
        let graph = Graph::new();
        assert!(!graph.has_node("x"));
        assert_eq!(
            graph.get_node("x"),
            Err(Error::NodeNotFound("x".to_string()))
        );
    }

    #[test]
    fn registered_inputs_are_found() -> anyhow::Result<()> {
        let mut graph = Graph::new();
        let node = graph.add_input(
            "x",
            Shape::new(vec![2, 3]),
            Precision::Float32,
            Layout::ChannelFirst,
        )?;
        assert!(graph.has_node("x"));
        assert_eq!(graph.get_node("x")?, node);
        Ok(())
    }

    #[test]
    fn re_registration_shadows_without_deleting() -> anyhow::Result<()> {
        let mut graph = Graph::new();
        let first = graph.add_input(
            "x",
            Shape::new(vec![2, 3]),
            Precision::Float32,
            Layout::ChannelFirst,
        )?;
        let reshaped = graph.builder_mut().reshape(first, &[-1])?;
        let second = graph.add_node("x", reshaped);
        assert_eq!(graph.get_node("x")?, second);
        // Both expressions still exist on the builder side.
        assert_eq!(graph.node_count(), 2);
        Ok(())
    }

    #[test]
    fn constants_require_backing_data() {
        let mut graph = Graph::new();
        let tensor = HostTensor {
            shape: vec![2],
            precision: Precision::Float32,
            layout: Layout::ChannelFirst,
            data: None,
        };
        assert_eq!(
            graph.add_constant("w", &tensor),
            Err(Error::ConstantWithoutData("w".to_string()))
        );
        assert!(!graph.has_node("w"));
    }

    #[test]
    fn constants_embed_the_buffer() -> anyhow::Result<()> {
        let mut graph = Graph::new();
        let tensor = HostTensor {
            shape: vec![2, 2],
            precision: Precision::Float32,
            layout: Layout::ChannelFirst,
            data: Some(TensorData::F32(vec![1.0, 2.0, 3.0, 4.0])),
        };
        let node = graph.add_constant("w", &tensor)?;
        assert_eq!(node.precision(), Precision::Float32);
        assert_eq!(graph.builder().shape_of(node).dims(), &[2, 2]);
        Ok(())
    }
}
