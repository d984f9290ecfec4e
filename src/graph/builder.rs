//! Declaring a graph.

use std::collections::BTreeSet;

use super::node::{InputSpec, NodeId, NodeKind};
use super::GraphError;
use crate::blocks::Block;

/// A declared block with its upstream and downstream nodes.
#[derive(Debug)]
pub struct BlockDecl {
    pub(crate) block: Box<dyn Block>,
    pub(crate) inputs: Vec<NodeId>,
    pub(crate) outputs: Vec<NodeId>,
}

impl BlockDecl {
    pub fn block(&self) -> &dyn Block {
        self.block.as_ref()
    }

    pub fn name(&self) -> &str {
        self.block.name()
    }

    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }
}

/// Incremental graph declaration.
///
/// Identities are handed out in declaration order. Since a block can
/// only be given ids that were returned earlier, every upstream node is
/// declared before the block that consumes it and the graph is acyclic.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<NodeKind>,
    names: BTreeSet<String>,
    inputs: Vec<NodeId>,
    blocks: Vec<BlockDecl>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn claim_name(&mut self, name: &str) -> Result<(), GraphError> {
        if !self.names.insert(name.to_string()) {
            return Err(GraphError::DuplicateName {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn next_id(&self) -> NodeId {
        NodeId(self.nodes.len() as u32)
    }

    fn check_declared(&self, node: NodeId) -> Result<(), GraphError> {
        if node.index() >= self.nodes.len() {
            return Err(GraphError::UnknownNode { node });
        }
        Ok(())
    }

    /// Declare a named input placeholder.
    pub fn input(&mut self, spec: InputSpec) -> Result<NodeId, GraphError> {
        self.claim_name(&spec.name)?;
        let id = self.next_id();
        self.nodes.push(NodeKind::Input(spec));
        self.inputs.push(id);
        Ok(id)
    }

    /// Declare a single-output block consuming `inputs`.
    pub fn block(
        &mut self,
        block: impl Block + 'static,
        inputs: &[NodeId],
    ) -> Result<NodeId, GraphError> {
        if block.num_outputs() != 1 {
            return Err(GraphError::InvalidBlock {
                block: block.name().to_string(),
                reason: format!(
                    "declares {} outputs; use `block_outputs`",
                    block.num_outputs()
                ),
            });
        }
        let outputs = self.add_boxed(Box::new(block), inputs)?;
        Ok(outputs[0])
    }

    /// Declare a block and return one node per declared output.
    pub fn block_outputs(
        &mut self,
        block: impl Block + 'static,
        inputs: &[NodeId],
    ) -> Result<Vec<NodeId>, GraphError> {
        self.add_boxed(Box::new(block), inputs)
    }

    pub fn add_boxed(
        &mut self,
        block: Box<dyn Block>,
        inputs: &[NodeId],
    ) -> Result<Vec<NodeId>, GraphError> {
        for node in inputs {
            self.check_declared(*node)?;
        }
        if block.num_outputs() == 0 {
            return Err(GraphError::InvalidBlock {
                block: block.name().to_string(),
                reason: "declares no outputs".to_string(),
            });
        }
        self.claim_name(block.name())?;

        let index = self.blocks.len();
        let mut outputs = Vec::with_capacity(block.num_outputs());
        for k in 0..block.num_outputs() {
            outputs.push(self.next_id());
            self.nodes.push(NodeKind::BlockOutput { block: index, index: k });
        }
        self.blocks.push(BlockDecl {
            block,
            inputs: inputs.to_vec(),
            outputs: outputs.clone(),
        });
        Ok(outputs)
    }

    /// Close the declaration with the designated model outputs.
    pub fn build(self, outputs: &[NodeId]) -> Result<Graph, GraphError> {
        if outputs.is_empty() {
            return Err(GraphError::NoOutputs);
        }
        for node in outputs {
            self.check_declared(*node)?;
        }
        Ok(Graph {
            nodes: self.nodes,
            inputs: self.inputs,
            blocks: self.blocks,
            outputs: outputs.to_vec(),
        })
    }
}

/// A complete declaration, reusable across build calls.
#[derive(Debug)]
pub struct Graph {
    nodes: Vec<NodeKind>,
    inputs: Vec<NodeId>,
    blocks: Vec<BlockDecl>,
    outputs: Vec<NodeId>,
}

impl Graph {
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn kind(&self, node: NodeId) -> Option<&NodeKind> {
        self.nodes.get(node.index())
    }

    pub fn is_input(&self, node: NodeId) -> bool {
        matches!(self.kind(node), Some(NodeKind::Input(_)))
    }

    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    pub fn blocks(&self) -> &[BlockDecl] {
        &self.blocks
    }

    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    pub fn input_spec(&self, node: NodeId) -> Option<&InputSpec> {
        match self.kind(node) {
            Some(NodeKind::Input(spec)) => Some(spec),
            _ => None,
        }
    }

    /// Display name: the input name, the block name, or `block:k` for
    /// outputs of multi-output blocks.
    pub fn node_name(&self, node: NodeId) -> String {
        match self.kind(node) {
            Some(NodeKind::Input(spec)) => spec.name.clone(),
            Some(NodeKind::BlockOutput { block, index }) => {
                let decl = &self.blocks[*block];
                if decl.outputs.len() == 1 {
                    decl.name().to_string()
                } else {
                    format!("{}:{}", decl.name(), index)
                }
            }
            None => node.to_string(),
        }
    }

    /// Resolve `name` or `name:k` to a node.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        let (base, index) = match name.rsplit_once(':') {
            Some((base, k)) => (base, Some(k.parse::<usize>().ok()?)),
            None => (name, None),
        };
        if let Some(id) = self
            .inputs
            .iter()
            .find(|id| self.input_spec(**id).is_some_and(|s| s.name == base))
        {
            return index.map_or(Some(*id), |_| None);
        }
        let decl = self.blocks.iter().find(|d| d.name() == base)?;
        decl.outputs.get(index.unwrap_or(0)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{DenseBlock, Split};

    #[test]
    fn ids_are_dense_and_in_declaration_order() {
        let mut g = GraphBuilder::new();
        let a = g.input(InputSpec::float("a", &[1])).unwrap();
        let b = g.input(InputSpec::float("b", &[1])).unwrap();
        let d = g.block(DenseBlock::new("d"), &[a, b]).unwrap();
        assert_eq!((a.index(), b.index(), d.index()), (0, 1, 2));
        let graph = g.build(&[d]).unwrap();
        assert_eq!(graph.num_nodes(), 3);
        assert!(graph.is_input(a));
        assert!(!graph.is_input(d));
        assert_eq!(graph.node_name(d), "d");
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut g = GraphBuilder::new();
        let a = g.input(InputSpec::float("a", &[1])).unwrap();
        let err = g.input(InputSpec::float("a", &[2])).unwrap_err();
        assert_eq!(err, GraphError::DuplicateName { name: "a".into() });
        let err = g.block(DenseBlock::new("a"), &[a]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateName { name: "a".into() });
    }

    #[test]
    fn foreign_node_rejected() {
        let mut other = GraphBuilder::new();
        other.input(InputSpec::float("x", &[1])).unwrap();
        let far = other.input(InputSpec::float("y", &[1])).unwrap();

        let mut g = GraphBuilder::new();
        g.input(InputSpec::float("a", &[1])).unwrap();
        let err = g.block(DenseBlock::new("d"), &[far]).unwrap_err();
        assert_eq!(err, GraphError::UnknownNode { node: far });
    }

    #[test]
    fn multi_output_names_and_lookup() {
        let mut g = GraphBuilder::new();
        let x = g.input(InputSpec::float("x", &[4])).unwrap();
        let parts = g.block_outputs(Split::new("split", vec![1, 3]), &[x]).unwrap();
        assert_eq!(parts.len(), 2);
        let err = g.block(Split::new("again", vec![2, 2]), &[x]).unwrap_err();
        assert!(matches!(err, GraphError::InvalidBlock { .. }));

        let graph = g.build(&parts).unwrap();
        assert_eq!(graph.node_name(parts[1]), "split:1");
        assert_eq!(graph.find("split:1"), Some(parts[1]));
        assert_eq!(graph.find("split"), Some(parts[0]));
        assert_eq!(graph.find("x"), Some(x));
        assert_eq!(graph.find("x:1"), None);
        assert_eq!(graph.find("nope"), None);
    }

    #[test]
    fn build_requires_outputs() {
        let mut g = GraphBuilder::new();
        g.input(InputSpec::float("a", &[1])).unwrap();
        assert_eq!(g.build(&[]).unwrap_err(), GraphError::NoOutputs);
    }
}
