//! Dependency view of a declared graph.

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};

use super::builder::Graph;
use super::node::NodeId;
use super::GraphError;

/// Node-level data-flow graph: an edge runs from every upstream node of a
/// block to each of the block's outputs, weighted with the upstream's
/// argument position. Node `i` of the petgraph is `NodeId(i)`.
#[derive(Debug)]
pub struct Topology {
    graph: DiGraph<String, usize>,
}

impl Topology {
    pub fn new(graph: &Graph) -> Self {
        let mut g = DiGraph::with_capacity(graph.num_nodes(), 0);
        for i in 0..graph.num_nodes() {
            g.add_node(graph.node_name(NodeId(i as u32)));
        }
        for decl in graph.blocks() {
            for (slot, upstream) in decl.inputs().iter().enumerate() {
                for output in decl.outputs() {
                    g.add_edge(ix(*upstream), ix(*output), slot);
                }
            }
        }
        Self { graph: g }
    }

    /// Nodes in an order where every node follows its dependencies.
    pub fn order(&self) -> Result<Vec<NodeId>, GraphError> {
        toposort(&self.graph, None)
            .map(|order| order.into_iter().map(|i| NodeId(i.index() as u32)).collect())
            .map_err(|cycle| GraphError::Cycle {
                node: NodeId(cycle.node_id().index() as u32),
            })
    }

    /// Whether `node` transitively consumes `upstream`.
    pub fn depends_on(&self, node: NodeId, upstream: NodeId) -> bool {
        node != upstream && has_path_connecting(&self.graph, ix(upstream), ix(node), None)
    }

    /// Neither node depends on the other.
    pub fn independent(&self, a: NodeId, b: NodeId) -> bool {
        a != b && !self.depends_on(a, b) && !self.depends_on(b, a)
    }

    /// Graphviz rendering with node names as labels.
    pub fn to_dot(&self) -> String {
        format!("{}", Dot::with_config(&self.graph, &[Config::EdgeNoLabel]))
    }
}

fn ix(node: NodeId) -> NodeIndex {
    NodeIndex::new(node.index())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{DenseBlock, MergeBlock};
    use crate::graph::builder::GraphBuilder;
    use crate::graph::node::InputSpec;

    fn diamond() -> (Graph, [NodeId; 5]) {
        let mut g = GraphBuilder::new();
        let a = g.input(InputSpec::float("a", &[1])).unwrap();
        let l = g.block(DenseBlock::new("left"), &[a]).unwrap();
        let r = g.block(DenseBlock::new("right"), &[a]).unwrap();
        let m = g.block(MergeBlock::new("merge"), &[l, r]).unwrap();
        let b = g.input(InputSpec::float("b", &[1])).unwrap();
        (g.build(&[m]).unwrap(), [a, l, r, m, b])
    }

    #[test]
    fn order_respects_dependencies() {
        let (graph, [a, l, r, m, _]) = diamond();
        let order = Topology::new(&graph).order().unwrap();
        let pos = |n: NodeId| order.iter().position(|x| *x == n).unwrap();
        assert!(pos(a) < pos(l));
        assert!(pos(a) < pos(r));
        assert!(pos(l) < pos(m));
        assert!(pos(r) < pos(m));
    }

    #[test]
    fn independence() {
        let (graph, [a, l, r, m, b]) = diamond();
        let topo = Topology::new(&graph);
        assert!(topo.independent(l, r));
        assert!(topo.independent(m, b));
        assert!(!topo.independent(a, m));
        assert!(topo.depends_on(m, a));
        assert!(!topo.depends_on(a, m));
    }

    #[test]
    fn dot_lists_names() {
        let (graph, _) = diamond();
        let dot = Topology::new(&graph).to_dot();
        assert!(dot.starts_with("digraph"));
        for name in ["left", "right", "merge"] {
            assert!(dot.contains(&format!("label = \"{name}\"")), "{dot}");
        }
        assert_eq!(dot.matches("->").count(), 4);
        assert!(!dot.contains("label = \"0\""));
    }
}
