//! Turning a declared graph into a model plan.

use tracing::debug;

use super::builder::Graph;
use super::node::NodeKind;
use super::registry::Registry;
use super::GraphError;
use crate::blocks::BlockInputs;
use crate::hp::HyperParameters;
use crate::model::plan::{ModelPlan, PlanBuilder, Symbol};

/// Result of one build call.
#[derive(Debug)]
pub struct Assembly {
    pub plan: ModelPlan,
    /// One symbol per declared node.
    pub registry: Registry<Symbol>,
}

/// Build `graph` with the values in `hp`.
///
/// Inputs are materialized first, then blocks run in declaration order.
/// Every upstream node of a block was declared earlier, so its symbol is
/// already in the registry when the block runs. Tunables the blocks
/// declare are recorded in `hp`.
pub fn assemble(graph: &Graph, hp: &mut HyperParameters) -> Result<Assembly, GraphError> {
    let mut registry = Registry::with_capacity(graph.num_nodes());
    let mut plan = PlanBuilder::new();

    for &node in graph.inputs() {
        let Some(NodeKind::Input(spec)) = graph.kind(node) else {
            return Err(GraphError::UnknownNode { node });
        };
        let symbol = plan.input(spec);
        debug!(node = %node, name = %spec.name, shape = %spec.shape, "input");
        registry.insert(node, symbol)?;
    }

    for decl in graph.blocks() {
        let name = decl.name();
        let inputs = if decl.inputs().iter().all(|n| graph.is_input(*n)) {
            BlockInputs::Named(
                decl.inputs()
                    .iter()
                    .map(|n| Ok((graph.node_name(*n), registry.get(*n)?.clone())))
                    .collect::<Result<_, GraphError>>()?,
            )
        } else {
            BlockInputs::Positional(
                decl.inputs()
                    .iter()
                    .map(|n| registry.get(*n).cloned())
                    .collect::<Result<_, _>>()?,
            )
        };

        plan.set_scope(Some(name));
        let artifacts = decl
            .block()
            .build(&mut plan, inputs, hp)
            .map_err(|source| GraphError::Block {
                block: name.to_string(),
                source,
            })?;
        plan.set_scope(None);

        if artifacts.len() != decl.outputs().len() {
            return Err(GraphError::ArityMismatch {
                block: name.to_string(),
                declared: decl.outputs().len(),
                returned: artifacts.len(),
            });
        }
        for (&node, symbol) in decl.outputs().iter().zip(artifacts) {
            debug!(node = %node, block = name, shape = %symbol.shape, "built");
            registry.insert(node, symbol)?;
        }
    }

    let outputs = graph
        .outputs()
        .iter()
        .map(|n| registry.get(*n).cloned())
        .collect::<Result<Vec<_>, _>>()?;
    let plan = plan.finish(&outputs)?;
    Ok(Assembly { plan, registry })
}
