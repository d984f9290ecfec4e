//! Named-node computation graphs.
//!
//! A [`Graph`] is declared with a [`GraphBuilder`]: inputs and blocks get
//! a [`NodeId`] when they are declared, and a block can only refer to
//! nodes that already have one. [`assemble`] then walks the declaration
//! once per build call, storing one artifact per node in a fresh
//! [`Registry`] and producing a [`ModelPlan`](crate::model::ModelPlan).

pub mod assemble;
pub mod builder;
pub mod node;
pub mod registry;
pub mod topology;

use thiserror::Error;

use crate::blocks::BuildError;
use crate::model::plan::PlanError;

pub use assemble::{assemble, Assembly};
pub use builder::{BlockDecl, Graph, GraphBuilder};
pub use node::{ElementType, InputSpec, NodeId, NodeKind, Shape};
pub use registry::Registry;
pub use topology::Topology;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    #[error("node {node} is not declared in this graph")]
    UnknownNode { node: NodeId },
    #[error("name '{name}' is already declared")]
    DuplicateName { name: String },
    #[error("node {node} was read before it was built")]
    Unresolved { node: NodeId },
    #[error("node {node} was built twice")]
    AlreadyAssigned { node: NodeId },
    #[error("block '{block}' declares {declared} output(s) but returned {returned}")]
    ArityMismatch {
        block: String,
        declared: usize,
        returned: usize,
    },
    #[error("graph has no outputs")]
    NoOutputs,
    #[error("dependency cycle through node {node}")]
    Cycle { node: NodeId },
    #[error("block '{block}': {reason}")]
    InvalidBlock { block: String, reason: String },
    #[error("block '{block}': {source}")]
    Block {
        block: String,
        #[source]
        source: BuildError,
    },
    #[error(transparent)]
    Plan(#[from] PlanError),
}
