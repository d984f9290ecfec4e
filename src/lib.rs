//! Named-node computation graphs with a tunable hyperparameter surface.
//!
//! A [`graph::Graph`] declares inputs and blocks by name. Assembly walks
//! the declarations in order, hands each block the artifacts of its
//! upstream nodes and records what it builds into a backend-agnostic
//! [`model::ModelPlan`]. Blocks draw their tunables from a
//! [`hp::HyperParameters`] handle, so the same graph can be rebuilt under
//! different values by the [`tuner`].

pub mod blocks;
pub mod config;
pub mod data;
pub mod diagnostic;
pub mod graph;
pub mod hp;
pub mod model;
pub mod span;
pub mod tuner;

pub use blocks::{Block, BlockInputs, BuildError};
pub use graph::{assemble, Assembly, Graph, GraphBuilder, GraphError, InputSpec, NodeId};
pub use hp::{Domain, HpError, HpValue, HyperParameters};
