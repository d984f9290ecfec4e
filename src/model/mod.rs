//! Executable models.
//!
//! - `plan`: backend-agnostic op list recorded by blocks
//! - `runtime`: burn modules instantiated from a plan, forward pass
//! - `compile`: optimizer, loss and metric choices
//! - `train`: fit and evaluate over an in-memory dataset
//! - `checkpoint`: parameter persistence

pub mod checkpoint;
pub mod compile;
pub mod plan;
pub mod runtime;
pub mod train;

pub use compile::{CompileSpec, LossKind, MetricKind, OptimizerKind};
pub use plan::{HeadKind, ModelPlan, PlanBuilder, Symbol};
pub use runtime::{Feature, GraphModel, GraphParams};
pub use train::{evaluate, fit, FitConfig, History, TrainError};
