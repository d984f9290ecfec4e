//! Building blocks of a graph.
//!
//! A block turns resolved upstream symbols into one or more downstream
//! symbols by recording ops on a [`PlanBuilder`]. Structural choices are
//! drawn from the [`HyperParameters`] passed into every build; their
//! names are `"{block}/{param}"` so two blocks never share a tunable by
//! accident.

mod dense;
mod embedding;
mod head;
mod merge;
pub mod params;
mod split;

use std::fmt;

use thiserror::Error;

use crate::hp::{HpError, HyperParameters};
use crate::model::plan::{PlanBuilder, PlanError, Symbol};

pub use dense::DenseBlock;
pub use embedding::EmbeddingBlock;
pub use head::{ClassificationHead, RegressionHead};
pub use merge::MergeBlock;
pub use params::{BlockParams, ParamError, ParamValue, Setting};
pub use split::Split;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BuildError {
    #[error(transparent)]
    Hp(#[from] HpError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error("{0}")]
    Invalid(String),
}

/// Resolved upstream artifacts handed to [`Block::build`].
///
/// When every upstream node is a graph input the block receives them by
/// input name, otherwise by position. Both keep declaration order.
#[derive(Clone, Debug, PartialEq)]
pub enum BlockInputs {
    Named(Vec<(String, Symbol)>),
    Positional(Vec<Symbol>),
}

impl BlockInputs {
    pub fn len(&self) -> usize {
        match self {
            BlockInputs::Named(entries) => entries.len(),
            BlockInputs::Positional(symbols) => symbols.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_named(&self) -> bool {
        matches!(self, BlockInputs::Named(_))
    }

    /// The symbol of input `name`, when addressed by name.
    pub fn get(&self, name: &str) -> Option<&Symbol> {
        match self {
            BlockInputs::Named(entries) => entries
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, symbol)| symbol),
            BlockInputs::Positional(_) => None,
        }
    }

    /// All symbols in declaration order.
    pub fn into_symbols(self) -> Vec<Symbol> {
        match self {
            BlockInputs::Named(entries) => entries.into_iter().map(|(_, s)| s).collect(),
            BlockInputs::Positional(symbols) => symbols,
        }
    }
}

/// One step of the graph.
pub trait Block: fmt::Debug {
    /// Unique name within the graph; prefixes the block's hyperparameters.
    fn name(&self) -> &str;

    /// Number of artifacts `build` returns.
    fn num_outputs(&self) -> usize {
        1
    }

    fn build(
        &self,
        plan: &mut PlanBuilder,
        inputs: BlockInputs,
        hp: &mut HyperParameters,
    ) -> Result<Vec<Symbol>, BuildError>;
}

/// Name of `param` in `block`'s hyperparameter namespace.
pub fn hp_name(block: &str, param: &str) -> String {
    format!("{}/{}", block, param)
}

/// Cast integer inputs to float and concatenate everything into one vector.
pub fn merge_inputs(plan: &mut PlanBuilder, inputs: BlockInputs) -> Result<Symbol, BuildError> {
    if inputs.is_empty() {
        return Err(BuildError::Invalid("block needs at least one input".into()));
    }
    let floats: Vec<Symbol> = inputs
        .into_symbols()
        .iter()
        .map(|s| plan.cast_float(s))
        .collect();
    Ok(plan.concat(&floats)?)
}

/// Instantiate a block from a model-file declaration.
pub fn from_config(
    kind: &str,
    name: &str,
    params: &BlockParams,
) -> Result<Box<dyn Block>, ParamError> {
    match kind {
        "dense" => Ok(Box::new(DenseBlock::from_params(name, params)?)),
        "embedding" => Ok(Box::new(EmbeddingBlock::from_params(name, params)?)),
        "merge" => Ok(Box::new(MergeBlock::from_params(name, params)?)),
        "classification_head" => Ok(Box::new(ClassificationHead::from_params(name, params)?)),
        "regression_head" => Ok(Box::new(RegressionHead::from_params(name, params)?)),
        "split" => Ok(Box::new(Split::from_params(name, params)?)),
        other => Err(ParamError::UnknownKind(other.to_string())),
    }
}

/// Block kinds understood by [`from_config`].
pub const KINDS: &[&str] = &[
    "dense",
    "embedding",
    "merge",
    "classification_head",
    "regression_head",
    "split",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::InputSpec;

    #[test]
    fn named_inputs_keep_order() {
        let mut plan = PlanBuilder::new();
        let a = plan.input(&InputSpec::float("a", &[1]));
        let b = plan.input(&InputSpec::float("b", &[2]));
        let inputs = BlockInputs::Named(vec![("a".into(), a.clone()), ("b".into(), b.clone())]);
        assert_eq!(inputs.get("b"), Some(&b));
        assert_eq!(inputs.into_symbols(), vec![a, b]);
    }

    #[test]
    fn merge_casts_ints() {
        let mut plan = PlanBuilder::new();
        let a = plan.input(&InputSpec::float("a", &[1]));
        let n = plan.input(&InputSpec::int("n", &[2]));
        let merged = merge_inputs(&mut plan, BlockInputs::Positional(vec![a, n])).unwrap();
        assert_eq!(merged.width(), 3);
        assert_eq!(merged.dtype, crate::graph::node::ElementType::Float32);
    }

    #[test]
    fn factory_kinds() {
        let mut params = BlockParams::new();
        params.insert("num_classes", ParamValue::Scalar(2i64.into()));
        let head = from_config("classification_head", "out", &params).unwrap();
        assert_eq!(head.name(), "out");
        for kind in KINDS {
            assert!(!matches!(
                from_config(kind, "x", &BlockParams::new()),
                Err(ParamError::UnknownKind(_))
            ));
        }
        assert_eq!(
            from_config("conv", "x", &BlockParams::new()).unwrap_err(),
            ParamError::UnknownKind("conv".into())
        );
    }
}
