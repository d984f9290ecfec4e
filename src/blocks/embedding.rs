use super::params::{BlockParams, ParamError, Setting};
use super::{hp_name, Block, BlockInputs, BuildError};
use crate::graph::node::ElementType;
use crate::hp::HyperParameters;
use crate::model::plan::{PlanBuilder, Reduction, Symbol};

/// Lookup tables for integer id inputs.
///
/// Every input gets its own table over `[0, vocab_size)`; the embedded
/// inputs are concatenated.
#[derive(Clone, Debug)]
pub struct EmbeddingBlock {
    name: String,
    vocab_size: usize,
    embedding_dim: Setting,
    reduction: Setting,
}

impl EmbeddingBlock {
    pub fn new(name: impl Into<String>, vocab_size: usize) -> Self {
        Self {
            name: name.into(),
            vocab_size,
            embedding_dim: Setting::choice([8i64, 16, 32, 64]),
            reduction: Setting::choice(["flatten", "mean"]),
        }
    }

    pub fn with_embedding_dim(mut self, setting: Setting) -> Self {
        self.embedding_dim = setting;
        self
    }

    pub fn with_reduction(mut self, setting: Setting) -> Self {
        self.reduction = setting;
        self
    }

    pub(super) fn from_params(name: &str, params: &BlockParams) -> Result<Self, ParamError> {
        params.check_known("embedding", &["vocab_size", "embedding_dim", "reduction"])?;
        let mut block = Self::new(name, params.require_usize("embedding", "vocab_size")?);
        if let Some(s) = params.setting("embedding_dim") {
            block.embedding_dim = s;
        }
        if let Some(s) = params.setting("reduction") {
            block.reduction = s;
        }
        Ok(block)
    }
}

impl Block for EmbeddingBlock {
    fn name(&self) -> &str {
        &self.name
    }

    fn build(
        &self,
        plan: &mut PlanBuilder,
        inputs: BlockInputs,
        hp: &mut HyperParameters,
    ) -> Result<Vec<Symbol>, BuildError> {
        if inputs.is_empty() {
            return Err(BuildError::Invalid("embedding needs at least one input".into()));
        }
        let dim = self
            .embedding_dim
            .usize(hp, &hp_name(&self.name, "embedding_dim"))?;
        let reduction: Reduction = self
            .reduction
            .string(hp, &hp_name(&self.name, "reduction"))?
            .parse()
            .map_err(BuildError::Invalid)?;

        let mut embedded = Vec::with_capacity(inputs.len());
        for x in inputs.into_symbols() {
            if x.dtype != ElementType::Int64 {
                return Err(BuildError::Invalid(format!(
                    "embedding input {} is {}, expected int64 ids",
                    x.id, x.dtype
                )));
            }
            embedded.push(plan.lookup(&x, self.vocab_size, dim, reduction)?);
        }
        Ok(vec![plan.concat(&embedded)?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::InputSpec;

    #[test]
    fn flatten_by_default() {
        let mut plan = PlanBuilder::new();
        let ids = plan.input(&InputSpec::int("ids", &[3]));
        let mut hp = HyperParameters::new();
        let out = EmbeddingBlock::new("emb", 100)
            .build(&mut plan, BlockInputs::Positional(vec![ids]), &mut hp)
            .unwrap();
        assert_eq!(out[0].width(), 24);
    }

    #[test]
    fn mean_over_two_inputs() {
        let mut plan = PlanBuilder::new();
        let user = plan.input(&InputSpec::int("user", &[1]));
        let items = plan.input(&InputSpec::int("items", &[5]));
        let mut hp = HyperParameters::new();
        hp.fix("emb/reduction", "mean");
        hp.fix("emb/embedding_dim", 16i64);
        let out = EmbeddingBlock::new("emb", 50)
            .build(
                &mut plan,
                BlockInputs::Named(vec![("user".into(), user), ("items".into(), items)]),
                &mut hp,
            )
            .unwrap();
        assert_eq!(out[0].width(), 32);
    }

    #[test]
    fn float_input_rejected() {
        let mut plan = PlanBuilder::new();
        let f = plan.input(&InputSpec::float("f", &[1]));
        let err = EmbeddingBlock::new("emb", 10)
            .build(
                &mut plan,
                BlockInputs::Positional(vec![f]),
                &mut HyperParameters::new(),
            )
            .unwrap_err();
        assert!(matches!(err, BuildError::Invalid(_)));
    }
}
