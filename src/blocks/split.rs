use super::params::{BlockParams, ParamError};
use super::{merge_inputs, Block, BlockInputs, BuildError};
use crate::hp::HyperParameters;
use crate::model::plan::{PlanBuilder, Symbol};

/// Slices the concatenated inputs into consecutive parts of fixed width.
#[derive(Clone, Debug)]
pub struct Split {
    name: String,
    parts: Vec<usize>,
}

impl Split {
    pub fn new(name: impl Into<String>, parts: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            parts,
        }
    }

    pub(super) fn from_params(name: &str, params: &BlockParams) -> Result<Self, ParamError> {
        params.check_known("split", &["parts"])?;
        let parts = params
            .usize_list("parts")?
            .ok_or_else(|| ParamError::Missing {
                kind: "split".into(),
                key: "parts".into(),
            })?;
        Ok(Self::new(name, parts))
    }
}

impl Block for Split {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_outputs(&self) -> usize {
        self.parts.len()
    }

    fn build(
        &self,
        plan: &mut PlanBuilder,
        inputs: BlockInputs,
        _hp: &mut HyperParameters,
    ) -> Result<Vec<Symbol>, BuildError> {
        let x = merge_inputs(plan, inputs)?;
        let total: usize = self.parts.iter().sum();
        if total != x.width() {
            return Err(BuildError::Invalid(format!(
                "parts {:?} cover {} features, input has {}",
                self.parts,
                total,
                x.width()
            )));
        }
        let mut start = 0;
        let mut out = Vec::with_capacity(self.parts.len());
        for width in &self.parts {
            out.push(plan.slice(&x, start, start + width)?);
            start += width;
        }
        Ok(out)
    }
}
