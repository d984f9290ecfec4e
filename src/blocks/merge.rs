use tracing::debug;

use super::params::{BlockParams, ParamError, Setting};
use super::{hp_name, Block, BlockInputs, BuildError};
use crate::hp::HyperParameters;
use crate::model::plan::{PlanBuilder, Symbol};

/// Combines several branches into one by addition or concatenation.
///
/// `add` needs equal widths; when they differ the block concatenates
/// instead. Integer inputs are cast to float first.
#[derive(Clone, Debug)]
pub struct MergeBlock {
    name: String,
    merge_type: Setting,
}

impl MergeBlock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            merge_type: Setting::choice(["add", "concatenate"]),
        }
    }

    pub fn with_merge_type(mut self, setting: Setting) -> Self {
        self.merge_type = setting;
        self
    }

    pub(super) fn from_params(name: &str, params: &BlockParams) -> Result<Self, ParamError> {
        params.check_known("merge", &["merge_type"])?;
        let mut block = Self::new(name);
        if let Some(s) = params.setting("merge_type") {
            block.merge_type = s;
        }
        Ok(block)
    }
}

impl Block for MergeBlock {
    fn name(&self) -> &str {
        &self.name
    }

    fn build(
        &self,
        plan: &mut PlanBuilder,
        inputs: BlockInputs,
        hp: &mut HyperParameters,
    ) -> Result<Vec<Symbol>, BuildError> {
        let xs: Vec<Symbol> = inputs
            .into_symbols()
            .iter()
            .map(|s| plan.cast_float(s))
            .collect();
        if xs.is_empty() {
            return Err(BuildError::Invalid("merge needs at least one input".into()));
        }
        if xs.len() == 1 {
            return Ok(xs);
        }

        let merge_type = self.merge_type.string(hp, &hp_name(&self.name, "merge_type"))?;
        let same_width = xs.iter().all(|x| x.width() == xs[0].width());
        let merged = match merge_type.as_str() {
            "add" if same_width => {
                let mut acc = xs[0].clone();
                for x in &xs[1..] {
                    acc = plan.add(&acc, x)?;
                }
                acc
            }
            "add" | "concatenate" => {
                if merge_type == "add" {
                    debug!(block = %self.name, "widths differ, concatenating instead of adding");
                }
                plan.concat(&xs)?
            }
            other => {
                return Err(BuildError::Invalid(format!(
                    "unknown merge type '{}'",
                    other
                )))
            }
        };
        Ok(vec![merged])
    }
}
