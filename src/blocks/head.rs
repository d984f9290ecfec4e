//! Output heads.
//!
//! A binary classification head emits one logit and trains with sigmoid
//! cross-entropy; with more than two classes it emits one logit per class
//! and trains with softmax cross-entropy.

use super::params::{BlockParams, ParamError, Setting};
use super::{hp_name, merge_inputs, Block, BlockInputs, BuildError};
use crate::hp::HyperParameters;
use crate::model::plan::{HeadKind, PlanBuilder, Symbol};

fn dropout_choices() -> Setting {
    Setting::choice([0.0f64, 0.25, 0.5])
}

#[derive(Clone, Debug)]
pub struct ClassificationHead {
    name: String,
    num_classes: usize,
    dropout: Setting,
}

impl ClassificationHead {
    pub fn new(name: impl Into<String>, num_classes: usize) -> Self {
        Self {
            name: name.into(),
            num_classes,
            dropout: dropout_choices(),
        }
    }

    pub fn with_dropout(mut self, setting: Setting) -> Self {
        self.dropout = setting;
        self
    }

    pub fn head_kind(&self) -> HeadKind {
        if self.num_classes == 2 {
            HeadKind::Binary
        } else {
            HeadKind::Multiclass {
                classes: self.num_classes,
            }
        }
    }

    /// Logits per sample.
    pub fn output_units(&self) -> usize {
        match self.head_kind() {
            HeadKind::Binary => 1,
            _ => self.num_classes,
        }
    }

    pub(super) fn from_params(name: &str, params: &BlockParams) -> Result<Self, ParamError> {
        params.check_known("classification_head", &["num_classes", "dropout"])?;
        let mut block = Self::new(
            name,
            params.require_usize("classification_head", "num_classes")?,
        );
        if let Some(s) = params.setting("dropout") {
            block.dropout = s;
        }
        Ok(block)
    }
}

impl Block for ClassificationHead {
    fn name(&self) -> &str {
        &self.name
    }

    fn build(
        &self,
        plan: &mut PlanBuilder,
        inputs: BlockInputs,
        hp: &mut HyperParameters,
    ) -> Result<Vec<Symbol>, BuildError> {
        if self.num_classes < 2 {
            return Err(BuildError::Invalid(format!(
                "classification needs at least 2 classes, got {}",
                self.num_classes
            )));
        }
        let x = merge_inputs(plan, inputs)?;
        let rate = self.dropout.f64(hp, &hp_name(&self.name, "dropout"))?;
        let x = plan.dropout(&x, rate)?;
        let logits = plan.dense(&x, self.output_units(), true)?;
        plan.mark_head(&logits, self.head_kind());
        Ok(vec![logits])
    }
}

#[derive(Clone, Debug)]
pub struct RegressionHead {
    name: String,
    output_dim: usize,
    dropout: Setting,
}

impl RegressionHead {
    pub fn new(name: impl Into<String>, output_dim: usize) -> Self {
        Self {
            name: name.into(),
            output_dim,
            dropout: dropout_choices(),
        }
    }

    pub fn with_dropout(mut self, setting: Setting) -> Self {
        self.dropout = setting;
        self
    }

    pub(super) fn from_params(name: &str, params: &BlockParams) -> Result<Self, ParamError> {
        params.check_known("regression_head", &["output_dim", "dropout"])?;
        let mut block = Self::new(name, params.usize("output_dim")?.unwrap_or(1));
        if let Some(s) = params.setting("dropout") {
            block.dropout = s;
        }
        Ok(block)
    }
}

impl Block for RegressionHead {
    fn name(&self) -> &str {
        &self.name
    }

    fn build(
        &self,
        plan: &mut PlanBuilder,
        inputs: BlockInputs,
        hp: &mut HyperParameters,
    ) -> Result<Vec<Symbol>, BuildError> {
        let x = merge_inputs(plan, inputs)?;
        let rate = self.dropout.f64(hp, &hp_name(&self.name, "dropout"))?;
        let x = plan.dropout(&x, rate)?;
        let y = plan.dense(&x, self.output_dim, true)?;
        plan.mark_head(
            &y,
            HeadKind::Regression {
                dim: self.output_dim,
            },
        );
        Ok(vec![y])
    }
}
