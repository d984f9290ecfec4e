use super::params::{BlockParams, ParamError, Setting};
use super::{hp_name, merge_inputs, Block, BlockInputs, BuildError};
use crate::hp::HyperParameters;
use crate::model::plan::{Activation, PlanBuilder, Symbol};

pub const UNIT_CHOICES: [i64; 7] = [16, 32, 64, 128, 256, 512, 1024];

/// Stack of fully connected layers over the concatenated inputs.
///
/// Each layer is `dense -> [layer_norm] -> activation -> [dropout]`. The
/// width of layer `i` is the tunable `units_{i}`, declared only for the
/// layers actually built.
#[derive(Clone, Debug)]
pub struct DenseBlock {
    name: String,
    num_layers: Setting,
    units: Setting,
    activation: Setting,
    use_norm: Setting,
    dropout: Setting,
}

impl DenseBlock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            num_layers: Setting::choice([1i64, 2, 3]),
            units: Setting::choice(UNIT_CHOICES),
            activation: Setting::choice(["relu", "tanh", "gelu"]),
            use_norm: Setting::boolean(),
            dropout: Setting::choice([0.0f64, 0.25, 0.5]),
        }
    }

    pub fn with_num_layers(mut self, setting: Setting) -> Self {
        self.num_layers = setting;
        self
    }

    /// Domain (or pinned value) shared by every layer's width.
    pub fn with_units(mut self, setting: Setting) -> Self {
        self.units = setting;
        self
    }

    pub fn with_activation(mut self, setting: Setting) -> Self {
        self.activation = setting;
        self
    }

    pub fn with_use_norm(mut self, setting: Setting) -> Self {
        self.use_norm = setting;
        self
    }

    pub fn with_dropout(mut self, setting: Setting) -> Self {
        self.dropout = setting;
        self
    }

    pub(super) fn from_params(name: &str, params: &BlockParams) -> Result<Self, ParamError> {
        params.check_known(
            "dense",
            &["num_layers", "units", "activation", "use_norm", "dropout"],
        )?;
        let mut block = Self::new(name);
        if let Some(s) = params.setting("num_layers") {
            block.num_layers = s;
        }
        if let Some(s) = params.setting("units") {
            block.units = s;
        }
        if let Some(s) = params.setting("activation") {
            block.activation = s;
        }
        if let Some(s) = params.setting("use_norm") {
            block.use_norm = s;
        }
        if let Some(s) = params.setting("dropout") {
            block.dropout = s;
        }
        Ok(block)
    }
}

impl Block for DenseBlock {
    fn name(&self) -> &str {
        &self.name
    }

    fn build(
        &self,
        plan: &mut PlanBuilder,
        inputs: BlockInputs,
        hp: &mut HyperParameters,
    ) -> Result<Vec<Symbol>, BuildError> {
        let mut x = merge_inputs(plan, inputs)?;

        let num_layers = self
            .num_layers
            .usize(hp, &hp_name(&self.name, "num_layers"))?;
        let use_norm = self.use_norm.bool(hp, &hp_name(&self.name, "use_norm"))?;
        let activation: Activation = self
            .activation
            .string(hp, &hp_name(&self.name, "activation"))?
            .parse()
            .map_err(BuildError::Invalid)?;
        let dropout = self.dropout.f64(hp, &hp_name(&self.name, "dropout"))?;

        for i in 0..num_layers {
            let units = self
                .units
                .usize(hp, &hp_name(&self.name, &format!("units_{}", i)))?;
            // A following norm recenters, so the bias would be redundant.
            x = plan.dense(&x, units, !use_norm)?;
            if use_norm {
                x = plan.layer_norm(&x)?;
            }
            x = plan.activation(&x, activation)?;
            x = plan.dropout(&x, dropout)?;
        }
        Ok(vec![x])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::InputSpec;
    use crate::hp::{Domain, HpValue};

    fn build(block: &DenseBlock, hp: &mut HyperParameters) -> Symbol {
        let mut plan = PlanBuilder::new();
        let a = plan.input(&InputSpec::float("a", &[3]));
        let mut out = block
            .build(&mut plan, BlockInputs::Positional(vec![a]), hp)
            .unwrap();
        out.remove(0)
    }

    #[test]
    fn defaults_declare_the_space() {
        let mut hp = HyperParameters::new();
        let y = build(&DenseBlock::new("dense"), &mut hp);
        assert_eq!(y.width(), 16);
        let names: Vec<&str> = hp.space().keys().map(String::as_str).collect();
        assert_eq!(
            names,
            vec![
                "dense/activation",
                "dense/dropout",
                "dense/num_layers",
                "dense/units_0",
                "dense/use_norm"
            ]
        );
    }

    #[test]
    fn sampled_values_shape_the_stack() {
        let mut hp = HyperParameters::new();
        hp.fix("dense/num_layers", 2i64);
        hp.fix("dense/units_0", 64i64);
        hp.fix("dense/units_1", 32i64);
        hp.fix("dense/use_norm", true);
        let y = build(&DenseBlock::new("dense"), &mut hp);
        assert_eq!(y.width(), 32);
        assert!(hp.space().contains_key("dense/units_1"));
        assert!(!hp.space().contains_key("dense/units_2"));
    }

    #[test]
    fn pinned_units_are_fixed_domains() {
        let mut hp = HyperParameters::new();
        let block = DenseBlock::new("d")
            .with_num_layers(Setting::fixed(1i64))
            .with_units(Setting::fixed(8i64));
        let y = build(&block, &mut hp);
        assert_eq!(y.width(), 8);
        assert_eq!(
            hp.space().get("d/units_0"),
            Some(&Domain::Fixed(HpValue::Int(8)))
        );
    }

    #[test]
    fn unknown_activation_is_invalid() {
        let mut hp = HyperParameters::new();
        let block = DenseBlock::new("d").with_activation(Setting::fixed("swish"));
        let mut plan = PlanBuilder::new();
        let a = plan.input(&InputSpec::float("a", &[3]));
        let err = block
            .build(&mut plan, BlockInputs::Positional(vec![a]), &mut hp)
            .unwrap_err();
        assert!(matches!(err, BuildError::Invalid(_)));
    }
}
