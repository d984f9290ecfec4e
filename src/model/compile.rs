//! Training contract: optimizer, loss, metrics, learning rate.

use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptimizerKind {
    Adam,
    AdamW,
    Sgd,
}

impl FromStr for OptimizerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "adam" => Ok(OptimizerKind::Adam),
            "adamw" => Ok(OptimizerKind::AdamW),
            "sgd" => Ok(OptimizerKind::Sgd),
            other => Err(format!(
                "unknown optimizer '{}' (expected adam, adamw or sgd)",
                other
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LossKind {
    /// Sigmoid cross-entropy on a single logit per sample.
    BinaryCrossEntropy,
    /// Softmax cross-entropy against integer class ids.
    CategoricalCrossEntropy,
    MeanSquaredError,
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LossKind::BinaryCrossEntropy => "binary_crossentropy",
            LossKind::CategoricalCrossEntropy => "categorical_crossentropy",
            LossKind::MeanSquaredError => "mse",
        };
        f.write_str(name)
    }
}

impl FromStr for LossKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "binary_crossentropy" | "bce" => Ok(LossKind::BinaryCrossEntropy),
            "categorical_crossentropy" | "sparse_categorical_crossentropy" | "ce" => {
                Ok(LossKind::CategoricalCrossEntropy)
            }
            "mse" | "mean_squared_error" => Ok(LossKind::MeanSquaredError),
            other => Err(format!("unknown loss '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricKind {
    Accuracy,
    MeanAbsoluteError,
    MeanSquaredError,
}

impl MetricKind {
    /// Key under which the metric is reported.
    pub fn key(self) -> &'static str {
        match self {
            MetricKind::Accuracy => "accuracy",
            MetricKind::MeanAbsoluteError => "mae",
            MetricKind::MeanSquaredError => "mse",
        }
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accuracy" | "acc" => Ok(MetricKind::Accuracy),
            "mae" | "mean_absolute_error" => Ok(MetricKind::MeanAbsoluteError),
            "mse" | "mean_squared_error" => Ok(MetricKind::MeanSquaredError),
            other => Err(format!("unknown metric '{}'", other)),
        }
    }
}

/// How a built model is trained.
#[derive(Clone, Debug, PartialEq)]
pub struct CompileSpec {
    pub optimizer: OptimizerKind,
    /// Overrides the loss implied by each output head.
    pub loss: Option<LossKind>,
    pub metrics: Vec<MetricKind>,
    pub learning_rate: f64,
}

impl Default for CompileSpec {
    fn default() -> Self {
        Self {
            optimizer: OptimizerKind::Adam,
            loss: None,
            metrics: Vec::new(),
            learning_rate: 1e-3,
        }
    }
}
