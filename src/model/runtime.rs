//! Instantiating a plan on a burn backend and running it.

use burn::module::{AutodiffModule, Module};
use burn::nn::{
    Dropout, DropoutConfig, Embedding, EmbeddingConfig, LayerNorm, LayerNormConfig, Linear,
    LinearConfig,
};
use burn::prelude::*;
use burn::tensor::activation;
use burn::tensor::backend::AutodiffBackend;
use thiserror::Error;

use super::plan::{Activation, HeadKind, ModelPlan, Op, Reduction, ValueId};
use crate::graph::node::ElementType;

/// Trainable state of a [`GraphModel`], one vector per layer family.
#[derive(Module, Debug)]
pub struct GraphParams<B: Backend> {
    dense: Vec<Linear<B>>,
    norm: Vec<LayerNorm<B>>,
    lookup: Vec<Embedding<B>>,
    dropout: Vec<Dropout>,
}

/// A value flowing through the graph at run time: `[batch, features]`.
#[derive(Clone, Debug)]
pub enum Feature<B: Backend> {
    Float(Tensor<B, 2>),
    Int(Tensor<B, 2, Int>),
}

impl<B: Backend> Feature<B> {
    fn dims(&self) -> [usize; 2] {
        match self {
            Feature::Float(t) => t.dims(),
            Feature::Int(t) => t.dims(),
        }
    }

    fn dtype(&self) -> ElementType {
        match self {
            Feature::Float(_) => ElementType::Float32,
            Feature::Int(_) => ElementType::Int64,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("model takes {expected} inputs, got {found}")]
    InputCount { expected: usize, found: usize },
    #[error("input '{name}' expects {expected} data, got {found}")]
    InputType {
        name: String,
        expected: ElementType,
        found: ElementType,
    },
    #[error("input '{name}' expects {expected} features per sample, got {found}")]
    InputWidth {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("inputs disagree on batch size ({first} vs {other})")]
    BatchSize { first: usize, other: usize },
    #[error("value {0} has the wrong element type for its op")]
    Kind(String),
    #[error("lookup in '{op}' got id {value}, the table holds {vocab} entries")]
    IdOutOfRange { op: String, value: i64, vocab: usize },
}

/// A plan bound to parameters on backend `B`.
#[derive(Debug, Clone)]
pub struct GraphModel<B: Backend> {
    pub params: GraphParams<B>,
    plan: ModelPlan,
}

impl ModelPlan {
    /// Allocate freshly initialized parameters for every layer in the plan.
    pub fn init<B: Backend>(&self, device: &B::Device) -> GraphModel<B> {
        let params = GraphParams {
            dense: self
                .dense
                .iter()
                .map(|d| {
                    LinearConfig::new(d.d_in, d.d_out)
                        .with_bias(d.bias)
                        .init(device)
                })
                .collect(),
            norm: self
                .norms
                .iter()
                .map(|d| LayerNormConfig::new(*d).init(device))
                .collect(),
            lookup: self
                .lookups
                .iter()
                .map(|l| EmbeddingConfig::new(l.vocab, l.dim).init(device))
                .collect(),
            dropout: self
                .dropouts
                .iter()
                .map(|p| DropoutConfig::new(*p).init())
                .collect(),
        };
        GraphModel {
            params,
            plan: self.clone(),
        }
    }
}

impl<B: Backend> GraphModel<B> {
    pub fn from_parts(plan: ModelPlan, params: GraphParams<B>) -> Self {
        Self { params, plan }
    }

    pub fn plan(&self) -> &ModelPlan {
        &self.plan
    }

    pub fn into_parts(self) -> (ModelPlan, GraphParams<B>) {
        (self.plan, self.params)
    }

    /// Raw outputs (logits for classification heads), one per plan output.
    pub fn forward(&self, inputs: Vec<Feature<B>>) -> Result<Vec<Tensor<B, 2>>, RuntimeError> {
        run_plan(&self.plan, &self.params, inputs)
    }

    /// Outputs with the head's link function applied.
    pub fn predict(&self, inputs: Vec<Feature<B>>) -> Result<Vec<Tensor<B, 2>>, RuntimeError> {
        let raw = self.forward(inputs)?;
        Ok(raw
            .into_iter()
            .zip(&self.plan.outputs)
            .map(|(t, out)| match out.head {
                Some(HeadKind::Binary) => activation::sigmoid(t),
                Some(HeadKind::Multiclass { .. }) => activation::softmax(t, 1),
                _ => t,
            })
            .collect())
    }
}

impl<B: AutodiffBackend> GraphModel<B> {
    /// The same model without gradient tracking, for evaluation.
    pub fn valid(&self) -> GraphModel<B::InnerBackend> {
        GraphModel {
            params: self.params.valid(),
            plan: self.plan.clone(),
        }
    }
}

/// Evaluate `plan` op by op. Ops are stored in dependency order, so every
/// operand is already computed when an op runs.
pub fn run_plan<B: Backend>(
    plan: &ModelPlan,
    params: &GraphParams<B>,
    inputs: Vec<Feature<B>>,
) -> Result<Vec<Tensor<B, 2>>, RuntimeError> {
    check_inputs(plan, &inputs)?;

    let mut values: Vec<Feature<B>> = Vec::with_capacity(plan.nodes.len());
    for (i, node) in plan.nodes.iter().enumerate() {
        let value = match &node.op {
            Op::Input { index } => inputs[*index].clone(),
            Op::Dense { slot, input } => {
                Feature::Float(params.dense[*slot].forward(float(&values, *input)?))
            }
            Op::Norm { slot, input } => {
                Feature::Float(params.norm[*slot].forward(float(&values, *input)?))
            }
            Op::Lookup {
                slot,
                input,
                reduction,
            } => {
                let ids = int(&values, *input)?;
                check_ids(&ids, plan.lookups[*slot].vocab, || match &node.block {
                    Some(block) => block.clone(),
                    None => ValueId(i as u32).to_string(),
                })?;
                let [batch, _] = ids.dims();
                let embedded = params.lookup[*slot].forward(ids);
                let [_, k, dim] = embedded.dims();
                let reduced = match reduction {
                    Reduction::Flatten => embedded.reshape([batch, k * dim]),
                    Reduction::Mean => embedded.mean_dim(1).reshape([batch, dim]),
                };
                Feature::Float(reduced)
            }
            Op::Activation { kind, input } => {
                let x = float(&values, *input)?;
                Feature::Float(match kind {
                    Activation::Relu => activation::relu(x),
                    Activation::Tanh => activation::tanh(x),
                    Activation::Sigmoid => activation::sigmoid(x),
                    Activation::Gelu => activation::gelu(x),
                    Activation::Softmax => activation::softmax(x, 1),
                })
            }
            Op::Dropout { slot, input } => {
                Feature::Float(params.dropout[*slot].forward(float(&values, *input)?))
            }
            Op::Concat { inputs: operands } => {
                let parts = operands
                    .iter()
                    .map(|v| float(&values, *v))
                    .collect::<Result<Vec<_>, _>>()?;
                Feature::Float(Tensor::cat(parts, 1))
            }
            Op::Add { lhs, rhs } => Feature::Float(float(&values, *lhs)? + float(&values, *rhs)?),
            Op::Cast { input } => Feature::Float(int(&values, *input)?.float()),
            Op::Slice { input, start, end } => {
                let x = float(&values, *input)?;
                let [batch, _] = x.dims();
                Feature::Float(x.slice([0..batch, *start..*end]))
            }
        };
        debug_assert_eq!(values.len(), i);
        values.push(value);
    }

    plan.outputs
        .iter()
        .map(|out| float(&values, out.value))
        .collect()
}

fn check_inputs<B: Backend>(plan: &ModelPlan, inputs: &[Feature<B>]) -> Result<(), RuntimeError> {
    if inputs.len() != plan.inputs.len() {
        return Err(RuntimeError::InputCount {
            expected: plan.inputs.len(),
            found: inputs.len(),
        });
    }
    let mut batch = None;
    for (spec, feature) in plan.inputs.iter().zip(inputs) {
        if feature.dtype() != spec.dtype {
            return Err(RuntimeError::InputType {
                name: spec.name.clone(),
                expected: spec.dtype,
                found: feature.dtype(),
            });
        }
        let [rows, width] = feature.dims();
        if width != spec.shape.numel() {
            return Err(RuntimeError::InputWidth {
                name: spec.name.clone(),
                expected: spec.shape.numel(),
                found: width,
            });
        }
        match batch {
            None => batch = Some(rows),
            Some(first) if first != rows => {
                return Err(RuntimeError::BatchSize { first, other: rows })
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Embedding tables index without bounds checks, so ids are checked on the host.
fn check_ids<B: Backend>(
    ids: &Tensor<B, 2, Int>,
    vocab: usize,
    op: impl FnOnce() -> String,
) -> Result<(), RuntimeError> {
    let data = ids.clone().into_data();
    let result = match data
        .iter::<i64>()
        .find(|id| usize::try_from(*id).map_or(true, |id| id >= vocab))
    {
        Some(value) => Err(RuntimeError::IdOutOfRange {
            op: op(),
            value,
            vocab,
        }),
        None => Ok(()),
    };
    result
}

fn float<B: Backend>(
    values: &[Feature<B>],
    id: ValueId,
) -> Result<Tensor<B, 2>, RuntimeError> {
    match values.get(id.0 as usize) {
        Some(Feature::Float(t)) => Ok(t.clone()),
        _ => Err(RuntimeError::Kind(id.to_string())),
    }
}

fn int<B: Backend>(
    values: &[Feature<B>],
    id: ValueId,
) -> Result<Tensor<B, 2, Int>, RuntimeError> {
    match values.get(id.0 as usize) {
        Some(Feature::Int(t)) => Ok(t.clone()),
        _ => Err(RuntimeError::Kind(id.to_string())),
    }
}
