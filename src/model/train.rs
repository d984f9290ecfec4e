//! Fitting and evaluating a graph model.
//!
//! Every output is paired with one target column. The training loss is
//! the sum of the per-output losses; metrics are computed host-side from
//! the same forward pass.

use std::collections::BTreeMap;

use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, AdamWConfig, GradientsParams, Optimizer, SgdConfig};
use burn::prelude::*;
use burn::tensor::activation;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{debug, info};

use super::compile::{CompileSpec, LossKind, MetricKind, OptimizerKind};
use super::plan::{HeadKind, ModelPlan};
use super::runtime::{run_plan, Feature, GraphModel, GraphParams, RuntimeError};
use crate::data::{Column, ColumnData, Dataset};

#[derive(Clone, Debug, PartialEq)]
pub struct FitConfig {
    pub epochs: usize,
    pub batch_size: usize,
    /// Reshuffle training rows every epoch.
    pub shuffle: bool,
    pub seed: u64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 32,
            shuffle: true,
            seed: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum TrainError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("dataset is empty")]
    EmptyDataset,
    #[error("batch size must be positive")]
    ZeroBatch,
    #[error("model input {index} is '{expected}', dataset column is '{found}'")]
    InputName {
        index: usize,
        expected: String,
        found: String,
    },
    #[error("model has {outputs} output(s), dataset has {targets} target(s)")]
    TargetCount { outputs: usize, targets: usize },
    #[error("target '{name}' has width {found}, output needs {expected}")]
    TargetWidth {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("target '{name}' holds {value}, expected a class id below {classes}")]
    ClassId {
        name: String,
        value: f32,
        classes: usize,
    },
    #[error("loss is not finite at epoch {epoch}")]
    NonFinite { epoch: usize },
    #[error("reading tensor data: {0}")]
    Tensor(String),
}

/// Per-epoch metrics: `loss`, one entry per compiled metric, and the same
/// keys prefixed with `val_` when a validation set is given.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct History {
    epochs: Vec<BTreeMap<String, f64>>,
}

impl History {
    pub fn epochs(&self) -> &[BTreeMap<String, f64>] {
        &self.epochs
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&BTreeMap<String, f64>> {
        self.epochs.last()
    }

    pub fn series(&self, key: &str) -> Vec<f64> {
        self.epochs
            .iter()
            .filter_map(|m| m.get(key).copied())
            .collect()
    }

    /// Best value of `key` over all epochs.
    pub fn best(&self, key: &str, maximize: bool) -> Option<f64> {
        self.series(key).into_iter().reduce(|a, b| {
            if (maximize && b > a) || (!maximize && b < a) {
                b
            } else {
                a
            }
        })
    }
}

/// The loss each output trains with.
pub fn output_losses(plan: &ModelPlan, compile: &CompileSpec) -> Vec<LossKind> {
    plan.outputs()
        .iter()
        .map(|o| compile.loss.unwrap_or_else(|| o.loss()))
        .collect()
}

/// Target widths expected for `plan` under `compile`, one per output.
pub fn target_widths(plan: &ModelPlan, compile: &CompileSpec) -> Vec<usize> {
    plan.outputs()
        .iter()
        .zip(output_losses(plan, compile))
        .map(|(o, loss)| o.target_width(loss))
        .collect()
}

fn check_dataset(plan: &ModelPlan, losses: &[LossKind], data: &Dataset) -> Result<(), TrainError> {
    if data.is_empty() {
        return Err(TrainError::EmptyDataset);
    }
    if data.inputs().len() != plan.inputs().len() {
        return Err(RuntimeError::InputCount {
            expected: plan.inputs().len(),
            found: data.inputs().len(),
        }
        .into());
    }
    for (index, (spec, column)) in plan.inputs().iter().zip(data.inputs()).enumerate() {
        if spec.name != column.name {
            return Err(TrainError::InputName {
                index,
                expected: spec.name.clone(),
                found: column.name.clone(),
            });
        }
    }
    if data.targets().len() != plan.outputs().len() {
        return Err(TrainError::TargetCount {
            outputs: plan.outputs().len(),
            targets: data.targets().len(),
        });
    }
    for ((output, loss), target) in plan.outputs().iter().zip(losses).zip(data.targets()) {
        let expected = output.target_width(*loss);
        if target.width != expected {
            return Err(TrainError::TargetWidth {
                name: target.name.clone(),
                expected,
                found: target.width,
            });
        }
        if *loss == LossKind::CategoricalCrossEntropy {
            let classes = output.shape.numel();
            if let Some(bad) = target
                .to_f32()
                .into_iter()
                .find(|v| v.fract() != 0.0 || *v < 0.0 || *v as usize >= classes)
            {
                return Err(TrainError::ClassId {
                    name: target.name.clone(),
                    value: bad,
                    classes,
                });
            }
        }
    }
    Ok(())
}

/// Input tensors for every row of `data`, in model input order.
pub fn features<B: Backend>(data: &Dataset, device: &B::Device) -> Vec<Feature<B>> {
    data.inputs()
        .iter()
        .map(|column| {
            let shape = [data.len(), column.width];
            match &column.data {
                ColumnData::Float(v) => Feature::Float(Tensor::from_data(
                    TensorData::new(v.clone(), shape),
                    device,
                )),
                ColumnData::Int(v) => Feature::Int(Tensor::from_data(
                    TensorData::new(v.clone(), shape),
                    device,
                )),
            }
        })
        .collect()
}

fn loss_tensor<B: Backend>(
    kind: LossKind,
    output: Tensor<B, 2>,
    target: &Column,
    device: &B::Device,
) -> Tensor<B, 1> {
    let rows = target.rows();
    match kind {
        LossKind::BinaryCrossEntropy => {
            // Stable form of -[y log σ(x) + (1-y) log(1-σ(x))].
            let y = Tensor::<B, 2>::from_data(
                TensorData::new(target.to_f32(), [rows, target.width]),
                device,
            );
            let x = output;
            (x.clone().clamp_min(0.0) - x.clone() * y + x.abs().neg().exp().log1p()).mean()
        }
        LossKind::CategoricalCrossEntropy => {
            let ids: Vec<i64> = target.to_f32().into_iter().map(|v| v as i64).collect();
            let y = Tensor::<B, 2, Int>::from_data(TensorData::new(ids, [rows, 1]), device);
            activation::log_softmax(output, 1).gather(1, y).mean().neg()
        }
        LossKind::MeanSquaredError => {
            let y = Tensor::<B, 2>::from_data(
                TensorData::new(target.to_f32(), [rows, target.width]),
                device,
            );
            (output - y).powf_scalar(2.0).mean()
        }
    }
}

fn to_host<B: Backend>(t: Tensor<B, 2>) -> Result<Vec<f32>, TrainError> {
    t.into_data()
        .to_vec::<f32>()
        .map_err(|e| TrainError::Tensor(format!("{:?}", e)))
}

/// Running sums for one pass over a dataset.
#[derive(Default)]
struct Tally {
    rows: usize,
    loss: f64,
    metrics: BTreeMap<String, (f64, usize)>,
}

impl Tally {
    fn record_loss(&mut self, loss: f64, rows: usize) {
        self.loss += loss * rows as f64;
        self.rows += rows;
    }

    fn record(&mut self, key: String, sum: f64, count: usize) {
        let entry = self.metrics.entry(key).or_insert((0.0, 0));
        entry.0 += sum;
        entry.1 += count;
    }

    /// Score one batch of raw outputs against the batch targets.
    fn score(
        &mut self,
        plan: &ModelPlan,
        metrics: &[MetricKind],
        outputs: &[Vec<f32>],
        batch: &Dataset,
    ) {
        for (i, ((spec, raw), target)) in plan
            .outputs()
            .iter()
            .zip(outputs)
            .zip(batch.targets())
            .enumerate()
        {
            let y = target.to_f32();
            let width = spec.shape.numel();
            for &metric in metrics {
                let key = metric_key(plan, i, metric);
                match (metric, spec.head) {
                    (MetricKind::Accuracy, Some(HeadKind::Binary)) => {
                        let hits = raw
                            .iter()
                            .zip(&y)
                            .filter(|(x, t)| (**x > 0.0) == (**t > 0.5))
                            .count();
                        self.record(key, hits as f64, y.len());
                    }
                    (MetricKind::Accuracy, Some(HeadKind::Multiclass { .. })) => {
                        let hits = raw
                            .chunks(width)
                            .zip(&y)
                            .filter(|(row, t)| argmax(row) == **t as usize)
                            .count();
                        self.record(key, hits as f64, y.len());
                    }
                    (MetricKind::Accuracy, _) | (_, Some(HeadKind::Multiclass { .. })) => {}
                    (MetricKind::MeanAbsoluteError | MetricKind::MeanSquaredError, head) => {
                        let link = |x: f32| match head {
                            Some(HeadKind::Binary) => 1.0 / (1.0 + (-x).exp()),
                            _ => x,
                        };
                        let sum: f64 = raw
                            .iter()
                            .zip(&y)
                            .map(|(x, t)| {
                                let e = (link(*x) - t) as f64;
                                if metric == MetricKind::MeanAbsoluteError {
                                    e.abs()
                                } else {
                                    e * e
                                }
                            })
                            .sum();
                        self.record(key, sum, y.len());
                    }
                }
            }
        }
    }

    fn finish(self, prefix: &str) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        if self.rows > 0 {
            out.insert(format!("{}loss", prefix), self.loss / self.rows as f64);
        }
        for (key, (sum, count)) in self.metrics {
            if count > 0 {
                out.insert(format!("{}{}", prefix, key), sum / count as f64);
            }
        }
        out
    }
}

fn argmax(row: &[f32]) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, v)| {
            if *v > best.1 {
                (i, *v)
            } else {
                best
            }
        })
        .0
}

/// Metric name; prefixed with the producing block when there are several outputs.
fn metric_key(plan: &ModelPlan, output: usize, metric: MetricKind) -> String {
    if plan.outputs().len() == 1 {
        return metric.key().to_string();
    }
    let owner = plan
        .node(plan.outputs()[output].value)
        .and_then(|n| n.block.clone())
        .unwrap_or_else(|| format!("output{}", output));
    format!("{}_{}", owner, metric.key())
}

/// Train `model` on `train`, reporting validation metrics each epoch.
pub fn fit<B: AutodiffBackend>(
    model: GraphModel<B>,
    compile: &CompileSpec,
    train: &Dataset,
    validation: Option<&Dataset>,
    config: &FitConfig,
    device: &B::Device,
) -> Result<(GraphModel<B>, History), TrainError> {
    match compile.optimizer {
        OptimizerKind::Adam => fit_with(
            model,
            AdamConfig::new().init::<B, GraphParams<B>>(),
            compile,
            train,
            validation,
            config,
            device,
        ),
        OptimizerKind::AdamW => fit_with(
            model,
            AdamWConfig::new().init::<B, GraphParams<B>>(),
            compile,
            train,
            validation,
            config,
            device,
        ),
        OptimizerKind::Sgd => fit_with(
            model,
            SgdConfig::new().init::<B, GraphParams<B>>(),
            compile,
            train,
            validation,
            config,
            device,
        ),
    }
}

fn fit_with<B: AutodiffBackend, O: Optimizer<GraphParams<B>, B>>(
    model: GraphModel<B>,
    mut optimizer: O,
    compile: &CompileSpec,
    train: &Dataset,
    validation: Option<&Dataset>,
    config: &FitConfig,
    device: &B::Device,
) -> Result<(GraphModel<B>, History), TrainError> {
    if config.batch_size == 0 {
        return Err(TrainError::ZeroBatch);
    }
    let losses = output_losses(model.plan(), compile);
    check_dataset(model.plan(), &losses, train)?;
    let validation = validation.filter(|v| !v.is_empty());
    if let Some(val) = validation {
        check_dataset(model.plan(), &losses, val)?;
    }

    let (plan, mut params) = model.into_parts();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut order: Vec<usize> = (0..train.len()).collect();
    let mut history = History::default();

    for epoch in 1..=config.epochs {
        if config.shuffle {
            order.shuffle(&mut rng);
        }
        let mut tally = Tally::default();
        for chunk in order.chunks(config.batch_size) {
            let batch = train.select(chunk);
            let outputs = run_plan(&plan, &params, features(&batch, device))?;

            let mut host = Vec::with_capacity(outputs.len());
            let mut total: Option<Tensor<B, 1>> = None;
            for ((output, kind), target) in outputs.into_iter().zip(&losses).zip(batch.targets()) {
                host.push(to_host(output.clone())?);
                let l = loss_tensor(*kind, output, target, device);
                total = Some(match total {
                    Some(t) => t + l,
                    None => l,
                });
            }
            let loss = total.ok_or(TrainError::TargetCount {
                outputs: 0,
                targets: batch.targets().len(),
            })?;
            let value: f64 = loss.clone().into_scalar().elem();
            if !value.is_finite() {
                return Err(TrainError::NonFinite { epoch });
            }
            tally.record_loss(value, chunk.len());
            tally.score(&plan, &compile.metrics, &host, &batch);

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &params);
            params = optimizer.step(compile.learning_rate, params, grads);
        }

        let mut metrics = tally.finish("");
        if let Some(val) = validation {
            let snapshot = GraphModel::from_parts(plan.clone(), params.valid());
            metrics.extend(run_evaluation(
                &snapshot,
                compile,
                &losses,
                val,
                config.batch_size,
                device,
                "val_",
            )?);
        }
        info!(
            epoch,
            loss = metrics.get("loss").copied().unwrap_or(f64::NAN),
            val_loss = metrics.get("val_loss").copied().unwrap_or(f64::NAN),
            "epoch finished"
        );
        history.epochs.push(metrics);
    }
    Ok((GraphModel::from_parts(plan, params), history))
}

/// Loss and metrics of `model` over `data`.
pub fn evaluate<B: Backend>(
    model: &GraphModel<B>,
    compile: &CompileSpec,
    data: &Dataset,
    batch_size: usize,
    device: &B::Device,
) -> Result<BTreeMap<String, f64>, TrainError> {
    if batch_size == 0 {
        return Err(TrainError::ZeroBatch);
    }
    let losses = output_losses(model.plan(), compile);
    check_dataset(model.plan(), &losses, data)?;
    run_evaluation(model, compile, &losses, data, batch_size, device, "")
}

fn run_evaluation<B: Backend>(
    model: &GraphModel<B>,
    compile: &CompileSpec,
    losses: &[LossKind],
    data: &Dataset,
    batch_size: usize,
    device: &B::Device,
    prefix: &str,
) -> Result<BTreeMap<String, f64>, TrainError> {
    let mut tally = Tally::default();
    for range in data.batches(batch_size) {
        let batch = data.slice(range);
        let outputs = model.forward(features(&batch, device))?;
        let mut host = Vec::with_capacity(outputs.len());
        let mut loss = 0.0;
        for ((output, kind), target) in outputs.into_iter().zip(losses).zip(batch.targets()) {
            host.push(to_host(output.clone())?);
            let l: f64 = loss_tensor(*kind, output, target, device)
                .into_scalar()
                .elem();
            loss += l;
        }
        tally.record_loss(loss, batch.len());
        tally.score(model.plan(), &compile.metrics, &host, &batch);
    }
    let metrics = tally.finish(prefix);
    debug!(?metrics, rows = data.len(), "evaluated");
    Ok(metrics)
}
