//! Hyperparameter search.
//!
//! Each trial rebuilds the graph with a fresh set of values, trains the
//! resulting model and scores it by the best epoch of the objective
//! metric. The space is discovered while building: the first trial runs
//! every tunable at its default, later trials sample whatever earlier
//! builds declared.

pub mod oracle;
pub mod record;
pub mod trial;

use std::collections::BTreeMap;
use std::fmt;

use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::data::Dataset;
use crate::graph::{assemble, Graph, GraphError};
use crate::hp::{Domain, HpValue, HyperParameters};
use crate::model::{fit, CompileSpec, FitConfig};

pub use oracle::RandomSearch;
pub use record::{BestRecord, RecordError};
pub use trial::{Trial, TrialStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Minimize,
    Maximize,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Minimize => write!(f, "min"),
            Direction::Maximize => write!(f, "max"),
        }
    }
}

/// The metric trials are ranked by.
#[derive(Clone, Debug, PartialEq)]
pub struct Objective {
    pub name: String,
    pub direction: Direction,
}

impl Objective {
    /// Metrics named like accuracy are maximized, everything else minimized.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let direction = if name.contains("accuracy") {
            Direction::Maximize
        } else {
            Direction::Minimize
        };
        Self { name, direction }
    }

    pub fn maximize(&self) -> bool {
        self.direction == Direction::Maximize
    }

    /// Whether `score` beats `incumbent`.
    pub fn improves(&self, score: f64, incumbent: f64) -> bool {
        match self.direction {
            Direction::Minimize => score < incumbent,
            Direction::Maximize => score > incumbent,
        }
    }

    fn needs_validation(&self) -> bool {
        self.name.starts_with("val_")
    }
}

impl Default for Objective {
    fn default() -> Self {
        Self::new("val_loss")
    }
}

#[derive(Clone, Debug)]
pub struct TunerConfig {
    pub objective: Objective,
    pub max_trials: usize,
    pub seed: u64,
    pub fit: FitConfig,
    /// Trailing fraction of the data held out for validation.
    pub validation_split: f64,
    /// Sampling attempts per trial before the space counts as exhausted.
    pub max_retries: usize,
    /// Consecutive failed trials that abort the search.
    pub max_failures: usize,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            objective: Objective::default(),
            max_trials: 10,
            seed: 0,
            fit: FitConfig::default(),
            validation_split: 0.2,
            max_retries: 100,
            max_failures: 3,
        }
    }
}

#[derive(Debug, Error)]
pub enum TuneError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("objective '{objective}' needs validation data but the split left none")]
    NoValidation { objective: String },
    #[error("objective '{name}' is not a recorded metric (available: {available})")]
    UnknownObjective { name: String, available: String },
    #[error("{count} consecutive trials failed, last: {last}")]
    TooManyFailures { count: usize, last: String },
}

/// Outcome of a search: every trial in order plus the observed space.
#[derive(Clone, Debug)]
pub struct SearchResult {
    pub objective: Objective,
    pub trials: Vec<Trial>,
    pub space: BTreeMap<String, Domain>,
    best: Option<usize>,
}

impl SearchResult {
    pub fn best_trial(&self) -> Option<&Trial> {
        self.best.map(|i| &self.trials[i])
    }

    pub fn best_record(&self) -> Option<BestRecord> {
        let trial = self.best_trial()?;
        Some(BestRecord {
            objective: self.objective.name.clone(),
            direction: self.objective.direction,
            score: trial.score?,
            trial: trial.id,
            values: trial.values.clone(),
        })
    }

    pub fn num_completed(&self) -> usize {
        self.trials.iter().filter(|t| t.is_completed()).count()
    }
}

pub struct Tuner<'a> {
    graph: &'a Graph,
    compile: CompileSpec,
    config: TunerConfig,
    pinned: HyperParameters,
}

impl<'a> Tuner<'a> {
    pub fn new(graph: &'a Graph, compile: CompileSpec, config: TunerConfig) -> Self {
        Self {
            graph,
            compile,
            config,
            pinned: HyperParameters::new(),
        }
    }

    /// Values that every trial keeps; their names are never sampled.
    pub fn with_pinned(mut self, hp: HyperParameters) -> Self {
        self.pinned = hp;
        self
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    /// Run up to `max_trials` trials on `data`.
    ///
    /// Graph errors abort the search since every later trial would hit
    /// them too. Training failures only mark the trial as failed.
    pub fn search<B: AutodiffBackend>(
        &self,
        data: &Dataset,
        device: &B::Device,
    ) -> Result<SearchResult, TuneError> {
        let objective = &self.config.objective;
        let (train, validation) = data.split(self.config.validation_split);
        if validation.is_empty() && objective.needs_validation() {
            return Err(TuneError::NoValidation {
                objective: objective.name.clone(),
            });
        }
        let validation = (!validation.is_empty()).then_some(&validation);

        let pinned: BTreeMap<String, HpValue> = self
            .pinned
            .values()
            .iter()
            .filter(|(name, _)| self.pinned.is_fixed(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        let fixed = self.pinned.fixed_names();

        let mut oracle = RandomSearch::new(self.config.seed, self.config.max_retries);
        let mut space = self.pinned.space().clone();
        let mut trials: Vec<Trial> = Vec::new();
        let mut best: Option<usize> = None;
        let mut failures = 0;

        'trials: while trials.len() < self.config.max_trials {
            let id = trials.len();
            // A proposal can differ from an earlier one only in names the
            // build never declares; such repeats are resampled untrained.
            let mut repeats = 0;
            let (assembly, values) = loop {
                let Some(proposal) = oracle.propose(&space, &pinned) else {
                    info!(trials = trials.len(), "search space exhausted");
                    break 'trials;
                };
                let mut hp = HyperParameters::for_trial(&space, proposal, fixed);
                let assembly = assemble(self.graph, &mut hp)?;
                space = hp.space().clone();
                let values = hp.assignment();
                if oracle.record(&values) {
                    break (assembly, values);
                }
                repeats += 1;
                debug!(trial = id, repeats, "assignment already tried");
                if repeats > self.config.max_retries {
                    warn!(retries = self.config.max_retries, "no unseen assignment found");
                    break 'trials;
                }
            };

            let model = assembly.plan.init::<B>(device);
            let fitted = fit(
                model,
                &self.compile,
                &train,
                validation,
                &self.config.fit,
                device,
            );
            let trial = match fitted {
                Ok((_, history)) => {
                    let score = history
                        .best(&objective.name, objective.maximize())
                        .ok_or_else(|| TuneError::UnknownObjective {
                            name: objective.name.clone(),
                            available: history
                                .last()
                                .map(|m| m.keys().cloned().collect::<Vec<_>>().join(", "))
                                .unwrap_or_default(),
                        })?;
                    failures = 0;
                    info!(trial = id, score, objective = %objective.name, "trial completed");
                    Trial {
                        id,
                        values,
                        score: Some(score),
                        status: TrialStatus::Completed,
                        metrics: history.last().cloned().unwrap_or_default(),
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(trial = id, error = %e, "trial failed");
                    if failures >= self.config.max_failures {
                        return Err(TuneError::TooManyFailures {
                            count: failures,
                            last: e.to_string(),
                        });
                    }
                    Trial {
                        id,
                        values,
                        score: None,
                        status: TrialStatus::Failed(e.to_string()),
                        metrics: BTreeMap::new(),
                    }
                }
            };

            if let Some(score) = trial.score {
                let incumbent = best.and_then(|i| trials.get(i)).and_then(|t: &Trial| t.score);
                let better = match incumbent {
                    Some(incumbent) => objective.improves(score, incumbent),
                    None => true,
                };
                if better {
                    best = Some(trials.len());
                }
            }
            trials.push(trial);
        }

        Ok(SearchResult {
            objective: objective.clone(),
            trials,
            space,
            best,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{ClassificationHead, DenseBlock, Setting};
    use crate::data::Column;
    use crate::graph::{GraphBuilder, InputSpec};
    use crate::model::MetricKind;
    use burn::backend::{Autodiff, NdArray};

    type B = Autodiff<NdArray>;

    fn graph() -> Graph {
        let mut g = GraphBuilder::new();
        let x = g.input(InputSpec::float("x", &[2])).unwrap();
        let h = g
            .block(
                DenseBlock::new("dense")
                    .with_num_layers(Setting::fixed(1i64))
                    .with_units(Setting::choice([4i64, 8]))
                    .with_activation(Setting::fixed("relu"))
                    .with_use_norm(Setting::fixed(false))
                    .with_dropout(Setting::fixed(0.0)),
                &[x],
            )
            .unwrap();
        let head = ClassificationHead::new("head", 2).with_dropout(Setting::fixed(0.0));
        let y = g.block(head, &[h]).unwrap();
        g.build(&[y]).unwrap()
    }

    /// One or two hidden layers, each 4 or 8 wide: six distinct networks.
    fn layered_graph() -> Graph {
        let mut g = GraphBuilder::new();
        let x = g.input(InputSpec::float("x", &[2])).unwrap();
        let h = g
            .block(
                DenseBlock::new("dense")
                    .with_num_layers(Setting::choice([1i64, 2]))
                    .with_units(Setting::choice([4i64, 8]))
                    .with_activation(Setting::fixed("relu"))
                    .with_use_norm(Setting::fixed(false))
                    .with_dropout(Setting::fixed(0.0)),
                &[x],
            )
            .unwrap();
        let head = ClassificationHead::new("head", 2).with_dropout(Setting::fixed(0.0));
        let y = g.block(head, &[h]).unwrap();
        g.build(&[y]).unwrap()
    }

    fn data(rows: usize) -> Dataset {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..rows {
            let a = (i % 5) as f32 / 5.0;
            let b = (i % 3) as f32 / 3.0;
            x.extend([a, b]);
            y.push(if a > b { 1.0 } else { 0.0 });
        }
        Dataset::new(
            vec![Column::float("x", 2, x)],
            vec![Column::float("head", 1, y)],
        )
        .unwrap()
    }

    fn config(max_trials: usize) -> TunerConfig {
        TunerConfig {
            max_trials,
            fit: FitConfig {
                epochs: 2,
                batch_size: 8,
                ..FitConfig::default()
            },
            ..TunerConfig::default()
        }
    }

    #[test]
    fn objective_direction() {
        assert!(Objective::new("val_accuracy").maximize());
        assert!(!Objective::new("val_loss").maximize());
        assert!(Objective::new("loss").improves(0.1, 0.2));
        assert!(Objective::new("accuracy").improves(0.9, 0.8));
    }

    #[test]
    fn first_trial_uses_defaults_and_space_exhausts() {
        let graph = graph();
        let tuner = Tuner::new(&graph, CompileSpec::default(), config(10));
        let result = tuner.search::<B>(&data(40), &Default::default()).unwrap();

        let first = &result.trials[0];
        assert_eq!(first.values["dense/units_0"], HpValue::Int(4));
        assert!(result.space.contains_key("dense/units_0"));
        // Only the width is searchable, so two trials cover the space.
        assert_eq!(result.trials.len(), 2);
        assert_eq!(result.trials[1].values["dense/units_0"], HpValue::Int(8));
        assert_eq!(result.num_completed(), result.trials.len());

        let best = result.best_trial().unwrap();
        for trial in &result.trials {
            assert!(best.score.unwrap() <= trial.score.unwrap());
        }
        let record = result.best_record().unwrap();
        assert_eq!(record.trial, best.id);
        assert_eq!(record.direction, Direction::Minimize);
    }

    #[test]
    fn conditional_widths_train_each_network_once() {
        let graph = layered_graph();
        let mut cfg = config(30);
        cfg.fit.epochs = 1;
        let tuner = Tuner::new(&graph, CompileSpec::default(), cfg);
        let result = tuner.search::<B>(&data(40), &Default::default()).unwrap();

        assert_eq!(result.trials.len(), 6);
        let mut seen: Vec<&BTreeMap<String, HpValue>> = Vec::new();
        for (i, trial) in result.trials.iter().enumerate() {
            assert_eq!(trial.id, i);
            let layers = trial.values["dense/num_layers"].as_int().unwrap();
            assert_eq!(
                trial.values.contains_key("dense/units_1"),
                layers == 2,
                "{trial}"
            );
            assert!(!seen.contains(&&trial.values), "repeated {trial}");
            seen.push(&trial.values);
        }
        assert!(result.space.contains_key("dense/units_1"));

        let record = result.best_record().unwrap();
        let mut replay = HyperParameters::new();
        record.apply(&mut replay);
        assemble(&graph, &mut replay).unwrap();
        assert!(replay.unused_fixed().is_empty());
        assert_eq!(replay.assignment(), record.values);
    }

    #[test]
    fn pinned_values_hold_across_trials() {
        let graph = graph();
        let mut pinned = HyperParameters::new();
        pinned.fix("dense/units_0", 8i64);
        let tuner = Tuner::new(&graph, CompileSpec::default(), config(3)).with_pinned(pinned);
        let result = tuner.search::<B>(&data(40), &Default::default()).unwrap();
        for trial in &result.trials {
            assert_eq!(trial.values["dense/units_0"], HpValue::Int(8));
        }
    }

    #[test]
    fn objective_must_be_recorded() {
        let graph = graph();
        let mut cfg = config(1);
        cfg.objective = Objective::new("val_accuracy");
        let tuner = Tuner::new(&graph, CompileSpec::default(), cfg.clone());
        let err = tuner.search::<B>(&data(20), &Default::default()).unwrap_err();
        assert!(matches!(err, TuneError::UnknownObjective { .. }));

        let compile = CompileSpec {
            metrics: vec![MetricKind::Accuracy],
            ..CompileSpec::default()
        };
        let tuner = Tuner::new(&graph, compile, cfg);
        let result = tuner.search::<B>(&data(20), &Default::default()).unwrap();
        let score = result.best_record().unwrap().score;
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn validation_objective_needs_held_out_rows() {
        let graph = graph();
        let mut cfg = config(1);
        cfg.validation_split = 0.0;
        let tuner = Tuner::new(&graph, CompileSpec::default(), cfg);
        let err = tuner.search::<B>(&data(20), &Default::default()).unwrap_err();
        assert!(matches!(err, TuneError::NoValidation { .. }));
    }
}
