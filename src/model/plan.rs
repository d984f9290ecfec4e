//! Backend-agnostic model plan.
//!
//! Blocks never touch tensors. They call [`PlanBuilder`] methods that
//! record an op, check shapes and element types, and hand back a
//! [`Symbol`] for the new value. The finished [`ModelPlan`] is a flat,
//! topologically ordered op list plus the layer specs needed to
//! instantiate parameters on a concrete burn backend (see `runtime`).

use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;

use thiserror::Error;

use super::compile::LossKind;
use crate::graph::node::{ElementType, InputSpec, Shape};

/// Index of a value in the plan's op list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Symbolic handle to a value in a plan under construction.
///
/// This is the artifact type stored in the node registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Symbol {
    pub id: ValueId,
    pub shape: Shape,
    pub dtype: ElementType,
}

impl Symbol {
    /// Features per sample once flattened.
    pub fn width(&self) -> usize {
        self.shape.numel()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Tanh,
    Sigmoid,
    Gelu,
    Softmax,
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Activation::Relu => "relu",
            Activation::Tanh => "tanh",
            Activation::Sigmoid => "sigmoid",
            Activation::Gelu => "gelu",
            Activation::Softmax => "softmax",
        };
        f.write_str(name)
    }
}

impl FromStr for Activation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "relu" => Ok(Activation::Relu),
            "tanh" => Ok(Activation::Tanh),
            "sigmoid" => Ok(Activation::Sigmoid),
            "gelu" => Ok(Activation::Gelu),
            "softmax" => Ok(Activation::Softmax),
            other => Err(format!("unknown activation '{}'", other)),
        }
    }
}

/// How a lookup over several ids collapses into one feature vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reduction {
    Flatten,
    Mean,
}

impl FromStr for Reduction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flatten" => Ok(Reduction::Flatten),
            "mean" => Ok(Reduction::Mean),
            other => Err(format!("unknown reduction '{}'", other)),
        }
    }
}

/// What an output head predicts; decides the default loss.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeadKind {
    /// Two classes folded into a single logit.
    Binary,
    Multiclass { classes: usize },
    Regression { dim: usize },
}

impl HeadKind {
    pub fn default_loss(self) -> LossKind {
        match self {
            HeadKind::Binary => LossKind::BinaryCrossEntropy,
            HeadKind::Multiclass { .. } => LossKind::CategoricalCrossEntropy,
            HeadKind::Regression { .. } => LossKind::MeanSquaredError,
        }
    }
}

impl fmt::Display for HeadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeadKind::Binary => write!(f, "binary"),
            HeadKind::Multiclass { classes } => write!(f, "multiclass({})", classes),
            HeadKind::Regression { dim } => write!(f, "regression({})", dim),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    Input { index: usize },
    Dense { slot: usize, input: ValueId },
    Norm { slot: usize, input: ValueId },
    Lookup { slot: usize, input: ValueId, reduction: Reduction },
    Activation { kind: Activation, input: ValueId },
    Dropout { slot: usize, input: ValueId },
    Concat { inputs: Vec<ValueId> },
    Add { lhs: ValueId, rhs: ValueId },
    Cast { input: ValueId },
    Slice { input: ValueId, start: usize, end: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DenseSpec {
    pub d_in: usize,
    pub d_out: usize,
    pub bias: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LookupSpec {
    pub vocab: usize,
    pub dim: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlanNode {
    pub op: Op,
    pub shape: Shape,
    pub dtype: ElementType,
    /// Name of the block that recorded the op.
    pub block: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OutputSpec {
    pub value: ValueId,
    pub shape: Shape,
    pub head: Option<HeadKind>,
}

impl OutputSpec {
    pub fn loss(&self) -> LossKind {
        self.head
            .map(HeadKind::default_loss)
            .unwrap_or(LossKind::MeanSquaredError)
    }

    /// Target columns this output trains against under `loss`.
    pub fn target_width(&self, loss: LossKind) -> usize {
        match loss {
            LossKind::CategoricalCrossEntropy => 1,
            _ => self.shape.numel(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlanError {
    #[error("{op} expects {expected} input, found {found}")]
    Dtype {
        op: &'static str,
        expected: ElementType,
        found: ElementType,
    },
    #[error("{op} needs matching widths, found {lhs} and {rhs}")]
    Width {
        op: &'static str,
        lhs: usize,
        rhs: usize,
    },
    #[error("{op} needs at least one input")]
    Empty { op: &'static str },
    #[error("{op} size must be positive")]
    ZeroSize { op: &'static str },
    #[error("dropout rate {0} is outside [0, 1)")]
    Rate(f64),
    #[error("slice {start}..{end} is out of range for width {width}")]
    Slice {
        start: usize,
        end: usize,
        width: usize,
    },
    #[error("a model needs at least one output")]
    NoOutputs,
}

/// A finished, backend-agnostic model.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelPlan {
    pub(crate) inputs: Vec<InputSpec>,
    pub(crate) nodes: Vec<PlanNode>,
    pub(crate) dense: Vec<DenseSpec>,
    pub(crate) norms: Vec<usize>,
    pub(crate) lookups: Vec<LookupSpec>,
    pub(crate) dropouts: Vec<f64>,
    pub(crate) outputs: Vec<OutputSpec>,
}

impl ModelPlan {
    pub fn inputs(&self) -> &[InputSpec] {
        &self.inputs
    }

    pub fn nodes(&self) -> &[PlanNode] {
        &self.nodes
    }

    pub fn outputs(&self) -> &[OutputSpec] {
        &self.outputs
    }

    pub fn node(&self, id: ValueId) -> Option<&PlanNode> {
        self.nodes.get(id.0 as usize)
    }

    pub fn output_shapes(&self) -> Vec<Shape> {
        self.outputs.iter().map(|o| o.shape.clone()).collect()
    }

    /// Trainable parameter count implied by the layer specs.
    pub fn num_params(&self) -> usize {
        let dense: usize = self
            .dense
            .iter()
            .map(|d| d.d_in * d.d_out + if d.bias { d.d_out } else { 0 })
            .sum();
        let norms: usize = self.norms.iter().map(|d| 2 * d).sum();
        let lookups: usize = self.lookups.iter().map(|l| l.vocab * l.dim).sum();
        dense + norms + lookups
    }

    /// One line per value, then the parameter count and outputs.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for (i, node) in self.nodes.iter().enumerate() {
            let line = format!(
                "{:<5} {:<28} {:<12} {}",
                ValueId(i as u32).to_string(),
                self.describe(&node.op),
                node.shape.to_string(),
                node.block.as_deref().unwrap_or("")
            );
            let _ = writeln!(out, "{}", line.trim_end());
        }
        let _ = writeln!(out, "params: {}", self.num_params());
        for output in &self.outputs {
            let head = output
                .head
                .map_or_else(|| "raw".to_string(), |h| h.to_string());
            let _ = writeln!(out, "output {} {} {}", output.value, output.shape, head);
        }
        out
    }

    fn describe(&self, op: &Op) -> String {
        match op {
            Op::Input { index } => format!("input \"{}\"", self.inputs[*index].name),
            Op::Dense { slot, input } => {
                format!("dense {} -> {}", input, self.dense[*slot].d_out)
            }
            Op::Norm { input, .. } => format!("layer_norm {}", input),
            Op::Lookup {
                slot,
                input,
                reduction,
            } => {
                let spec = self.lookups[*slot];
                let reduce = match reduction {
                    Reduction::Flatten => "flatten",
                    Reduction::Mean => "mean",
                };
                format!("lookup {} {}x{} {}", input, spec.vocab, spec.dim, reduce)
            }
            Op::Activation { kind, input } => format!("{} {}", kind, input),
            Op::Dropout { slot, input } => format!("dropout {} {}", input, self.dropouts[*slot]),
            Op::Concat { inputs } => {
                let ids: Vec<String> = inputs.iter().map(|v| v.to_string()).collect();
                format!("concat {}", ids.join(" "))
            }
            Op::Add { lhs, rhs } => format!("add {} {}", lhs, rhs),
            Op::Cast { input } => format!("cast {}", input),
            Op::Slice { input, start, end } => format!("slice {} [{}..{}]", input, start, end),
        }
    }
}

/// Records ops while blocks build.
#[derive(Debug, Default)]
pub struct PlanBuilder {
    plan: ModelPlan,
    heads: BTreeMap<ValueId, HeadKind>,
    scope: Option<String>,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Label subsequent ops with the building block's name.
    pub fn set_scope(&mut self, block: Option<&str>) {
        self.scope = block.map(str::to_string);
    }

    pub fn num_values(&self) -> usize {
        self.plan.nodes.len()
    }

    fn push(&mut self, op: Op, shape: Shape, dtype: ElementType) -> Symbol {
        let id = ValueId(self.plan.nodes.len() as u32);
        self.plan.nodes.push(PlanNode {
            op,
            shape: shape.clone(),
            dtype,
            block: self.scope.clone(),
        });
        Symbol { id, shape, dtype }
    }

    fn expect_float(op: &'static str, x: &Symbol) -> Result<(), PlanError> {
        if x.dtype != ElementType::Float32 {
            return Err(PlanError::Dtype {
                op,
                expected: ElementType::Float32,
                found: x.dtype,
            });
        }
        Ok(())
    }

    /// Materialize an input placeholder.
    pub fn input(&mut self, spec: &InputSpec) -> Symbol {
        let index = self.plan.inputs.len();
        self.plan.inputs.push(spec.clone());
        self.push(Op::Input { index }, spec.shape.clone(), spec.dtype)
    }

    /// Fully connected layer over the flattened features of `x`.
    pub fn dense(&mut self, x: &Symbol, units: usize, bias: bool) -> Result<Symbol, PlanError> {
        Self::expect_float("dense", x)?;
        if units == 0 || x.width() == 0 {
            return Err(PlanError::ZeroSize { op: "dense" });
        }
        let slot = self.plan.dense.len();
        self.plan.dense.push(DenseSpec {
            d_in: x.width(),
            d_out: units,
            bias,
        });
        Ok(self.push(
            Op::Dense { slot, input: x.id },
            Shape::vector(units),
            ElementType::Float32,
        ))
    }

    pub fn layer_norm(&mut self, x: &Symbol) -> Result<Symbol, PlanError> {
        Self::expect_float("layer_norm", x)?;
        let slot = self.plan.norms.len();
        self.plan.norms.push(x.width());
        Ok(self.push(
            Op::Norm { slot, input: x.id },
            Shape::vector(x.width()),
            ElementType::Float32,
        ))
    }

    /// Embedding lookup of integer ids in `[0, vocab)`.
    pub fn lookup(
        &mut self,
        x: &Symbol,
        vocab: usize,
        dim: usize,
        reduction: Reduction,
    ) -> Result<Symbol, PlanError> {
        if x.dtype != ElementType::Int64 {
            return Err(PlanError::Dtype {
                op: "lookup",
                expected: ElementType::Int64,
                found: x.dtype,
            });
        }
        if vocab == 0 || dim == 0 {
            return Err(PlanError::ZeroSize { op: "lookup" });
        }
        let slot = self.plan.lookups.len();
        self.plan.lookups.push(LookupSpec { vocab, dim });
        let width = match reduction {
            Reduction::Flatten => x.width() * dim,
            Reduction::Mean => dim,
        };
        Ok(self.push(
            Op::Lookup {
                slot,
                input: x.id,
                reduction,
            },
            Shape::vector(width),
            ElementType::Float32,
        ))
    }

    pub fn activation(&mut self, x: &Symbol, kind: Activation) -> Result<Symbol, PlanError> {
        Self::expect_float("activation", x)?;
        Ok(self.push(
            Op::Activation { kind, input: x.id },
            Shape::vector(x.width()),
            ElementType::Float32,
        ))
    }

    /// Dropout at `rate`; a zero rate records nothing and returns `x`.
    pub fn dropout(&mut self, x: &Symbol, rate: f64) -> Result<Symbol, PlanError> {
        Self::expect_float("dropout", x)?;
        if !(0.0..1.0).contains(&rate) {
            return Err(PlanError::Rate(rate));
        }
        if rate == 0.0 {
            return Ok(x.clone());
        }
        let slot = self.plan.dropouts.len();
        self.plan.dropouts.push(rate);
        Ok(self.push(
            Op::Dropout { slot, input: x.id },
            Shape::vector(x.width()),
            ElementType::Float32,
        ))
    }

    /// Concatenate along the feature axis; a single input is returned as is.
    pub fn concat(&mut self, xs: &[Symbol]) -> Result<Symbol, PlanError> {
        match xs {
            [] => Err(PlanError::Empty { op: "concat" }),
            [only] => Ok(only.clone()),
            _ => {
                for x in xs {
                    Self::expect_float("concat", x)?;
                }
                let width = xs.iter().map(Symbol::width).sum();
                Ok(self.push(
                    Op::Concat {
                        inputs: xs.iter().map(|x| x.id).collect(),
                    },
                    Shape::vector(width),
                    ElementType::Float32,
                ))
            }
        }
    }

    pub fn add(&mut self, lhs: &Symbol, rhs: &Symbol) -> Result<Symbol, PlanError> {
        Self::expect_float("add", lhs)?;
        Self::expect_float("add", rhs)?;
        if lhs.width() != rhs.width() {
            return Err(PlanError::Width {
                op: "add",
                lhs: lhs.width(),
                rhs: rhs.width(),
            });
        }
        Ok(self.push(
            Op::Add {
                lhs: lhs.id,
                rhs: rhs.id,
            },
            Shape::vector(lhs.width()),
            ElementType::Float32,
        ))
    }

    /// Integer features as floats; float inputs pass through.
    pub fn cast_float(&mut self, x: &Symbol) -> Symbol {
        if x.dtype == ElementType::Float32 {
            return x.clone();
        }
        self.push(
            Op::Cast { input: x.id },
            Shape::vector(x.width()),
            ElementType::Float32,
        )
    }

    pub fn slice(&mut self, x: &Symbol, start: usize, end: usize) -> Result<Symbol, PlanError> {
        Self::expect_float("slice", x)?;
        if start >= end || end > x.width() {
            return Err(PlanError::Slice {
                start,
                end,
                width: x.width(),
            });
        }
        Ok(self.push(
            Op::Slice {
                input: x.id,
                start,
                end,
            },
            Shape::vector(end - start),
            ElementType::Float32,
        ))
    }

    /// Tag `x` as the output of a prediction head.
    pub fn mark_head(&mut self, x: &Symbol, head: HeadKind) {
        self.heads.insert(x.id, head);
    }

    /// Close the plan with the designated outputs.
    pub fn finish(self, outputs: &[Symbol]) -> Result<ModelPlan, PlanError> {
        if outputs.is_empty() {
            return Err(PlanError::NoOutputs);
        }
        let mut plan = self.plan;
        plan.outputs = outputs
            .iter()
            .map(|s| OutputSpec {
                value: s.id,
                shape: s.shape.clone(),
                head: self.heads.get(&s.id).copied(),
            })
            .collect();
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_inputs(b: &mut PlanBuilder) -> (Symbol, Symbol) {
        let a = b.input(&InputSpec::float("a", &[1]));
        let c = b.input(&InputSpec::float("b", &[1]));
        (a, c)
    }

    #[test]
    fn shapes_flow_through_ops() {
        let mut b = PlanBuilder::new();
        let (a, c) = two_inputs(&mut b);
        let x = b.concat(&[a, c]).unwrap();
        assert_eq!(x.shape, Shape::vector(2));
        let h = b.dense(&x, 8, true).unwrap();
        assert_eq!(h.shape.to_string(), "(*, 8)");
        let y = b.dense(&h, 1, true).unwrap();
        b.mark_head(&y, HeadKind::Binary);
        let plan = b.finish(&[y]).unwrap();
        assert_eq!(plan.output_shapes(), vec![Shape::vector(1)]);
        assert_eq!(plan.outputs()[0].loss(), LossKind::BinaryCrossEntropy);
        // 2*8+8 + 8*1+1
        assert_eq!(plan.num_params(), 33);
    }

    #[test]
    fn lookup_requires_ints() {
        let mut b = PlanBuilder::new();
        let f = b.input(&InputSpec::float("f", &[1]));
        let err = b.lookup(&f, 10, 4, Reduction::Flatten).unwrap_err();
        assert!(matches!(err, PlanError::Dtype { op: "lookup", .. }));

        let ids = b.input(&InputSpec::int("ids", &[3]));
        let flat = b.lookup(&ids, 10, 4, Reduction::Flatten).unwrap();
        assert_eq!(flat.width(), 12);
        let mean = b.lookup(&ids, 10, 4, Reduction::Mean).unwrap();
        assert_eq!(mean.width(), 4);
    }

    #[test]
    fn zero_dropout_is_identity() {
        let mut b = PlanBuilder::new();
        let a = b.input(&InputSpec::float("a", &[4]));
        let same = b.dropout(&a, 0.0).unwrap();
        assert_eq!(same, a);
        assert_eq!(b.num_values(), 1);
        assert_eq!(b.dropout(&a, 1.0).unwrap_err(), PlanError::Rate(1.0));
    }

    #[test]
    fn add_checks_width() {
        let mut b = PlanBuilder::new();
        let a = b.input(&InputSpec::float("a", &[4]));
        let c = b.input(&InputSpec::float("c", &[3]));
        assert_eq!(
            b.add(&a, &c).unwrap_err(),
            PlanError::Width {
                op: "add",
                lhs: 4,
                rhs: 3
            }
        );
    }

    #[test]
    fn slice_bounds() {
        let mut b = PlanBuilder::new();
        let a = b.input(&InputSpec::float("a", &[4]));
        assert_eq!(b.slice(&a, 1, 3).unwrap().width(), 2);
        assert!(b.slice(&a, 3, 5).is_err());
        assert!(b.slice(&a, 2, 2).is_err());
    }

    #[test]
    fn finish_requires_outputs() {
        let b = PlanBuilder::new();
        assert_eq!(b.finish(&[]).unwrap_err(), PlanError::NoOutputs);
    }

    #[test]
    fn summary_snapshot() {
        let mut b = PlanBuilder::new();
        let (a, c) = two_inputs(&mut b);
        b.set_scope(Some("mix"));
        let x = b.concat(&[a, c]).unwrap();
        let h = b.dense(&x, 8, true).unwrap();
        b.set_scope(Some("head"));
        let y = b.dense(&h, 1, true).unwrap();
        b.mark_head(&y, HeadKind::Binary);
        let plan = b.finish(&[y]).unwrap();
        insta::assert_snapshot!(plan.summary(), @r###"
        %0    input "a"                    (*, 1)
        %1    input "b"                    (*, 1)
        %2    concat %0 %1                 (*, 2)       mix
        %3    dense %2 -> 8                (*, 8)       mix
        %4    dense %3 -> 1                (*, 1)       head
        params: 33
        output %4 (*, 1) binary
        "###);
    }
}
