//! Model description files.
//!
//! ```toml
//! [model]
//! name = "churn"
//! outputs = ["head"]
//!
//! [input.features]
//! shape = [8]
//!
//! [block.dense]
//! kind = "dense"
//! inputs = ["features"]
//! units = [32, 64]
//!
//! [block.head]
//! kind = "classification_head"
//! inputs = ["dense"]
//! num_classes = 2
//! ```
//!
//! Keys of a `[block.*]` section other than `kind` and `inputs` are block
//! parameters: a scalar fixes the parameter, an array searches over it.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use super::toml::{parse_document, Entry, Section, Value};
use crate::blocks::{self, BlockParams, ParamValue};
use crate::data::{DataError, Dataset};
use crate::diagnostic::Diagnostic;
use crate::graph::{ElementType, Graph, GraphBuilder, InputSpec, NodeId};
use crate::hp::{HpValue, HyperParameters};
use crate::model::train::target_widths;
use crate::model::{CompileSpec, FitConfig, ModelPlan};
use crate::span::{Span, Spanned};
use crate::tuner::{Objective, TunerConfig};

#[derive(Clone, Debug)]
pub struct InputDecl {
    pub name: Spanned<String>,
    pub spec: InputSpec,
}

#[derive(Clone, Debug)]
pub struct BlockDeclFile {
    pub name: Spanned<String>,
    pub kind: Spanned<String>,
    pub inputs: Vec<Spanned<String>>,
    pub params: BlockParams,
}

/// `[search]` settings, also used by `fit` for epochs and batch size.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchSettings {
    pub objective: String,
    pub max_trials: usize,
    pub seed: u64,
    pub epochs: usize,
    pub batch_size: usize,
    pub validation_split: f64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        let tuner = TunerConfig::default();
        Self {
            objective: tuner.objective.name,
            max_trials: tuner.max_trials,
            seed: tuner.seed,
            epochs: tuner.fit.epochs,
            batch_size: tuner.fit.batch_size,
            validation_split: tuner.validation_split,
        }
    }
}

impl SearchSettings {
    pub fn fit_config(&self) -> FitConfig {
        FitConfig {
            epochs: self.epochs,
            batch_size: self.batch_size,
            seed: self.seed,
            ..FitConfig::default()
        }
    }

    pub fn tuner_config(&self) -> TunerConfig {
        TunerConfig {
            objective: Objective::new(self.objective.clone()),
            max_trials: self.max_trials,
            seed: self.seed,
            fit: self.fit_config(),
            validation_split: self.validation_split,
            ..TunerConfig::default()
        }
    }
}

#[derive(Clone, Debug)]
pub struct ModelFile {
    pub name: String,
    pub inputs: Vec<InputDecl>,
    pub blocks: Vec<BlockDeclFile>,
    pub outputs: Vec<Spanned<String>>,
    /// CSV column names of the targets, one per output.
    pub targets: Vec<String>,
    pub compile: CompileSpec,
    pub search: SearchSettings,
    pub pins: Vec<(Spanned<String>, HpValue)>,
}

impl ModelFile {
    pub fn parse(source: &str) -> Result<ModelFile, Vec<Diagnostic>> {
        let sections = parse_document(source)?;
        let mut reader = Reader::default();
        let mut file = ModelFile {
            name: String::new(),
            inputs: Vec::new(),
            blocks: Vec::new(),
            outputs: Vec::new(),
            targets: Vec::new(),
            compile: CompileSpec::default(),
            search: SearchSettings::default(),
            pins: Vec::new(),
        };
        let mut model_seen = false;
        let mut targets: Option<Spanned<Vec<String>>> = None;

        for section in &sections {
            let title = section.name.node.as_str();
            match title {
                "model" => {
                    model_seen = true;
                    reader.model(section, &mut file);
                }
                "compile" => reader.compile(section, &mut file.compile),
                "search" => reader.search(section, &mut file.search),
                "data" => {
                    reader.known(section, &["targets"]);
                    if let Some(e) = section.get("targets") {
                        targets = reader.strings(e).map(|v| {
                            Spanned::new(v.into_iter().map(|s| s.node).collect(), e.value.span)
                        });
                    }
                }
                "hp" => {
                    for entry in &section.entries {
                        if let Some(value) = reader.scalar(entry) {
                            file.pins.push((entry.key.clone(), value));
                        }
                    }
                }
                _ => {
                    if let Some(name) = title.strip_prefix("input.") {
                        if let Some(input) = reader.input(section, name) {
                            file.inputs.push(input);
                        }
                    } else if let Some(name) = title.strip_prefix("block.") {
                        if let Some(block) = reader.block(section, name) {
                            file.blocks.push(block);
                        }
                    } else {
                        reader.error(
                            Diagnostic::error(
                                format!("unknown section [{}]", title),
                                section.name.span,
                            )
                            .with_help(
                                "expected [model], [compile], [search], [data], [hp], \
                                 [input.<name>] or [block.<name>]"
                                    .to_string(),
                            ),
                        );
                    }
                }
            }
        }

        if !model_seen || file.outputs.is_empty() {
            reader.error(
                Diagnostic::error("model file declares no outputs".to_string(), Span::dummy())
                    .with_help("add `outputs = [\"<block>\"]` under [model]".to_string()),
            );
        }
        if file.inputs.is_empty() {
            reader.error(
                Diagnostic::error("model file declares no inputs".to_string(), Span::dummy())
                    .with_help("add an [input.<name>] section with a shape".to_string()),
            );
        }
        file.targets = match targets {
            Some(t) if t.node.len() != file.outputs.len() => {
                reader.error(Diagnostic::error(
                    format!(
                        "{} target column(s) for {} output(s)",
                        t.node.len(),
                        file.outputs.len()
                    ),
                    t.span,
                ));
                Vec::new()
            }
            Some(t) => t.node,
            None => file.outputs.iter().map(|o| o.node.replace(':', "_")).collect(),
        };

        reader.finish(file)
    }

    pub fn input_specs(&self) -> Vec<InputSpec> {
        self.inputs.iter().map(|i| i.spec.clone()).collect()
    }

    /// Build the graph. Blocks may only reference inputs and blocks declared
    /// above them.
    pub fn to_graph(&self) -> Result<Graph, Vec<Diagnostic>> {
        let mut builder = GraphBuilder::new();
        let mut names: BTreeMap<&str, Vec<NodeId>> = BTreeMap::new();
        let mut diagnostics = Vec::new();

        for input in &self.inputs {
            match builder.input(input.spec.clone()) {
                Ok(id) => {
                    names.insert(&input.name.node, vec![id]);
                }
                Err(e) => diagnostics.push(Diagnostic::error(e.to_string(), input.name.span)),
            }
        }

        for (position, decl) in self.blocks.iter().enumerate() {
            let block = match blocks::from_config(&decl.kind.node, &decl.name.node, &decl.params) {
                Ok(block) => block,
                Err(blocks::ParamError::UnknownKind(kind)) => {
                    diagnostics.push(
                        Diagnostic::error(format!("unknown block kind '{}'", kind), decl.kind.span)
                            .with_help(format!("known kinds: {}", blocks::KINDS.join(", "))),
                    );
                    continue;
                }
                Err(e) => {
                    diagnostics.push(Diagnostic::error(e.to_string(), decl.name.span));
                    continue;
                }
            };
            let mut upstream = Vec::new();
            for reference in &decl.inputs {
                match self.resolve(&names, reference, Some(position)) {
                    Ok(id) => upstream.push(id),
                    Err(d) => diagnostics.extend(d),
                }
            }
            if upstream.len() != decl.inputs.len() {
                continue;
            }
            match builder.add_boxed(block, &upstream) {
                Ok(outputs) => {
                    debug!(block = %decl.name.node, outputs = outputs.len(), "declared");
                    names.insert(&decl.name.node, outputs);
                }
                Err(e) => diagnostics.push(Diagnostic::error(e.to_string(), decl.name.span)),
            }
        }

        let mut outputs = Vec::new();
        for reference in &self.outputs {
            match self.resolve(&names, reference, None) {
                Ok(id) => outputs.push(id),
                Err(d) => diagnostics.extend(d),
            }
        }
        if !diagnostics.is_empty() {
            return Err(diagnostics);
        }
        builder
            .build(&outputs)
            .map_err(|e| vec![Diagnostic::error(e.to_string(), Span::dummy())])
    }

    /// Look up `name` or `name:k`. `Err(None)` means the named block exists
    /// but failed earlier and has already been reported.
    fn resolve(
        &self,
        names: &BTreeMap<&str, Vec<NodeId>>,
        reference: &Spanned<String>,
        position: Option<usize>,
    ) -> Result<NodeId, Option<Diagnostic>> {
        let (base, index) = match reference.node.rsplit_once(':') {
            Some((base, k)) => match k.parse::<usize>() {
                Ok(k) => (base, Some(k)),
                Err(_) => {
                    return Err(Some(Diagnostic::error(
                        format!("invalid output index in '{}'", reference.node),
                        reference.span,
                    )))
                }
            },
            None => (reference.node.as_str(), None),
        };

        if let Some(nodes) = names.get(base) {
            let k = index.unwrap_or(0);
            return nodes.get(k).copied().ok_or_else(|| {
                Some(Diagnostic::error(
                    format!(
                        "'{}' has {} output(s); index {} is out of range",
                        base,
                        nodes.len(),
                        k
                    ),
                    reference.span,
                ))
            });
        }

        let later = self.blocks.iter().position(|b| b.name.node == base);
        match (later, position) {
            (Some(at), Some(here)) if at >= here => {
                let here_name = &self.blocks[here].name.node;
                Err(Some(
                    Diagnostic::error(
                        format!("'{}' is used before it is declared", base),
                        reference.span,
                    )
                    .with_note("blocks are built in declaration order".to_string())
                    .with_help(format!("move [block.{}] above [block.{}]", base, here_name)),
                ))
            }
            (Some(_), _) => Err(None),
            (None, _) => Err(Some(Diagnostic::error(
                format!("unknown node '{}'", base),
                reference.span,
            ))),
        }
    }

    /// Pinned values from the `[hp]` section.
    pub fn hyperparameters(&self) -> HyperParameters {
        let mut hp = HyperParameters::new();
        for (name, value) in &self.pins {
            hp.fix(name.node.clone(), value.clone());
        }
        hp
    }

    /// Target columns paired with the width each output trains against.
    pub fn target_columns(&self, plan: &ModelPlan) -> Vec<(String, usize)> {
        self.targets
            .iter()
            .cloned()
            .zip(target_widths(plan, &self.compile))
            .collect()
    }

    pub fn load_data(&self, path: &Path, plan: &ModelPlan) -> Result<Dataset, DataError> {
        Dataset::load_csv(path, &self.input_specs(), &self.target_columns(plan))
    }
}

// ---------------------------------------------------------------------------
// Section readers
// ---------------------------------------------------------------------------

/// Collects diagnostics while reading sections so every error is reported.
#[derive(Default)]
struct Reader {
    diagnostics: Vec<Diagnostic>,
}

impl Reader {
    fn error(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    fn finish<T>(self, value: T) -> Result<T, Vec<Diagnostic>> {
        if self.diagnostics.is_empty() {
            Ok(value)
        } else {
            Err(self.diagnostics)
        }
    }

    fn known(&mut self, section: &Section, keys: &[&str]) {
        for entry in &section.entries {
            if !keys.contains(&entry.key.node.as_str()) {
                self.error(
                    Diagnostic::error(
                        format!("unknown key '{}' in [{}]", entry.key.node, section.name.node),
                        entry.key.span,
                    )
                    .with_help(format!("expected one of: {}", keys.join(", "))),
                );
            }
        }
    }

    fn mismatch(&mut self, entry: &Entry, expected: &str) {
        self.error(Diagnostic::error(
            format!(
                "'{}' must be {}, found {}",
                entry.key.node,
                expected,
                entry.value.node.type_name()
            ),
            entry.value.span,
        ));
    }

    fn string(&mut self, entry: &Entry) -> Option<String> {
        match &entry.value.node {
            Value::Str(s) => Some(s.clone()),
            _ => {
                self.mismatch(entry, "a string");
                None
            }
        }
    }

    fn uint(&mut self, entry: &Entry) -> Option<usize> {
        match &entry.value.node {
            Value::Int(v) if *v >= 0 => Some(*v as usize),
            _ => {
                self.mismatch(entry, "a non-negative integer");
                None
            }
        }
    }

    fn float(&mut self, entry: &Entry) -> Option<f64> {
        match &entry.value.node {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => {
                self.mismatch(entry, "a number");
                None
            }
        }
    }

    /// A string or an array of strings.
    fn strings(&mut self, entry: &Entry) -> Option<Vec<Spanned<String>>> {
        match &entry.value.node {
            Value::Str(s) => Some(vec![Spanned::new(s.clone(), entry.value.span)]),
            Value::Array(items) => {
                let mut out = Vec::new();
                for item in items {
                    match &item.node {
                        Value::Str(s) => out.push(Spanned::new(s.clone(), item.span)),
                        other => {
                            self.error(Diagnostic::error(
                                format!("expected a string, found {}", other.type_name()),
                                item.span,
                            ));
                            return None;
                        }
                    }
                }
                Some(out)
            }
            _ => {
                self.mismatch(entry, "a string or an array of strings");
                None
            }
        }
    }

    fn scalar(&mut self, entry: &Entry) -> Option<HpValue> {
        match to_hp(&entry.value.node) {
            Some(v) => Some(v),
            None => {
                self.mismatch(entry, "a scalar");
                None
            }
        }
    }

    fn parsed<T: std::str::FromStr<Err = String>>(&mut self, entry: &Entry) -> Option<T> {
        let text = self.string(entry)?;
        match text.parse() {
            Ok(v) => Some(v),
            Err(message) => {
                self.error(Diagnostic::error(message, entry.value.span));
                None
            }
        }
    }

    fn model(&mut self, section: &Section, file: &mut ModelFile) {
        self.known(section, &["name", "outputs"]);
        if let Some(e) = section.get("name") {
            file.name = self.string(e).unwrap_or_default();
        }
        if let Some(e) = section.get("outputs") {
            file.outputs = self.strings(e).unwrap_or_default();
        }
    }

    fn compile(&mut self, section: &Section, spec: &mut CompileSpec) {
        self.known(section, &["optimizer", "loss", "metrics", "learning_rate"]);
        if let Some(e) = section.get("optimizer") {
            if let Some(v) = self.parsed(e) {
                spec.optimizer = v;
            }
        }
        if let Some(e) = section.get("loss") {
            spec.loss = self.parsed(e);
        }
        if let Some(e) = section.get("metrics") {
            for item in self.strings(e).unwrap_or_default() {
                match item.node.parse() {
                    Ok(metric) => spec.metrics.push(metric),
                    Err(message) => self.error(Diagnostic::error(message, item.span)),
                }
            }
        }
        if let Some(e) = section.get("learning_rate") {
            match self.float(e) {
                Some(lr) if lr > 0.0 => spec.learning_rate = lr,
                Some(_) => self.error(Diagnostic::error(
                    "learning_rate must be positive".to_string(),
                    e.value.span,
                )),
                None => {}
            }
        }
    }

    fn search(&mut self, section: &Section, search: &mut SearchSettings) {
        self.known(
            section,
            &[
                "objective",
                "max_trials",
                "seed",
                "epochs",
                "batch_size",
                "validation_split",
            ],
        );
        if let Some(e) = section.get("objective") {
            if let Some(v) = self.string(e) {
                search.objective = v;
            }
        }
        for (key, slot) in [
            ("max_trials", &mut search.max_trials),
            ("epochs", &mut search.epochs),
            ("batch_size", &mut search.batch_size),
        ] {
            if let Some(e) = section.get(key) {
                match self.uint(e) {
                    Some(0) => self.error(Diagnostic::error(
                        format!("{} must be at least 1", key),
                        e.value.span,
                    )),
                    Some(v) => *slot = v,
                    None => {}
                }
            }
        }
        if let Some(e) = section.get("seed") {
            if let Some(v) = self.uint(e) {
                search.seed = v as u64;
            }
        }
        if let Some(e) = section.get("validation_split") {
            match self.float(e) {
                Some(v) if (0.0..1.0).contains(&v) => search.validation_split = v,
                Some(_) => self.error(Diagnostic::error(
                    "validation_split must be in [0, 1)".to_string(),
                    e.value.span,
                )),
                None => {}
            }
        }
    }

    fn input(&mut self, section: &Section, name: &str) -> Option<InputDecl> {
        self.known(section, &["shape", "dtype"]);
        let Some(shape_entry) = section.get("shape") else {
            self.error(Diagnostic::error(
                format!("input '{}' needs a shape", name),
                section.name.span,
            ));
            return None;
        };
        let shape = match &shape_entry.value.node {
            Value::Int(v) if *v > 0 => vec![*v as usize],
            Value::Array(items) if !items.is_empty() => {
                let dims: Vec<usize> = items
                    .iter()
                    .filter_map(|i| match i.node {
                        Value::Int(v) if v > 0 => Some(v as usize),
                        _ => None,
                    })
                    .collect();
                if dims.len() != items.len() {
                    self.mismatch(shape_entry, "an array of positive integers");
                    return None;
                }
                dims
            }
            _ => {
                self.mismatch(shape_entry, "a positive integer or an array of them");
                return None;
            }
        };
        let dtype = match section.get("dtype") {
            Some(e) => self.parsed::<ElementType>(e)?,
            None => ElementType::Float32,
        };
        Some(InputDecl {
            name: Spanned::new(name.to_string(), section.name.span),
            spec: InputSpec::new(name, &shape, dtype),
        })
    }

    fn block(&mut self, section: &Section, name: &str) -> Option<BlockDeclFile> {
        let kind = match section.get("kind") {
            Some(e) => Spanned::new(self.string(e)?, e.value.span),
            None => {
                self.error(
                    Diagnostic::error(format!("block '{}' has no kind", name), section.name.span)
                        .with_help(format!("known kinds: {}", blocks::KINDS.join(", "))),
                );
                return None;
            }
        };
        let inputs = match section.get("inputs") {
            Some(e) => self.strings(e)?,
            None => Vec::new(),
        };
        if inputs.is_empty() {
            self.error(Diagnostic::error(
                format!("block '{}' has no inputs", name),
                section.name.span,
            ));
            return None;
        }

        let mut params = BlockParams::new();
        for entry in &section.entries {
            if matches!(entry.key.node.as_str(), "kind" | "inputs") {
                continue;
            }
            let value = match &entry.value.node {
                Value::Array(items) => {
                    let values: Option<Vec<HpValue>> =
                        items.iter().map(|i| to_hp(&i.node)).collect();
                    match values {
                        Some(v) if !v.is_empty() => ParamValue::List(v),
                        _ => {
                            self.mismatch(entry, "a scalar or a non-empty array of scalars");
                            continue;
                        }
                    }
                }
                other => match to_hp(other) {
                    Some(v) => ParamValue::Scalar(v),
                    None => continue,
                },
            };
            params.insert(entry.key.node.clone(), value);
        }

        Some(BlockDeclFile {
            name: Spanned::new(name.to_string(), section.name.span),
            kind,
            inputs,
            params,
        })
    }
}

fn to_hp(value: &Value) -> Option<HpValue> {
    match value {
        Value::Str(s) => Some(HpValue::Str(s.clone())),
        Value::Int(v) => Some(HpValue::Int(*v)),
        Value::Float(v) => Some(HpValue::Float(*v)),
        Value::Bool(v) => Some(HpValue::Bool(*v)),
        Value::Array(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::assemble;
    use crate::model::{LossKind, MetricKind, OptimizerKind};

    const MODEL: &str = r#"
[model]
name = "two_tower"
outputs = ["head"]

[compile]
optimizer = "adamw"
metrics = ["accuracy"]
learning_rate = 0.01

[search]
objective = "val_accuracy"
max_trials = 4
epochs = 3

[data]
targets = ["label"]

[input.a]
shape = [3]

[input.b]
shape = 2

[block.tower]
kind = "dense"
inputs = ["a", "b"]
num_layers = 1
units = [8, 16]

[block.head]
kind = "classification_head"
inputs = ["tower"]
num_classes = 2

[hp]
"tower/units_0" = 16
"#;

    #[test]
    fn parses_every_section() {
        let file = ModelFile::parse(MODEL).unwrap();
        assert_eq!(file.name, "two_tower");
        assert_eq!(file.inputs.len(), 2);
        assert_eq!(file.inputs[1].spec.shape.0, vec![2]);
        assert_eq!(file.compile.optimizer, OptimizerKind::AdamW);
        assert_eq!(file.compile.metrics, vec![MetricKind::Accuracy]);
        assert_eq!(file.compile.loss, None::<LossKind>);
        assert_eq!(file.search.max_trials, 4);
        assert_eq!(file.search.batch_size, 32);
        assert!(file.search.tuner_config().objective.maximize());
        assert_eq!(file.targets, vec!["label".to_string()]);
        assert_eq!(file.pins.len(), 1);
    }

    #[test]
    fn graph_and_pins() {
        let file = ModelFile::parse(MODEL).unwrap();
        let graph = file.to_graph().unwrap();
        assert_eq!(graph.blocks().len(), 2);
        assert_eq!(graph.find("head"), Some(graph.outputs()[0]));

        let mut hp = file.hyperparameters();
        let assembly = assemble(&graph, &mut hp).unwrap();
        assert_eq!(hp.get("tower/units_0"), Some(&HpValue::Int(16)));
        assert_eq!(assembly.plan.output_shapes()[0].to_string(), "(*, 1)");
        assert_eq!(file.target_columns(&assembly.plan), vec![("label".to_string(), 1)]);
    }

    #[test]
    fn forward_reference_points_at_the_use() {
        let src = MODEL.replace(
            "[block.tower]\nkind = \"dense\"\ninputs = [\"a\", \"b\"]",
            "[block.tower]\nkind = \"dense\"\ninputs = [\"a\", \"head\"]",
        );
        let file = ModelFile::parse(&src).unwrap();
        let errs = file.to_graph().unwrap_err();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].message, "'head' is used before it is declared");
        assert_eq!(&src[errs[0].span.range()], "\"head\"");
        assert_eq!(errs[0].help.as_deref(), Some("move [block.head] above [block.tower]"));
    }

    #[test]
    fn unknown_references_and_kinds() {
        let src = MODEL
            .replace("inputs = [\"tower\"]", "inputs = [\"towr\"]")
            .replace("kind = \"dense\"", "kind = \"densee\"");
        let errs = ModelFile::parse(&src).unwrap().to_graph().unwrap_err();
        let messages: Vec<&str> = errs.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(
            messages,
            vec!["unknown block kind 'densee'", "unknown node 'towr'"]
        );
    }

    #[test]
    fn output_index_out_of_range() {
        let src = MODEL.replace("outputs = [\"head\"]", "outputs = [\"head:1\"]");
        let errs = ModelFile::parse(&src).unwrap().to_graph().unwrap_err();
        assert!(errs[0].message.contains("index 1 is out of range"));
    }

    #[test]
    fn semantic_errors_are_collected() {
        let src = r#"
[model]
name = 3

[search]
epochs = 0
validation_split = 1.5
bogus = true

[compile]
optimizer = "rmsprop"

[input.x]
dtype = "float32"

[block.d]
inputs = ["x"]
"#;
        let errs = ModelFile::parse(src).unwrap_err();
        let messages: Vec<&str> = errs.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "'name' must be a string, found an integer",
                "unknown key 'bogus' in [search]",
                "epochs must be at least 1",
                "validation_split must be in [0, 1)",
                "unknown optimizer 'rmsprop' (expected adam, adamw or sgd)",
                "input 'x' needs a shape",
                "block 'd' has no kind",
                "model file declares no outputs",
                "model file declares no inputs",
            ]
        );
    }

    #[test]
    fn default_targets_follow_outputs() {
        let src = MODEL.replace("[data]\ntargets = [\"label\"]\n", "");
        let file = ModelFile::parse(&src).unwrap();
        assert_eq!(file.targets, vec!["head".to_string()]);
    }
}
