pub mod build;
pub mod evaluate;
pub mod fit;
pub mod init;
pub mod space;
pub mod tune;

use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::process;

use clap::Args;
use hyperdag::config::ModelFile;
use hyperdag::diagnostic::render_diagnostics;
use hyperdag::graph::{assemble, Assembly, Graph};
use hyperdag::hp::{HpValue, HyperParameters};
use hyperdag::tuner::BestRecord;

/// Print `error: ...` and exit with status 1.
pub fn fail(message: impl Display) -> ! {
    eprintln!("error: {}", message);
    process::exit(1);
}

/// A parsed model file together with its source, kept for diagnostics.
pub struct Loaded {
    pub path: PathBuf,
    pub source: String,
    pub file: ModelFile,
}

impl Loaded {
    fn filename(&self) -> String {
        self.path.display().to_string()
    }

    pub fn graph(&self) -> Graph {
        match self.file.to_graph() {
            Ok(graph) => graph,
            Err(diagnostics) => {
                render_diagnostics(&diagnostics, &self.filename(), &self.source);
                process::exit(1);
            }
        }
    }
}

pub fn load_model(path: &Path) -> Loaded {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => fail(format!("cannot read '{}': {}", path.display(), e)),
    };
    match ModelFile::parse(&source) {
        Ok(file) => Loaded {
            path: path.to_path_buf(),
            source,
            file,
        },
        Err(diagnostics) => {
            render_diagnostics(&diagnostics, &path.display().to_string(), &source);
            process::exit(1);
        }
    }
}

/// Pins shared by every command that builds a model.
#[derive(Args, Clone, Debug, Default)]
pub struct PinArgs {
    /// Replay a best-trial record written by `tune`
    #[arg(long, value_name = "PATH")]
    pub hp: Option<PathBuf>,
    /// Pin a hyperparameter, e.g. --set tower/units_0=32
    #[arg(long = "set", value_name = "NAME=VALUE")]
    pub set: Vec<String>,
}

impl PinArgs {
    /// `[hp]` pins of the model file, then the record, then `--set`.
    pub fn hyperparameters(&self, file: &ModelFile) -> HyperParameters {
        let mut hp = file.hyperparameters();
        if let Some(path) = &self.hp {
            match BestRecord::load(path) {
                Ok(record) => record.apply(&mut hp),
                Err(e) => fail(e),
            }
        }
        for pin in &self.set {
            let Some((name, value)) = pin.split_once('=') else {
                fail(format!("--set expects NAME=VALUE, got '{}'", pin));
            };
            hp.fix(name.trim(), HpValue::parse_literal(value));
        }
        hp
    }
}

/// Assemble `graph`, exiting on failure and warning about unused pins.
pub fn assemble_or_exit(graph: &Graph, hp: &mut HyperParameters) -> Assembly {
    let assembly = match assemble(graph, hp) {
        Ok(a) => a,
        Err(e) => fail(e),
    };
    for name in hp.unused_fixed() {
        eprintln!("warning: '{}' is pinned but no block declares it", name);
    }
    assembly
}

/// `loss=0.6931 val_loss=0.7012`, keys in sorted order.
pub fn format_metrics(metrics: &BTreeMap<String, f64>) -> String {
    metrics
        .iter()
        .map(|(k, v)| format!("{}={:.4}", k, v))
        .collect::<Vec<_>>()
        .join(" ")
}
