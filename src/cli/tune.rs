use std::path::PathBuf;

use burn::backend::wgpu::{Wgpu, WgpuDevice};
use burn::backend::{Autodiff, NdArray};
use burn::tensor::backend::AutodiffBackend;
use clap::Args;
use hyperdag::data::Dataset;
use hyperdag::tuner::{Objective, SearchResult, Tuner};

use super::{assemble_or_exit, fail, format_metrics, load_model, PinArgs};

#[derive(Args)]
pub struct TuneArgs {
    /// Model file
    pub input: PathBuf,
    /// CSV file with input and target columns
    #[arg(long, value_name = "PATH")]
    pub data: PathBuf,
    /// Pinned values are never sampled
    #[command(flatten)]
    pub pins: PinArgs,
    /// Override [search] max_trials
    #[arg(long)]
    pub trials: Option<usize>,
    /// Override [search] seed
    #[arg(long)]
    pub seed: Option<u64>,
    /// Override [search] epochs
    #[arg(long)]
    pub epochs: Option<usize>,
    /// Override [search] objective, e.g. val_accuracy
    #[arg(long)]
    pub objective: Option<String>,
    /// Where to write the best-trial record
    #[arg(long, value_name = "PATH", default_value = "best.json")]
    pub out: PathBuf,
    /// Train on the GPU through wgpu
    #[arg(long)]
    pub gpu: bool,
}

pub fn cmd_tune(args: TuneArgs) {
    let loaded = load_model(&args.input);
    let graph = loaded.graph();
    let pinned = args.pins.hyperparameters(&loaded.file);

    // Target widths only depend on the heads, so one default build is
    // enough to bind the CSV columns.
    let mut first_build = pinned.clone();
    let assembly = assemble_or_exit(&graph, &mut first_build);
    let data = loaded
        .file
        .load_data(&args.data, &assembly.plan)
        .unwrap_or_else(|e| fail(e));

    let mut config = loaded.file.search.tuner_config();
    if let Some(trials) = args.trials {
        config.max_trials = trials;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(epochs) = args.epochs {
        config.fit.epochs = epochs;
    }
    if let Some(objective) = &args.objective {
        config.objective = Objective::new(objective.clone());
    }

    eprintln!(
        "Searching {} trial(s) on {} rows, objective {} ({})",
        config.max_trials,
        data.len(),
        config.objective.name,
        config.objective.direction
    );
    let tuner = Tuner::new(&graph, loaded.file.compile.clone(), config).with_pinned(pinned);
    let result = if args.gpu {
        search::<Autodiff<Wgpu>>(&tuner, &data, &WgpuDevice::default())
    } else {
        search::<Autodiff<NdArray>>(&tuner, &data, &Default::default())
    };

    for trial in &result.trials {
        println!("{}", trial);
    }
    let Some(record) = result.best_record() else {
        fail("no trial completed");
    };
    println!();
    println!(
        "best: trial {} {}={:.4}",
        record.trial, record.objective, record.score
    );
    if let Some(best) = result.best_trial() {
        println!("  {}", format_metrics(&best.metrics));
    }
    if let Err(e) = record.save(&args.out) {
        fail(e);
    }
    eprintln!("Wrote {}", args.out.display());
}

fn search<B: AutodiffBackend>(
    tuner: &Tuner<'_>,
    data: &Dataset,
    device: &B::Device,
) -> SearchResult {
    tuner.search::<B>(data, device).unwrap_or_else(|e| fail(e))
}
