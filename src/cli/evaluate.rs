use std::path::PathBuf;

use burn::backend::wgpu::{Wgpu, WgpuDevice};
use burn::backend::NdArray;
use burn::prelude::Backend;
use clap::Args;
use hyperdag::data::Dataset;
use hyperdag::model::checkpoint::load_model as load_weights;
use hyperdag::model::{evaluate, CompileSpec, ModelPlan};

use super::{assemble_or_exit, fail, format_metrics, load_model, PinArgs};

#[derive(Args)]
pub struct EvaluateArgs {
    /// Model file
    pub input: PathBuf,
    /// CSV file with input and target columns
    #[arg(long, value_name = "PATH")]
    pub data: PathBuf,
    /// Weights saved by `fit --save`
    #[arg(long, value_name = "PATH")]
    pub weights: PathBuf,
    /// Pins must match the ones the weights were trained with
    #[command(flatten)]
    pub pins: PinArgs,
    /// Evaluate on the GPU through wgpu
    #[arg(long)]
    pub gpu: bool,
}

pub fn cmd_evaluate(args: EvaluateArgs) {
    let loaded = load_model(&args.input);
    let graph = loaded.graph();
    let mut hp = args.pins.hyperparameters(&loaded.file);
    let assembly = assemble_or_exit(&graph, &mut hp);
    let data = loaded
        .file
        .load_data(&args.data, &assembly.plan)
        .unwrap_or_else(|e| fail(e));
    let batch_size = loaded.file.search.batch_size;

    if args.gpu {
        let device = WgpuDevice::default();
        run::<Wgpu>(&args, &assembly.plan, &loaded.file.compile, &data, batch_size, &device);
    } else {
        let device = Default::default();
        run::<NdArray>(&args, &assembly.plan, &loaded.file.compile, &data, batch_size, &device);
    }
}

fn run<B: Backend>(
    args: &EvaluateArgs,
    plan: &ModelPlan,
    compile: &CompileSpec,
    data: &Dataset,
    batch_size: usize,
    device: &B::Device,
) {
    let model = load_weights::<B>(plan, &args.weights, device).unwrap_or_else(|e| fail(e));
    let metrics = evaluate(&model, compile, data, batch_size, device).unwrap_or_else(|e| fail(e));
    eprintln!("Evaluated {} rows", data.len());
    println!("{}", format_metrics(&metrics));
}
