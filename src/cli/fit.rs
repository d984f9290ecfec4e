use std::path::{Path, PathBuf};

use burn::backend::wgpu::{Wgpu, WgpuDevice};
use burn::backend::{Autodiff, NdArray};
use burn::tensor::backend::AutodiffBackend;
use clap::Args;
use hyperdag::data::Dataset;
use hyperdag::model::checkpoint::save_model;
use hyperdag::model::{fit, CompileSpec, FitConfig, ModelPlan};

use super::{assemble_or_exit, fail, format_metrics, load_model, PinArgs};

#[derive(Args)]
pub struct FitArgs {
    /// Model file
    pub input: PathBuf,
    /// CSV file with input and target columns
    #[arg(long, value_name = "PATH")]
    pub data: PathBuf,
    #[command(flatten)]
    pub pins: PinArgs,
    /// Override [search] epochs
    #[arg(long)]
    pub epochs: Option<usize>,
    /// Override [search] batch_size
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Save trained weights (written as <PATH>.mpk)
    #[arg(long, value_name = "PATH")]
    pub save: Option<PathBuf>,
    /// Train on the GPU through wgpu
    #[arg(long)]
    pub gpu: bool,
}

pub fn cmd_fit(args: FitArgs) {
    let loaded = load_model(&args.input);
    let graph = loaded.graph();
    let mut hp = args.pins.hyperparameters(&loaded.file);
    let assembly = assemble_or_exit(&graph, &mut hp);
    let data = loaded
        .file
        .load_data(&args.data, &assembly.plan)
        .unwrap_or_else(|e| fail(e));

    let search = &loaded.file.search;
    let mut config = search.fit_config();
    if let Some(epochs) = args.epochs {
        config.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }

    let job = Job {
        plan: assembly.plan,
        compile: &loaded.file.compile,
        data: &data,
        validation_split: search.validation_split,
        config: &config,
        save: args.save.as_deref(),
    };
    if args.gpu {
        job.run::<Autodiff<Wgpu>>(&WgpuDevice::default());
    } else {
        job.run::<Autodiff<NdArray>>(&Default::default());
    }
}

struct Job<'a> {
    plan: ModelPlan,
    compile: &'a CompileSpec,
    data: &'a Dataset,
    validation_split: f64,
    config: &'a FitConfig,
    save: Option<&'a Path>,
}

impl Job<'_> {
    fn run<B: AutodiffBackend>(self, device: &B::Device) {
        let (train, validation) = self.data.split(self.validation_split);
        eprintln!(
            "Training {} params on {} rows ({} held out), {} epochs",
            self.plan.num_params(),
            train.len(),
            validation.len(),
            self.config.epochs
        );

        let model = self.plan.init::<B>(device);
        let start = std::time::Instant::now();
        let (model, history) = fit(
            model,
            self.compile,
            &train,
            Some(&validation),
            self.config,
            device,
        )
        .unwrap_or_else(|e| fail(e));

        for (epoch, metrics) in history.epochs().iter().enumerate() {
            eprintln!("epoch {:>3}  {}", epoch + 1, format_metrics(metrics));
        }
        eprintln!("Done in {:.1}s", start.elapsed().as_secs_f64());

        if let Some(path) = self.save {
            match save_model(&model.valid(), path) {
                Ok(written) => eprintln!("Saved weights to {}", written.display()),
                Err(e) => fail(e),
            }
        }
    }
}
