use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod cli;

#[derive(Parser)]
#[command(
    name = "hyperdag",
    version,
    about = "Build, train and tune named-node model graphs"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a starter model file and a sample CSV
    Init(cli::init::InitArgs),
    /// Assemble a model file and print the plan
    Build(cli::build::BuildArgs),
    /// Print the hyperparameter space a model file declares
    Space(cli::space::SpaceArgs),
    /// Train one configuration on a CSV file
    Fit(cli::fit::FitArgs),
    /// Report metrics of saved weights on a CSV file
    Evaluate(cli::evaluate::EvaluateArgs),
    /// Random search over the declared hyperparameters
    Tune(cli::tune::TuneArgs),
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Init(args) => cli::init::cmd_init(args),
        Command::Build(args) => cli::build::cmd_build(args),
        Command::Space(args) => cli::space::cmd_space(args),
        Command::Fit(args) => cli::fit::cmd_fit(args),
        Command::Evaluate(args) => cli::evaluate::cmd_evaluate(args),
        Command::Tune(args) => cli::tune::cmd_tune(args),
    }
}
