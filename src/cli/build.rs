use std::path::PathBuf;

use clap::Args;
use hyperdag::graph::Topology;

use super::{assemble_or_exit, fail, load_model, PinArgs};

#[derive(Args)]
pub struct BuildArgs {
    /// Model file
    pub input: PathBuf,
    #[command(flatten)]
    pub pins: PinArgs,
    /// Write the graph in Graphviz DOT format
    #[arg(long, value_name = "PATH")]
    pub dot: Option<PathBuf>,
}

pub fn cmd_build(args: BuildArgs) {
    let loaded = load_model(&args.input);
    let graph = loaded.graph();
    let mut hp = args.pins.hyperparameters(&loaded.file);
    let assembly = assemble_or_exit(&graph, &mut hp);

    if let Some(path) = &args.dot {
        let topology = Topology::new(&graph);
        if let Err(e) = std::fs::write(path, topology.to_dot()) {
            fail(format!("cannot write '{}': {}", path.display(), e));
        }
        eprintln!("Wrote {}", path.display());
    }

    println!("{}", loaded.file.name);
    print!("{}", assembly.plan.summary());
    let values = hp.assignment();
    if !values.is_empty() {
        println!();
        for (name, value) in &values {
            let marker = if hp.is_fixed(name) { " (pinned)" } else { "" };
            println!("  {} = {}{}", name, value, marker);
        }
    }
}
