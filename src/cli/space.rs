use std::path::PathBuf;

use clap::Args;

use super::{assemble_or_exit, load_model, PinArgs};

#[derive(Args)]
pub struct SpaceArgs {
    /// Model file
    pub input: PathBuf,
    #[command(flatten)]
    pub pins: PinArgs,
}

/// The space is what one build at default values declares; names that
/// only appear under other values (deeper layers) show up once `tune`
/// has sampled them.
pub fn cmd_space(args: SpaceArgs) {
    let loaded = load_model(&args.input);
    let graph = loaded.graph();
    let mut hp = args.pins.hyperparameters(&loaded.file);
    assemble_or_exit(&graph, &mut hp);

    let width = hp.space().keys().map(|k| k.len()).max().unwrap_or(0);
    for (name, domain) in hp.space() {
        let value = hp.get(name).map(|v| v.to_string()).unwrap_or_default();
        let marker = if hp.is_fixed(name) { "pinned" } else { "default" };
        println!(
            "{:<width$}  {:<32} {} {}",
            name,
            domain.to_string(),
            marker,
            value,
            width = width
        );
    }
}
