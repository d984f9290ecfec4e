use std::path::PathBuf;

use clap::Args;
use hyperdag::config::scaffold::{data_template, model_template};

use super::fail;

#[derive(Args)]
pub struct InitArgs {
    /// Project name (defaults to the current directory name)
    pub name: Option<String>,
}

pub fn cmd_init(args: InitArgs) {
    let (project_dir, project_name) = if let Some(ref name) = args.name {
        (PathBuf::from(name), name.clone())
    } else {
        let dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("model")
            .to_string();
        (dir, name)
    };

    if args.name.is_some() {
        if let Err(e) = std::fs::create_dir_all(&project_dir) {
            fail(format!(
                "cannot create directory '{}': {}",
                project_dir.display(),
                e
            ));
        }
    }

    let model_path = project_dir.join("model.toml");
    if model_path.exists() {
        fail(format!("'{}' already exists", model_path.display()));
    }
    let data_path = project_dir.join("data.csv");

    if let Err(e) = std::fs::write(&model_path, model_template(&project_name)) {
        fail(format!("cannot write '{}': {}", model_path.display(), e));
    }
    if !data_path.exists() {
        if let Err(e) = std::fs::write(&data_path, data_template(200)) {
            fail(format!("cannot write '{}': {}", data_path.display(), e));
        }
    }

    eprintln!(
        "Created model '{}' in {}",
        project_name,
        project_dir.display()
    );
    eprintln!("  {}", model_path.display());
    eprintln!("  {}", data_path.display());
}
