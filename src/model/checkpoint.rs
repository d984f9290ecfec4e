//! Saving and loading trained parameters.
//!
//! Uses burn's NamedMpk record format at full precision. Only parameters
//! are stored; the plan is rebuilt from the model file and the same
//! hyperparameter values before loading.

use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use thiserror::Error;

use super::plan::ModelPlan;
use super::runtime::GraphModel;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("cannot create {path}: {source}")]
    Dir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no checkpoint at {0}")]
    Missing(String),
    #[error("save {path}: {message}")]
    Save { path: String, message: String },
    #[error("load {path}: {message}")]
    Load { path: String, message: String },
}

/// Path burn writes for `path`: the recorder appends `.mpk`.
pub fn record_path(path: &Path) -> PathBuf {
    path.with_extension("mpk")
}

/// Save the parameters of `model`. Returns the file actually written.
pub fn save_model<B: Backend>(
    model: &GraphModel<B>,
    path: &Path,
) -> Result<PathBuf, CheckpointError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| CheckpointError::Dir {
            path: dir.display().to_string(),
            source,
        })?;
    }
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model
        .params
        .clone()
        .save_file(path.to_path_buf(), &recorder)
        .map_err(|e| CheckpointError::Save {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    Ok(record_path(path))
}

/// Instantiate `plan` and load saved parameters into it.
///
/// The plan must have the same layers as the one that was saved.
pub fn load_model<B: Backend>(
    plan: &ModelPlan,
    path: &Path,
    device: &B::Device,
) -> Result<GraphModel<B>, CheckpointError> {
    let full_path = record_path(path);
    if !full_path.exists() {
        return Err(CheckpointError::Missing(full_path.display().to_string()));
    }
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let (plan, params) = plan.init::<B>(device).into_parts();
    let params = params
        .load_file(path.to_path_buf(), &recorder, device)
        .map_err(|e| CheckpointError::Load {
            path: full_path.display().to_string(),
            message: e.to_string(),
        })?;
    Ok(GraphModel::from_parts(plan, params))
}
