//! The best trial, persisted as JSON so a later build can replay it.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Direction;
use crate::hp::{HpValue, HyperParameters};

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: invalid record: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BestRecord {
    pub objective: String,
    pub direction: Direction,
    pub score: f64,
    pub trial: usize,
    pub values: BTreeMap<String, HpValue>,
}

impl BestRecord {
    pub fn save(&self, path: &Path) -> Result<(), RecordError> {
        let io = |source| RecordError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(io)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| RecordError::Json {
            path: path.display().to_string(),
            source,
        })?;
        std::fs::write(path, json + "\n").map_err(io)
    }

    pub fn load(path: &Path) -> Result<Self, RecordError> {
        let text = std::fs::read_to_string(path).map_err(|source| RecordError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| RecordError::Json {
            path: path.display().to_string(),
            source,
        })
    }

    /// Pin every recorded value so the next build reproduces the trial.
    pub fn apply(&self, hp: &mut HyperParameters) {
        for (name, value) in &self.values {
            hp.fix(name.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> BestRecord {
        BestRecord {
            objective: "val_loss".into(),
            direction: Direction::Minimize,
            score: 0.125,
            trial: 3,
            values: BTreeMap::from([
                ("dense/dropout".to_string(), HpValue::Float(0.0)),
                ("dense/units_0".to_string(), HpValue::Int(64)),
                ("dense/activation".to_string(), HpValue::Str("relu".into())),
                ("dense/use_norm".to_string(), HpValue::Bool(true)),
            ]),
        }
    }

    #[test]
    fn json_layout() {
        insta::assert_snapshot!(serde_json::to_string_pretty(&record()).unwrap(), @r#"
        {
          "objective": "val_loss",
          "direction": "minimize",
          "score": 0.125,
          "trial": 3,
          "values": {
            "dense/activation": "relu",
            "dense/dropout": 0.0,
            "dense/units_0": 64,
            "dense/use_norm": true
          }
        }
        "#);
    }

    #[test]
    fn save_load_apply() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("best.json");
        record().save(&path).unwrap();
        let loaded = BestRecord::load(&path).unwrap();
        assert_eq!(loaded, record());

        let mut hp = HyperParameters::new();
        loaded.apply(&mut hp);
        assert_eq!(hp.choice_int("dense/units_0", &[16, 32, 64]).unwrap(), 64);
        assert!(hp.boolean("dense/use_norm").unwrap());
        assert!(hp.is_fixed("dense/activation"));
    }

    #[test]
    fn malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("best.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            BestRecord::load(&path),
            Err(RecordError::Json { .. })
        ));
        assert!(matches!(
            BestRecord::load(&dir.path().join("absent.json")),
            Err(RecordError::Io { .. })
        ));
    }
}
