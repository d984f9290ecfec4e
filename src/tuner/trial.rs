use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hp::HpValue;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialStatus {
    Completed,
    /// Training failed; the message is kept for the report.
    Failed(String),
}

/// One evaluated assignment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: usize,
    pub values: BTreeMap<String, HpValue>,
    pub score: Option<f64>,
    pub status: TrialStatus,
    /// Metrics of the last epoch.
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

impl Trial {
    pub fn is_completed(&self) -> bool {
        self.status == TrialStatus::Completed
    }
}

impl fmt::Display for Trial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trial {:>3}  ", self.id)?;
        match (&self.status, self.score) {
            (TrialStatus::Completed, Some(score)) => write!(f, "{:>10.4}", score)?,
            (TrialStatus::Completed, None) => write!(f, "{:>10}", "-")?,
            (TrialStatus::Failed(_), _) => write!(f, "{:>10}", "failed")?,
        }
        let values: Vec<String> = self
            .values
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        if !values.is_empty() {
            write!(f, "  {}", values.join(" "))?;
        }
        if let TrialStatus::Failed(message) = &self.status {
            write!(f, "  ({})", message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let trial = Trial {
            id: 2,
            values: BTreeMap::from([
                ("d/units_0".to_string(), HpValue::Int(32)),
                ("d/use_norm".to_string(), HpValue::Bool(false)),
            ]),
            score: Some(0.25),
            status: TrialStatus::Completed,
            metrics: BTreeMap::new(),
        };
        assert_eq!(
            trial.to_string(),
            "trial   2      0.2500  d/units_0=32 d/use_norm=false"
        );
        let failed = Trial {
            status: TrialStatus::Failed("loss is not finite".into()),
            score: None,
            values: BTreeMap::new(),
            ..trial
        };
        assert!(!failed.is_completed());
        assert_eq!(
            failed.to_string(),
            "trial   2      failed  (loss is not finite)"
        );
    }
}
