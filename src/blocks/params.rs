//! Block parameters and tunable settings.

use std::collections::BTreeMap;

use thiserror::Error;

use super::BuildError;
use crate::hp::{Domain, HpError, HpValue, HyperParameters};

/// A block setting: pinned at construction or searched over a domain.
#[derive(Clone, Debug, PartialEq)]
pub enum Setting {
    Fixed(HpValue),
    Search(Domain),
}

impl Setting {
    pub fn choice<T: Into<HpValue>>(values: impl IntoIterator<Item = T>) -> Self {
        Setting::Search(Domain::Choice(values.into_iter().map(Into::into).collect()))
    }

    pub fn fixed(value: impl Into<HpValue>) -> Self {
        Setting::Fixed(value.into())
    }

    pub fn boolean() -> Self {
        Setting::Search(Domain::Boolean)
    }

    /// Resolve through the hyperparameter surface under `name`.
    ///
    /// Pinned settings are recorded as single-valued domains so they show
    /// up in the space without ever being sampled.
    pub fn resolve(&self, hp: &mut HyperParameters, name: &str) -> Result<HpValue, HpError> {
        match self {
            Setting::Fixed(value) => hp.fixed(name, value.clone()),
            Setting::Search(domain) => hp.declare(name, domain.clone()),
        }
    }

    pub fn usize(&self, hp: &mut HyperParameters, name: &str) -> Result<usize, BuildError> {
        let value = self.resolve(hp, name)?;
        match value.as_int() {
            Some(n) if n >= 0 => Ok(n as usize),
            _ => Err(mismatch(name, "non-negative int", value)),
        }
    }

    pub fn f64(&self, hp: &mut HyperParameters, name: &str) -> Result<f64, BuildError> {
        let value = self.resolve(hp, name)?;
        value.as_float().ok_or_else(|| mismatch(name, "float", value))
    }

    pub fn bool(&self, hp: &mut HyperParameters, name: &str) -> Result<bool, BuildError> {
        let value = self.resolve(hp, name)?;
        value.as_bool().ok_or_else(|| mismatch(name, "bool", value))
    }

    pub fn string(&self, hp: &mut HyperParameters, name: &str) -> Result<String, BuildError> {
        match self.resolve(hp, name)? {
            HpValue::Str(s) => Ok(s),
            other => Err(mismatch(name, "string", other)),
        }
    }
}

fn mismatch(name: &str, expected: &'static str, value: HpValue) -> BuildError {
    BuildError::Hp(HpError::TypeMismatch {
        name: name.to_string(),
        expected,
        value,
    })
}

/// A raw parameter value from a model file.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Scalar(HpValue),
    List(Vec<HpValue>),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParamError {
    #[error("unknown block kind '{0}'")]
    UnknownKind(String),
    #[error("{kind} block has no parameter '{key}'")]
    UnknownParam { kind: String, key: String },
    #[error("{kind} block requires parameter '{key}'")]
    Missing { kind: String, key: String },
    #[error("parameter '{key}' must be {expected}")]
    Invalid { key: String, expected: &'static str },
}

/// Parameters of one block declaration, keyed by name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BlockParams {
    entries: BTreeMap<String, ParamValue>,
}

impl BlockParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ParamValue) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reject keys the block kind does not understand.
    pub fn check_known(&self, kind: &str, allowed: &[&str]) -> Result<(), ParamError> {
        match self.entries.keys().find(|k| !allowed.contains(&k.as_str())) {
            Some(key) => Err(ParamError::UnknownParam {
                kind: kind.to_string(),
                key: key.clone(),
            }),
            None => Ok(()),
        }
    }

    /// A scalar pins the setting, a list becomes a choice domain.
    pub fn setting(&self, key: &str) -> Option<Setting> {
        self.entries.get(key).map(|value| match value {
            ParamValue::Scalar(v) => Setting::Fixed(v.clone()),
            ParamValue::List(vs) => Setting::Search(Domain::Choice(vs.clone())),
        })
    }

    pub fn usize(&self, key: &str) -> Result<Option<usize>, ParamError> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(ParamValue::Scalar(HpValue::Int(n))) if *n >= 0 => Ok(Some(*n as usize)),
            Some(_) => Err(ParamError::Invalid {
                key: key.to_string(),
                expected: "a non-negative integer",
            }),
        }
    }

    pub fn require_usize(&self, kind: &str, key: &str) -> Result<usize, ParamError> {
        self.usize(key)?.ok_or_else(|| ParamError::Missing {
            kind: kind.to_string(),
            key: key.to_string(),
        })
    }

    pub fn usize_list(&self, key: &str) -> Result<Option<Vec<usize>>, ParamError> {
        let invalid = || ParamError::Invalid {
            key: key.to_string(),
            expected: "a list of non-negative integers",
        };
        match self.entries.get(key) {
            None => Ok(None),
            Some(ParamValue::List(values)) => values
                .iter()
                .map(|v| match v {
                    HpValue::Int(n) if *n >= 0 => Ok(*n as usize),
                    _ => Err(invalid()),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            Some(ParamValue::Scalar(_)) => Err(invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_setting_is_recorded() {
        let mut hp = HyperParameters::new();
        let units = Setting::fixed(32i64).usize(&mut hp, "d/units").unwrap();
        assert_eq!(units, 32);
        assert_eq!(hp.space().get("d/units"), Some(&Domain::Fixed(HpValue::Int(32))));
    }

    #[test]
    fn searched_setting_uses_default() {
        let mut hp = HyperParameters::new();
        let act = Setting::choice(["relu", "tanh"])
            .string(&mut hp, "d/activation")
            .unwrap();
        assert_eq!(act, "relu");
        assert!(!Setting::boolean().bool(&mut hp, "d/use_norm").unwrap());
    }

    #[test]
    fn wrong_type_is_reported() {
        let mut hp = HyperParameters::new();
        let err = Setting::fixed("wide").usize(&mut hp, "d/units").unwrap_err();
        assert!(matches!(
            err,
            BuildError::Hp(HpError::TypeMismatch { expected: "non-negative int", .. })
        ));
    }

    #[test]
    fn params_to_settings() {
        let mut params = BlockParams::new();
        params.insert("units", ParamValue::List(vec![8i64.into(), 16i64.into()]));
        params.insert("num_classes", ParamValue::Scalar(3i64.into()));
        assert_eq!(params.setting("units"), Some(Setting::choice([8i64, 16])));
        assert_eq!(params.usize("num_classes"), Ok(Some(3)));
        assert!(params.usize("units").is_err());
        assert_eq!(params.usize_list("units"), Ok(Some(vec![8, 16])));
        assert!(params.check_known("dense", &["units"]).is_err());
        assert!(params.check_known("dense", &["units", "num_classes"]).is_ok());
    }
}
