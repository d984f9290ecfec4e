//! The hyperparameter surface threaded through every build call.
//!
//! Blocks declare named tunables while they build. A declaration is a
//! lookup-or-default: if a value for the name is already present (pinned
//! by the user or sampled by the tuner) it is validated and reused,
//! otherwise the domain default is recorded. Every block asking for the
//! same name within one build therefore sees the same value.
//!
//! The declared space is append-only. Re-declaring a name with a
//! different domain is a configuration error, whether it happens within
//! one build or across builds seeded with [`HyperParameters::for_trial`].

pub mod domain;

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

pub use domain::{Domain, HpValue, Sampling};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HpError {
    #[error("hyperparameter '{name}' redeclared as {requested}, previously {previous}")]
    DomainConflict {
        name: String,
        previous: Domain,
        requested: Domain,
    },
    #[error("value {value} for hyperparameter '{name}' is outside its domain {domain}")]
    OutOfDomain {
        name: String,
        value: HpValue,
        domain: Domain,
    },
    #[error("hyperparameter '{name}' has an empty domain")]
    EmptyDomain { name: String },
    #[error("hyperparameter '{name}' holds {value}, expected a {expected} value")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        value: HpValue,
    },
}

/// Named tunable values for one build call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HyperParameters {
    space: BTreeMap<String, Domain>,
    values: BTreeMap<String, HpValue>,
    fixed: BTreeSet<String>,
    /// Names declared by this build, as opposed to inherited from earlier ones.
    declared: BTreeSet<String>,
}

impl HyperParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a build with a previously observed space and a set of values.
    ///
    /// Names in `fixed` keep their pinned value and are reported as fixed.
    pub fn for_trial(
        space: &BTreeMap<String, Domain>,
        values: BTreeMap<String, HpValue>,
        fixed: &BTreeSet<String>,
    ) -> Self {
        Self {
            space: space.clone(),
            values,
            fixed: fixed.clone(),
            declared: BTreeSet::new(),
        }
    }

    /// Pin `name` to `value` for this and every derived build.
    pub fn fix(&mut self, name: impl Into<String>, value: impl Into<HpValue>) {
        let name = name.into();
        self.values.insert(name.clone(), value.into());
        self.fixed.insert(name);
    }

    /// Declare `name` over `domain` and return its value for this build.
    pub fn declare(&mut self, name: &str, domain: Domain) -> Result<HpValue, HpError> {
        match self.space.get(name) {
            Some(previous) if *previous != domain => {
                return Err(HpError::DomainConflict {
                    name: name.to_string(),
                    previous: previous.clone(),
                    requested: domain,
                });
            }
            Some(_) => {}
            None => {
                if domain.cardinality() == Some(0) {
                    return Err(HpError::EmptyDomain {
                        name: name.to_string(),
                    });
                }
                self.space.insert(name.to_string(), domain.clone());
            }
        }

        let value = match self.values.get(name) {
            Some(existing) => domain
                .coerce(existing)
                .ok_or_else(|| HpError::OutOfDomain {
                    name: name.to_string(),
                    value: existing.clone(),
                    domain: domain.clone(),
                })?,
            None => domain.default_value().ok_or_else(|| HpError::EmptyDomain {
                name: name.to_string(),
            })?,
        };
        self.values.insert(name.to_string(), value.clone());
        self.declared.insert(name.to_string());
        Ok(value)
    }

    pub fn choice(&mut self, name: &str, values: Vec<HpValue>) -> Result<HpValue, HpError> {
        self.declare(name, Domain::Choice(values))
    }

    pub fn choice_int(&mut self, name: &str, values: &[i64]) -> Result<i64, HpError> {
        let domain = Domain::Choice(values.iter().map(|v| HpValue::Int(*v)).collect());
        let value = self.declare(name, domain)?;
        value.as_int().ok_or_else(|| mismatch(name, "int", value))
    }

    pub fn choice_float(&mut self, name: &str, values: &[f64]) -> Result<f64, HpError> {
        let domain = Domain::Choice(values.iter().map(|v| HpValue::Float(*v)).collect());
        let value = self.declare(name, domain)?;
        value.as_float().ok_or_else(|| mismatch(name, "float", value))
    }

    pub fn choice_str(&mut self, name: &str, values: &[&str]) -> Result<String, HpError> {
        let domain = Domain::Choice(values.iter().map(|v| HpValue::from(*v)).collect());
        let value = self.declare(name, domain)?;
        match value {
            HpValue::Str(s) => Ok(s),
            other => Err(mismatch(name, "string", other)),
        }
    }

    pub fn boolean(&mut self, name: &str) -> Result<bool, HpError> {
        let value = self.declare(name, Domain::Boolean)?;
        value.as_bool().ok_or_else(|| mismatch(name, "bool", value))
    }

    pub fn int(&mut self, name: &str, min: i64, max: i64, step: i64) -> Result<i64, HpError> {
        let value = self.declare(name, Domain::Int { min, max, step })?;
        value.as_int().ok_or_else(|| mismatch(name, "int", value))
    }

    pub fn float(
        &mut self,
        name: &str,
        min: f64,
        max: f64,
        sampling: Sampling,
    ) -> Result<f64, HpError> {
        let value = self.declare(name, Domain::Float { min, max, sampling })?;
        value.as_float().ok_or_else(|| mismatch(name, "float", value))
    }

    /// Declare a single-valued domain; the value is recorded but never searched.
    pub fn fixed(&mut self, name: &str, value: impl Into<HpValue>) -> Result<HpValue, HpError> {
        self.declare(name, Domain::Fixed(value.into()))
    }

    pub fn get(&self, name: &str) -> Option<&HpValue> {
        self.values.get(name)
    }

    pub fn space(&self) -> &BTreeMap<String, Domain> {
        &self.space
    }

    pub fn values(&self) -> &BTreeMap<String, HpValue> {
        &self.values
    }

    pub fn fixed_names(&self) -> &BTreeSet<String> {
        &self.fixed
    }

    pub fn is_fixed(&self, name: &str) -> bool {
        self.fixed.contains(name)
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.declared.contains(name)
    }

    /// Pinned names that no block declared during the build.
    pub fn unused_fixed(&self) -> Vec<&str> {
        self.fixed
            .iter()
            .filter(|name| !self.declared.contains(*name))
            .map(|name| name.as_str())
            .collect()
    }

    /// Values of the names this build declared, i.e. what it actually used.
    ///
    /// Names only known from earlier builds of the same space (a layer
    /// width under a smaller layer count) are left out.
    pub fn assignment(&self) -> BTreeMap<String, HpValue> {
        self.values
            .iter()
            .filter(|(name, _)| self.declared.contains(*name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

fn mismatch(name: &str, expected: &'static str, value: HpValue) -> HpError {
    HpError::TypeMismatch {
        name: name.to_string(),
        expected,
        value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_recorded_and_reused() {
        let mut hp = HyperParameters::new();
        assert_eq!(hp.choice_int("units", &[8, 16]).unwrap(), 8);
        assert_eq!(hp.choice_int("units", &[8, 16]).unwrap(), 8);
        assert_eq!(hp.values().len(), 1);
        assert_eq!(hp.space().len(), 1);
    }

    #[test]
    fn pinned_value_wins() {
        let mut hp = HyperParameters::new();
        hp.fix("units", 16i64);
        assert_eq!(hp.choice_int("units", &[8, 16]).unwrap(), 16);
        assert!(hp.is_fixed("units"));
        assert!(hp.unused_fixed().is_empty());
    }

    #[test]
    fn pinned_value_outside_domain_is_fatal() {
        let mut hp = HyperParameters::new();
        hp.fix("units", 12i64);
        let err = hp.choice_int("units", &[8, 16]).unwrap_err();
        assert!(matches!(err, HpError::OutOfDomain { .. }));
    }

    #[test]
    fn redeclaring_with_other_domain_is_fatal() {
        let mut hp = HyperParameters::new();
        hp.choice_int("units", &[8, 16]).unwrap();
        let err = hp.choice_int("units", &[8, 32]).unwrap_err();
        assert!(matches!(err, HpError::DomainConflict { .. }));
        assert!(err.to_string().contains("choice{8, 32}"));
    }

    #[test]
    fn conflict_detected_across_builds() {
        let mut first = HyperParameters::new();
        first.boolean("use_norm").unwrap();

        let mut second =
            HyperParameters::for_trial(first.space(), BTreeMap::new(), &BTreeSet::new());
        let err = second.choice_str("use_norm", &["yes", "no"]).unwrap_err();
        assert!(matches!(err, HpError::DomainConflict { .. }));
    }

    #[test]
    fn empty_choice_rejected() {
        let mut hp = HyperParameters::new();
        let err = hp.choice_int("units", &[]).unwrap_err();
        assert_eq!(
            err,
            HpError::EmptyDomain {
                name: "units".into()
            }
        );
    }

    #[test]
    fn typed_helpers() {
        let mut hp = HyperParameters::new();
        hp.fix("lr", 0.01f64);
        assert_eq!(hp.float("lr", 1e-4, 1e-1, Sampling::Log).unwrap(), 0.01);
        assert_eq!(hp.int("layers", 1, 3, 1).unwrap(), 1);
        assert!(!hp.boolean("norm").unwrap());
        assert_eq!(
            hp.choice_str("act", &["relu", "tanh"]).unwrap(),
            "relu".to_string()
        );
        assert_eq!(hp.fixed("merge", "add").unwrap(), HpValue::from("add"));
    }

    #[test]
    fn unused_fixed_and_assignment() {
        let mut hp = HyperParameters::new();
        hp.fix("ghost", true);
        hp.choice_int("units", &[8, 16]).unwrap();
        assert_eq!(hp.unused_fixed(), vec!["ghost"]);
        let assignment = hp.assignment();
        assert_eq!(assignment.len(), 1);
        assert_eq!(assignment.get("units"), Some(&HpValue::Int(8)));
    }

    #[test]
    fn assignment_skips_names_inherited_from_earlier_builds() {
        let mut wide = HyperParameters::new();
        wide.fix("layers", 2i64);
        for i in 0..wide.int("layers", 1, 2, 1).unwrap() {
            wide.choice_int(&format!("units_{i}"), &[4, 8]).unwrap();
        }
        assert_eq!(wide.assignment().len(), 3);

        let values = BTreeMap::from([
            ("layers".to_string(), HpValue::Int(1)),
            ("units_0".to_string(), HpValue::Int(8)),
            ("units_1".to_string(), HpValue::Int(8)),
        ]);
        let mut narrow = HyperParameters::for_trial(wide.space(), values, &BTreeSet::new());
        for i in 0..narrow.int("layers", 1, 2, 1).unwrap() {
            narrow.choice_int(&format!("units_{i}"), &[4, 8]).unwrap();
        }
        assert!(narrow.space().contains_key("units_1"));
        assert!(!narrow.is_declared("units_1"));
        assert_eq!(
            narrow.assignment(),
            BTreeMap::from([
                ("layers".to_string(), HpValue::Int(1)),
                ("units_0".to_string(), HpValue::Int(8)),
            ])
        );
    }

    #[test]
    fn inverted_int_range_is_empty() {
        let mut hp = HyperParameters::new();
        let err = hp.int("n", 5, 4, 2).unwrap_err();
        assert_eq!(err, HpError::EmptyDomain { name: "n".into() });
    }
}
