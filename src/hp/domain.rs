//! Hyperparameter values and the domains they are drawn from.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A sampled hyperparameter value.
///
/// Serialized untagged so that a best-trial record reads as plain JSON
/// (`{"dense/units_0": 64, "dense/use_norm": true}`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HpValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl HpValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            HpValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            HpValue::Float(v) => Some(*v),
            HpValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HpValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HpValue::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Parse a command-line literal: `true`, `8`, `0.25`, anything else is a string.
    pub fn parse_literal(text: &str) -> HpValue {
        let text = text.trim();
        match text {
            "true" => return HpValue::Bool(true),
            "false" => return HpValue::Bool(false),
            _ => {}
        }
        if let Ok(v) = text.parse::<i64>() {
            return HpValue::Int(v);
        }
        if let Ok(v) = text.parse::<f64>() {
            return HpValue::Float(v);
        }
        HpValue::Str(text.trim_matches('"').to_string())
    }
}

impl fmt::Display for HpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HpValue::Bool(v) => write!(f, "{}", v),
            HpValue::Int(v) => write!(f, "{}", v),
            HpValue::Float(v) => write!(f, "{:?}", v),
            HpValue::Str(v) => write!(f, "\"{}\"", v),
        }
    }
}

impl From<bool> for HpValue {
    fn from(v: bool) -> Self {
        HpValue::Bool(v)
    }
}

impl From<i64> for HpValue {
    fn from(v: i64) -> Self {
        HpValue::Int(v)
    }
}

impl From<f64> for HpValue {
    fn from(v: f64) -> Self {
        HpValue::Float(v)
    }
}

impl From<&str> for HpValue {
    fn from(v: &str) -> Self {
        HpValue::Str(v.to_string())
    }
}

/// How a float range is sampled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sampling {
    Linear,
    Log,
}

/// The set of values a named hyperparameter may take.
#[derive(Clone, Debug, PartialEq)]
pub enum Domain {
    /// One of an ordered list; the first entry is the default.
    Choice(Vec<HpValue>),
    Boolean,
    Int { min: i64, max: i64, step: i64 },
    Float { min: f64, max: f64, sampling: Sampling },
    Fixed(HpValue),
}

impl Domain {
    /// The value used when nothing has been sampled or pinned.
    pub fn default_value(&self) -> Option<HpValue> {
        match self {
            Domain::Choice(values) => values.first().cloned(),
            Domain::Boolean => Some(HpValue::Bool(false)),
            Domain::Int { min, .. } => Some(HpValue::Int(*min)),
            Domain::Float { min, .. } => Some(HpValue::Float(*min)),
            Domain::Fixed(v) => Some(v.clone()),
        }
    }

    /// Number of distinct values, or `None` for continuous ranges and
    /// integer ranges too wide to count.
    pub fn cardinality(&self) -> Option<usize> {
        match self {
            Domain::Choice(values) => Some(values.len()),
            Domain::Boolean => Some(2),
            Domain::Int { min, max, .. } if max < min => Some(0),
            Domain::Int { min, max, step } => {
                let span = max.checked_sub(*min)?;
                usize::try_from(span / (*step).max(1)).ok()?.checked_add(1)
            }
            Domain::Float { min, max, .. } if max < min => Some(0),
            Domain::Float { min, max, .. } => (min == max).then_some(1),
            Domain::Fixed(_) => Some(1),
        }
    }

    /// Bring `value` into this domain's representation if it belongs to it.
    ///
    /// Integers are accepted for float-valued domains and integral floats
    /// for int-valued ones, so `--set dense/dropout=0` matches `0.0`.
    pub fn coerce(&self, value: &HpValue) -> Option<HpValue> {
        match self {
            Domain::Choice(values) => values
                .iter()
                .find(|candidate| loosely_equal(candidate, value))
                .cloned(),
            Domain::Boolean => value.as_bool().map(HpValue::Bool),
            Domain::Int { min, max, step } => {
                let v = match value {
                    HpValue::Int(v) => *v,
                    HpValue::Float(f) if f.fract() == 0.0 => *f as i64,
                    _ => return None,
                };
                let step = (*step).max(1);
                let on_grid = (i128::from(v) - i128::from(*min)) % i128::from(step) == 0;
                (v >= *min && v <= *max && on_grid).then_some(HpValue::Int(v))
            }
            Domain::Float { min, max, .. } => {
                let v = value.as_float()?;
                (v >= *min && v <= *max).then_some(HpValue::Float(v))
            }
            Domain::Fixed(fixed) => loosely_equal(fixed, value).then(|| fixed.clone()),
        }
    }
}

fn loosely_equal(a: &HpValue, b: &HpValue) -> bool {
    match (a, b) {
        (HpValue::Int(x), HpValue::Float(y)) | (HpValue::Float(y), HpValue::Int(x)) => {
            *x as f64 == *y
        }
        _ => a == b,
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Choice(values) => {
                write!(f, "choice{{")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "}}")
            }
            Domain::Boolean => write!(f, "bool"),
            Domain::Int { min, max, step } => {
                if *step == 1 {
                    write!(f, "int[{}..={}]", min, max)
                } else {
                    write!(f, "int[{}..={} step {}]", min, max, step)
                }
            }
            Domain::Float { min, max, sampling } => match sampling {
                Sampling::Linear => write!(f, "float[{:?}, {:?}]", min, max),
                Sampling::Log => write!(f, "float[{:?}, {:?}] log", min, max),
            },
            Domain::Fixed(v) => write!(f, "fixed({})", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_literal_kinds() {
        assert_eq!(HpValue::parse_literal("true"), HpValue::Bool(true));
        assert_eq!(HpValue::parse_literal("16"), HpValue::Int(16));
        assert_eq!(HpValue::parse_literal("0.25"), HpValue::Float(0.25));
        assert_eq!(
            HpValue::parse_literal("\"concatenate\""),
            HpValue::Str("concatenate".into())
        );
        assert_eq!(HpValue::parse_literal("relu"), HpValue::Str("relu".into()));
    }

    #[test]
    fn defaults() {
        let d = Domain::Choice(vec![8i64.into(), 16i64.into()]);
        assert_eq!(d.default_value(), Some(HpValue::Int(8)));
        assert_eq!(Domain::Boolean.default_value(), Some(HpValue::Bool(false)));
        assert_eq!(Domain::Choice(vec![]).default_value(), None);
    }

    #[test]
    fn coerce_checks_membership() {
        let d = Domain::Choice(vec![0.0f64.into(), 0.25f64.into(), 0.5f64.into()]);
        assert_eq!(d.coerce(&HpValue::Int(0)), Some(HpValue::Float(0.0)));
        assert_eq!(d.coerce(&HpValue::Float(0.3)), None);

        let ints = Domain::Int {
            min: 1,
            max: 9,
            step: 2,
        };
        assert_eq!(ints.coerce(&HpValue::Int(5)), Some(HpValue::Int(5)));
        assert_eq!(ints.coerce(&HpValue::Int(4)), None);
        assert_eq!(ints.coerce(&HpValue::Float(7.0)), Some(HpValue::Int(7)));
        assert_eq!(ints.cardinality(), Some(5));
    }

    #[test]
    fn cardinality_of_int_ranges() {
        let inverted = Domain::Int {
            min: 5,
            max: 4,
            step: 2,
        };
        assert_eq!(inverted.cardinality(), Some(0));
        assert_eq!(inverted.coerce(&HpValue::Int(5)), None);

        let full = Domain::Int {
            min: i64::MIN,
            max: i64::MAX,
            step: 1,
        };
        assert_eq!(full.cardinality(), None);
        assert_eq!(full.coerce(&HpValue::Int(i64::MAX)), Some(HpValue::Int(i64::MAX)));
        assert_eq!(full.coerce(&HpValue::Int(i64::MIN)), Some(HpValue::Int(i64::MIN)));
    }

    #[test]
    fn display_forms() {
        let d = Domain::Choice(vec![8i64.into(), 16i64.into()]);
        assert_eq!(d.to_string(), "choice{8, 16}");
        let f = Domain::Float {
            min: 1e-4,
            max: 1e-2,
            sampling: Sampling::Log,
        };
        assert_eq!(f.to_string(), "float[0.0001, 0.01] log");
        assert_eq!(Domain::Fixed("add".into()).to_string(), "fixed(\"add\")");
    }

    #[test]
    fn untagged_json() {
        let v: Vec<HpValue> = serde_json::from_str(r#"[8, 0.5, true, "relu"]"#).unwrap();
        assert_eq!(
            v,
            vec![
                HpValue::Int(8),
                HpValue::Float(0.5),
                HpValue::Bool(true),
                HpValue::Str("relu".into())
            ]
        );
    }
}
