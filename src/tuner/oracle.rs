//! Random search over the declared space.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

use crate::hp::{Domain, HpValue, Sampling};

/// Proposes hyperparameter values for each trial.
///
/// The first proposal leaves everything at its default. Later proposals
/// sample every non-pinned name of the space observed so far; names a
/// build declares for the first time fall back to their defaults.
///
/// Two sets are kept. `proposed` holds the raw samples for the current
/// space and bounds the search once every combination has been drawn.
/// `seen` holds the assignments builds actually used, which can be
/// smaller than the proposal when some names are conditional.
#[derive(Debug)]
pub struct RandomSearch {
    rng: StdRng,
    seen: HashSet<[u8; 32]>,
    proposed: HashSet<[u8; 32]>,
    space_key: Option<[u8; 32]>,
    max_retries: usize,
    calls: usize,
}

impl RandomSearch {
    pub fn new(seed: u64, max_retries: usize) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seen: HashSet::new(),
            proposed: HashSet::new(),
            space_key: None,
            max_retries,
            calls: 0,
        }
    }

    /// Values for the next trial, or `None` once no unseen proposal can
    /// be found.
    pub fn propose(
        &mut self,
        space: &BTreeMap<String, Domain>,
        pinned: &BTreeMap<String, HpValue>,
    ) -> Option<BTreeMap<String, HpValue>> {
        self.calls += 1;
        if self.calls == 1 {
            return Some(pinned.clone());
        }
        let key = space_fingerprint(space);
        if self.space_key != Some(key) {
            self.space_key = Some(key);
            self.proposed.clear();
        }
        if let Some(total) = space_size(space, pinned.keys().collect()) {
            if self.proposed.len() >= total {
                return None;
            }
        }
        for _ in 0..=self.max_retries {
            let mut values = pinned.clone();
            for (name, domain) in space {
                if !pinned.contains_key(name) {
                    values.insert(name.clone(), sample(domain, &mut self.rng));
                }
            }
            if self.proposed.insert(fingerprint(&values)) {
                return Some(values);
            }
        }
        warn!(retries = self.max_retries, "no unseen assignment found");
        None
    }

    /// Mark the assignment a build used as tried. Returns `false` when an
    /// earlier trial already used it.
    pub fn record(&mut self, assignment: &BTreeMap<String, HpValue>) -> bool {
        self.seen.insert(fingerprint(assignment))
    }

    /// Distinct assignments recorded so far.
    pub fn num_seen(&self) -> usize {
        self.seen.len()
    }
}

fn space_fingerprint(space: &BTreeMap<String, Domain>) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for (name, domain) in space {
        hasher.update(name.as_bytes());
        hasher.update(b":");
        hasher.update(domain.to_string().as_bytes());
        hasher.update(b"\n");
    }
    *hasher.finalize().as_bytes()
}

/// Number of distinct assignments, if every free domain is finite.
fn space_size(space: &BTreeMap<String, Domain>, pinned: BTreeSet<&String>) -> Option<usize> {
    space
        .iter()
        .filter(|(name, _)| !pinned.contains(name))
        .try_fold(1usize, |acc, (_, d)| acc.checked_mul(d.cardinality()?))
}

/// Stable hash of an assignment; names are visited in sorted order.
pub fn fingerprint(values: &BTreeMap<String, HpValue>) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for (name, value) in values {
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.to_string().as_bytes());
        hasher.update(b"\n");
    }
    *hasher.finalize().as_bytes()
}

fn sample(domain: &Domain, rng: &mut StdRng) -> HpValue {
    match domain {
        Domain::Choice(values) if !values.is_empty() => {
            values[rng.random_range(0..values.len())].clone()
        }
        Domain::Choice(_) => HpValue::Bool(false),
        Domain::Boolean => HpValue::Bool(rng.random_bool(0.5)),
        Domain::Int { min, max, step } => {
            let step = (*step).max(1);
            let steps = max.checked_sub(*min).map_or(0, |span| (span / step).max(0));
            HpValue::Int(min.saturating_add(step.saturating_mul(rng.random_range(0..=steps))))
        }
        Domain::Float { min, max, .. } if min >= max => HpValue::Float(*min),
        Domain::Float {
            min,
            max,
            sampling: Sampling::Log,
        } if *min > 0.0 => {
            let (lo, hi) = (min.ln(), max.ln());
            HpValue::Float(rng.random_range(lo..hi).exp().clamp(*min, *max))
        }
        Domain::Float { min, max, .. } => HpValue::Float(rng.random_range(*min..*max)),
        Domain::Fixed(value) => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> BTreeMap<String, Domain> {
        BTreeMap::from([
            (
                "units".to_string(),
                Domain::Choice(vec![8i64.into(), 16i64.into()]),
            ),
            ("norm".to_string(), Domain::Boolean),
        ])
    }

    #[test]
    fn first_proposal_is_defaults() {
        let mut oracle = RandomSearch::new(0, 10);
        let pinned = BTreeMap::from([("units".to_string(), HpValue::Int(16))]);
        assert_eq!(oracle.propose(&BTreeMap::new(), &pinned), Some(pinned));
    }

    #[test]
    fn samples_stay_in_domain_and_exhaust() {
        let mut oracle = RandomSearch::new(7, 50);
        let space = space();
        oracle.propose(&space, &BTreeMap::new());
        let mut count = 0;
        while let Some(values) = oracle.propose(&space, &BTreeMap::new()) {
            for (name, value) in &values {
                assert!(space[name].coerce(value).is_some());
            }
            count += 1;
            assert!(count <= 4);
        }
        assert_eq!(count, 4);
    }

    #[test]
    fn record_reports_repeats() {
        let mut oracle = RandomSearch::new(0, 10);
        let a = BTreeMap::from([("units".to_string(), HpValue::Int(8))]);
        assert!(oracle.record(&a));
        assert!(!oracle.record(&a));
        assert_eq!(oracle.num_seen(), 1);
    }

    #[test]
    fn growing_space_restarts_the_draw() {
        let mut oracle = RandomSearch::new(5, 100);
        let mut space = BTreeMap::from([("norm".to_string(), Domain::Boolean)]);
        oracle.propose(&space, &BTreeMap::new());
        assert!(oracle.propose(&space, &BTreeMap::new()).is_some());
        assert!(oracle.propose(&space, &BTreeMap::new()).is_some());
        assert!(oracle.propose(&space, &BTreeMap::new()).is_none());

        space.insert("bias".to_string(), Domain::Boolean);
        let mut count = 0;
        while oracle.propose(&space, &BTreeMap::new()).is_some() {
            count += 1;
        }
        assert_eq!(count, 4);
    }

    #[test]
    fn pinned_names_are_not_sampled() {
        let mut oracle = RandomSearch::new(1, 100);
        let pinned = BTreeMap::from([("units".to_string(), HpValue::Int(16))]);
        oracle.propose(&space(), &pinned);
        for _ in 0..2 {
            let values = oracle.propose(&space(), &pinned).unwrap();
            assert_eq!(values["units"], HpValue::Int(16));
        }
        assert!(oracle.propose(&space(), &pinned).is_none());
    }

    #[test]
    fn numeric_domains() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let v = sample(&Domain::Int { min: 2, max: 10, step: 4 }, &mut rng);
            assert!(matches!(v, HpValue::Int(2 | 6 | 10)));
            let wide = sample(
                &Domain::Int {
                    min: i64::MIN,
                    max: i64::MAX,
                    step: i64::MAX,
                },
                &mut rng,
            );
            assert!(wide.as_int().is_some());
            let f = sample(
                &Domain::Float {
                    min: 1e-4,
                    max: 1e-1,
                    sampling: Sampling::Log,
                },
                &mut rng,
            );
            let f = f.as_float().unwrap();
            assert!((1e-4..=1e-1).contains(&f));
        }
    }

    #[test]
    fn fingerprint_is_order_free() {
        let a = BTreeMap::from([
            ("a".to_string(), HpValue::Int(1)),
            ("b".to_string(), HpValue::Bool(true)),
        ]);
        let mut b = BTreeMap::new();
        b.insert("b".to_string(), HpValue::Bool(true));
        b.insert("a".to_string(), HpValue::Int(1));
        assert_eq!(fingerprint(&a), fingerprint(&b));
        b.insert("a".to_string(), HpValue::Float(1.0));
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }
}
