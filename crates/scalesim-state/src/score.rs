//! Scores and durations attached to platform states.
//!
//! A [`StateScore`] is a per-region cost; lower is better. The `is_worst`
//! sentinel marks an infeasible option and compares greater than any
//! finite score. A [`StateDuration`] holds how long a state lasts in each
//! region and amortizes an hourly score over that time.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::{Add, AddAssign};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-region cost of a state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateScore {
    per_region: BTreeMap<String, f64>,
    is_worst: bool,
}

impl StateScore {
    /// The neutral score: no cost anywhere.
    pub fn null() -> Self {
        Self::default()
    }

    /// The infeasible sentinel.
    pub fn worst() -> Self {
        Self {
            per_region: BTreeMap::new(),
            is_worst: true,
        }
    }

    pub fn for_region(region: &str, value: f64) -> Self {
        let mut per_region = BTreeMap::new();
        per_region.insert(region.to_string(), value);
        Self {
            per_region,
            is_worst: false,
        }
    }

    pub fn is_worst(&self) -> bool {
        self.is_worst
    }

    pub fn region(&self, region: &str) -> Option<f64> {
        self.per_region.get(region).copied()
    }

    pub fn regions(&self) -> impl Iterator<Item = (&str, f64)> {
        self.per_region.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Sum over all regions; infinite for the worst score.
    pub fn joint(&self) -> f64 {
        if self.is_worst {
            f64::INFINITY
        } else {
            self.per_region.values().sum()
        }
    }

    /// Cost ordering: lower joint score first, worst last.
    pub fn cmp_cost(&self, other: &StateScore) -> Ordering {
        match (self.is_worst, other.is_worst) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.joint().total_cmp(&other.joint()),
        }
    }

    /// Strictly cheaper than `other`.
    pub fn is_better_than(&self, other: &StateScore) -> bool {
        self.cmp_cost(other) == Ordering::Less
    }
}

impl Add for StateScore {
    type Output = StateScore;

    fn add(mut self, rhs: StateScore) -> StateScore {
        self += rhs;
        self
    }
}

impl AddAssign for StateScore {
    fn add_assign(&mut self, rhs: StateScore) {
        self.is_worst |= rhs.is_worst;
        for (region, value) in rhs.per_region {
            *self.per_region.entry(region).or_insert(0.0) += value;
        }
    }
}

/// How long a state holds in each region.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDuration {
    per_region: BTreeMap<String, Duration>,
    /// Applies to regions without their own entry.
    fallback: Option<Duration>,
}

impl StateDuration {
    /// The same duration in every region.
    pub fn uniform(duration: Duration) -> Self {
        Self {
            per_region: BTreeMap::new(),
            fallback: Some(duration),
        }
    }

    pub fn from_regions(per_region: BTreeMap<String, Duration>) -> Self {
        Self {
            per_region,
            fallback: None,
        }
    }

    /// Duration for `region`, zero if unknown.
    pub fn get(&self, region: &str) -> Duration {
        self.per_region
            .get(region)
            .copied()
            .or(self.fallback)
            .unwrap_or(Duration::ZERO)
    }

    /// Turn an hourly score into a total: `score_per_hour × hours`.
    ///
    /// Regions without a known duration are dropped from the result.
    pub fn amortize(&self, per_hour: &StateScore) -> StateScore {
        if per_hour.is_worst() {
            return StateScore::worst();
        }
        let mut total = StateScore::null();
        for (region, value) in per_hour.regions() {
            if self.fallback.is_none() && !self.per_region.contains_key(region) {
                continue;
            }
            let hours = self.get(region).as_secs_f64() / 3600.0;
            total += StateScore::for_region(region, value * hours);
        }
        total
    }
}
