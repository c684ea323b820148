//! Scoring: what a candidate costs.
//!
//! A [`ScoreCalculator`] prices `count` containers of one node type over a
//! duration. Calculators are selected by [`ScoreCalculatorKind`] at startup;
//! lower scores are better and infeasible inputs score as worst.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use scalesim_state::{NodeType, PlatformState, ResourceCatalog, StateDuration, StateScore};

use crate::error::PlacementError;

/// Prices a homogeneous block of containers.
pub trait ScoreCalculator: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Score plus the raw metric behind it (e.g. money spent).
    fn score(&self, region: &str, node_type: &str, containers_count: u32, duration: Duration) -> (StateScore, f64);
}

/// Cost in money: `hours × containers × price per hour`.
#[derive(Debug, Clone)]
pub struct PriceScoreCalculator {
    node_types: BTreeMap<String, NodeType>,
}

impl PriceScoreCalculator {
    pub fn new(catalog: &ResourceCatalog) -> Self {
        Self {
            node_types: catalog.node_types.clone(),
        }
    }
}

impl ScoreCalculator for PriceScoreCalculator {
    fn name(&self) -> &'static str {
        "cost_minimizer"
    }

    fn score(&self, region: &str, node_type: &str, containers_count: u32, duration: Duration) -> (StateScore, f64) {
        match self.node_types.get(node_type) {
            Some(node) => {
                let per_hour = StateScore::for_region(region, node.price_per_hour * f64::from(containers_count));
                let score = StateDuration::uniform(duration).amortize(&per_hour);
                let price = score.joint();
                (score, price)
            }
            None => (StateScore::worst(), f64::INFINITY),
        }
    }
}

/// Registered score calculators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreCalculatorKind {
    #[default]
    #[serde(alias = "CostMinimizer")]
    CostMinimizer,
}

impl ScoreCalculatorKind {
    pub fn build(&self, catalog: &ResourceCatalog) -> Box<dyn ScoreCalculator> {
        match self {
            Self::CostMinimizer => Box::new(PriceScoreCalculator::new(catalog)),
        }
    }
}

impl FromStr for ScoreCalculatorKind {
    type Err = PlacementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cost_minimizer" | "CostMinimizer" => Ok(Self::CostMinimizer),
            other => Err(PlacementError::UnknownScoreCalculator(other.to_string())),
        }
    }
}

/// Applies a calculator to groups and whole states.
#[derive(Debug)]
pub struct Scorer {
    calculator: Box<dyn ScoreCalculator>,
}

impl Scorer {
    pub fn new(calculator: Box<dyn ScoreCalculator>) -> Self {
        Self { calculator }
    }

    pub fn from_kind(kind: ScoreCalculatorKind, catalog: &ResourceCatalog) -> Self {
        Self::new(kind.build(catalog))
    }

    pub fn calculator_name(&self) -> &'static str {
        self.calculator.name()
    }

    pub fn score_containers(&self, region: &str, node_type: &str, containers_count: u32, duration: Duration) -> StateScore {
        self.calculator.score(region, node_type, containers_count, duration).0
    }

    /// Cost of keeping `state` unchanged, each region for its own duration.
    pub fn score_state(&self, state: &PlatformState, duration: &StateDuration) -> StateScore {
        let mut total = StateScore::null();
        for (region_name, region) in &state.regions {
            let region_duration = duration.get(region_name);
            for (node_type, count) in region.nodes_count() {
                total += self.score_containers(region_name, &node_type, count, region_duration);
            }
        }
        total
    }
}
