//! Optimizers: pick one scored candidate.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use scalesim_state::StateScore;

use crate::error::PlacementError;

/// Registered selection policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    /// Lowest non-worst score wins; the first of equal scores is kept.
    #[default]
    #[serde(alias = "CostMinimizer")]
    CostMinimizer,
}

impl OptimizerKind {
    /// The best candidate, or `None` when nothing feasible was offered.
    pub fn select<T>(&self, candidates: impl IntoIterator<Item = (T, StateScore)>) -> Option<(T, StateScore)> {
        match self {
            Self::CostMinimizer => candidates
                .into_iter()
                .filter(|(_, score)| !score.is_worst())
                .fold(None, |best: Option<(T, StateScore)>, candidate| match best {
                    Some(b) if !candidate.1.is_better_than(&b.1) => Some(b),
                    _ => Some(candidate),
                }),
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = PlacementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cost_minimizer" | "CostMinimizer" => Ok(Self::CostMinimizer),
            other => Err(PlacementError::UnknownOptimizer(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_cheapest_feasible() {
        let picked = OptimizerKind::CostMinimizer.select(vec![
            ("a", StateScore::for_region("eu", 3.0)),
            ("b", StateScore::worst()),
            ("c", StateScore::for_region("eu", 1.0)),
        ]);
        assert_eq!(picked.map(|(name, _)| name), Some("c"));
    }

    #[test]
    fn ties_keep_the_first() {
        let picked = OptimizerKind::CostMinimizer.select(vec![
            ("first", StateScore::for_region("eu", 2.0)),
            ("second", StateScore::for_region("eu", 2.0)),
        ]);
        assert_eq!(picked.map(|(name, _)| name), Some("first"));
    }

    #[test]
    fn nothing_feasible_is_none() {
        assert!(OptimizerKind::CostMinimizer.select(Vec::<((), StateScore)>::new()).is_none());
        assert!(OptimizerKind::CostMinimizer.select(vec![((), StateScore::worst())]).is_none());
    }

    #[test]
    fn unknown_optimizer_name() {
        assert_eq!(
            "random".parse::<OptimizerKind>(),
            Err(PlacementError::UnknownOptimizer("random".to_string()))
        );
    }
}
