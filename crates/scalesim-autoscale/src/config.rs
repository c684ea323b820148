//! Adjuster policy configuration.
//!
//! ```toml
//! adjustment_horizon = "10m"
//! cooldown_period = "5m"
//! placement_hint = "balanced"
//! score_calculator = "cost_minimizer"
//!
//! [combiner]
//! type = "windowed"
//! window = "30s"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use scalesim_placement::{DEFAULT_BALANCING_THRESHOLD, OptimizerKind, PlacementHint, ScoreCalculatorKind};
use scalesim_state::time::duration_str;

use crate::error::{AdjustError, AdjustResult};
use crate::unmet::CombinerSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjusterConfig {
    /// How far ahead unmet changes are considered.
    #[serde(with = "duration_str")]
    pub adjustment_horizon: Duration,
    /// Minimum spacing between two scheduled actions.
    #[serde(with = "duration_str", default)]
    pub cooldown_period: Duration,
    #[serde(default)]
    pub placement_hint: PlacementHint,
    #[serde(default)]
    pub combiner: CombinerSettings,
    #[serde(default)]
    pub score_calculator: ScoreCalculatorKind,
    #[serde(default)]
    pub optimizer: OptimizerKind,
    #[serde(default = "default_balancing_threshold")]
    pub balancing_threshold: f64,
}

fn default_balancing_threshold() -> f64 {
    DEFAULT_BALANCING_THRESHOLD
}

impl Default for AdjusterConfig {
    fn default() -> Self {
        Self {
            adjustment_horizon: Duration::from_secs(600),
            cooldown_period: Duration::ZERO,
            placement_hint: PlacementHint::default(),
            combiner: CombinerSettings::default(),
            score_calculator: ScoreCalculatorKind::default(),
            optimizer: OptimizerKind::default(),
            balancing_threshold: DEFAULT_BALANCING_THRESHOLD,
        }
    }
}

impl AdjusterConfig {
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: AdjusterConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> AdjustResult<()> {
        if self.adjustment_horizon.is_zero() {
            return Err(AdjustError::Config("adjustment_horizon must be positive".to_string()));
        }
        if let CombinerSettings::Windowed { window } = &self.combiner {
            if window.is_zero() {
                return Err(AdjustError::Config("windowed combiner needs a positive window".to_string()));
            }
        }
        if !(0.0..=1.0).contains(&self.balancing_threshold) {
            return Err(AdjustError::Config(format!(
                "balancing_threshold {} outside [0, 1]",
                self.balancing_threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn parses_full_config() {
        let toml_str = r#"
adjustment_horizon = "10m"
cooldown_period = "5m"
placement_hint = "balanced"
score_calculator = "CostMinimizer"
optimizer = "cost_minimizer"
balancing_threshold = 0.1

[combiner]
type = "windowed"
window = "30s"
"#;
        let config = AdjusterConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.adjustment_horizon, Duration::from_secs(600));
        assert_eq!(config.cooldown_period, Duration::from_secs(300));
        assert_eq!(config.placement_hint, PlacementHint::Balanced);
        assert_eq!(config.score_calculator, ScoreCalculatorKind::CostMinimizer);
        assert_eq!(
            config.combiner,
            CombinerSettings::Windowed {
                window: Duration::from_secs(30)
            }
        );
        assert!((config.balancing_threshold - 0.1).abs() < 1e-12);
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = AdjusterConfig::from_toml_str("adjustment_horizon = \"1h\"").unwrap();
        assert_eq!(config.cooldown_period, Duration::ZERO);
        assert_eq!(config.placement_hint, PlacementHint::Specialized);
        assert_eq!(config.combiner, CombinerSettings::Exact);
        assert_eq!(config.optimizer, OptimizerKind::CostMinimizer);
    }

    #[test]
    fn rejects_unknown_hint() {
        let err = AdjusterConfig::from_toml_str("adjustment_horizon = \"1h\"\nplacement_hint = \"packed\"");
        assert!(err.is_err());
    }

    #[test]
    fn rejects_zero_window() {
        let err = AdjusterConfig::from_toml_str(
            "adjustment_horizon = \"1h\"\n[combiner]\ntype = \"windowed\"\nwindow = \"0s\"",
        )
        .unwrap_err();
        assert!(err.to_string().contains("positive window"));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "adjustment_horizon = \"15m\"\ncooldown_period = \"30s\"").unwrap();
        let config = AdjusterConfig::from_file(file.path()).unwrap();
        assert_eq!(config.adjustment_horizon, Duration::from_secs(900));
        assert_eq!(config.cooldown_period, Duration::from_secs(30));
    }
}
