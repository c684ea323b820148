//! scalesim-placement: Place, Score, Optimize.
//!
//! Turns a per-region demand of service instances into a desired set of
//! homogeneous container groups and prices it.
//!
//! # Components
//!
//! - **`placer`**: per-container placement options and strategy escalation
//! - **`scorer`**: pluggable score calculators (monetary cost by default)
//! - **`optimizer`**: selection among scored candidates
//! - **`desired`**: plans and the desired-change calculator tying it together

pub mod desired;
pub mod error;
pub mod optimizer;
pub mod placer;
pub mod scorer;

pub use desired::{DesiredAdjustment, DesiredChangeCalculator, PlacementPlan, PlanEntry, build_plans};
pub use error::{PlacementError, PlacementResult};
pub use optimizer::OptimizerKind;
pub use placer::{
    DEFAULT_BALANCING_THRESHOLD, DynamicInputs, InContainerPlacement, PlacementHint, PlacementOptions, Placer,
};
pub use scorer::{PriceScoreCalculator, ScoreCalculator, ScoreCalculatorKind, Scorer};
