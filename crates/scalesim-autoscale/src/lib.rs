//! scalesim-autoscale: the adjuster control loop.
//!
//! Consumes per-service desired changes, reuses idle capacity where it
//! can, and otherwise chooses between adding capacity and substituting the
//! whole layout. Output is a [`DeltaTimeline`](scalesim_state::DeltaTimeline)
//! the simulation applies as time advances.
//!
//! # Components
//!
//! - **`unmet`**: horizon-bounded timeline of unmet changes and combiners
//! - **`adjuster`**: the loop, cooldown and plan selection
//! - **`config`**: TOML policy configuration

pub mod adjuster;
pub mod config;
pub mod error;
pub mod unmet;

pub use adjuster::{Adjuster, Cooldown, PlanChoice, choose_plan};
pub use config::AdjusterConfig;
pub use error::{AdjustError, AdjustResult};
pub use unmet::{CombinerSettings, DesiredChange, ServicesScalingEvents, UnmetChangesTimeline};
