//! scalesim-state: world model and delta hierarchy for the scaling simulator.
//!
//! The state hierarchy (`PlatformState → Region → HomogeneousContainerGroup`)
//! is mirrored one level at a time by the delta hierarchy
//! (`PlatformStateDelta → RegionalDelta → GeneralizedDelta`). Deltas are
//! scheduled against a [`ScalingModel`] so that containers boot before the
//! services on them start, and services drain before their containers go.
//!
//! # Modules
//!
//! - **`time`**: simulated timestamps and duration strings
//! - **`catalog`**: node types, per-service requirements, fractional capacity
//! - **`platform`**: the state hierarchy and soft adjustment
//! - **`delta`**: the delta hierarchy and enforcement
//! - **`score`**: per-region scores and durations
//! - **`scaling_model`**: boot and termination timings
//! - **`timeline`**: timestamped deltas produced by the adjuster

pub mod catalog;
pub mod delta;
pub mod error;
pub mod platform;
pub mod scaling_model;
pub mod score;
pub mod time;
pub mod timeline;

pub use catalog::{CAPACITY_EPSILON, NodeType, ResourceCatalog, ResourceRequirements, SystemCapacity};
pub use delta::{
    ContainerGroupDelta, EnforcementSchedule, EntitiesGroupDelta, GeneralizedDelta, PlatformStateDelta, RegionalDelta,
};
pub use error::{StateError, StateResult};
pub use platform::{
    EntityChanges, EntityCounts, GroupId, GroupSpec, HomogeneousContainerGroup, PlatformState, Region, RegionalChanges,
    RegionalEntities, combine_entities,
};
pub use scaling_model::{ScalingInfo, ScalingModel};
pub use score::{StateDuration, StateScore};
pub use time::{Timestamp, format_duration, parse_duration};
pub use timeline::DeltaTimeline;
