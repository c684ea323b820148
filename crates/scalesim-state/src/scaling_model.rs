//! Scaling model: how long things take to start and stop.
//!
//! Pure lookup table, immutable for the duration of an adjustment cycle.
//! Node timings are keyed by `(provider, node type)`, service timings by
//! service name.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::delta::{ContainerGroupDelta, EntitiesGroupDelta};
use crate::time::duration_str;

/// Boot/termination timing for one node type or one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingInfo {
    #[serde(with = "duration_str")]
    pub booting_duration: Duration,
    #[serde(with = "duration_str")]
    pub termination_duration: Duration,
}

impl ScalingInfo {
    pub fn new(booting_duration: Duration, termination_duration: Duration) -> Self {
        Self {
            booting_duration,
            termination_duration,
        }
    }

    fn for_sign(&self, sign: i64) -> Duration {
        if sign < 0 {
            self.termination_duration
        } else {
            self.booting_duration
        }
    }
}

/// Provider and service scaling timings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScalingModel {
    /// provider → node type → timings.
    #[serde(default)]
    pub providers: BTreeMap<String, BTreeMap<String, ScalingInfo>>,
    /// service → timings.
    #[serde(default)]
    pub services: BTreeMap<String, ScalingInfo>,
}

impl ScalingModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, provider: &str, node_type: &str, info: ScalingInfo) -> Self {
        self.providers
            .entry(provider.to_string())
            .or_default()
            .insert(node_type.to_string(), info);
        self
    }

    pub fn with_service(mut self, service: &str, info: ScalingInfo) -> Self {
        self.services.insert(service.to_string(), info);
        self
    }

    fn node_info(&self, provider: &str, node_type: &str) -> Option<&ScalingInfo> {
        self.providers.get(provider)?.get(node_type)
    }

    pub fn booting_duration(&self, provider: &str, node_type: &str) -> Option<Duration> {
        self.node_info(provider, node_type).map(|i| i.booting_duration)
    }

    pub fn termination_duration(&self, provider: &str, node_type: &str) -> Option<Duration> {
        self.node_info(provider, node_type)
            .map(|i| i.termination_duration)
    }

    pub fn service_booting_duration(&self, service: &str) -> Option<Duration> {
        self.services.get(service).map(|i| i.booting_duration)
    }

    pub fn service_termination_duration(&self, service: &str) -> Option<Duration> {
        self.services.get(service).map(|i| i.termination_duration)
    }

    /// Delay before a container group change takes effect.
    ///
    /// Termination duration when scaling down, booting duration otherwise.
    pub fn container_delay(&self, delta: &ContainerGroupDelta) -> Duration {
        let group = &delta.group;
        match self.node_info(&group.provider, &group.node_type) {
            Some(info) => info.for_sign(delta.sign()),
            None => {
                warn!(
                    provider = %group.provider,
                    node_type = %group.node_type,
                    "no scaling info for node type, assuming no delay"
                );
                Duration::ZERO
            }
        }
    }

    /// Split an entities delta into sub-deltas keyed by their own delay.
    ///
    /// Services with equal delays share one sub-delta.
    pub fn entity_delays(&self, delta: &EntitiesGroupDelta) -> BTreeMap<Duration, EntitiesGroupDelta> {
        let mut grouped: BTreeMap<Duration, BTreeMap<String, i64>> = BTreeMap::new();
        for (service, change) in delta.changes() {
            let delay = match self.services.get(service) {
                Some(info) => info.for_sign(*change),
                None => {
                    warn!(service = %service, "no scaling info for service, assuming no delay");
                    Duration::ZERO
                }
            };
            grouped
                .entry(delay)
                .or_default()
                .insert(service.clone(), *change);
        }
        grouped
            .into_iter()
            .map(|(delay, changes)| (delay, EntitiesGroupDelta::from_uniform(changes)))
            .collect()
    }
}
