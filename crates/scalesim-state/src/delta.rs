//! Delta hierarchy: signed changes mirroring the state hierarchy.
//!
//! ```text
//! PlatformStateDelta ─► RegionalDelta ─► GeneralizedDelta ─┬─► ContainerGroupDelta
//!                                                           └─► EntitiesGroupDelta
//! ```
//!
//! A [`GeneralizedDelta`] pairs a replica-count change of one homogeneous
//! container group with the instance-count changes of the services it
//! hosts. Enforcement turns it into a schedule of sub-deltas that respects
//! boot and termination delays:
//!
//! - scale-down: entities drain first, containers are removed after the
//!   slowest entity has terminated;
//! - scale-up: containers boot first, entities start once their container
//!   is ready.
//!
//! Each generalized delta memoizes its schedule per base timestamp, so
//! asking twice is free and always yields the same answer.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Add;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::platform::{EntityChanges, GroupId, GroupSpec};
use crate::scaling_model::ScalingModel;
use crate::score::StateDuration;
use crate::time::Timestamp;

// ── Container level ───────────────────────────────────────────────

/// Replica-count change for one homogeneous container group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerGroupDelta {
    pub group: GroupSpec,
    /// Signed number of containers to add (+) or remove (−).
    pub count: i64,
    /// The change still has to go through enforcement.
    pub in_change: bool,
    /// Lookahead copy: identifies the group but never changes its size.
    #[serde(rename = "virtual")]
    pub is_virtual: bool,
}

impl ContainerGroupDelta {
    pub fn new(group: GroupSpec, count: i64) -> Self {
        Self {
            group,
            count,
            in_change: count != 0,
            is_virtual: false,
        }
    }

    /// A delta that leaves the container count untouched.
    pub fn unchanged(group: GroupSpec) -> Self {
        Self::new(group, 0)
    }

    pub fn sign(&self) -> i64 {
        self.count.signum()
    }

    /// Committed: applying it changes the container count.
    pub fn is_enforced(&self) -> bool {
        !self.in_change && !self.is_virtual
    }

    pub fn enforced(&self) -> Self {
        Self {
            in_change: false,
            ..self.clone()
        }
    }

    pub fn virtual_copy(&self) -> Self {
        Self {
            is_virtual: true,
            ..self.clone()
        }
    }
}

// ── Entity level ──────────────────────────────────────────────────

/// Instance-count changes for the services hosted in one group.
///
/// All changes share one sign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntitiesGroupDelta {
    changes: EntityChanges,
}

impl EntitiesGroupDelta {
    /// Build from raw changes. Zero entries are dropped; mixing signs is
    /// rejected.
    pub fn new(changes: EntityChanges) -> StateResult<Self> {
        let changes: EntityChanges = changes.into_iter().filter(|(_, c)| *c != 0).collect();
        let ups = changes.values().any(|c| *c > 0);
        let downs = changes.values().any(|c| *c < 0);
        if ups && downs {
            return Err(StateError::MixedEntitySigns(format!("{changes:?}")));
        }
        Ok(Self { changes })
    }

    /// Caller guarantees a uniform sign.
    pub(crate) fn from_uniform(changes: EntityChanges) -> Self {
        Self { changes }
    }

    pub fn changes(&self) -> &EntityChanges {
        &self.changes
    }

    pub fn sign(&self) -> i64 {
        self.changes.values().next().map_or(0, |c| c.signum())
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

// ── Generalized delta ─────────────────────────────────────────────

/// Timestamp → sub-deltas that become effective at that time.
pub type EnforcementSchedule = BTreeMap<Timestamp, Vec<GeneralizedDelta>>;

/// A container group change paired with the change of its entities.
#[derive(Debug, Clone, Serialize)]
pub struct GeneralizedDelta {
    container_group_delta: ContainerGroupDelta,
    entities_group_delta: Option<EntitiesGroupDelta>,
    #[serde(skip)]
    cached_enforcement: BTreeMap<Timestamp, EnforcementSchedule>,
}

impl PartialEq for GeneralizedDelta {
    fn eq(&self, other: &Self) -> bool {
        self.container_group_delta == other.container_group_delta
            && self.entities_group_delta == other.entities_group_delta
    }
}

impl GeneralizedDelta {
    /// Pair the two levels. Scale-up must pair with scale-up and
    /// scale-down with scale-down.
    pub fn new(
        container_group_delta: ContainerGroupDelta,
        entities_group_delta: Option<EntitiesGroupDelta>,
    ) -> StateResult<Self> {
        if let Some(entities) = &entities_group_delta {
            let (c, e) = (container_group_delta.sign(), entities.sign());
            if c != 0 && e != 0 && c != e {
                return Err(StateError::SignMismatch {
                    container: c,
                    entities: e,
                });
            }
        }
        Ok(Self::unchecked(container_group_delta, entities_group_delta))
    }

    fn unchecked(
        container_group_delta: ContainerGroupDelta,
        entities_group_delta: Option<EntitiesGroupDelta>,
    ) -> Self {
        Self {
            container_group_delta,
            entities_group_delta: entities_group_delta.filter(|e| !e.is_empty()),
            cached_enforcement: BTreeMap::new(),
        }
    }

    /// Build the deltas moving `group` by `count` containers and by
    /// `changes` instances.
    ///
    /// Entity changes whose sign disagrees with the container change are
    /// split off into a delta that leaves the container count alone.
    pub fn paired(group: &GroupSpec, count: i64, changes: EntityChanges) -> Vec<GeneralizedDelta> {
        let (ups, downs): (EntityChanges, EntityChanges) = changes
            .into_iter()
            .filter(|(_, c)| *c != 0)
            .partition(|(_, c)| *c > 0);
        let wrap = |m: EntityChanges| (!m.is_empty()).then(|| EntitiesGroupDelta::from_uniform(m));

        let container = ContainerGroupDelta::new(group.clone(), count);
        let unchanged = || ContainerGroupDelta::unchanged(group.clone());
        let mut out = Vec::new();
        match count.signum() {
            1 => {
                out.push(Self::unchecked(container, wrap(ups)));
                if let Some(d) = wrap(downs) {
                    out.push(Self::unchecked(unchanged(), Some(d)));
                }
            }
            -1 => {
                out.push(Self::unchecked(container, wrap(downs)));
                if let Some(u) = wrap(ups) {
                    out.push(Self::unchecked(unchanged(), Some(u)));
                }
            }
            _ => {
                for part in [wrap(ups), wrap(downs)].into_iter().flatten() {
                    out.push(Self::unchecked(unchanged(), Some(part)));
                }
            }
        }
        out
    }

    pub fn container_group_delta(&self) -> &ContainerGroupDelta {
        &self.container_group_delta
    }

    pub fn entities_group_delta(&self) -> Option<&EntitiesGroupDelta> {
        self.entities_group_delta.as_ref()
    }

    /// Whether applying this delta changes anything at all.
    pub fn carries_change(&self) -> bool {
        let container = &self.container_group_delta;
        (container.count != 0 && !container.is_virtual) || self.entities_group_delta.is_some()
    }

    /// Takes containers or instances away from its group.
    pub fn is_removal(&self) -> bool {
        let container = &self.container_group_delta;
        (container.count < 0 && !container.is_virtual)
            || self.entities_group_delta.as_ref().is_some_and(|e| e.sign() < 0)
    }

    /// Base timestamps with a memoized schedule.
    pub fn cached_timestamps(&self) -> impl Iterator<Item = Timestamp> + '_ {
        self.cached_enforcement.keys().copied()
    }

    /// Schedule this delta starting at `delta_timestamp`.
    ///
    /// Deltas that are not in change, or are virtual, are terminal and
    /// yield an empty schedule. The result is memoized per timestamp.
    pub fn enforce(&mut self, scaling_model: &ScalingModel, delta_timestamp: Timestamp) -> EnforcementSchedule {
        if let Some(cached) = self.cached_enforcement.get(&delta_timestamp) {
            return cached.clone();
        }

        let schedule = self.compute_schedule(scaling_model, delta_timestamp);
        debug!(
            group = %self.container_group_delta.group.id,
            timestamp = %delta_timestamp,
            entries = schedule.len(),
            "enforced generalized delta"
        );
        self.cached_enforcement
            .insert(delta_timestamp, schedule.clone());
        schedule
    }

    fn compute_schedule(&self, scaling_model: &ScalingModel, ts: Timestamp) -> EnforcementSchedule {
        let mut schedule = EnforcementSchedule::new();
        let container = &self.container_group_delta;
        if !container.in_change || container.is_virtual {
            return schedule;
        }

        let container_delay = scaling_model.container_delay(container);
        let entity_delays = self
            .entities_group_delta
            .as_ref()
            .map(|e| scaling_model.entity_delays(e))
            .unwrap_or_default();
        let enforced = container.enforced();

        let mut push = |at: Timestamp, delta: GeneralizedDelta| {
            schedule.entry(at).or_default().push(delta);
        };

        match container.sign() {
            s if s < 0 => {
                // Containers stay while their entities drain.
                push(ts, Self::unchecked(container.clone(), None));
                let max_entity_delay = entity_delays.keys().max().copied().unwrap_or(Duration::ZERO);
                for (delay, entities) in entity_delays {
                    push(ts + delay, Self::unchecked(container.virtual_copy(), Some(entities)));
                }
                push(ts + max_entity_delay + container_delay, Self::unchecked(enforced, None));
            }
            s if s > 0 => {
                let ready = ts + container_delay;
                for (delay, entities) in entity_delays {
                    push(ready + delay, Self::unchecked(enforced.virtual_copy(), Some(entities)));
                }
                push(ready, Self::unchecked(enforced, None));
            }
            _ => {}
        }
        schedule
    }

    /// Time from `delta_timestamp` until the last scheduled sub-delta.
    pub fn till_full_enforcement(&mut self, scaling_model: &ScalingModel, delta_timestamp: Timestamp) -> Duration {
        self.enforce(scaling_model, delta_timestamp)
            .keys()
            .next_back()
            .map_or(Duration::ZERO, |last| *last - delta_timestamp)
    }
}

// ── Regional delta ────────────────────────────────────────────────

/// All generalized deltas for one region.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionalDelta {
    region_name: String,
    generalized_deltas: Vec<GeneralizedDelta>,
}

impl RegionalDelta {
    pub fn new(region_name: &str) -> Self {
        Self {
            region_name: region_name.to_string(),
            generalized_deltas: Vec::new(),
        }
    }

    pub fn with_deltas(region_name: &str, deltas: Vec<GeneralizedDelta>) -> Self {
        Self {
            region_name: region_name.to_string(),
            generalized_deltas: deltas,
        }
    }

    pub fn region_name(&self) -> &str {
        &self.region_name
    }

    pub fn deltas(&self) -> &[GeneralizedDelta] {
        &self.generalized_deltas
    }

    pub fn push(&mut self, delta: GeneralizedDelta) {
        self.generalized_deltas.push(delta);
    }

    pub fn is_empty(&self) -> bool {
        self.generalized_deltas.is_empty()
    }

    pub fn merge(&mut self, other: RegionalDelta) -> StateResult<()> {
        if other.region_name != self.region_name {
            return Err(StateError::RegionMismatch {
                expected: self.region_name.clone(),
                found: other.region_name,
            });
        }
        self.generalized_deltas.extend(other.generalized_deltas);
        Ok(())
    }

    /// Net container change per node type.
    pub fn nodes_change(&self) -> BTreeMap<String, i64> {
        let mut out = BTreeMap::new();
        for delta in &self.generalized_deltas {
            let c = &delta.container_group_delta;
            if !c.is_virtual && c.count != 0 {
                *out.entry(c.group.node_type.clone()).or_insert(0) += c.count;
            }
        }
        out
    }

    /// Enforce every generalized delta.
    ///
    /// Terminal deltas that still carry a change are passed through at
    /// `delta_timestamp` unchanged.
    pub fn enforce(&mut self, scaling_model: &ScalingModel, delta_timestamp: Timestamp) -> BTreeMap<Timestamp, RegionalDelta> {
        let mut out: BTreeMap<Timestamp, RegionalDelta> = BTreeMap::new();
        for delta in &mut self.generalized_deltas {
            let schedule = delta.enforce(scaling_model, delta_timestamp);
            if schedule.is_empty() {
                if delta.carries_change() {
                    let passthrough = Self::unchecked_copy(delta);
                    out.entry(delta_timestamp)
                        .or_insert_with(|| RegionalDelta::new(&self.region_name))
                        .push(passthrough);
                }
                continue;
            }
            for (ts, sub_deltas) in schedule {
                out.entry(ts)
                    .or_insert_with(|| RegionalDelta::new(&self.region_name))
                    .generalized_deltas
                    .extend(sub_deltas);
            }
        }
        out
    }

    fn unchecked_copy(delta: &GeneralizedDelta) -> GeneralizedDelta {
        GeneralizedDelta::unchecked(
            delta.container_group_delta.clone(),
            delta.entities_group_delta.clone(),
        )
    }

    /// Longest enforcement time among the region's deltas.
    pub fn till_full_enforcement(&mut self, scaling_model: &ScalingModel, delta_timestamp: Timestamp) -> Duration {
        self.generalized_deltas
            .iter_mut()
            .map(|d| d.till_full_enforcement(scaling_model, delta_timestamp))
            .max()
            .unwrap_or(Duration::ZERO)
    }
}

// ── Platform delta ────────────────────────────────────────────────

/// Region name → regional delta.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlatformStateDelta {
    deltas_per_region: BTreeMap<String, RegionalDelta>,
    is_enforced: bool,
}

impl PlatformStateDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_regional(regional_deltas: impl IntoIterator<Item = RegionalDelta>) -> Self {
        let mut delta = Self::new();
        for rd in regional_deltas {
            delta.add_regional(rd);
        }
        delta
    }

    fn create_enforced(regional_deltas: impl IntoIterator<Item = RegionalDelta>) -> Self {
        Self {
            is_enforced: true,
            ..Self::from_regional(regional_deltas)
        }
    }

    /// Add a regional delta, merging with an existing one for the same region.
    pub fn add_regional(&mut self, regional_delta: RegionalDelta) {
        if regional_delta.is_empty() {
            return;
        }
        match self.deltas_per_region.get_mut(&regional_delta.region_name) {
            Some(existing) => existing
                .generalized_deltas
                .extend(regional_delta.generalized_deltas),
            None => {
                self.deltas_per_region
                    .insert(regional_delta.region_name.clone(), regional_delta);
            }
        }
    }

    pub fn is_enforced(&self) -> bool {
        self.is_enforced
    }

    pub fn regions(&self) -> impl Iterator<Item = &RegionalDelta> {
        self.deltas_per_region.values()
    }

    pub fn region(&self, region_name: &str) -> Option<&RegionalDelta> {
        self.deltas_per_region.get(region_name)
    }

    pub fn is_empty(&self) -> bool {
        self.deltas_per_region.values().all(RegionalDelta::is_empty)
    }

    /// Net container change per node type across all regions.
    pub fn nodes_change(&self) -> BTreeMap<String, i64> {
        let mut out = BTreeMap::new();
        for rd in self.deltas_per_region.values() {
            for (node_type, count) in rd.nodes_change() {
                *out.entry(node_type).or_insert(0) += count;
            }
        }
        out
    }

    pub fn contains_platform_state_change(&self) -> bool {
        self.nodes_change().values().any(|c| *c != 0)
    }

    pub fn contains_platform_scale_up(&self) -> bool {
        self.nodes_change().values().any(|c| *c > 0)
    }

    /// Enforce all regions, grouping the results by timestamp.
    pub fn enforce(&mut self, scaling_model: &ScalingModel, delta_timestamp: Timestamp) -> BTreeMap<Timestamp, PlatformStateDelta> {
        let mut per_ts: BTreeMap<Timestamp, Vec<RegionalDelta>> = BTreeMap::new();
        for rd in self.deltas_per_region.values_mut() {
            for (ts, enforced) in rd.enforce(scaling_model, delta_timestamp) {
                per_ts.entry(ts).or_default().push(enforced);
            }
        }
        per_ts
            .into_iter()
            .map(|(ts, rds)| (ts, Self::create_enforced(rds)))
            .collect()
    }

    /// Groups this delta takes containers or instances from.
    pub fn removed_groups(&self) -> BTreeSet<GroupId> {
        self.deltas_per_region
            .values()
            .flat_map(|rd| rd.generalized_deltas.iter())
            .filter(|gd| gd.is_removal())
            .map(|gd| gd.container_group_delta.group.id.clone())
            .collect()
    }

    /// When each touched group has absorbed this delta, if it starts at
    /// `delta_timestamp`.
    pub fn settling_times(&mut self, scaling_model: &ScalingModel, delta_timestamp: Timestamp) -> BTreeMap<GroupId, Timestamp> {
        let mut out: BTreeMap<GroupId, Timestamp> = BTreeMap::new();
        for gd in self.deltas_per_region.values_mut().flat_map(|rd| rd.generalized_deltas.iter_mut()) {
            if !gd.carries_change() {
                continue;
            }
            let settled = delta_timestamp + gd.till_full_enforcement(scaling_model, delta_timestamp);
            let slot = out.entry(gd.container_group_delta.group.id.clone()).or_insert(settled);
            *slot = (*slot).max(settled);
        }
        out
    }

    pub fn till_full_enforcement(&mut self, scaling_model: &ScalingModel, delta_timestamp: Timestamp) -> StateDuration {
        StateDuration::from_regions(
            self.deltas_per_region
                .iter_mut()
                .map(|(name, rd)| (name.clone(), rd.till_full_enforcement(scaling_model, delta_timestamp)))
                .collect(),
        )
    }
}

impl Add for PlatformStateDelta {
    type Output = PlatformStateDelta;

    fn add(mut self, rhs: PlatformStateDelta) -> PlatformStateDelta {
        for rd in rhs.deltas_per_region.into_values() {
            self.add_regional(rd);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaling_model::ScalingInfo;

    fn group() -> GroupSpec {
        let mut placement = BTreeMap::new();
        placement.insert("api".to_string(), 2);
        GroupSpec::new("eu", "small", "aws", placement)
    }

    fn model() -> ScalingModel {
        ScalingModel::new()
            .with_node(
                "aws",
                "small",
                ScalingInfo::new(Duration::from_secs(180), Duration::from_secs(30)),
            )
            .with_service(
                "api",
                ScalingInfo::new(Duration::from_secs(60), Duration::from_secs(20)),
            )
            .with_service(
                "db",
                ScalingInfo::new(Duration::from_secs(90), Duration::from_secs(45)),
            )
    }

    fn entities(pairs: &[(&str, i64)]) -> EntitiesGroupDelta {
        EntitiesGroupDelta::new(pairs.iter().map(|(s, c)| (s.to_string(), *c)).collect()).unwrap()
    }

    #[test]
    fn rejects_sign_disagreement() {
        let err = GeneralizedDelta::new(
            ContainerGroupDelta::new(group(), 2),
            Some(entities(&[("api", -1)])),
        )
        .unwrap_err();
        assert_eq!(
            err,
            StateError::SignMismatch {
                container: 1,
                entities: -1
            }
        );
    }

    #[test]
    fn zero_container_change_pairs_with_any_sign() {
        assert!(GeneralizedDelta::new(
            ContainerGroupDelta::unchanged(group()),
            Some(entities(&[("api", -1)])),
        )
        .is_ok());
    }

    #[test]
    fn entities_delta_rejects_mixed_signs() {
        let mut changes = EntityChanges::new();
        changes.insert("api".to_string(), 1);
        changes.insert("db".to_string(), -1);
        assert!(matches!(
            EntitiesGroupDelta::new(changes),
            Err(StateError::MixedEntitySigns(_))
        ));
    }

    #[test]
    fn scale_up_boots_container_before_entities() {
        // boot 3m, service start 1m → container at T+3m, entity at T+4m.
        let mut delta = GeneralizedDelta::new(
            ContainerGroupDelta::new(group(), 1),
            Some(entities(&[("api", 2)])),
        )
        .unwrap();
        let t = Timestamp::from_secs(1000);
        let schedule = delta.enforce(&model(), t);

        let keys: Vec<_> = schedule.keys().copied().collect();
        assert_eq!(keys, vec![t + Duration::from_secs(180), t + Duration::from_secs(240)]);

        let ready = &schedule[&keys[0]][0];
        assert!(ready.container_group_delta().is_enforced());
        assert!(ready.entities_group_delta().is_none());

        let start = &schedule[&keys[1]][0];
        assert!(start.container_group_delta().is_virtual);
        assert_eq!(start.entities_group_delta().unwrap().changes()["api"], 2);
    }

    #[test]
    fn scale_down_drains_entities_before_removing_containers() {
        let mut delta = GeneralizedDelta::new(
            ContainerGroupDelta::new(group(), -1),
            Some(entities(&[("api", -2), ("db", -1)])),
        )
        .unwrap();
        let t = Timestamp::from_secs(0);
        let schedule = delta.enforce(&model(), t);

        // Immediately: container delta unchanged, no entities.
        let first = &schedule[&t];
        assert_eq!(first.len(), 1);
        assert!(first[0].container_group_delta().in_change);
        assert!(first[0].entities_group_delta().is_none());

        // Entities drain at their own pace.
        let api = &schedule[&(t + Duration::from_secs(20))][0];
        assert!(api.container_group_delta().is_virtual);
        assert_eq!(api.entities_group_delta().unwrap().changes()["api"], -2);
        assert!(schedule.contains_key(&(t + Duration::from_secs(45))));

        // Containers go after the slowest entity plus termination.
        let (last_ts, last) = schedule.iter().next_back().unwrap();
        assert_eq!(*last_ts, t + Duration::from_secs(45 + 30));
        assert!(last[0].container_group_delta().is_enforced());
        assert_eq!(last[0].container_group_delta().count, -1);
    }

    #[test]
    fn enforcement_order_holds_for_every_shape() {
        let secs = Duration::from_secs;
        let entity_sets: [&[&str]; 3] = [&[], &["api"], &["api", "db"]];
        let t = Timestamp::from_secs(100);

        for (boot, term) in [(0, 0), (30, 5), (180, 60)] {
            for (api_delay, db_delay) in [(0, 0), (10, 40), (60, 20)] {
                let model = ScalingModel::new()
                    .with_node("aws", "small", ScalingInfo::new(secs(boot), secs(term)))
                    .with_service("api", ScalingInfo::new(secs(api_delay), secs(api_delay)))
                    .with_service("db", ScalingInfo::new(secs(db_delay), secs(db_delay)));

                for count in [-2i64, -1, 1, 3] {
                    for services in entity_sets {
                        let changes: EntityChanges = services.iter().map(|s| (s.to_string(), count.signum() * 2)).collect();
                        let entities = (!changes.is_empty()).then(|| EntitiesGroupDelta::new(changes).unwrap());
                        let mut delta = GeneralizedDelta::new(ContainerGroupDelta::new(group(), count), entities).unwrap();
                        let schedule = delta.enforce(&model, t);
                        let shape = format!("boot={boot} term={term} api={api_delay} db={db_delay} count={count} {services:?}");

                        let container_at: Vec<Timestamp> = schedule
                            .iter()
                            .filter(|(_, ds)| ds.iter().any(|d| d.container_group_delta().is_enforced()))
                            .map(|(ts, _)| *ts)
                            .collect();
                        let entity_at: Vec<Timestamp> = schedule
                            .iter()
                            .filter(|(_, ds)| ds.iter().any(|d| d.entities_group_delta().is_some()))
                            .map(|(ts, _)| *ts)
                            .collect();
                        let moved: i64 = schedule
                            .values()
                            .flatten()
                            .filter_map(|d| d.entities_group_delta())
                            .flat_map(|e| e.changes().values())
                            .sum();

                        assert_eq!(container_at.len(), 1, "{shape}");
                        let container_at = container_at[0];
                        assert!(schedule.keys().all(|ts| *ts >= t), "{shape}");
                        assert_eq!(moved, count.signum() * 2 * services.len() as i64, "{shape}");

                        if count > 0 {
                            assert_eq!(container_at, t + secs(boot), "{shape}");
                            assert!(entity_at.iter().all(|e| *e >= container_at), "{shape}");
                        } else {
                            let slowest = services
                                .iter()
                                .map(|s| if *s == "api" { api_delay } else { db_delay })
                                .max()
                                .unwrap_or(0);
                            assert_eq!(container_at, t + secs(slowest + term), "{shape}");
                            assert!(entity_at.iter().all(|e| *e <= container_at), "{shape}");
                        }

                        let last = schedule.keys().next_back().copied().unwrap();
                        assert_eq!(delta.till_full_enforcement(&model, t), last - t, "{shape}");
                    }
                }
            }
        }
    }

    #[test]
    fn removal_and_settling_per_group() {
        let up = GeneralizedDelta::new(ContainerGroupDelta::new(group(), 1), Some(entities(&[("api", 2)]))).unwrap();
        let drain = GeneralizedDelta::new(ContainerGroupDelta::unchanged(group()), Some(entities(&[("api", -1)]))).unwrap();
        assert!(!up.is_removal());
        assert!(drain.is_removal());

        let mut delta = PlatformStateDelta::from_regional([RegionalDelta::with_deltas("eu", vec![up, drain])]);
        assert_eq!(delta.removed_groups().into_iter().collect::<Vec<_>>(), vec![group().id]);

        // Boot 180s plus api start 60s.
        let t = Timestamp::from_secs(10);
        let settled = delta.settling_times(&model(), t);
        assert_eq!(settled[&group().id], t + Duration::from_secs(240));
    }

    #[test]
    fn terminal_deltas_produce_no_schedule() {
        let mut virtual_delta = GeneralizedDelta::new(
            ContainerGroupDelta::new(group(), 1).virtual_copy(),
            Some(entities(&[("api", 1)])),
        )
        .unwrap();
        assert!(virtual_delta.enforce(&model(), Timestamp::ZERO).is_empty());

        let mut settled = GeneralizedDelta::new(
            ContainerGroupDelta::new(group(), 1).enforced(),
            None,
        )
        .unwrap();
        assert!(settled.enforce(&model(), Timestamp::ZERO).is_empty());
        assert_eq!(
            settled.till_full_enforcement(&model(), Timestamp::ZERO),
            Duration::ZERO
        );
    }

    #[test]
    fn till_full_enforcement_is_memoized() {
        let mut delta = GeneralizedDelta::new(
            ContainerGroupDelta::new(group(), 1),
            Some(entities(&[("db", 1)])),
        )
        .unwrap();
        let t = Timestamp::from_secs(5);
        let first = delta.till_full_enforcement(&model(), t);
        let second = delta.till_full_enforcement(&model(), t);
        assert_eq!(first, Duration::from_secs(180 + 90));
        assert_eq!(first, second);
        assert_eq!(delta.cached_timestamps().collect::<Vec<_>>(), vec![t]);

        // A different base keeps the earlier entry.
        delta.till_full_enforcement(&model(), Timestamp::from_secs(6));
        assert_eq!(delta.cached_timestamps().count(), 2);
    }

    #[test]
    fn paired_splits_disagreeing_entity_changes() {
        let mut changes = EntityChanges::new();
        changes.insert("api".to_string(), 3);
        changes.insert("db".to_string(), -1);
        let deltas = GeneralizedDelta::paired(&group(), 1, changes);

        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].container_group_delta().count, 1);
        assert_eq!(deltas[0].entities_group_delta().unwrap().changes()["api"], 3);
        assert_eq!(deltas[1].container_group_delta().count, 0);
        assert_eq!(deltas[1].entities_group_delta().unwrap().changes()["db"], -1);
    }

    #[test]
    fn regional_merge_checks_region() {
        let mut eu = RegionalDelta::new("eu");
        let err = eu.merge(RegionalDelta::new("us")).unwrap_err();
        assert!(matches!(err, StateError::RegionMismatch { .. }));
    }

    #[test]
    fn platform_delta_addition_merges_regions() {
        let gd = || GeneralizedDelta::new(ContainerGroupDelta::new(group(), 2), None).unwrap();
        let a = PlatformStateDelta::from_regional([RegionalDelta::with_deltas("eu", vec![gd()])]);
        let b = PlatformStateDelta::from_regional([RegionalDelta::with_deltas("eu", vec![gd()])]);
        let sum = a + b;

        assert_eq!(sum.region("eu").unwrap().deltas().len(), 2);
        assert_eq!(sum.nodes_change()["small"], 4);
        assert!(sum.contains_platform_scale_up());
    }

    #[test]
    fn platform_enforce_passes_terminal_changes_through() {
        let entity_only = GeneralizedDelta::new(
            ContainerGroupDelta::unchanged(group()),
            Some(entities(&[("api", 1)])),
        )
        .unwrap();
        let scale_up = GeneralizedDelta::new(ContainerGroupDelta::new(group(), 1), None).unwrap();
        let mut delta = PlatformStateDelta::from_regional([RegionalDelta::with_deltas(
            "eu",
            vec![entity_only, scale_up],
        )]);

        let t = Timestamp::from_secs(10);
        let enforced = delta.enforce(&model(), t);
        assert!(enforced.values().all(PlatformStateDelta::is_enforced));
        assert_eq!(enforced[&t].region("eu").unwrap().deltas().len(), 1);
        assert!(enforced.contains_key(&(t + Duration::from_secs(180))));

        let till = delta.till_full_enforcement(&model(), t);
        assert_eq!(till.get("eu"), Duration::from_secs(180));
    }
}
