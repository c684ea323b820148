//! Platform state: regions, homogeneous container groups, and their entities.
//!
//! ```text
//! PlatformState ─► Region ─► node type ─► HomogeneousContainerGroup ─► service → instances
//! ```
//!
//! A homogeneous group stores how many identical containers exist instead
//! of listing each one. Every container hosts the same per-container
//! mixture, so a group only has slots for the services in that mixture.
//!
//! States are values: [`PlatformState::apply`] returns a new state and
//! never mutates the receiver.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::catalog::{ResourceCatalog, SystemCapacity, CAPACITY_EPSILON};
use crate::delta::{GeneralizedDelta, PlatformStateDelta, RegionalDelta};
use crate::error::{StateError, StateResult};

/// service → instance count.
pub type EntityCounts = BTreeMap<String, u32>;
/// service → signed instance change.
pub type EntityChanges = BTreeMap<String, i64>;
/// region → service → instance count.
pub type RegionalEntities = BTreeMap<String, EntityCounts>;
/// region → service → signed instance change.
pub type RegionalChanges = BTreeMap<String, EntityChanges>;

/// Add every count of `other` into `into`.
pub fn combine_entities(into: &mut RegionalEntities, other: &RegionalEntities) {
    for (region, counts) in other {
        let target = into.entry(region.clone()).or_default();
        for (service, count) in counts {
            *target.entry(service.clone()).or_insert(0) += count;
        }
    }
}

// ── Group identity ────────────────────────────────────────────────

/// Stable identifier of a homogeneous container group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    /// Hash of `(region, node type, per-container placement)`.
    pub fn derive(region: &str, node_type: &str, placement: &EntityCounts) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(region.as_bytes());
        hasher.update([0u8]);
        hasher.update(node_type.as_bytes());
        for (service, count) in placement {
            hasher.update([0u8]);
            hasher.update(service.as_bytes());
            hasher.update(count.to_le_bytes());
        }
        let digest = hasher.finalize();
        Self(format!("{node_type}-{}", hex::encode(&digest[..6])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything that identifies a group, independent of its size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub id: GroupId,
    pub region: String,
    pub node_type: String,
    pub provider: String,
    /// Instances per container the group was provisioned for.
    pub placement: EntityCounts,
}

impl GroupSpec {
    pub fn new(region: &str, node_type: &str, provider: &str, placement: EntityCounts) -> Self {
        Self {
            id: GroupId::derive(region, node_type, &placement),
            region: region.to_string(),
            node_type: node_type.to_string(),
            provider: provider.to_string(),
            placement,
        }
    }
}

// ── Homogeneous container group ───────────────────────────────────

/// A set of identical containers and the service instances they host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomogeneousContainerGroup {
    pub spec: GroupSpec,
    pub containers_count: u32,
    /// Total instances per service across the whole group.
    pub entities: EntityCounts,
}

impl HomogeneousContainerGroup {
    pub fn new(spec: GroupSpec, containers_count: u32, entities: EntityCounts) -> Self {
        Self {
            spec,
            containers_count,
            entities,
        }
    }

    pub fn id(&self) -> &GroupId {
        &self.spec.id
    }

    pub fn is_empty(&self) -> bool {
        self.containers_count == 0 && self.entities.values().all(|c| *c == 0)
    }

    /// Capacity used by the hosted instances, in units of one container.
    pub fn consumed_capacity(&self, catalog: &ResourceCatalog) -> StateResult<SystemCapacity> {
        let node = catalog.node_type(&self.spec.node_type)?;
        let mut consumed = SystemCapacity::zero();
        for (service, count) in &self.entities {
            let req = catalog.requirements(service)?;
            consumed += node.capacity_of(req) * f64::from(*count);
        }
        Ok(consumed)
    }

    /// Open slots for `service` left by the per-container mixture.
    ///
    /// Services outside the mixture have no slots.
    pub fn free_instances_for(&self, service: &str, catalog: &ResourceCatalog) -> StateResult<u32> {
        let req = catalog.requirements(service)?;
        if !req.allows(&self.spec.node_type) {
            return Ok(0);
        }
        let per_container = self.spec.placement.get(service).copied().unwrap_or(0);
        let hosted = self.entities.get(service).copied().unwrap_or(0);
        Ok(per_container.saturating_mul(self.containers_count).saturating_sub(hosted))
    }

    /// Fewest containers that still hold every hosted instance.
    pub fn containers_needed(&self, catalog: &ResourceCatalog) -> StateResult<u32> {
        let by_mixture = self
            .entities
            .iter()
            .filter_map(|(service, hosted)| {
                let per_container = self.spec.placement.get(service).copied().unwrap_or(0);
                (per_container > 0).then(|| hosted.div_ceil(per_container))
            })
            .max()
            .unwrap_or(0);
        // Instances outside the mixture still need room.
        let consumed = self.consumed_capacity(catalog)?.collapse();
        let by_capacity = (consumed - CAPACITY_EPSILON).ceil().max(0.0) as u32;
        Ok(by_mixture.max(by_capacity))
    }
}

// ── Region ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApplyMode {
    /// Only enforced container deltas change container counts.
    Committed,
    /// Every non-virtual container delta counts, as if already enforced.
    Speculative,
}

/// All container groups of one region, keyed by node type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub groups: BTreeMap<String, BTreeMap<GroupId, HomogeneousContainerGroup>>,
}

impl Region {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            groups: BTreeMap::new(),
        }
    }

    pub fn with_group(mut self, group: HomogeneousContainerGroup) -> Self {
        self.insert_group(group);
        self
    }

    /// Insert a group, merging with an existing group of the same id.
    pub fn insert_group(&mut self, group: HomogeneousContainerGroup) {
        let by_type = self.groups.entry(group.spec.node_type.clone()).or_default();
        match by_type.get_mut(group.id()) {
            Some(existing) => {
                existing.containers_count += group.containers_count;
                for (service, count) in group.entities {
                    *existing.entities.entry(service).or_insert(0) += count;
                }
            }
            None => {
                by_type.insert(group.id().clone(), group);
            }
        }
    }

    pub fn groups(&self) -> impl Iterator<Item = &HomogeneousContainerGroup> {
        self.groups.values().flat_map(|g| g.values())
    }

    fn groups_mut(&mut self) -> impl Iterator<Item = &mut HomogeneousContainerGroup> {
        self.groups.values_mut().flat_map(|g| g.values_mut())
    }

    pub fn group(&self, id: &GroupId) -> Option<&HomogeneousContainerGroup> {
        self.groups.values().find_map(|g| g.get(id))
    }

    pub fn is_empty(&self) -> bool {
        self.groups().next().is_none()
    }

    /// Containers per node type.
    pub fn nodes_count(&self) -> BTreeMap<String, u32> {
        self.groups
            .iter()
            .map(|(node_type, groups)| (node_type.clone(), groups.values().map(|g| g.containers_count).sum()))
            .filter(|(_, count)| *count > 0)
            .collect()
    }

    /// Total instances per service across all groups.
    pub fn collective_entities(&self) -> EntityCounts {
        let mut out = EntityCounts::new();
        for group in self.groups() {
            for (service, count) in &group.entities {
                if *count > 0 {
                    *out.entry(service.clone()).or_insert(0) += count;
                }
            }
        }
        out
    }

    fn apply_with(&self, delta: &RegionalDelta, mode: ApplyMode) -> StateResult<Region> {
        if delta.region_name() != self.name {
            return Err(StateError::RegionMismatch {
                expected: self.name.clone(),
                found: delta.region_name().to_string(),
            });
        }
        let mut next = self.clone();
        for gd in delta.deltas() {
            next.apply_generalized(gd, mode)?;
        }
        Ok(next)
    }

    fn apply_generalized(&mut self, gd: &GeneralizedDelta, mode: ApplyMode) -> StateResult<()> {
        let container = gd.container_group_delta();
        let spec = &container.group;
        if spec.region != self.name {
            return Err(StateError::RegionMismatch {
                expected: self.name.clone(),
                found: spec.region.clone(),
            });
        }

        let changes_count = match mode {
            ApplyMode::Committed => container.is_enforced(),
            ApplyMode::Speculative => !container.is_virtual,
        };

        let by_type = self.groups.entry(spec.node_type.clone()).or_default();
        let group = by_type
            .entry(spec.id.clone())
            .or_insert_with(|| HomogeneousContainerGroup::new(spec.clone(), 0, EntityCounts::new()));

        if changes_count && container.count != 0 {
            let next = i64::from(group.containers_count) + container.count;
            group.containers_count = u32::try_from(next).map_err(|_| StateError::NegativeCount {
                group: spec.id.to_string(),
                what: "containers".to_string(),
            })?;
        }

        if let Some(entities) = gd.entities_group_delta() {
            for (service, change) in entities.changes() {
                let current = i64::from(group.entities.get(service).copied().unwrap_or(0));
                let next = u32::try_from(current + change).map_err(|_| StateError::NegativeCount {
                    group: spec.id.to_string(),
                    what: service.clone(),
                })?;
                if next == 0 {
                    group.entities.remove(service);
                } else {
                    group.entities.insert(service.clone(), next);
                }
            }
        }

        if group.is_empty() {
            by_type.remove(&spec.id);
        }
        if by_type.is_empty() {
            self.groups.remove(&spec.node_type);
        }
        Ok(())
    }

    /// Fit a change into idle capacity of existing groups.
    ///
    /// Scale-ups consume free capacity without adding containers; scale-downs
    /// remove instances and shrink groups that then need fewer containers.
    /// Returns the resulting delta and the scale-up part that did not fit.
    /// Scale-downs for instances that do not exist are dropped.
    pub fn compute_soft_adjustment(
        &self,
        change: &EntityChanges,
        catalog: &ResourceCatalog,
    ) -> StateResult<(RegionalDelta, EntityChanges)> {
        let mut working = self.clone();
        let mut per_group: BTreeMap<GroupId, EntityChanges> = BTreeMap::new();
        let mut unmet = EntityChanges::new();

        for (service, &delta) in change {
            if delta > 0 {
                let mut remaining = delta;
                for group in working.groups_mut() {
                    if remaining == 0 {
                        break;
                    }
                    let take = i64::from(group.free_instances_for(service, catalog)?).min(remaining);
                    if take > 0 {
                        *group.entities.entry(service.clone()).or_insert(0) += take as u32;
                        *per_group
                            .entry(group.id().clone())
                            .or_default()
                            .entry(service.clone())
                            .or_insert(0) += take;
                        remaining -= take;
                    }
                }
                if remaining > 0 {
                    unmet.insert(service.clone(), remaining);
                }
            } else if delta < 0 {
                let mut remaining = -delta;
                for group in working.groups_mut() {
                    if remaining == 0 {
                        break;
                    }
                    let hosted = i64::from(group.entities.get(service).copied().unwrap_or(0));
                    let take = hosted.min(remaining);
                    if take > 0 {
                        let left = (hosted - take) as u32;
                        if left == 0 {
                            group.entities.remove(service);
                        } else {
                            group.entities.insert(service.clone(), left);
                        }
                        *per_group
                            .entry(group.id().clone())
                            .or_default()
                            .entry(service.clone())
                            .or_insert(0) -= take;
                        remaining -= take;
                    }
                }
                if remaining > 0 {
                    debug!(
                        region = %self.name,
                        service = %service,
                        remaining,
                        "dropping scale-down for instances that do not exist"
                    );
                }
            }
        }

        let mut regional = RegionalDelta::new(&self.name);
        for (id, changes) in per_group {
            let Some(group) = working.group(&id) else { continue };
            let mut container_change = 0i64;
            if changes.values().any(|c| *c < 0) {
                let needed = group.containers_needed(catalog)?;
                container_change = -i64::from(group.containers_count.saturating_sub(needed));
            }
            for gd in GeneralizedDelta::paired(&group.spec, container_change, changes) {
                regional.push(gd);
            }
        }
        Ok((regional, unmet))
    }

    /// The whole region expressed as additions.
    pub fn to_deltas(&self) -> RegionalDelta {
        let mut regional = RegionalDelta::new(&self.name);
        for group in self.groups() {
            let entities = group
                .entities
                .iter()
                .map(|(s, c)| (s.clone(), i64::from(*c)))
                .collect();
            for gd in GeneralizedDelta::paired(&group.spec, i64::from(group.containers_count), entities) {
                regional.push(gd);
            }
        }
        regional
    }

    /// Group-wise difference turning `self` into `desired`.
    pub fn delta_to(&self, desired: &Region) -> RegionalDelta {
        let ids: BTreeSet<&GroupId> = self.groups().chain(desired.groups()).map(|g| g.id()).collect();
        let mut regional = RegionalDelta::new(&self.name);

        for id in ids {
            let current = self.group(id);
            let target = desired.group(id);
            let Some(spec) = target.or(current).map(|g| &g.spec) else { continue };

            let count_of = |g: Option<&HomogeneousContainerGroup>| g.map_or(0, |g| i64::from(g.containers_count));
            let count_change = count_of(target) - count_of(current);

            let mut changes = EntityChanges::new();
            for (service, count) in target.map(|g| &g.entities).into_iter().flatten() {
                *changes.entry(service.clone()).or_insert(0) += i64::from(*count);
            }
            for (service, count) in current.map(|g| &g.entities).into_iter().flatten() {
                *changes.entry(service.clone()).or_insert(0) -= i64::from(*count);
            }

            for gd in GeneralizedDelta::paired(spec, count_change, changes) {
                regional.push(gd);
            }
        }
        regional
    }
}

// ── Platform state ────────────────────────────────────────────────

/// Root of the world model: region name → region.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformState {
    pub regions: BTreeMap<String, Region>,
}

impl PlatformState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.regions.insert(region.name.clone(), region);
        self
    }

    pub fn region(&self, name: &str) -> Option<&Region> {
        self.regions.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.regions.values().all(Region::is_empty)
    }

    /// Containers per node type over all regions.
    pub fn nodes_count(&self) -> BTreeMap<String, u32> {
        let mut out = BTreeMap::new();
        for region in self.regions.values() {
            for (node_type, count) in region.nodes_count() {
                *out.entry(node_type).or_insert(0) += count;
            }
        }
        out
    }

    /// Apply committed changes: only enforced container deltas resize groups.
    pub fn apply(&self, delta: &PlatformStateDelta) -> StateResult<PlatformState> {
        self.apply_with(delta, ApplyMode::Committed)
    }

    /// Apply a delta as if it were already fully enforced.
    ///
    /// Used for lookahead while planning.
    pub fn apply_virtually(&self, delta: &PlatformStateDelta) -> StateResult<PlatformState> {
        self.apply_with(delta, ApplyMode::Speculative)
    }

    fn apply_with(&self, delta: &PlatformStateDelta, mode: ApplyMode) -> StateResult<PlatformState> {
        let mut next = self.clone();
        for regional in delta.regions() {
            let region = next
                .regions
                .get(regional.region_name())
                .cloned()
                .unwrap_or_else(|| Region::new(regional.region_name()));
            let updated = region.apply_with(regional, mode)?;
            if updated.is_empty() {
                next.regions.remove(regional.region_name());
            } else {
                next.regions.insert(updated.name.clone(), updated);
            }
        }
        Ok(next)
    }

    /// Soft adjustment across regions.
    ///
    /// Regions the state does not know keep their whole scale-up as unmet.
    /// Only positive unmet changes are returned.
    pub fn compute_soft_adjustment(
        &self,
        changes: &RegionalChanges,
        catalog: &ResourceCatalog,
    ) -> StateResult<(PlatformStateDelta, RegionalChanges)> {
        let mut delta = PlatformStateDelta::new();
        let mut unmet = RegionalChanges::new();

        for (region_name, change) in changes {
            let region_unmet = match self.regions.get(region_name) {
                Some(region) => {
                    let (regional, region_unmet) = region.compute_soft_adjustment(change, catalog)?;
                    delta.add_regional(regional);
                    region_unmet
                }
                None => change.clone(),
            };
            let positive: EntityChanges = region_unmet.into_iter().filter(|(_, c)| *c > 0).collect();
            if !positive.is_empty() {
                unmet.insert(region_name.clone(), positive);
            }
        }
        Ok((delta, unmet))
    }

    /// Instances per service per region.
    pub fn collective_entities_states(&self) -> RegionalEntities {
        self.regions
            .iter()
            .map(|(name, region)| (name.clone(), region.collective_entities()))
            .filter(|(_, entities)| !entities.is_empty())
            .collect()
    }

    pub fn to_deltas(&self) -> PlatformStateDelta {
        PlatformStateDelta::from_regional(self.regions.values().map(Region::to_deltas))
    }

    /// Delta that turns `self` into `desired`.
    pub fn delta_to(&self, desired: &PlatformState) -> PlatformStateDelta {
        let names: BTreeSet<&String> = self.regions.keys().chain(desired.regions.keys()).collect();
        PlatformStateDelta::from_regional(names.into_iter().map(|name| {
            let empty = Region::new(name);
            let current = self.regions.get(name).unwrap_or(&empty);
            let target = desired.regions.get(name).unwrap_or(&empty);
            current.delta_to(target)
        }))
    }
}
