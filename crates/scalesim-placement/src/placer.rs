//! Placer: proposes how service instances can share one container.
//!
//! For every node type the placer lists [`InContainerPlacement`]s: a
//! mixture of `service → instances` that fits on one node. The adjuster may
//! only build container groups out of these proposals.
//!
//! Strategies escalate when they come up empty:
//!
//! ```text
//! existing_mixture ─► shared ─► specialized
//! balanced (shared, filtered) ─► specialized
//! ```
//!
//! `specialized` always yields an option for any service that fits a node
//! on its own.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use scalesim_state::catalog::{NodeType, ResourceCatalog, ResourceRequirements, SystemCapacity};
use scalesim_state::{EntityCounts, StateResult};

use crate::error::PlacementError;

/// Default tolerance around full utilization for the `balanced` strategy.
pub const DEFAULT_BALANCING_THRESHOLD: f64 = 0.05;

/// Placement strategy requested by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementHint {
    /// Reuse mixtures already deployed.
    ExistingMixture,
    /// Pack several services into one container.
    Shared,
    /// Shared mixtures close to full utilization.
    Balanced,
    /// One service per container.
    #[default]
    Specialized,
}

impl PlacementHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExistingMixture => "existing_mixture",
            Self::Shared => "shared",
            Self::Balanced => "balanced",
            Self::Specialized => "specialized",
        }
    }
}

impl fmt::Display for PlacementHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlacementHint {
    type Err = PlacementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "existing_mixture" => Ok(Self::ExistingMixture),
            "shared" => Ok(Self::Shared),
            "balanced" => Ok(Self::Balanced),
            "specialized" => Ok(Self::Specialized),
            other => Err(PlacementError::UnknownHint(other.to_string())),
        }
    }
}

/// One way to fill a single container of `node_type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InContainerPlacement {
    pub node_type: String,
    /// Fraction of the container taken by `placed`.
    pub capacity_taken: SystemCapacity,
    /// service → instances per container.
    pub placed: EntityCounts,
}

/// node type → candidate placements.
pub type PlacementOptions = BTreeMap<String, Vec<InContainerPlacement>>;

/// Runtime observations that refine placement. Supplying any of them
/// bypasses the placement cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicInputs {
    /// node type → mixtures currently deployed on it.
    pub current_placement: BTreeMap<String, Vec<EntityCounts>>,
    /// service → observed multiple of its declared requirements.
    pub resource_utilization: BTreeMap<String, f64>,
}

impl DynamicInputs {
    pub fn is_empty(&self) -> bool {
        self.current_placement.is_empty() && self.resource_utilization.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Placer {
    hint: PlacementHint,
    balancing_threshold: f64,
    cache: BTreeMap<BTreeSet<String>, PlacementOptions>,
}

impl Placer {
    pub fn new(hint: PlacementHint) -> Self {
        Self {
            hint,
            balancing_threshold: DEFAULT_BALANCING_THRESHOLD,
            cache: BTreeMap::new(),
        }
    }

    pub fn with_balancing_threshold(mut self, threshold: f64) -> Self {
        self.balancing_threshold = threshold;
        self
    }

    pub fn hint(&self) -> PlacementHint {
        self.hint
    }

    /// Placement options for the given services, by node type.
    ///
    /// Results without dynamic inputs are cached per service set.
    pub fn compute_placement_options(
        &mut self,
        services: &BTreeSet<String>,
        catalog: &ResourceCatalog,
        dynamic: Option<&DynamicInputs>,
    ) -> StateResult<PlacementOptions> {
        let dynamic = dynamic.filter(|d| !d.is_empty());
        if dynamic.is_none() {
            if let Some(cached) = self.cache.get(services) {
                return Ok(cached.clone());
            }
        }

        let requirements = effective_requirements(services, catalog, dynamic)?;
        let node_types: Vec<&NodeType> = catalog.node_types.values().collect();
        let options = self.place(&requirements, &node_types, dynamic);

        if dynamic.is_none() {
            self.cache.insert(services.clone(), options.clone());
        }
        Ok(options)
    }

    fn place(
        &self,
        requirements: &BTreeMap<String, ResourceRequirements>,
        node_types: &[&NodeType],
        dynamic: Option<&DynamicInputs>,
    ) -> PlacementOptions {
        let mut hint = self.hint;
        loop {
            let options = match hint {
                PlacementHint::ExistingMixture => {
                    let current = dynamic.map(|d| &d.current_placement);
                    place_existing_mixture(requirements, node_types, current)
                }
                PlacementHint::Shared => place_shared(requirements, node_types),
                PlacementHint::Balanced => {
                    place_balanced(place_shared(requirements, node_types), self.balancing_threshold)
                }
                PlacementHint::Specialized => place_specialized(requirements, node_types),
            };
            let next = match hint {
                PlacementHint::ExistingMixture => PlacementHint::Shared,
                PlacementHint::Shared | PlacementHint::Balanced => PlacementHint::Specialized,
                PlacementHint::Specialized => return options,
            };
            if !options.is_empty() {
                return options;
            }
            debug!(from = %hint, to = %next, "no placement options, escalating strategy");
            hint = next;
        }
    }
}

fn effective_requirements(
    services: &BTreeSet<String>,
    catalog: &ResourceCatalog,
    dynamic: Option<&DynamicInputs>,
) -> StateResult<BTreeMap<String, ResourceRequirements>> {
    let mut out = BTreeMap::new();
    for service in services {
        let mut req = catalog.requirements(service)?.clone();
        if let Some(factor) = dynamic.and_then(|d| d.resource_utilization.get(service)) {
            if *factor > 0.0 {
                req.cpu *= factor;
                req.memory_mb *= factor;
            }
        }
        out.insert(service.clone(), req);
    }
    Ok(out)
}

fn single_instance_fits(node: &NodeType, req: &ResourceRequirements) -> bool {
    req.allows(&node.name) && node.max_instances(req) > 0
}

fn place_existing_mixture(
    requirements: &BTreeMap<String, ResourceRequirements>,
    node_types: &[&NodeType],
    current: Option<&BTreeMap<String, Vec<EntityCounts>>>,
) -> PlacementOptions {
    let mut options = PlacementOptions::new();
    let Some(current) = current else { return options };

    for node in node_types {
        let Some(mixtures) = current.get(&node.name) else { continue };
        let mut per_node: Vec<InContainerPlacement> = Vec::new();
        for mixture in mixtures {
            let placed: EntityCounts = mixture
                .iter()
                .filter(|(s, c)| **c > 0 && requirements.get(*s).is_some_and(|r| r.allows(&node.name)))
                .map(|(s, c)| (s.clone(), *c))
                .collect();
            if placed.is_empty() {
                continue;
            }
            let Ok((fits, capacity_taken)) = node.takes_capacity(requirements, &placed) else { continue };
            if fits && !per_node.iter().any(|p| p.placed == placed) {
                per_node.push(InContainerPlacement {
                    node_type: node.name.clone(),
                    capacity_taken,
                    placed,
                });
            }
        }
        if !per_node.is_empty() {
            options.insert(node.name.clone(), per_node);
        }
    }
    options
}

/// Greedy packing, heaviest service first.
///
/// Starting from each service in order of decreasing footprint, fill one
/// container with as many instances of it as fit, then top up with the
/// lighter services that follow.
fn place_shared(requirements: &BTreeMap<String, ResourceRequirements>, node_types: &[&NodeType]) -> PlacementOptions {
    let mut options = PlacementOptions::new();
    for node in node_types {
        let mut footprints: Vec<(&String, SystemCapacity)> = requirements
            .iter()
            .filter(|(_, req)| single_instance_fits(node, req))
            .map(|(service, req)| (service, node.capacity_of(req)))
            .collect();
        footprints.sort_by(|a, b| b.1.collapse().total_cmp(&a.1.collapse()).then_with(|| a.0.cmp(b.0)));

        let mut per_node: Vec<InContainerPlacement> = Vec::new();
        for start in 0..footprints.len() {
            let mut taken = SystemCapacity::zero();
            let mut placed = EntityCounts::new();
            for (service, footprint) in &footprints[start..] {
                let free = SystemCapacity { cpu: 1.0, memory: 1.0 } - taken;
                let count = free.instances_fitting(*footprint);
                if count == 0 {
                    continue;
                }
                taken += *footprint * f64::from(count);
                placed.insert((*service).clone(), count);
            }
            if !placed.is_empty() && !per_node.iter().any(|p| p.placed == placed) {
                per_node.push(InContainerPlacement {
                    node_type: node.name.clone(),
                    capacity_taken: taken,
                    placed,
                });
            }
        }
        if !per_node.is_empty() {
            options.insert(node.name.clone(), per_node);
        }
    }
    options
}

/// Keep shared options within `threshold` of full utilization, falling
/// back to the closest one per node type.
fn place_balanced(shared: PlacementOptions, threshold: f64) -> PlacementOptions {
    let distance = |p: &InContainerPlacement| (p.capacity_taken.collapse() - 1.0).abs();
    shared
        .into_iter()
        .filter_map(|(node_type, per_node)| {
            let balanced: Vec<InContainerPlacement> =
                per_node.iter().filter(|p| distance(*p) <= threshold).cloned().collect();
            if !balanced.is_empty() {
                return Some((node_type, balanced));
            }
            let closest = per_node
                .into_iter()
                .min_by(|a, b| distance(a).total_cmp(&distance(b)))?;
            Some((node_type, vec![closest]))
        })
        .collect()
}

fn place_specialized(
    requirements: &BTreeMap<String, ResourceRequirements>,
    node_types: &[&NodeType],
) -> PlacementOptions {
    let mut options = PlacementOptions::new();
    for node in node_types {
        let per_node: Vec<InContainerPlacement> = requirements
            .iter()
            .filter(|(_, req)| single_instance_fits(node, req))
            .map(|(service, req)| {
                let count = node.max_instances(req);
                let mut placed = EntityCounts::new();
                placed.insert(service.clone(), count);
                InContainerPlacement {
                    node_type: node.name.clone(),
                    capacity_taken: node.capacity_of(req) * f64::from(count),
                    placed,
                }
            })
            .collect();
        if !per_node.is_empty() {
            options.insert(node.name.clone(), per_node);
        }
    }
    options
}
