//! Desired-change calculator: Place, Score, Optimize.
//!
//! Per region, the placer proposes per-container mixtures, plans combine
//! them into container groups covering the whole demand, the scorer prices
//! each plan and the optimizer keeps the cheapest. The winning groups form
//! a desired state; its delta is that state expressed as additions.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use scalesim_state::{
    EntityCounts, GroupSpec, HomogeneousContainerGroup, PlatformState, PlatformStateDelta, Region, RegionalEntities,
    ResourceCatalog, StateDuration, StateScore,
};

use crate::error::{PlacementError, PlacementResult};
use crate::optimizer::OptimizerKind;
use crate::placer::{DynamicInputs, InContainerPlacement, PlacementHint, PlacementOptions, Placer};
use crate::scorer::Scorer;

// ── Plans ─────────────────────────────────────────────────────────

/// One homogeneous block of a plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanEntry {
    pub placement: InContainerPlacement,
    pub containers_count: u32,
    /// Instances actually assigned to the block, at most `placed × count`.
    pub entities: EntityCounts,
}

/// A set of container groups meant to host a regional demand.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacementPlan {
    pub entries: Vec<PlanEntry>,
    /// Every demanded instance has a container.
    pub complete: bool,
}

impl PlacementPlan {
    pub fn containers(&self) -> u32 {
        self.entries.iter().map(|e| e.containers_count).sum()
    }

    /// Cost of the plan in `region` over `duration`; worst if incomplete.
    pub fn score(&self, scorer: &Scorer, region: &str, duration: Duration) -> StateScore {
        if !self.complete {
            return StateScore::worst();
        }
        let mut total = StateScore::null();
        for entry in &self.entries {
            total += scorer.score_containers(region, &entry.placement.node_type, entry.containers_count, duration);
        }
        total
    }
}

/// Cover `demand` with placement options.
///
/// One plan per usable option: the option seeds the plan and the remaining
/// demand is covered greedily by the option with the lowest price per
/// hosted instance. Duplicate plans are dropped.
pub fn build_plans(demand: &EntityCounts, options: &PlacementOptions, catalog: &ResourceCatalog) -> Vec<PlacementPlan> {
    let demand: EntityCounts = demand.iter().filter(|(_, c)| **c > 0).map(|(s, c)| (s.clone(), *c)).collect();
    if demand.is_empty() {
        return Vec::new();
    }
    let all: Vec<&InContainerPlacement> = options.values().flatten().collect();

    let mut plans: Vec<PlacementPlan> = Vec::new();
    for seed in &all {
        let mut remaining = demand.clone();
        let mut entries = Vec::new();
        let Some(first) = use_option(seed, &mut remaining) else { continue };
        entries.push(first);

        while !remaining.is_empty() {
            let cheapest = all
                .iter()
                .filter_map(|option| {
                    let hosted = hosted_instances(option, &remaining);
                    let price = catalog.node_types.get(&option.node_type)?.price_per_hour;
                    (hosted > 0).then(|| (price / f64::from(hosted), *option))
                })
                .min_by(|a, b| a.0.total_cmp(&b.0))
                .map(|(_, option)| option);
            let Some(option) = cheapest else { break };
            match use_option(option, &mut remaining) {
                Some(entry) => entries.push(entry),
                None => break,
            }
        }

        let plan = PlacementPlan {
            complete: remaining.is_empty(),
            entries,
        };
        if !plans.contains(&plan) {
            plans.push(plan);
        }
    }
    plans
}

fn hosted_instances(option: &InContainerPlacement, remaining: &EntityCounts) -> u32 {
    option
        .placed
        .iter()
        .map(|(s, per)| remaining.get(s).map_or(0, |r| (*r).min(*per)))
        .sum()
}

/// Size a block of `option` so it hosts all remaining instances of every
/// service it covers.
fn use_option(option: &InContainerPlacement, remaining: &mut EntityCounts) -> Option<PlanEntry> {
    let covered: Vec<(String, u32, u32)> = option
        .placed
        .iter()
        .filter(|(_, per)| **per > 0)
        .filter_map(|(s, per)| remaining.get(s).map(|r| (s.clone(), *per, *r)))
        .collect();
    if covered.is_empty() {
        return None;
    }

    let containers_count = covered.iter().map(|(_, per, rem)| rem.div_ceil(*per)).max().unwrap_or(0);
    let mut entities = EntityCounts::new();
    for (service, per, rem) in covered {
        entities.insert(service.clone(), rem.min(per * containers_count));
        remaining.remove(&service);
    }
    Some(PlanEntry {
        placement: option.clone(),
        containers_count,
        entities,
    })
}

// ── Calculator ────────────────────────────────────────────────────

/// Result of one PSO run.
#[derive(Debug, Clone)]
pub struct DesiredAdjustment {
    pub state: PlatformState,
    /// `state` expressed as additions.
    pub delta: PlatformStateDelta,
    pub score: StateScore,
}

#[derive(Debug)]
pub struct DesiredChangeCalculator {
    placer: Placer,
    scorer: Scorer,
    optimizer: OptimizerKind,
    catalog: ResourceCatalog,
}

impl DesiredChangeCalculator {
    /// Fails when a service may only run on node types the catalog lacks.
    pub fn new(placer: Placer, scorer: Scorer, optimizer: OptimizerKind, catalog: ResourceCatalog) -> PlacementResult<Self> {
        for (service, req) in &catalog.requirements {
            if let Some(node_type) = req.node_types.iter().find(|n| !catalog.node_types.contains_key(*n)) {
                return Err(PlacementError::UnknownContainerType {
                    service: service.clone(),
                    node_type: node_type.clone(),
                });
            }
        }
        catalog.validate()?;
        Ok(Self {
            placer,
            scorer,
            optimizer,
            catalog,
        })
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    /// Desired state hosting `entities`, priced over `duration`.
    ///
    /// `current` feeds the `existing_mixture` strategy. A region that cannot
    /// be covered makes the whole score worst.
    pub fn compute_adjustment(
        &mut self,
        entities: &RegionalEntities,
        duration: &StateDuration,
        current: Option<&PlatformState>,
    ) -> PlacementResult<DesiredAdjustment> {
        let mut state = PlatformState::new();
        let mut score = StateScore::null();

        for (region_name, demand) in entities {
            let services: BTreeSet<String> = demand.iter().filter(|(_, c)| **c > 0).map(|(s, _)| s.clone()).collect();
            if services.is_empty() {
                continue;
            }

            let dynamic = self.dynamic_inputs(region_name, current);
            let options = self
                .placer
                .compute_placement_options(&services, &self.catalog, dynamic.as_ref())?;
            let plans = build_plans(demand, &options, &self.catalog);
            let region_duration = duration.get(region_name);
            let scored = plans.into_iter().map(|plan| {
                let s = plan.score(&self.scorer, region_name, region_duration);
                (plan, s)
            });

            match self.optimizer.select(scored) {
                Some((plan, plan_score)) => {
                    debug!(
                        region = %region_name,
                        containers = plan.containers(),
                        score = plan_score.joint(),
                        "selected placement plan"
                    );
                    state = state.with_region(self.materialize(region_name, &plan)?);
                    score += plan_score;
                }
                None => {
                    warn!(region = %region_name, "no feasible placement plan");
                    score += StateScore::worst();
                }
            }
        }

        let delta = state.to_deltas();
        Ok(DesiredAdjustment { state, delta, score })
    }

    fn dynamic_inputs(&self, region_name: &str, current: Option<&PlatformState>) -> Option<DynamicInputs> {
        if self.placer.hint() != PlacementHint::ExistingMixture {
            return None;
        }
        let region = current?.region(region_name)?;
        let mut inputs = DynamicInputs::default();
        for group in region.groups() {
            inputs
                .current_placement
                .entry(group.spec.node_type.clone())
                .or_default()
                .push(group.spec.placement.clone());
        }
        Some(inputs)
    }

    fn materialize(&self, region_name: &str, plan: &PlacementPlan) -> PlacementResult<Region> {
        let mut region = Region::new(region_name);
        for entry in &plan.entries {
            let node = self.catalog.node_type(&entry.placement.node_type)?;
            let spec = GroupSpec::new(region_name, &node.name, &node.provider, entry.placement.placed.clone());
            region.insert_group(HomogeneousContainerGroup::new(spec, entry.containers_count, entry.entities.clone()));
        }
        Ok(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::ScoreCalculatorKind;
    use scalesim_state::{NodeType, ResourceRequirements};

    fn make_node(name: &str, cpu: f64, price_per_hour: f64) -> NodeType {
        NodeType {
            name: name.to_string(),
            provider: "aws".to_string(),
            cpu,
            memory_mb: 16384.0,
            price_per_hour,
        }
    }

    fn make_catalog() -> ResourceCatalog {
        ResourceCatalog::new()
            .with_node_type(make_node("small", 2.0, 0.1))
            .with_node_type(make_node("large", 8.0, 0.3))
            .with_service("api", ResourceRequirements::new(1.0, 512.0))
            .with_service("db", ResourceRequirements::new(2.0, 1024.0))
    }

    fn make_calculator(hint: PlacementHint) -> DesiredChangeCalculator {
        let catalog = make_catalog();
        DesiredChangeCalculator::new(
            Placer::new(hint),
            Scorer::from_kind(ScoreCalculatorKind::CostMinimizer, &catalog),
            OptimizerKind::CostMinimizer,
            catalog,
        )
        .unwrap()
    }

    fn demand(pairs: &[(&str, u32)]) -> RegionalEntities {
        let mut out = RegionalEntities::new();
        out.insert("eu".to_string(), pairs.iter().map(|(s, c)| (s.to_string(), *c)).collect());
        out
    }

    #[test]
    fn rejects_requirements_on_unknown_container_type() {
        let mut req = ResourceRequirements::new(1.0, 0.0);
        req.node_types = vec!["gpu".to_string()];
        let catalog = make_catalog().with_service("trainer", req);
        let err = DesiredChangeCalculator::new(
            Placer::new(PlacementHint::Specialized),
            Scorer::from_kind(ScoreCalculatorKind::CostMinimizer, &catalog),
            OptimizerKind::CostMinimizer,
            catalog,
        )
        .unwrap_err();
        assert_eq!(
            err,
            PlacementError::UnknownContainerType {
                service: "trainer".to_string(),
                node_type: "gpu".to_string()
            }
        );
    }

    #[test]
    fn plans_cover_the_whole_demand() {
        let catalog = make_catalog();
        let mut placer = Placer::new(PlacementHint::Specialized);
        let wanted: BTreeSet<String> = ["api", "db"].iter().map(|s| s.to_string()).collect();
        let options = placer.compute_placement_options(&wanted, &catalog, None).unwrap();

        let mut want = EntityCounts::new();
        want.insert("api".to_string(), 5);
        want.insert("db".to_string(), 1);
        let plans = build_plans(&want, &options, &catalog);

        assert!(!plans.is_empty());
        for plan in &plans {
            assert!(plan.complete);
            let api: u32 = plan.entries.iter().filter_map(|e| e.entities.get("api")).sum();
            let db: u32 = plan.entries.iter().filter_map(|e| e.entities.get("db")).sum();
            assert_eq!((api, db), (5, 1));
        }
    }

    #[test]
    fn use_option_rounds_containers_up() {
        let mut placed = EntityCounts::new();
        placed.insert("api".to_string(), 2);
        let option = InContainerPlacement {
            node_type: "small".to_string(),
            capacity_taken: scalesim_state::SystemCapacity { cpu: 1.0, memory: 0.1 },
            placed,
        };
        let mut remaining = EntityCounts::new();
        remaining.insert("api".to_string(), 5);
        remaining.insert("db".to_string(), 1);

        let entry = use_option(&option, &mut remaining).unwrap();
        assert_eq!(entry.containers_count, 3);
        assert_eq!(entry.entities["api"], 5);
        assert_eq!(remaining.len(), 1);
    }

    #[test]
    fn picks_the_cheapest_plan() {
        let mut calc = make_calculator(PlacementHint::Specialized);
        let adjustment = calc
            .compute_adjustment(&demand(&[("api", 8)]), &StateDuration::uniform(Duration::from_secs(3600)), None)
            .unwrap();

        // 8 api: four small nodes cost 0.4, one large node 0.3.
        assert!(!adjustment.score.is_worst());
        assert!((adjustment.score.joint() - 0.3).abs() < 1e-12);
        assert_eq!(adjustment.state.nodes_count()["large"], 1);
        assert_eq!(adjustment.delta.nodes_change()["large"], 1);
    }

    #[test]
    fn infeasible_region_scores_worst() {
        let mut calc = DesiredChangeCalculator::new(
            Placer::new(PlacementHint::Shared),
            Scorer::from_kind(ScoreCalculatorKind::CostMinimizer, &make_catalog()),
            OptimizerKind::CostMinimizer,
            make_catalog().with_service("whale", ResourceRequirements::new(64.0, 0.0)),
        )
        .unwrap();
        let adjustment = calc
            .compute_adjustment(&demand(&[("whale", 1)]), &StateDuration::uniform(Duration::from_secs(60)), None)
            .unwrap();
        assert!(adjustment.score.is_worst());
        assert!(adjustment.delta.is_empty());
    }

    #[test]
    fn empty_demand_is_null() {
        let mut calc = make_calculator(PlacementHint::Specialized);
        let adjustment = calc
            .compute_adjustment(&RegionalEntities::new(), &StateDuration::uniform(Duration::from_secs(60)), None)
            .unwrap();
        assert_eq!(adjustment.score, StateScore::null());
        assert!(adjustment.state.is_empty());
    }

    #[test]
    fn existing_mixture_follows_current_groups() {
        let mut placement = EntityCounts::new();
        placement.insert("api".to_string(), 1);
        placement.insert("db".to_string(), 1);
        let spec = GroupSpec::new("eu", "large", "aws", placement.clone());
        let current = PlatformState::new()
            .with_region(Region::new("eu").with_group(HomogeneousContainerGroup::new(spec, 1, EntityCounts::new())));

        let mut calc = make_calculator(PlacementHint::ExistingMixture);
        let adjustment = calc
            .compute_adjustment(
                &demand(&[("api", 2), ("db", 2)]),
                &StateDuration::uniform(Duration::from_secs(3600)),
                Some(&current),
            )
            .unwrap();

        let region = adjustment.state.region("eu").unwrap();
        let group = region.groups().next().unwrap();
        assert_eq!(group.spec.placement, placement);
        assert_eq!(group.containers_count, 2);
    }
}
