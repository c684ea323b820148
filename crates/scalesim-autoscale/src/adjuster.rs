//! Adjuster: turns unmet scaling demand into a timeline of deltas.
//!
//! For each pending change, in timestamp order:
//!
//! 1. fit what we can into idle capacity (soft adjustment);
//! 2. for the rest, price two plans over the window until the next change:
//!    - **addition**: new groups for the unmet demand only, plus the cost of
//!      keeping the current state;
//!    - **substitution**: a fresh layout for everything, plus the cost of
//!      the current state while the switch is enforced;
//! 3. write the cheaper plan, shifted to respect the cooldown.
//!
//! Anything that takes capacity away is held back until the groups it
//! shrinks have absorbed every change already on the timeline, so the
//! timeline always rolls out.
//!
//! Planning works on an in-work copy of the state; the caller's state is
//! never modified.

use std::time::Duration;

use tracing::{debug, info, warn};

use scalesim_placement::{DesiredChangeCalculator, Placer, Scorer};
use scalesim_state::{
    DeltaTimeline, PlatformState, PlatformStateDelta, RegionalChanges, RegionalEntities, ResourceCatalog, ScalingModel,
    StateDuration, StateScore, Timestamp, combine_entities,
};

use crate::config::AdjusterConfig;
use crate::error::{AdjustError, AdjustResult};
use crate::unmet::{CombinerSettings, ServicesScalingEvents, UnmetChangesTimeline};

// ── Cooldown ──────────────────────────────────────────────────────

/// Minimum spacing between scheduled actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cooldown {
    period: Duration,
}

impl Cooldown {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Earliest admissible time for an action wanted at `ts`.
    pub fn shift(&self, ts: Timestamp, last: Option<Timestamp>) -> Timestamp {
        match last {
            Some(last) => ts.max(last + self.period),
            None => ts,
        }
    }

    /// Case-by-case form of [`Cooldown::shift`], used by the soft step.
    pub fn shift_stepwise(&self, ts: Timestamp, last: Option<Timestamp>) -> Timestamp {
        let Some(last) = last else { return ts };
        if last > ts {
            return last + self.period;
        }
        let elapsed = ts - last;
        if elapsed < self.period {
            ts + (self.period - elapsed)
        } else {
            ts
        }
    }
}

// ── Plan selection ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanChoice {
    Addition,
    Substitution,
}

/// Pick between the two plans.
///
/// A worst score loses unconditionally; substitution must be strictly
/// cheaper to win. `None` when both are infeasible.
pub fn choose_plan(addition: &StateScore, substitution: &StateScore) -> Option<PlanChoice> {
    match (addition.is_worst(), substitution.is_worst()) {
        (true, true) => None,
        (true, false) => Some(PlanChoice::Substitution),
        (false, true) => Some(PlanChoice::Addition),
        (false, false) if substitution.is_better_than(addition) => Some(PlanChoice::Substitution),
        (false, false) => Some(PlanChoice::Addition),
    }
}

// ── Adjuster ──────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Adjuster {
    adjustment_horizon: Duration,
    cooldown: Cooldown,
    combiner: CombinerSettings,
    scaling_model: ScalingModel,
    catalog: ResourceCatalog,
    calculator: DesiredChangeCalculator,
}

impl Adjuster {
    /// Every catalog node type needs timings for its provider and every
    /// service needs its own timings.
    pub fn new(config: AdjusterConfig, scaling_model: ScalingModel, catalog: ResourceCatalog) -> AdjustResult<Self> {
        config.validate()?;
        for node in catalog.node_types.values() {
            if scaling_model.booting_duration(&node.provider, &node.name).is_none() {
                return Err(AdjustError::Config(format!(
                    "no scaling info for node type {} of provider {}",
                    node.name, node.provider
                )));
            }
        }
        for service in catalog.requirements.keys() {
            if scaling_model.service_booting_duration(service).is_none() {
                return Err(AdjustError::Config(format!("no scaling info for service {service}")));
            }
        }

        let placer = Placer::new(config.placement_hint).with_balancing_threshold(config.balancing_threshold);
        let scorer = Scorer::from_kind(config.score_calculator, &catalog);
        let calculator = DesiredChangeCalculator::new(placer, scorer, config.optimizer, catalog.clone())?;

        Ok(Self {
            adjustment_horizon: config.adjustment_horizon,
            cooldown: Cooldown::new(config.cooldown_period),
            combiner: config.combiner,
            scaling_model,
            catalog,
            calculator,
        })
    }

    pub fn scaling_model(&self) -> &ScalingModel {
        &self.scaling_model
    }

    pub fn cooldown(&self) -> Cooldown {
        self.cooldown
    }

    /// Plan the reaction to `events` from `now` on.
    ///
    /// Returns `None` when nothing had to be scheduled.
    pub fn adjust(
        &mut self,
        now: Timestamp,
        events: &ServicesScalingEvents,
        current_state: &PlatformState,
        last_scheduled_action: Option<Timestamp>,
    ) -> AdjustResult<Option<DeltaTimeline>> {
        let mut timeline = DeltaTimeline::new();
        let mut unmet_changes = UnmetChangesTimeline::new(events, now, self.adjustment_horizon, &self.combiner);
        let mut in_work = current_state.clone();
        let mut last = last_scheduled_action;

        info!(timestamp = %now, pending = unmet_changes.len(), "adjustment cycle");

        while let Some((ts, change)) = unmet_changes.next() {
            let action_ts = self.cooldown.shift_stepwise(ts, last);
            if action_ts != ts {
                debug!(wanted = %ts, scheduled = %action_ts, "cooldown shifted action");
            }
            let mut action = PlatformStateDelta::new();

            let (soft_delta, unmet) = in_work.compute_soft_adjustment(&change, &self.catalog)?;
            if !soft_delta.is_empty() {
                debug!(timestamp = %action_ts, "soft adjustment uses idle capacity");
                in_work = in_work.apply_virtually(&soft_delta)?;
                action = action + soft_delta;
            }

            if !unmet.is_empty() {
                let window = unmet_changes.peek(ts) - ts;
                let selection_ts = self.cooldown.shift(ts, last);
                if let Some(chosen) = self.plan_unmet(&in_work, &unmet, window, selection_ts)? {
                    in_work = in_work.apply_virtually(&chosen)?;
                    action = action + chosen;
                }
            }

            if action.is_empty() {
                continue;
            }
            let write_ts = timeline.removal_ready_at(&self.scaling_model, &action, action_ts);
            if write_ts != action_ts {
                debug!(
                    wanted = %action_ts,
                    scheduled = %write_ts,
                    "removal waits for pending changes of its groups"
                );
            }
            timeline.add_state_delta(write_ts, action);
            last = Some(action_ts);
        }

        Ok(timeline.updated_at_least_once().then_some(timeline))
    }

    fn plan_unmet(
        &mut self,
        in_work: &PlatformState,
        unmet: &RegionalChanges,
        window: Duration,
        action_ts: Timestamp,
    ) -> AdjustResult<Option<PlatformStateDelta>> {
        let unmet_state = materialize(unmet);
        let window_duration = StateDuration::uniform(window);

        let addition = self
            .calculator
            .compute_adjustment(&unmet_state, &window_duration, Some(in_work))?;
        let addition_score = addition.score + self.calculator.scorer().score_state(in_work, &window_duration);

        let mut collective = in_work.collective_entities_states();
        combine_entities(&mut collective, &unmet_state);
        let substitution = self
            .calculator
            .compute_adjustment(&collective, &window_duration, Some(in_work))?;
        let mut substitution_delta = in_work.delta_to(&substitution.state);
        let till_substituted = substitution_delta.till_full_enforcement(&self.scaling_model, action_ts);
        let substitution_score = substitution.score + self.calculator.scorer().score_state(in_work, &till_substituted);

        debug!(
            timestamp = %action_ts,
            addition = addition_score.joint(),
            substitution = substitution_score.joint(),
            "evaluated plans"
        );

        let chosen = match choose_plan(&addition_score, &substitution_score) {
            Some(PlanChoice::Addition) => addition.delta,
            Some(PlanChoice::Substitution) => substitution_delta,
            None => {
                warn!(timestamp = %action_ts, "neither addition nor substitution is feasible, skipping");
                return Ok(None);
            }
        };
        Ok((!chosen.is_empty()).then_some(chosen))
    }
}

/// Unmet scale-ups as instance counts.
fn materialize(unmet: &RegionalChanges) -> RegionalEntities {
    unmet
        .iter()
        .map(|(region, changes)| {
            let counts = changes
                .iter()
                .filter(|(_, c)| **c > 0)
                .map(|(service, c)| {
                    let count = u32::try_from(*c).unwrap_or_else(|_| {
                        warn!(region = %region, service = %service, change = *c, "demand clamped to u32::MAX");
                        u32::MAX
                    });
                    (service.clone(), count)
                })
                .collect();
            (region.clone(), counts)
        })
        .collect()
}
