//! Delta timeline: the adjuster's output.
//!
//! An ordered mapping `timestamp → PlatformStateDelta`. The simulation
//! applies each delta once its timestamp is reached; enforcement expands
//! every entry into the delayed sub-deltas that actually change state.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use serde::Serialize;
use tracing::debug;

use crate::delta::PlatformStateDelta;
use crate::error::StateResult;
use crate::platform::PlatformState;
use crate::scaling_model::ScalingModel;
use crate::time::Timestamp;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeltaTimeline {
    updates: BTreeMap<Timestamp, PlatformStateDelta>,
    #[serde(skip)]
    updated: bool,
}

impl DeltaTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `delta` at `timestamp`, merging with an entry already there.
    ///
    /// Empty deltas are ignored and do not count as an update.
    pub fn add_state_delta(&mut self, timestamp: Timestamp, delta: PlatformStateDelta) {
        if delta.is_empty() {
            return;
        }
        match self.updates.entry(timestamp) {
            Entry::Vacant(slot) => {
                slot.insert(delta);
            }
            Entry::Occupied(mut slot) => {
                let existing = std::mem::take(slot.get_mut());
                *slot.get_mut() = existing + delta;
            }
        }
        self.updated = true;
    }

    pub fn updated_at_least_once(&self) -> bool {
        self.updated
    }

    pub fn last_action_timestamp(&self) -> Option<Timestamp> {
        self.updates.keys().next_back().copied()
    }

    pub fn get(&self, timestamp: Timestamp) -> Option<&PlatformStateDelta> {
        self.updates.get(&timestamp)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Timestamp, &PlatformStateDelta)> {
        self.updates.iter().map(|(ts, d)| (*ts, d))
    }

    pub fn timestamps(&self) -> impl Iterator<Item = Timestamp> + '_ {
        self.updates.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Enforce every entry and merge the results by effective timestamp.
    pub fn enforced_schedule(&mut self, scaling_model: &ScalingModel) -> BTreeMap<Timestamp, PlatformStateDelta> {
        let mut out: BTreeMap<Timestamp, PlatformStateDelta> = BTreeMap::new();
        for (ts, delta) in self.updates.iter_mut() {
            for (effective, enforced) in delta.enforce(scaling_model, *ts) {
                match out.entry(effective) {
                    Entry::Vacant(slot) => {
                        slot.insert(enforced);
                    }
                    Entry::Occupied(mut slot) => {
                        let existing = std::mem::take(slot.get_mut());
                        *slot.get_mut() = existing + enforced;
                    }
                }
            }
        }
        out
    }

    /// Earliest time from `at` on when `delta` may take capacity away.
    ///
    /// A group shrinks only after every change already scheduled for it
    /// has been fully enforced.
    pub fn removal_ready_at(
        &mut self,
        scaling_model: &ScalingModel,
        delta: &PlatformStateDelta,
        at: Timestamp,
    ) -> Timestamp {
        let removed = delta.removed_groups();
        if removed.is_empty() {
            return at;
        }
        let mut ready = at;
        for (ts, entry) in self.updates.iter_mut() {
            for (group, settled) in entry.settling_times(scaling_model, *ts) {
                if removed.contains(&group) {
                    ready = ready.max(settled);
                }
            }
        }
        ready
    }

    /// Apply every enforced sub-delta effective at or before `until`.
    pub fn roll_out_updates(
        &mut self,
        scaling_model: &ScalingModel,
        state: &PlatformState,
        until: Timestamp,
    ) -> StateResult<PlatformState> {
        let mut current = state.clone();
        for (ts, delta) in self.enforced_schedule(scaling_model) {
            if ts > until {
                break;
            }
            debug!(timestamp = %ts, regions = delta.regions().count(), "rolling out enforced delta");
            current = current.apply(&delta)?;
        }
        Ok(current)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.updates)
    }
}
