//! Timeline of unmet desired changes.
//!
//! The scaling-metric pipeline emits, per service, a stream of desired
//! instance changes. Within the adjustment horizon these are regrouped by
//! timestamp into joint regional demands, optionally merging events that
//! fall into one window.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use scalesim_state::time::duration_str;
use scalesim_state::{RegionalChanges, Timestamp};

/// One desired change for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredChange {
    pub timestamp: Timestamp,
    pub region: String,
    /// Signed instance change.
    pub change: i64,
}

/// service → its desired changes.
pub type ServicesScalingEvents = BTreeMap<String, Vec<DesiredChange>>;

/// How simultaneous per-service events merge into one demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CombinerSettings {
    /// Only events with identical timestamps merge.
    #[default]
    Exact,
    /// Events within `window` of the first event of a batch merge at that
    /// first event's timestamp.
    Windowed {
        #[serde(with = "duration_str")]
        window: Duration,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnmetChangesTimeline {
    changes: BTreeMap<Timestamp, RegionalChanges>,
    horizon_end: Timestamp,
}

impl UnmetChangesTimeline {
    /// Keep the events in `[now, now + horizon]` and combine them.
    pub fn new(events: &ServicesScalingEvents, now: Timestamp, horizon: Duration, combiner: &CombinerSettings) -> Self {
        let horizon_end = now + horizon;
        let mut flat: Vec<(Timestamp, &str, &str, i64)> = events
            .iter()
            .flat_map(|(service, changes)| {
                changes
                    .iter()
                    .map(move |c| (c.timestamp, service.as_str(), c.region.as_str(), c.change))
            })
            .filter(|(ts, ..)| *ts >= now && *ts <= horizon_end)
            .collect();
        flat.sort_by_key(|(ts, ..)| *ts);

        let mut changes: BTreeMap<Timestamp, RegionalChanges> = BTreeMap::new();
        let mut batch_start: Option<Timestamp> = None;
        for (ts, service, region, change) in flat {
            let key = match combiner {
                CombinerSettings::Exact => ts,
                CombinerSettings::Windowed { window } => match batch_start {
                    Some(start) if ts - start < *window => start,
                    _ => {
                        batch_start = Some(ts);
                        ts
                    }
                },
            };
            *changes
                .entry(key)
                .or_default()
                .entry(region.to_string())
                .or_default()
                .entry(service.to_string())
                .or_insert(0) += change;
        }

        for regional in changes.values_mut() {
            for per_service in regional.values_mut() {
                per_service.retain(|_, c| *c != 0);
            }
            regional.retain(|_, per_service| !per_service.is_empty());
        }
        changes.retain(|_, regional| !regional.is_empty());

        Self { changes, horizon_end }
    }

    /// Pop the earliest pending change.
    pub fn next(&mut self) -> Option<(Timestamp, RegionalChanges)> {
        self.changes.pop_first()
    }

    /// Timestamp of the first pending change after `after`, or the end of
    /// the horizon if there is none.
    pub fn peek(&self, after: Timestamp) -> Timestamp {
        self.changes
            .range((Bound::Excluded(after), Bound::Unbounded))
            .next()
            .map_or(self.horizon_end, |(ts, _)| *ts)
    }

    pub fn horizon_end(&self) -> Timestamp {
        self.horizon_end
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
