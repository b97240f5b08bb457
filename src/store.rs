//! Channel state store: per-channel current value, provenance, and a
//! bounded history.
//!
//! The store is the read side's single source of truth. Its central
//! contract is [`ChannelStore::synchronized_snapshot`]: a multi-channel
//! read fails closed unless every requested channel is present and their
//! production instants agree within an explicit skew budget. That budget is
//! what keeps a decision layer from silently combining a 90-tick-old
//! aggregate with this-tick positions.

use std::collections::{HashMap, VecDeque};

use serde_json::Value;
use tracing::debug;

use crate::error::{Result, SyncError};

/// Most recent state of one channel plus a bounded history.
#[derive(Debug, Clone)]
pub struct ChannelState {
    /// Latest sanitized payload
    pub data: Value,
    /// Simulation tick the payload was sampled at
    pub produced_at: i64,
    /// Simulation tick of the envelope that delivered it
    pub received_at: i64,
    history: VecDeque<(Value, i64)>,
    capacity: usize,
}

impl ChannelState {
    fn new(data: Value, produced_at: i64, received_at: i64, capacity: usize) -> Self {
        let mut history = VecDeque::with_capacity(capacity.min(64));
        history.push_back((data.clone(), produced_at));
        Self { data, produced_at, received_at, history, capacity }
    }

    fn push(&mut self, data: Value, produced_at: i64, received_at: i64) {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back((data.clone(), produced_at));
        self.data = data;
        self.produced_at = produced_at;
        self.received_at = received_at;
    }

    /// Staleness of the current value relative to `now`.
    pub fn staleness(&self, now: i64) -> i64 {
        now - self.produced_at
    }

    /// Number of retained history entries.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// History entry whose production instant is closest to `target`.
    ///
    /// Linear scan; this is a replay/debugging path, not the hot path.
    pub fn value_at(&self, target: i64) -> Option<&Value> {
        self.history
            .iter()
            .min_by_key(|(_, produced_at)| (produced_at - target).abs())
            .map(|(data, _)| data)
    }
}

/// All channel state for one connection.
#[derive(Debug)]
pub struct ChannelStore {
    channels: HashMap<String, ChannelState>,
    history_depth: usize,
}

impl ChannelStore {
    pub fn new(history_depth: usize) -> Self {
        Self { channels: HashMap::new(), history_depth: history_depth.max(1) }
    }

    /// Overwrite a channel's current state and append to its history.
    ///
    /// An update whose `produced_at` regresses below the stored value is
    /// dropped: reordered delivery is reported by the timing monitor, and
    /// the store guarantees non-decreasing production instants to readers.
    pub fn update(&mut self, channel: &str, data: Value, produced_at: i64, received_at: i64) {
        // A channel cannot be sampled after the envelope that carried it
        // was sent; clamping keeps staleness non-negative.
        let produced_at = if produced_at > received_at {
            debug!(channel, produced_at, received_at, "Clamping future-dated channel update");
            received_at
        } else {
            produced_at
        };
        match self.channels.get_mut(channel) {
            Some(state) => {
                if produced_at < state.produced_at {
                    debug!(
                        channel,
                        produced_at,
                        current = state.produced_at,
                        "Dropping regressed channel update"
                    );
                    return;
                }
                state.push(data, produced_at, received_at.max(state.received_at));
            }
            None => {
                self.channels.insert(
                    channel.to_string(),
                    ChannelState::new(data, produced_at, received_at, self.history_depth),
                );
            }
        }
    }

    pub fn get(&self, channel: &str) -> Option<&ChannelState> {
        self.channels.get(channel)
    }

    /// Names of all channels seen so far.
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.keys().map(String::as_str).collect()
    }

    /// Whether a channel is present and within the staleness budget.
    pub fn is_fresh(&self, channel: &str, max_staleness: i64, now: i64) -> bool {
        self.channels.get(channel).is_some_and(|s| s.staleness(now) <= max_staleness)
    }

    /// Consistent multi-channel read with an explicit skew budget.
    ///
    /// Fails closed: every requested channel must be present and the spread
    /// of their production instants must not exceed `max_skew`.
    pub fn synchronized_snapshot(
        &self,
        channels: &[&str],
        max_skew: i64,
    ) -> Result<HashMap<String, Value>> {
        let mut min_produced = i64::MAX;
        let mut max_produced = i64::MIN;
        let mut out = HashMap::with_capacity(channels.len());

        for name in channels {
            let state = self
                .channels
                .get(*name)
                .ok_or_else(|| SyncError::ChannelMissing { channel: (*name).to_string() })?;
            min_produced = min_produced.min(state.produced_at);
            max_produced = max_produced.max(state.produced_at);
            out.insert((*name).to_string(), state.data.clone());
        }

        if out.is_empty() {
            return Ok(out);
        }

        let spread = max_produced - min_produced;
        if spread > max_skew {
            return Err(SyncError::NotSynchronized { spread, max_skew });
        }
        Ok(out)
    }

    /// History lookup: the stored value closest to `target` for a channel.
    pub fn value_at(&self, channel: &str, target: i64) -> Option<&Value> {
        self.channels.get(channel)?.value_at(target)
    }

    /// Drop all channel state (scope transition with store clearing on,
    /// or an explicit reset).
    pub fn clear(&mut self) {
        self.channels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> ChannelStore {
        ChannelStore::new(300)
    }

    #[test]
    fn update_then_get_roundtrip() {
        let mut s = store();
        s.update("ENEMIES", json!([{"id": 1}]), 100, 100);
        let state = s.get("ENEMIES").unwrap();
        assert_eq!(state.produced_at, 100);
        assert_eq!(state.received_at, 100);
        assert_eq!(state.data, json!([{"id": 1}]));
        assert!(s.get("UNKNOWN").is_none());
    }

    #[test]
    fn produced_at_never_regresses() {
        let mut s = store();
        s.update("A", json!(1), 100, 100);
        s.update("A", json!(2), 90, 101);
        let state = s.get("A").unwrap();
        assert_eq!(state.produced_at, 100);
        assert_eq!(state.data, json!(1));

        // Equal production instants are accepted (idempotent redelivery).
        s.update("A", json!(3), 100, 102);
        assert_eq!(s.get("A").unwrap().data, json!(3));
    }

    #[test]
    fn future_dated_update_is_clamped_to_receipt() {
        let mut s = store();
        s.update("A", json!(1), 110, 100);
        let state = s.get("A").unwrap();
        assert_eq!(state.produced_at, 100);
        assert_eq!(state.staleness(100), 0);

        // A later honest update still lands normally.
        s.update("A", json!(2), 101, 101);
        assert_eq!(s.get("A").unwrap().produced_at, 101);
    }

    #[test]
    fn history_is_bounded() {
        let mut s = ChannelStore::new(5);
        for i in 0..20i64 {
            s.update("A", json!(i), i, i);
        }
        let state = s.get("A").unwrap();
        assert_eq!(state.history_len(), 5);
        // Oldest retained entry is 15.
        assert_eq!(state.value_at(0), Some(&json!(15)));
        assert_eq!(state.value_at(19), Some(&json!(19)));
    }

    #[test]
    fn freshness_uses_produced_at() {
        let mut s = store();
        s.update("STATS", json!({}), 0, 14);
        assert!(!s.is_fresh("STATS", 5, 14));
        assert!(s.is_fresh("STATS", 14, 14));
        assert!(!s.is_fresh("MISSING", 1000, 14));
    }

    #[test]
    fn snapshot_rejects_skew_beyond_budget() {
        let mut s = store();
        s.update("A", json!("a"), 100, 100);
        s.update("B", json!("b"), 70, 100);

        let err = s.synchronized_snapshot(&["A", "B"], 10).unwrap_err();
        match err {
            SyncError::NotSynchronized { spread, max_skew } => {
                assert_eq!(spread, 30);
                assert_eq!(max_skew, 10);
            }
            other => panic!("expected NotSynchronized, got {other:?}"),
        }

        let snap = s.synchronized_snapshot(&["A", "B"], 30).unwrap();
        assert_eq!(snap["A"], json!("a"));
        assert_eq!(snap["B"], json!("b"));
    }

    #[test]
    fn snapshot_fails_closed_on_missing_channel() {
        let mut s = store();
        s.update("A", json!(1), 100, 100);
        let err = s.synchronized_snapshot(&["A", "GONE"], 1000).unwrap_err();
        assert!(matches!(err, SyncError::ChannelMissing { .. }));
    }

    #[test]
    fn value_at_picks_nearest_instant() {
        let mut s = store();
        for t in [10i64, 20, 30] {
            s.update("A", json!(t), t, t);
        }
        assert_eq!(s.value_at("A", 12), Some(&json!(10)));
        assert_eq!(s.value_at("A", 26), Some(&json!(30)));
        assert_eq!(s.value_at("A", 20), Some(&json!(20)));
        assert!(s.value_at("GONE", 20).is_none());
    }

    #[test]
    fn clear_empties_everything() {
        let mut s = store();
        s.update("A", json!(1), 1, 1);
        s.clear();
        assert!(s.get("A").is_none());
        assert!(s.channel_names().is_empty());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn history_never_exceeds_capacity(
                capacity in 1usize..50,
                updates in prop::collection::vec(0i64..1000, 1..200)
            ) {
                let mut s = ChannelStore::new(capacity);
                let mut sorted = updates.clone();
                sorted.sort_unstable();
                for (i, t) in sorted.iter().enumerate() {
                    s.update("A", json!(i), *t, *t);
                }
                let state = s.get("A").unwrap();
                prop_assert!(state.history_len() <= capacity);
            }

            #[test]
            fn produced_at_is_monotone_under_any_arrival_order(
                updates in prop::collection::vec(0i64..1000, 1..100)
            ) {
                let mut s = ChannelStore::new(10);
                let mut high_water = i64::MIN;
                for t in &updates {
                    s.update("A", json!(t), *t, *t);
                    let current = s.get("A").unwrap().produced_at;
                    prop_assert!(current >= high_water);
                    high_water = current;
                }
                prop_assert_eq!(high_water, *updates.iter().max().unwrap());
            }
        }
    }
}
