//! Entity state tracker: lifecycle from recency, not deletion events.
//!
//! The producer never sends an explicit "removed" event. Identity and
//! lifecycle are derived purely from when an entity was last seen: created
//! on first appearance, updated on every reappearance, expired once it has
//! gone unseen longer than the kind's expiry horizon. Expiry is time-based
//! against `last_seen`, never "absent from this call" — a kind sampled on
//! a slower cadence than the tracker's update calls must not be mass
//! expired by an empty update.

use std::collections::{HashMap, HashSet, VecDeque};

/// One tracked entity of kind `K`.
#[derive(Debug, Clone)]
pub struct TrackedEntity<K> {
    pub id: i64,
    pub data: K,
    pub first_seen: i64,
    pub last_seen: i64,
    history: VecDeque<K>,
    history_depth: usize,
}

impl<K: Clone> TrackedEntity<K> {
    fn new(id: i64, data: K, now: i64, history_depth: usize) -> Self {
        let mut history = VecDeque::with_capacity(history_depth.min(16));
        history.push_back(data.clone());
        Self { id, data, first_seen: now, last_seen: now, history, history_depth }
    }

    fn update(&mut self, data: K, now: i64) {
        if self.history.len() == self.history_depth {
            self.history.pop_front();
        }
        self.history.push_back(data.clone());
        self.data = data;
        self.last_seen = now;
    }

    /// Retained per-entity history, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &K> {
        self.history.iter()
    }
}

/// Result of one tracking step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityDiff {
    pub added: Vec<i64>,
    pub updated: Vec<i64>,
    pub expired: Vec<i64>,
}

impl EntityDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.expired.is_empty()
    }
}

/// Tracker configuration for one entity kind.
#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    /// Ticks an entity may go unseen before eviction; -1 disables expiry
    /// (kinds whose membership changes only via scope-transition clears)
    pub expiry_horizon: i64,
    /// Per-entity history ring depth
    pub history_depth: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self { expiry_horizon: 60, history_depth: 10 }
    }
}

/// Tracks the live set of one entity kind.
///
/// Each kind (enemies, projectiles, pickups, ...) gets its own instance
/// with its own expiry horizon. Ids are producer-assigned and unique only
/// within the current scope; a scope transition must go through
/// [`EntityTracker::clear`].
#[derive(Debug)]
pub struct EntityTracker<K> {
    config: TrackerConfig,
    entities: HashMap<i64, TrackedEntity<K>>,
}

impl<K: Clone> EntityTracker<K> {
    pub fn new(config: TrackerConfig) -> Self {
        Self { config, entities: HashMap::new() }
    }

    /// Apply one fresh entity list observed at `now`.
    ///
    /// Entities in the list are created or updated; tracked entities absent
    /// from the list are expired only once `now - last_seen` exceeds the
    /// horizon. An entity never appears in both `updated` and `expired` of
    /// the same step.
    pub fn apply(&mut self, fresh: Vec<(i64, K)>, now: i64) -> EntityDiff {
        let mut diff = EntityDiff::default();
        let mut seen: HashSet<i64> = HashSet::with_capacity(fresh.len());

        for (id, data) in fresh {
            // Duplicate ids within one list collapse to the last entry.
            if !seen.insert(id) {
                if let Some(entity) = self.entities.get_mut(&id) {
                    entity.update(data, now);
                }
                continue;
            }
            match self.entities.get_mut(&id) {
                Some(entity) => {
                    entity.update(data, now);
                    diff.updated.push(id);
                }
                None => {
                    self.entities
                        .insert(id, TrackedEntity::new(id, data, now, self.config.history_depth));
                    diff.added.push(id);
                }
            }
        }

        if self.config.expiry_horizon >= 0 {
            let horizon = self.config.expiry_horizon;
            let expired: Vec<i64> = self
                .entities
                .iter()
                .filter(|(id, e)| !seen.contains(id) && now - e.last_seen > horizon)
                .map(|(id, _)| *id)
                .collect();
            for id in &expired {
                self.entities.remove(id);
            }
            diff.expired = expired;
        }

        diff.added.sort_unstable();
        diff.updated.sort_unstable();
        diff.expired.sort_unstable();
        diff
    }

    /// Drop every tracked entity unconditionally, returning the evicted
    /// ids. Invoked on scope transitions, where ids stop being meaningful.
    pub fn clear(&mut self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.entities.keys().copied().collect();
        ids.sort_unstable();
        self.entities.clear();
        ids
    }

    pub fn get(&self, id: i64) -> Option<&TrackedEntity<K>> {
        self.entities.get(&id)
    }

    /// Entities seen within the staleness budget, sorted by id.
    pub fn get_fresh(&self, max_staleness: i64, now: i64) -> Vec<&TrackedEntity<K>> {
        let mut fresh: Vec<&TrackedEntity<K>> =
            self.entities.values().filter(|e| now - e.last_seen <= max_staleness).collect();
        fresh.sort_unstable_by_key(|e| e.id);
        fresh
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// All currently tracked ids, sorted.
    pub fn tracked_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.entities.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(expiry_horizon: i64) -> EntityTracker<&'static str> {
        EntityTracker::new(TrackerConfig { expiry_horizon, history_depth: 10 })
    }

    #[test]
    fn first_appearance_is_added_then_updated() {
        let mut t = tracker(60);
        let diff = t.apply(vec![(1, "a"), (2, "b")], 100);
        assert_eq!(diff.added, vec![1, 2]);
        assert!(diff.updated.is_empty());

        let diff = t.apply(vec![(1, "a2"), (3, "c")], 101);
        assert_eq!(diff.added, vec![3]);
        assert_eq!(diff.updated, vec![1]);
        assert!(diff.expired.is_empty());

        let entity = t.get(1).unwrap();
        assert_eq!(entity.first_seen, 100);
        assert_eq!(entity.last_seen, 101);
        assert_eq!(entity.data, "a2");
    }

    #[test]
    fn expiry_at_exact_horizon_boundary() {
        let mut t = tracker(60);
        t.apply(vec![(7, "x")], 100);

        // Present at staleness 50 and exactly at the horizon.
        assert_eq!(t.get_fresh(60, 150).len(), 1);
        assert_eq!(t.get_fresh(60, 160).len(), 1);
        // Gone past it.
        assert!(t.get_fresh(60, 161).is_empty());

        // apply at 160: 160 - 100 = 60, not > 60, still tracked.
        let diff = t.apply(vec![], 160);
        assert!(diff.expired.is_empty());
        assert_eq!(t.len(), 1);

        // apply at 161 expires it exactly once.
        let diff = t.apply(vec![], 161);
        assert_eq!(diff.expired, vec![7]);
        assert_eq!(t.len(), 0);
        let diff = t.apply(vec![], 162);
        assert!(diff.expired.is_empty());
    }

    #[test]
    fn empty_update_does_not_mass_expire() {
        let mut t = tracker(60);
        t.apply(vec![(1, "a"), (2, "b")], 100);

        // The kind simply wasn't sampled this step.
        let diff = t.apply(vec![], 101);
        assert!(diff.is_empty());
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn updated_and_expired_are_disjoint() {
        let mut t = tracker(10);
        t.apply(vec![(1, "a"), (2, "b")], 0);
        let diff = t.apply(vec![(1, "a2")], 100);
        assert_eq!(diff.updated, vec![1]);
        assert_eq!(diff.expired, vec![2]);
        assert!(diff.updated.iter().all(|id| !diff.expired.contains(id)));
    }

    #[test]
    fn negative_horizon_disables_expiry() {
        let mut t = tracker(-1);
        t.apply(vec![(1, "wall")], 0);
        let diff = t.apply(vec![], 1_000_000);
        assert!(diff.expired.is_empty());
        assert_eq!(t.len(), 1);

        // Only an explicit clear removes them.
        assert_eq!(t.clear(), vec![1]);
        assert!(t.is_empty());
    }

    #[test]
    fn clear_returns_all_ids() {
        let mut t = tracker(60);
        t.apply(vec![(3, "a"), (1, "b"), (2, "c")], 5);
        assert_eq!(t.clear(), vec![1, 2, 3]);
        assert!(t.tracked_ids().is_empty());
    }

    #[test]
    fn history_is_bounded_per_entity() {
        let mut t = EntityTracker::new(TrackerConfig { expiry_horizon: -1, history_depth: 3 });
        for i in 0..10i64 {
            t.apply(vec![(1, i)], i);
        }
        let entity = t.get(1).unwrap();
        let history: Vec<i64> = entity.history().copied().collect();
        assert_eq!(history, vec![7, 8, 9]);
    }

    #[test]
    fn duplicate_ids_in_one_list_collapse() {
        let mut t = tracker(60);
        let diff = t.apply(vec![(1, "first"), (1, "second")], 10);
        assert_eq!(diff.added, vec![1]);
        assert_eq!(t.get(1).unwrap().data, "second");
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn diff_sets_are_pairwise_disjoint(
                lists in prop::collection::vec(
                    prop::collection::vec(0i64..20, 0..10),
                    1..20
                )
            ) {
                let mut t = EntityTracker::new(TrackerConfig {
                    expiry_horizon: 3,
                    history_depth: 4,
                });
                for (step, ids) in lists.iter().enumerate() {
                    let fresh: Vec<(i64, i64)> = ids.iter().map(|id| (*id, *id)).collect();
                    let diff = t.apply(fresh, step as i64);
                    for id in &diff.added {
                        prop_assert!(!diff.updated.contains(id));
                        prop_assert!(!diff.expired.contains(id));
                    }
                    for id in &diff.updated {
                        prop_assert!(!diff.expired.contains(id));
                    }
                }
            }

            #[test]
            fn tracked_set_matches_recency_invariant(
                lists in prop::collection::vec(
                    prop::collection::vec(0i64..10, 0..5),
                    1..15
                ),
                horizon in 0i64..5
            ) {
                let mut t = EntityTracker::new(TrackerConfig {
                    expiry_horizon: horizon,
                    history_depth: 2,
                });
                for (step, ids) in lists.iter().enumerate() {
                    let now = step as i64;
                    let fresh: Vec<(i64, i64)> = ids.iter().map(|id| (*id, now)).collect();
                    t.apply(fresh, now);
                    // Every survivor was seen within the horizon.
                    for id in t.tracked_ids() {
                        let entity = t.get(id).unwrap();
                        prop_assert!(now - entity.last_seen <= horizon);
                    }
                }
            }
        }
    }
}
