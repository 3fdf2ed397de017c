//! The group tracker: canonical registry of entanglement groups.
//!
//! [`GroupTracker`] keeps three structures in lock-step:
//!
//! 1. `groups` -- the [`Group`] records, keyed by [`GroupId`].
//! 2. `membership` -- the explicit resource -> group map.
//! 3. `forest` -- the union-find [`Forest`]; the root of every member's
//!    chain is its group's representative and carries the group's id.
//!
//! Every mutating operation validates its preconditions first and only then
//! touches state, so a rejected call leaves the tracker exactly as it was.
//!
//! The tracker is single-writer. It performs no internal synchronisation;
//! callers own one instance and hand out `&mut` access from a single loop.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tangle_core::prelude::*;
//!
//! let clock = Arc::new(VirtualClock::new());
//! let mut tracker = GroupTracker::new(clock);
//!
//! let (a, b, c) = (ResourceId::new(1), ResourceId::new(2), ResourceId::new(3));
//! let g1 = tracker.create_group(&[a, b], GroupKind::Bell).unwrap();
//! assert_eq!(tracker.find(a), Some(g1));
//!
//! tracker.add_to_group(g1, c).unwrap();
//! assert_eq!(tracker.find(c), tracker.find(b));
//!
//! let (rest, fragment) = tracker.split(g1, &[c]).unwrap();
//! assert_eq!(rest, g1);
//! // A one-member side does not survive the split.
//! assert!(!tracker.contains_group(fragment));
//! assert_eq!(tracker.find(c), None);
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::event::{EventBus, EventSink, LifecycleEvent};
use crate::group::{Group, GroupKind, GroupOperation, OperationLog};
use crate::id::{GroupId, GroupIdAllocator, ResourceId};
use crate::union_find::Forest;
use crate::TrackerError;

// ---------------------------------------------------------------------------
// TrackerConfig
// ---------------------------------------------------------------------------

/// Tunables for the tracker and its integrity checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Records kept per group in its operation log.
    pub operation_log_capacity: usize,
    /// Stability below this is reported as a warning.
    pub low_stability_threshold: f64,
    /// Strength below this is reported as a warning.
    pub low_strength_threshold: f64,
    /// Groups with more participants than this are reported as a warning.
    pub oversized_group_threshold: usize,
    /// Strength assigned to freshly created groups.
    pub initial_strength: f64,
    /// Stability assigned to freshly created groups.
    pub initial_stability: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            operation_log_capacity: 32,
            low_stability_threshold: 0.3,
            low_strength_threshold: 0.2,
            oversized_group_threshold: 256,
            initial_strength: 1.0,
            initial_stability: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// GroupMetrics
// ---------------------------------------------------------------------------

/// Aggregate observability data. Computing it has no side effects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupMetrics {
    pub total_groups: usize,
    pub tracked_resources: usize,
    pub forest_nodes: usize,
    pub average_group_size: f64,
    pub largest_group_size: usize,
    pub average_strength: f64,
    pub average_stability: f64,
    pub max_rank: u32,
    /// Group count per [`GroupKind`] display name.
    pub groups_by_kind: BTreeMap<String, usize>,
    pub groups_created: u64,
    pub unions_performed: u64,
    pub splits_performed: u64,
    pub dissolutions: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Counters {
    pub(crate) unions: u64,
    pub(crate) splits: u64,
    pub(crate) dissolutions: u64,
}

// ---------------------------------------------------------------------------
// GroupTracker
// ---------------------------------------------------------------------------

/// Union-find backed registry of entanglement groups.
pub struct GroupTracker {
    pub(crate) config: TrackerConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) events: EventBus,
    pub(crate) groups: BTreeMap<GroupId, Group>,
    pub(crate) membership: HashMap<ResourceId, GroupId>,
    pub(crate) forest: Forest,
    pub(crate) ids: GroupIdAllocator,
    pub(crate) counters: Counters,
}

impl GroupTracker {
    /// A tracker with default configuration and no event subscribers.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(clock, TrackerConfig::default())
    }

    pub fn with_config(clock: Arc<dyn Clock>, config: TrackerConfig) -> Self {
        Self {
            config,
            clock,
            events: EventBus::new(),
            groups: BTreeMap::new(),
            membership: HashMap::new(),
            forest: Forest::new(),
            ids: GroupIdAllocator::new(),
            counters: Counters::default(),
        }
    }

    /// Attach an event sink.
    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) {
        self.events.subscribe(sink);
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub(crate) fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    pub(crate) fn emit(&self, event: LifecycleEvent) {
        self.events.publish(self.now(), event);
    }

    // -- read-only accessors ------------------------------------------------

    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(&id)
    }

    /// All groups in id order.
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn contains_group(&self, id: GroupId) -> bool {
        self.groups.contains_key(&id)
    }

    /// Group recorded for `resource` in the explicit membership map.
    ///
    /// Unlike [`find`](Self::find) this never touches the forest.
    pub fn group_of(&self, resource: ResourceId) -> Option<GroupId> {
        self.membership.get(&resource).copied()
    }

    pub fn is_grouped(&self, resource: ResourceId) -> bool {
        self.membership.contains_key(&resource)
    }

    /// Parent hops from `resource` to its union-find root.
    pub fn depth(&self, resource: ResourceId) -> Option<usize> {
        self.forest.depth(resource)
    }

    /// Whether collecting `resource` on its own would leave a live group
    /// with a member missing.
    pub fn would_fragment(&self, resource: ResourceId) -> bool {
        self.group_of(resource)
            .and_then(|g| self.groups.get(&g))
            .is_some_and(|g| g.len() >= 2)
    }

    // -- find ---------------------------------------------------------------

    /// Canonical group of `resource`, compressing its parent chain.
    pub fn find(&mut self, resource: ResourceId) -> Option<GroupId> {
        let now = self.now();
        let root = self.forest.find_root(resource, now)?;
        self.forest.get(root).map(|node| node.group_id)
    }

    // -- create -------------------------------------------------------------

    /// Form a new group. The first participant becomes the representative.
    pub fn create_group(
        &mut self,
        participants: &[ResourceId],
        kind: GroupKind,
    ) -> Result<GroupId, TrackerError> {
        if participants.len() < 2 {
            return Err(TrackerError::TooFewParticipants {
                count: participants.len(),
            });
        }
        let mut set = BTreeSet::new();
        for &resource in participants {
            if !set.insert(resource) {
                return Err(TrackerError::DuplicateParticipant { resource });
            }
            if let Some(&group) = self.membership.get(&resource) {
                return Err(TrackerError::AlreadyGrouped { resource, group });
            }
        }

        let now = self.now();
        let id = self.ids.allocate();
        let representative = participants[0];

        self.forest.insert_root(representative, id, 0, now);
        for &resource in &participants[1..] {
            self.forest.insert_child(resource, representative, id, now);
        }
        for &resource in participants {
            self.membership.insert(resource, id);
        }

        let mut group = Group::new(
            id,
            set,
            representative,
            kind.clone(),
            self.config.initial_strength,
            self.config.initial_stability,
            now,
            self.config.operation_log_capacity,
        );
        group.log.record(
            now,
            GroupOperation::Created {
                participants: participants.len(),
            },
        );
        self.groups.insert(id, group);

        debug!(group = %id, participants = participants.len(), kind = %kind, "group created");
        self.emit(LifecycleEvent::GroupCreated {
            group: id,
            participants: participants.to_vec(),
            kind,
        });
        Ok(id)
    }

    // -- union --------------------------------------------------------------

    /// Merge two groups by rank. Returns the surviving id.
    pub fn union(&mut self, a: GroupId, b: GroupId) -> Result<GroupId, TrackerError> {
        let rank_a = self.groups.get(&a).ok_or(TrackerError::GroupNotFound(a))?.rank;
        if a == b {
            return Ok(a);
        }
        let rank_b = self.groups.get(&b).ok_or(TrackerError::GroupNotFound(b))?.rank;

        let (survivor_id, absorbed_id) = if rank_a >= rank_b { (a, b) } else { (b, a) };
        let tie = rank_a == rank_b;
        let now = self.now();

        let Some(absorbed) = self.groups.remove(&absorbed_id) else {
            return Err(TrackerError::GroupNotFound(absorbed_id));
        };
        let Some(survivor) = self.groups.get_mut(&survivor_id) else {
            self.groups.insert(absorbed_id, absorbed);
            return Err(TrackerError::GroupNotFound(survivor_id));
        };

        self.forest
            .link(absorbed.representative, survivor.representative, now);
        if tie {
            survivor.rank += 1;
        }
        self.forest
            .set_rank(survivor.representative, survivor.rank, now);

        for &member in &absorbed.participants {
            self.membership.insert(member, survivor_id);
            self.forest.set_group(member, survivor_id, now);
            survivor.participants.insert(member);
        }
        survivor.strength = survivor.strength.max(absorbed.strength);
        survivor.stability = survivor.stability.min(absorbed.stability);
        survivor
            .log
            .record(now, GroupOperation::Absorbed { other: absorbed_id });
        let rank = survivor.rank;
        self.counters.unions += 1;

        debug!(survivor = %survivor_id, absorbed = %absorbed_id, rank, "groups merged");
        self.emit(LifecycleEvent::GroupsMerged {
            survivor: survivor_id,
            absorbed: absorbed_id,
            rank,
        });
        Ok(survivor_id)
    }

    // -- split --------------------------------------------------------------

    /// Carve `subset` out of `group` into a new group.
    ///
    /// Returns `(group, fragment)`. Both sides take the disruption penalty;
    /// the fragment starts at rank 0 and the remainder loses one rank. A side
    /// left with fewer than two members is dissolved before this returns, so
    /// either id may already name a dissolved group.
    pub fn split(
        &mut self,
        group: GroupId,
        subset: &[ResourceId],
    ) -> Result<(GroupId, GroupId), TrackerError> {
        let original = self
            .groups
            .get(&group)
            .ok_or(TrackerError::GroupNotFound(group))?;

        if subset.is_empty() {
            return Err(TrackerError::InvalidPartition {
                group,
                reason: "subset is empty".to_owned(),
            });
        }
        let moved: BTreeSet<ResourceId> = subset.iter().copied().collect();
        if let Some(outsider) = moved.iter().find(|r| !original.contains(**r)) {
            return Err(TrackerError::InvalidPartition {
                group,
                reason: format!("{outsider} is not a participant"),
            });
        }
        let remaining: BTreeSet<ResourceId> =
            original.participants.difference(&moved).copied().collect();
        if remaining.is_empty() {
            return Err(TrackerError::InvalidPartition {
                group,
                reason: "complement would be empty".to_owned(),
            });
        }

        let now = self.now();
        let fragment_id = self.ids.allocate();
        let fragment_rep = subset[0];

        let mut fragment = original.clone();
        fragment.id = fragment_id;
        fragment.participants = moved.clone();
        fragment.representative = fragment_rep;
        fragment.rank = 0;
        fragment.created_at = now;
        fragment.log = OperationLog::new(self.config.operation_log_capacity);
        fragment.apply_split_penalty();
        fragment
            .log
            .record(now, GroupOperation::SplitFrom { original: group });

        for &member in &moved {
            self.membership.insert(member, fragment_id);
        }
        self.groups.insert(fragment_id, fragment);
        self.rebuild_tree(fragment_id, now);

        if let Some(rest) = self.groups.get_mut(&group) {
            if !remaining.contains(&rest.representative) {
                if let Some(&first) = remaining.iter().next() {
                    rest.representative = first;
                }
            }
            rest.participants = remaining;
            rest.rank = rest.rank.saturating_sub(1);
            rest.apply_split_penalty();
            rest.log.record(
                now,
                GroupOperation::SplitOff {
                    fragment: fragment_id,
                    moved: moved.len(),
                },
            );
        }
        self.rebuild_tree(group, now);
        self.counters.splits += 1;

        debug!(group = %group, fragment = %fragment_id, moved = moved.len(), "group split");
        self.emit(LifecycleEvent::GroupSplit {
            original: group,
            fragment: fragment_id,
            fragment_participants: moved.into_iter().collect(),
        });

        for side in [group, fragment_id] {
            if self.groups.get(&side).is_some_and(|g| g.len() < 2) {
                self.dissolve_group(side)?;
            }
        }
        Ok((group, fragment_id))
    }

    // -- membership ---------------------------------------------------------

    /// Add `resource` to `group`.
    ///
    /// Returns `false` if it is already a member. A resource grouped elsewhere
    /// causes the two groups to be merged instead.
    pub fn add_to_group(&mut self, group: GroupId, resource: ResourceId) -> Result<bool, TrackerError> {
        let representative = self
            .groups
            .get(&group)
            .ok_or(TrackerError::GroupNotFound(group))?
            .representative;

        match self.membership.get(&resource).copied() {
            Some(current) if current == group => Ok(false),
            Some(other) => {
                self.union(group, other)?;
                Ok(true)
            }
            None => {
                let now = self.now();
                self.forest.insert_child(resource, representative, group, now);
                self.membership.insert(resource, group);
                if let Some(g) = self.groups.get_mut(&group) {
                    g.participants.insert(resource);
                    g.log
                        .record(now, GroupOperation::ParticipantAdded { resource });
                }
                debug!(group = %group, resource = %resource, "participant added");
                self.emit(LifecycleEvent::ParticipantAdded { group, resource });
                Ok(true)
            }
        }
    }

    /// Remove `resource` from `group`; dissolves the group if fewer than two
    /// members remain. Returns `false` if it was not a member.
    pub fn remove_from_group(
        &mut self,
        group: GroupId,
        resource: ResourceId,
    ) -> Result<bool, TrackerError> {
        let g = self
            .groups
            .get(&group)
            .ok_or(TrackerError::GroupNotFound(group))?;
        if !g.contains(resource) {
            return Ok(false);
        }

        let had_children = g
            .participants
            .iter()
            .any(|p| self.forest.get(*p).and_then(|n| n.parent) == Some(resource));
        let was_representative = g.representative == resource;
        let now = self.now();

        if self.membership.get(&resource) == Some(&group) {
            self.membership.remove(&resource);
        }
        if self.forest.get(resource).is_some_and(|n| n.group_id == group) {
            self.forest.remove(resource);
        }
        let remaining = match self.groups.get_mut(&group) {
            Some(g) => {
                g.participants.remove(&resource);
                g.log
                    .record(now, GroupOperation::ParticipantRemoved { resource });
                if was_representative {
                    if let Some(&first) = g.participants.iter().next() {
                        g.representative = first;
                    }
                }
                g.participants.len()
            }
            None => 0,
        };

        debug!(group = %group, resource = %resource, remaining, "participant removed");
        self.emit(LifecycleEvent::ParticipantRemoved { group, resource });

        if remaining < 2 {
            self.dissolve_group(group)?;
        } else if was_representative || had_children {
            self.rebuild_tree(group, now);
        }
        Ok(true)
    }

    /// Dissolve `group`, ungrouping every member. Returns the former members.
    pub fn dissolve_group(&mut self, group: GroupId) -> Result<Vec<ResourceId>, TrackerError> {
        let record = self
            .groups
            .remove(&group)
            .ok_or(TrackerError::GroupNotFound(group))?;

        for member in &record.participants {
            if self.membership.get(member) == Some(&group) {
                self.membership.remove(member);
            }
            if self.forest.get(*member).is_some_and(|n| n.group_id == group) {
                self.forest.remove(*member);
            }
        }
        self.counters.dissolutions += 1;

        let former: Vec<ResourceId> = record.participants.into_iter().collect();
        info!(group = %group, members = former.len(), "group dissolved");
        self.emit(LifecycleEvent::GroupDissolved {
            group,
            former_participants: former.clone(),
        });
        Ok(former)
    }

    /// Re-root every participant of `group` directly beneath its
    /// representative, carrying the group's rank on the root.
    pub(crate) fn rebuild_tree(&mut self, group: GroupId, now: u64) {
        let Some(g) = self.groups.get_mut(&group) else {
            return;
        };
        if !g.participants.contains(&g.representative) {
            if let Some(&first) = g.participants.iter().next() {
                g.representative = first;
            }
        }
        let representative = g.representative;
        let rank = g.rank;
        for &member in &g.participants {
            if member == representative {
                self.forest.insert_root(member, group, rank, now);
            } else {
                self.forest.insert_child(member, representative, group, now);
            }
        }
    }

    // -- metrics ------------------------------------------------------------

    pub fn metrics(&self) -> GroupMetrics {
        let total_groups = self.groups.len();
        let mut m = GroupMetrics {
            total_groups,
            tracked_resources: self.membership.len(),
            forest_nodes: self.forest.len(),
            groups_created: self.ids.allocated(),
            unions_performed: self.counters.unions,
            splits_performed: self.counters.splits,
            dissolutions: self.counters.dissolutions,
            ..GroupMetrics::default()
        };
        if total_groups == 0 {
            return m;
        }

        let mut size_sum = 0usize;
        let mut strength_sum = 0.0;
        let mut stability_sum = 0.0;
        for g in self.groups.values() {
            size_sum += g.len();
            m.largest_group_size = m.largest_group_size.max(g.len());
            m.max_rank = m.max_rank.max(g.rank);
            strength_sum += g.strength;
            stability_sum += g.stability;
            *m.groups_by_kind.entry(g.kind.to_string()).or_insert(0) += 1;
        }
        let n = total_groups as f64;
        m.average_group_size = size_sum as f64 / n;
        m.average_strength = strength_sum / n;
        m.average_stability = stability_sum / n;
        m
    }
}

impl std::fmt::Debug for GroupTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupTracker")
            .field("groups", &self.groups.len())
            .field("tracked_resources", &self.membership.len())
            .field("events", &self.events)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::event::EventKind;
    use crate::journal::EventJournal;

    fn r(raw: u64) -> ResourceId {
        ResourceId::new(raw)
    }

    fn tracker() -> (GroupTracker, Arc<EventJournal>) {
        let mut t = GroupTracker::new(Arc::new(VirtualClock::new()));
        let journal = Arc::new(EventJournal::new());
        t.subscribe(journal.clone());
        (t, journal)
    }

    /// Every member's map entry agrees with its forest root.
    fn assert_consistent(t: &GroupTracker) {
        for g in t.groups() {
            for &m in g.participants() {
                assert_eq!(t.group_of(m), Some(g.id()), "map entry for {m}");
                let root = t.forest.root_of(m).expect("member has a root");
                assert_eq!(t.forest.get(root).unwrap().group_id, g.id(), "root of {m}");
            }
        }
    }

    // -- create -------------------------------------------------------------

    #[test]
    fn create_group_registers_members() {
        let (mut t, journal) = tracker();
        let g = t.create_group(&[r(1), r(2), r(3)], GroupKind::Ghz).unwrap();

        assert_eq!(t.group(g).unwrap().len(), 3);
        assert_eq!(t.group(g).unwrap().rank(), 0);
        assert_eq!(t.find(r(3)), Some(g));
        assert_eq!(journal.count_of_kind(EventKind::GroupCreated), 1);
        assert_consistent(&t);
    }

    #[test]
    fn create_group_rejects_too_few() {
        let (mut t, _) = tracker();
        assert_eq!(
            t.create_group(&[r(1)], GroupKind::Bell),
            Err(TrackerError::TooFewParticipants { count: 1 })
        );
        assert_eq!(t.group_count(), 0);
    }

    #[test]
    fn create_group_rejects_already_grouped_without_side_effects() {
        let (mut t, _) = tracker();
        let g = t.create_group(&[r(1), r(2)], GroupKind::Bell).unwrap();
        let err = t.create_group(&[r(3), r(2)], GroupKind::Bell).unwrap_err();
        assert_eq!(
            err,
            TrackerError::AlreadyGrouped {
                resource: r(2),
                group: g
            }
        );
        assert!(!t.is_grouped(r(3)));
        assert_eq!(t.group_count(), 1);
    }

    #[test]
    fn create_group_rejects_duplicates() {
        let (mut t, _) = tracker();
        assert_eq!(
            t.create_group(&[r(1), r(1)], GroupKind::Bell),
            Err(TrackerError::DuplicateParticipant { resource: r(1) })
        );
    }

    // -- union --------------------------------------------------------------

    #[test]
    fn union_of_equal_ranks_increments_rank() {
        let (mut t, _) = tracker();
        let g1 = t.create_group(&[r(1), r(2)], GroupKind::Bell).unwrap();
        let g2 = t.create_group(&[r(3), r(4)], GroupKind::Bell).unwrap();

        let merged = t.union(g1, g2).unwrap();
        assert_eq!(merged, g1);
        let group = t.group(merged).unwrap();
        assert_eq!(group.rank(), 1);
        assert_eq!(group.len(), 4);
        assert!(t.group(g2).is_none());
        assert_eq!(t.find(r(4)), Some(g1));
        assert_consistent(&t);
    }

    #[test]
    fn union_folds_lower_rank_into_higher() {
        let (mut t, _) = tracker();
        let g1 = t.create_group(&[r(1), r(2)], GroupKind::Bell).unwrap();
        let g2 = t.create_group(&[r(3), r(4)], GroupKind::Bell).unwrap();
        let g3 = t.create_group(&[r(5), r(6)], GroupKind::Bell).unwrap();
        let big = t.union(g1, g2).unwrap();

        // g3 has rank 0, big has rank 1: big survives regardless of order.
        assert_eq!(t.union(g3, big).unwrap(), big);
        assert_eq!(t.group(big).unwrap().rank(), 1);
        assert_consistent(&t);
    }

    #[test]
    fn union_is_conservative_on_metrics() {
        let (mut t, _) = tracker();
        let g1 = t.create_group(&[r(1), r(2), r(3)], GroupKind::Ghz).unwrap();
        let g2 = t.create_group(&[r(4), r(5)], GroupKind::Bell).unwrap();
        t.split(g1, &[r(3)]).unwrap(); // g1: strength 0.8, stability 0.9

        let merged = t.union(g1, g2).unwrap();
        let g = t.group(merged).unwrap();
        assert!((g.strength() - 1.0).abs() < 1e-12);
        assert!((g.stability() - 0.9).abs() < 1e-12);
    }

    #[test]
    fn union_same_group_is_noop() {
        let (mut t, journal) = tracker();
        let g = t.create_group(&[r(1), r(2)], GroupKind::Bell).unwrap();
        assert_eq!(t.union(g, g), Ok(g));
        assert_eq!(t.group(g).unwrap().rank(), 0);
        assert_eq!(journal.count_of_kind(EventKind::GroupsMerged), 0);
    }

    #[test]
    fn union_unknown_group_fails() {
        let (mut t, _) = tracker();
        let g = t.create_group(&[r(1), r(2)], GroupKind::Bell).unwrap();
        let ghost = GroupId::from_raw(99);
        assert_eq!(t.union(g, ghost), Err(TrackerError::GroupNotFound(ghost)));
        assert_eq!(t.union(ghost, g), Err(TrackerError::GroupNotFound(ghost)));
        assert!(t.contains_group(g));
    }

    // -- split --------------------------------------------------------------

    #[test]
    fn split_creates_penalised_fragment() {
        let (mut t, _) = tracker();
        let g1 = t.create_group(&[r(1), r(2)], GroupKind::Bell).unwrap();
        let g2 = t.create_group(&[r(3), r(4)], GroupKind::Bell).unwrap();
        let g = t.union(g1, g2).unwrap(); // rank 1

        let (rest, frag) = t.split(g, &[r(3), r(4)]).unwrap();
        assert_eq!(rest, g);

        let rest_g = t.group(rest).unwrap();
        assert_eq!(rest_g.rank(), 0);
        assert_eq!(rest_g.participants().len(), 2);
        assert!((rest_g.strength() - 0.8).abs() < 1e-12);

        let frag_g = t.group(frag).unwrap();
        assert_eq!(frag_g.rank(), 0);
        assert!((frag_g.stability() - 0.9).abs() < 1e-12);
        assert_eq!(t.find(r(3)), Some(frag));
        assert_eq!(t.find(r(1)), Some(rest));
        assert_consistent(&t);
    }

    #[test]
    fn split_whole_group_is_invalid() {
        let (mut t, _) = tracker();
        let g = t.create_group(&[r(1), r(2)], GroupKind::Bell).unwrap();
        let err = t.split(g, &[r(1), r(2)]).unwrap_err();
        assert!(matches!(err, TrackerError::InvalidPartition { .. }));
        assert_eq!(t.group(g).unwrap().len(), 2);
    }

    #[test]
    fn split_empty_or_foreign_subset_is_invalid() {
        let (mut t, _) = tracker();
        let g = t.create_group(&[r(1), r(2), r(3)], GroupKind::W).unwrap();
        assert!(matches!(
            t.split(g, &[]),
            Err(TrackerError::InvalidPartition { .. })
        ));
        assert!(matches!(
            t.split(g, &[r(9)]),
            Err(TrackerError::InvalidPartition { .. })
        ));
        assert_eq!(t.group_count(), 1);
    }

    #[test]
    fn split_dissolves_one_member_side() {
        let (mut t, journal) = tracker();
        let g = t.create_group(&[r(1), r(2), r(3)], GroupKind::Ghz).unwrap();
        let (rest, frag) = t.split(g, &[r(3)]).unwrap();

        assert_eq!(t.group(rest).map(|g| g.len()), Some(2));
        assert!(!t.contains_group(frag));
        assert_eq!(t.find(r(3)), None);
        assert_eq!(t.group_count(), 1);
        assert_eq!(t.metrics().tracked_resources, 2);
        assert_eq!(journal.count_of_kind(EventKind::GroupDissolved), 1);

        // The freed resource can be grouped again.
        let fresh = t.create_group(&[r(3), r(4)], GroupKind::Bell).unwrap();
        assert_eq!(t.find(r(3)), Some(fresh));
        assert_consistent(&t);
    }

    #[test]
    fn split_pair_dissolves_both_sides() {
        let (mut t, _) = tracker();
        let g = t.create_group(&[r(1), r(2)], GroupKind::Bell).unwrap();
        let (rest, frag) = t.split(g, &[r(1)]).unwrap();
        assert!(!t.contains_group(rest));
        assert!(!t.contains_group(frag));
        assert!(!t.is_grouped(r(1)));
        assert!(!t.is_grouped(r(2)));
        assert_consistent(&t);
    }

    #[test]
    fn split_moving_representative_reroots_remainder() {
        let (mut t, _) = tracker();
        let g = t.create_group(&[r(1), r(2), r(3)], GroupKind::W).unwrap();
        let (rest, _) = t.split(g, &[r(1)]).unwrap();
        let rest_g = t.group(rest).unwrap();
        assert_ne!(rest_g.representative(), r(1));
        assert_eq!(t.depth(rest_g.representative()), Some(0));
        assert_consistent(&t);
    }

    // -- add / remove -------------------------------------------------------

    #[test]
    fn add_to_group_plain_and_duplicate() {
        let (mut t, _) = tracker();
        let g = t.create_group(&[r(1), r(2)], GroupKind::Bell).unwrap();
        assert_eq!(t.add_to_group(g, r(3)), Ok(true));
        assert_eq!(t.add_to_group(g, r(3)), Ok(false));
        assert_eq!(t.find(r(3)), Some(g));
    }

    #[test]
    fn add_grouped_resource_merges_groups() {
        let (mut t, journal) = tracker();
        let g1 = t.create_group(&[r(1), r(2)], GroupKind::Bell).unwrap();
        let g2 = t.create_group(&[r(3), r(4)], GroupKind::Bell).unwrap();
        assert_eq!(t.add_to_group(g1, r(3)), Ok(true));
        assert_eq!(t.group_count(), 1);
        assert_eq!(t.find(r(4)), t.find(r(1)));
        assert!(!t.contains_group(g2));
        assert_eq!(journal.count_of_kind(EventKind::GroupsMerged), 1);
    }

    #[test]
    fn remove_below_two_dissolves() {
        let (mut t, journal) = tracker();
        let g = t.create_group(&[r(1), r(2)], GroupKind::Bell).unwrap();
        assert_eq!(t.remove_from_group(g, r(1)), Ok(true));
        assert!(!t.contains_group(g));
        assert!(!t.is_grouped(r(2)));
        assert_eq!(t.find(r(2)), None);
        assert_eq!(journal.count_of_kind(EventKind::GroupDissolved), 1);
    }

    #[test]
    fn remove_representative_keeps_tree_intact() {
        let (mut t, _) = tracker();
        let g = t.create_group(&[r(1), r(2), r(3)], GroupKind::Ghz).unwrap();
        assert_eq!(t.remove_from_group(g, r(1)), Ok(true));
        assert_eq!(t.find(r(2)), Some(g));
        assert_eq!(t.find(r(3)), Some(g));
        assert_consistent(&t);
    }

    #[test]
    fn remove_non_member_returns_false() {
        let (mut t, _) = tracker();
        let g = t.create_group(&[r(1), r(2)], GroupKind::Bell).unwrap();
        assert_eq!(t.remove_from_group(g, r(7)), Ok(false));
    }

    // -- metrics ------------------------------------------------------------

    #[test]
    fn metrics_aggregate_groups() {
        let (mut t, _) = tracker();
        let g1 = t
            .create_group(&[r(1), r(2), r(7), r(8)], GroupKind::Bell)
            .unwrap();
        t.create_group(&[r(3), r(4), r(5), r(6)], GroupKind::Cluster)
            .unwrap();
        t.split(g1, &[r(7), r(8)]).unwrap();

        let m = t.metrics();
        assert_eq!(m.total_groups, 3);
        assert_eq!(m.tracked_resources, 8);
        assert_eq!(m.largest_group_size, 4);
        assert_eq!(m.groups_by_kind.get("bell"), Some(&2));
        assert_eq!(m.splits_performed, 1);
        assert!((m.average_group_size - 8.0 / 3.0).abs() < 1e-12);
    }
}
