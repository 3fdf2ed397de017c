//! Property tests for the group tracker.
//!
//! These tests use `proptest` to generate random sequences of tracker
//! operations and verify that the forest, the membership map and the group
//! records never disagree.

use std::sync::Arc;

use proptest::prelude::*;
use tangle_core::prelude::*;

/// Operations we can perform on the tracker.
#[derive(Debug, Clone)]
enum TrackerOp {
    Create(u64, u64),
    Union(usize, usize),
    Split(usize, usize),
    Add(usize, u64),
    Remove(usize, usize),
    Find(u64),
}

fn tracker_op_strategy() -> impl Strategy<Value = TrackerOp> {
    prop_oneof![
        (0..64u64, 0..64u64).prop_map(|(a, b)| TrackerOp::Create(a, b)),
        (0..16usize, 0..16usize).prop_map(|(a, b)| TrackerOp::Union(a, b)),
        (0..16usize, 1..8usize).prop_map(|(g, n)| TrackerOp::Split(g, n)),
        (0..16usize, 0..64u64).prop_map(|(g, r)| TrackerOp::Add(g, r)),
        (0..16usize, 0..8usize).prop_map(|(g, i)| TrackerOp::Remove(g, i)),
        (0..64u64).prop_map(TrackerOp::Find),
    ]
}

fn pick(tracker: &GroupTracker, idx: usize) -> Option<GroupId> {
    let ids: Vec<GroupId> = tracker.groups().map(|g| g.id()).collect();
    if ids.is_empty() {
        None
    } else {
        Some(ids[idx % ids.len()])
    }
}

fn assert_find_closure(tracker: &mut GroupTracker) -> Result<(), TestCaseError> {
    let members: Vec<(GroupId, ResourceId)> = tracker
        .groups()
        .flat_map(|g| g.participants().iter().map(move |r| (g.id(), *r)))
        .collect();
    for (group, resource) in members {
        let found = tracker.find(resource);
        prop_assert_eq!(found, Some(group));
        prop_assert_eq!(tracker.group_of(resource), Some(group));
        let record = tracker.group(group).expect("group exists");
        prop_assert!(record.contains(resource));
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2_000))]

    #[test]
    fn find_always_resolves_to_a_containing_group(
        ops in prop::collection::vec(tracker_op_strategy(), 1..60)
    ) {
        let mut tracker = GroupTracker::new(Arc::new(VirtualClock::new()));

        for op in ops {
            match op {
                TrackerOp::Create(a, b) => {
                    let _ = tracker.create_group(
                        &[ResourceId::new(a), ResourceId::new(b)],
                        GroupKind::Bell,
                    );
                }
                TrackerOp::Union(a, b) => {
                    if let (Some(ga), Some(gb)) = (pick(&tracker, a), pick(&tracker, b)) {
                        let survivor = tracker.union(ga, gb).unwrap();
                        prop_assert!(survivor == ga || survivor == gb);
                    }
                }
                TrackerOp::Split(g, n) => {
                    if let Some(id) = pick(&tracker, g) {
                        let members: Vec<ResourceId> =
                            tracker.group(id).unwrap().participants().iter().copied().collect();
                        let take = n.min(members.len());
                        let result = tracker.split(id, &members[..take]);
                        if take == members.len() {
                            let is_invalid = matches!(result, Err(TrackerError::InvalidPartition { .. }));
                            prop_assert!(is_invalid);
                        } else {
                            prop_assert!(result.is_ok());
                        }
                    }
                }
                TrackerOp::Add(g, r) => {
                    if let Some(id) = pick(&tracker, g) {
                        prop_assert!(tracker.add_to_group(id, ResourceId::new(r)).is_ok());
                    }
                }
                TrackerOp::Remove(g, i) => {
                    if let Some(id) = pick(&tracker, g) {
                        let members: Vec<ResourceId> =
                            tracker.group(id).unwrap().participants().iter().copied().collect();
                        let victim = members[i % members.len()];
                        prop_assert_eq!(tracker.remove_from_group(id, victim), Ok(true));
                        if members.len() - 1 < 2 {
                            prop_assert!(!tracker.contains_group(id));
                        }
                    }
                }
                TrackerOp::Find(r) => {
                    let resource = ResourceId::new(r);
                    let via_forest = tracker.find(resource);
                    prop_assert_eq!(via_forest, tracker.group_of(resource));
                }
            }

            assert_find_closure(&mut tracker)?;
        }

        for id in tracker.groups().map(|g| g.id()).collect::<Vec<_>>() {
            prop_assert!(tracker.validate_group_integrity(id).unwrap().is_valid);
        }
    }

    /// Union-by-rank keeps trees shallow: with `n` initial pair groups, no
    /// member is ever more than `log2(n) + 1` hops from its root, even when
    /// `find` is never called (so path compression never helps).
    #[test]
    fn union_by_rank_bounds_depth(
        pairs in 2..128usize,
        merges in prop::collection::vec((0..128usize, 0..128usize), 1..256)
    ) {
        let mut tracker = GroupTracker::new(Arc::new(VirtualClock::new()));
        for i in 0..pairs as u64 {
            tracker
                .create_group(&[ResourceId::new(2 * i), ResourceId::new(2 * i + 1)], GroupKind::Bell)
                .unwrap();
        }

        for (a, b) in merges {
            if let (Some(ga), Some(gb)) = (pick(&tracker, a), pick(&tracker, b)) {
                tracker.union(ga, gb).unwrap();
            }
        }

        let bound = (pairs as f64).log2().floor() as usize + 1;
        for i in 0..(2 * pairs) as u64 {
            let depth = tracker.depth(ResourceId::new(i)).unwrap();
            prop_assert!(depth <= bound, "depth {} exceeds bound {}", depth, bound);
        }
        for g in tracker.groups() {
            prop_assert!((g.rank() as usize) < bound);
        }
    }

    /// Identical operation sequences produce identical state hashes.
    #[test]
    fn view_hash_is_deterministic(seq in prop::collection::vec((0..32u64, 0..32u64), 1..40)) {
        let run = |seq: &[(u64, u64)]| {
            let mut tracker = GroupTracker::new(Arc::new(VirtualClock::new()));
            for &(a, b) in seq {
                match (tracker.group_of(ResourceId::new(a)), tracker.group_of(ResourceId::new(b))) {
                    (Some(ga), Some(gb)) => { tracker.union(ga, gb).unwrap(); }
                    (Some(ga), None) => { tracker.add_to_group(ga, ResourceId::new(b)).unwrap(); }
                    (None, Some(gb)) => { tracker.add_to_group(gb, ResourceId::new(a)).unwrap(); }
                    (None, None) => {
                        let _ = tracker.create_group(&[ResourceId::new(a), ResourceId::new(b)], GroupKind::Cluster);
                    }
                }
            }
            tracker.view().state_hash()
        };
        prop_assert_eq!(run(&seq), run(&seq));
    }
}
