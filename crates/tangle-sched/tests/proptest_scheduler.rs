//! Property tests for the scheduler and collector.
//!
//! Random schedules, cancellations, resets and group shapes are driven
//! through a virtual clock; the invariants below must hold for every run.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use tangle_core::prelude::*;
use tangle_sched::prelude::*;

#[derive(Debug, Clone)]
enum SchedOp {
    Schedule(u64, u64),
    Cancel(u64),
    Reset(u64),
    Advance(u64),
    Process,
}

fn sched_op_strategy() -> impl Strategy<Value = SchedOp> {
    prop_oneof![
        (0..16u64, 0..40_000u64).prop_map(|(r, ms)| SchedOp::Schedule(r, ms)),
        (0..16u64).prop_map(SchedOp::Cancel),
        (0..16u64).prop_map(SchedOp::Reset),
        (0..5_000u64).prop_map(SchedOp::Advance),
        Just(SchedOp::Process),
    ]
}

fn fresh() -> (Arc<VirtualClock>, GroupTracker, DeadlineScheduler) {
    let clock = Arc::new(VirtualClock::new());
    let tracker = GroupTracker::new(clock.clone());
    let scheduler = DeadlineScheduler::new(clock.clone(), Arc::new(InMemoryProvider::new()));
    (clock, tracker, scheduler)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Whatever happened before, cancelling succeeds at most once in a row.
    #[test]
    fn cancel_is_idempotent(
        ops in prop::collection::vec(sched_op_strategy(), 0..80),
        target in 0..16u64,
    ) {
        let (clock, mut tracker, mut scheduler) = fresh();
        for op in ops {
            match op {
                SchedOp::Schedule(r, ms) => {
                    scheduler.schedule_decoherence(ResourceId::new(r), Duration::from_millis(ms));
                }
                SchedOp::Cancel(r) => {
                    scheduler.cancel_decoherence(ResourceId::new(r));
                }
                SchedOp::Reset(r) => {
                    scheduler.reset_activity(ResourceId::new(r));
                }
                SchedOp::Advance(ms) => {
                    clock.advance(ms);
                }
                SchedOp::Process => {
                    let result = scheduler.process_timer_queue(&mut tracker);
                    prop_assert!(result.errors.is_empty());
                }
            }

            // One timer and at most one queue entry per resource.
            let stats = scheduler.stats();
            prop_assert!(stats.queued <= stats.timers);
            prop_assert_eq!(stats.queued, stats.armed);
        }

        let target = ResourceId::new(target);
        let was_scheduled = scheduler.is_scheduled(target);
        prop_assert_eq!(scheduler.cancel_decoherence(target), was_scheduled);
        prop_assert!(!scheduler.cancel_decoherence(target));
        prop_assert!(!scheduler.is_scheduled(target));
        prop_assert!(!scheduler.queue().contains(target));
        prop_assert!(!scheduler.is_candidate(target));
    }

    /// With entanglement respected, nothing that belonged to a group is
    /// collected unless that group was dissolved in the same run.
    #[test]
    fn gc_never_fragments_live_groups(
        durations in prop::collection::vec(0..2_000u64, 4..24),
        pairs in prop::collection::vec((0..24usize, 0..24usize), 0..16),
        elapsed in 0..2_000u64,
        hybrid in any::<bool>(),
    ) {
        let clock = Arc::new(VirtualClock::new());
        let provider = Arc::new(InMemoryProvider::new());
        let mut tracker = GroupTracker::new(clock.clone());
        let mut scheduler = DeadlineScheduler::new(clock.clone(), provider.clone());

        let n = durations.len();
        for (i, &ms) in durations.iter().enumerate() {
            let id = ResourceId::new(i as u64);
            provider.insert(id, 64);
            scheduler.schedule_decoherence(id, Duration::from_millis(ms));
        }
        for (a, b) in pairs {
            let (a, b) = (ResourceId::new((a % n) as u64), ResourceId::new((b % n) as u64));
            match (tracker.group_of(a), tracker.group_of(b)) {
                (Some(ga), Some(gb)) => { tracker.union(ga, gb).unwrap(); }
                (Some(ga), None) => { tracker.add_to_group(ga, b).unwrap(); }
                (None, Some(gb)) => { tracker.add_to_group(gb, a).unwrap(); }
                (None, None) => { let _ = tracker.create_group(&[a, b], GroupKind::Cluster); }
            }
        }
        let before: Vec<(ResourceId, Option<GroupId>)> =
            (0..n as u64).map(ResourceId::new).map(|r| (r, tracker.group_of(r))).collect();

        clock.advance(elapsed);
        scheduler.process_timer_queue(&mut tracker);
        let (collected, dissolved): (Vec<ResourceId>, Vec<GroupId>) = if hybrid {
            let result = scheduler.perform_hybrid_gc(&mut tracker);
            (result.collected(), result.dissolved_groups)
        } else {
            let result = scheduler.trigger_gc(&mut tracker, &GcPolicy::default());
            (result.collected, result.dissolved_groups)
        };

        let collected: BTreeSet<ResourceId> = collected.into_iter().collect();
        for (resource, group) in before {
            if let (true, Some(group)) = (collected.contains(&resource), group) {
                prop_assert!(dissolved.contains(&group));
            }
            prop_assert!(!(collected.contains(&resource) && tracker.is_grouped(resource)));
        }
        for id in tracker.groups().map(|g| g.id()).collect::<Vec<_>>() {
            prop_assert!(tracker.validate_group_integrity(id).unwrap().is_valid);
        }
    }
}
