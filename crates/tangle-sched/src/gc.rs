//! Group-aware garbage collection.
//!
//! Two entry points on [`DeadlineScheduler`]:
//!
//! - [`trigger_gc`](DeadlineScheduler::trigger_gc): policy-driven collection
//!   of the resources [`identify_gc_candidates`](DeadlineScheduler::identify_gc_candidates)
//!   selects.
//! - [`perform_hybrid_gc`](DeadlineScheduler::perform_hybrid_gc): a
//!   reference-counting pass over ungrouped candidates, a tracing pass that
//!   marks everything reachable from live resources, and a group adjustment
//!   pass; the three results are merged.
//!
//! Both share the same screening and the same entanglement rule. Critical
//! resources are withheld until approved when the policy requires oversight.
//! With `respect_entanglement` a grouped resource is collected only together
//! with its whole group, which is dissolved in the same run; otherwise it is
//! deferred.
//!
//! Failures never abort a run. Every provider call is guarded: errors and
//! panics are recorded in the result, `success` becomes `false`, and
//! everything reclaimed before and after the failure stays reclaimed. A
//! resource whose metadata could not be read stays a candidate, and a trace
//! that could not complete retains its whole scope. Exceeding
//! `max_gc_duration_ms` adds a warning.

use std::any::Any;
use std::collections::{BTreeSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tangle_core::event::LifecycleEvent;
use tangle_core::id::{GroupId, ResourceId};
use tangle_core::tracker::GroupTracker;

use crate::policy::{GcCriteria, GcPolicy};
use crate::provider::ReclaimError;
use crate::scheduler::DeadlineScheduler;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A provider failure during a run. `resource` is `None` for calls that are
/// not about one resource, such as reading memory pressure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcError {
    pub resource: Option<ResourceId>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GcResult {
    /// Resources selected for this run.
    pub candidates: usize,
    pub collected: Vec<ResourceId>,
    /// Held back because their group is still partly alive.
    pub deferred: Vec<ResourceId>,
    /// Critical resources awaiting approval.
    pub oversight_required: Vec<ResourceId>,
    pub dissolved_groups: Vec<GroupId>,
    /// Candidates the provider no longer knew about.
    pub vanished: Vec<ResourceId>,
    pub memory_freed: u64,
    pub duration_ms: u64,
    pub warnings: Vec<String>,
    pub errors: Vec<GcError>,
    pub success: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HybridGcResult {
    pub candidates: usize,
    /// Collected because nothing referenced them.
    pub refcount_collected: Vec<ResourceId>,
    /// Collected because no live resource could reach them.
    pub traced_collected: Vec<ResourceId>,
    /// Still reachable from a live resource.
    pub retained: Vec<ResourceId>,
    pub deferred: Vec<ResourceId>,
    pub oversight_required: Vec<ResourceId>,
    pub dissolved_groups: Vec<GroupId>,
    pub vanished: Vec<ResourceId>,
    /// Ungrouped candidates left for a later run once the refcount budget ran out.
    pub refcount_skipped: usize,
    pub memory_freed: u64,
    pub duration_ms: u64,
    pub warnings: Vec<String>,
    pub errors: Vec<GcError>,
    pub success: bool,
}

impl HybridGcResult {
    /// Everything collected, in id order.
    pub fn collected(&self) -> Vec<ResourceId> {
        let mut all: Vec<ResourceId> = self
            .refcount_collected
            .iter()
            .chain(&self.traced_collected)
            .copied()
            .collect();
        all.sort_unstable();
        all
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Screened {
    eligible: BTreeSet<ResourceId>,
    oversight_required: Vec<ResourceId>,
    vanished: Vec<ResourceId>,
    errors: Vec<GcError>,
}

#[derive(Default)]
struct Partitioned {
    collectable: Vec<ResourceId>,
    deferred: Vec<ResourceId>,
    dissolved: Vec<GroupId>,
}

#[derive(Default)]
struct Reclaimed {
    collected: Vec<ResourceId>,
    memory_freed: u64,
    errors: Vec<GcError>,
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Run one provider call. A panic is logged, recorded in `errors` and
/// reported as `None`.
pub(crate) fn guarded<T>(
    errors: &mut Vec<GcError>,
    resource: Option<ResourceId>,
    call: &str,
    f: impl FnOnce() -> T,
) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            let cause = panic_message(&*payload);
            tracing::error!(call, resource = ?resource, cause, "resource provider panicked");
            errors.push(GcError {
                resource,
                message: format!("provider panicked in {call}: {cause}"),
            });
            None
        }
    }
}

fn duration_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

fn overrun_warning(elapsed_ms: u64, policy: &GcPolicy) -> Option<String> {
    (elapsed_ms > policy.max_gc_duration_ms).then(|| {
        warn!(elapsed_ms, limit_ms = policy.max_gc_duration_ms, "gc run exceeded its time budget");
        format!(
            "gc took {elapsed_ms} ms, over the {} ms budget",
            policy.max_gc_duration_ms
        )
    })
}

impl DeadlineScheduler {
    // -- candidate selection ------------------------------------------------

    /// Resources eligible under `criteria`, in id order.
    ///
    /// Every candidate qualifies. Under memory pressure, armed resources
    /// within `coherence_threshold_ms` of their deadline or idle for at
    /// least `idle_threshold_ms` qualify as well.
    ///
    /// A resource whose metadata cannot be read is judged on its deadline
    /// alone.
    pub fn identify_gc_candidates(&self, criteria: &GcCriteria) -> Vec<ResourceId> {
        self.select_candidates(criteria, &mut Vec::new())
    }

    fn select_candidates(&self, criteria: &GcCriteria, errors: &mut Vec<GcError>) -> Vec<ResourceId> {
        let mut selected = self.candidates.clone();
        if criteria.under_pressure {
            let now = self.now();
            for timer in self.timers.iter().filter(|t| t.active) {
                let resource = timer.resource_id;
                let near = timer.remaining_ms(now) <= criteria.coherence_threshold_ms;
                let idle = guarded(errors, Some(resource), "get_handle", || {
                    self.provider.get_handle(resource)
                })
                .flatten()
                .is_some_and(|info| {
                    now.saturating_sub(info.last_access_ms) >= criteria.idle_threshold_ms
                });
                if near || idle {
                    selected.insert(resource);
                }
            }
        }
        selected.into_iter().collect()
    }

    // -- policy-driven collection -------------------------------------------

    /// Collect what `policy` allows. Never panics and never aborts midway.
    pub fn trigger_gc(&mut self, tracker: &mut GroupTracker, policy: &GcPolicy) -> GcResult {
        let started = Instant::now();
        let mut faults = Vec::new();
        let provider = &self.provider;
        let pressure =
            guarded(&mut faults, None, "memory_pressure", || provider.memory_pressure()).unwrap_or(0.0);
        let candidates = self.select_candidates(&policy.criteria(pressure), &mut faults);
        info!(candidates = candidates.len(), pressure, "gc run started");
        self.emit(LifecycleEvent::GcStarted {
            candidates: candidates.len(),
        });

        let mut result = GcResult {
            candidates: candidates.len(),
            ..GcResult::default()
        };
        let screened = self.screen(tracker, candidates, policy);
        let parts = partition_by_group(tracker, &screened.eligible, policy.respect_entanglement);
        let reclaimed = self.reclaim(&parts.collectable, policy.parallel_collection);

        result.collected = reclaimed.collected;
        result.memory_freed = reclaimed.memory_freed;
        result.errors = faults;
        result.errors.extend(screened.errors);
        result.errors.extend(reclaimed.errors);
        result.deferred = parts.deferred;
        result.dissolved_groups = parts.dissolved;
        result.oversight_required = screened.oversight_required;
        result.vanished = screened.vanished;
        result.duration_ms = duration_ms(started.elapsed());
        result.warnings.extend(overrun_warning(result.duration_ms, policy));
        result.success = result.errors.is_empty();

        self.stats.gc_runs += 1;
        self.finish_run(
            result.collected.len(),
            result.deferred.len(),
            &result.oversight_required,
            result.memory_freed,
            result.success,
        );
        result
    }

    // -- hybrid collection --------------------------------------------------

    /// Reference counting, then tracing, then group adjustment, using the
    /// scheduler's own policy. Only resources whose deadline has elapsed are
    /// considered.
    ///
    /// Refcount garbage is reclaimed before the trace starts, so anything
    /// that failed to reclaim is still held by the provider and roots the
    /// trace like any other live resource.
    pub fn perform_hybrid_gc(&mut self, tracker: &mut GroupTracker) -> HybridGcResult {
        let started = Instant::now();
        let policy = self.config.policy.clone();
        let candidates: Vec<ResourceId> = self.candidates.iter().copied().collect();
        info!(candidates = candidates.len(), "hybrid gc run started");
        self.emit(LifecycleEvent::GcStarted {
            candidates: candidates.len(),
        });

        let mut result = HybridGcResult {
            candidates: candidates.len(),
            ..HybridGcResult::default()
        };
        let screened = self.screen(tracker, candidates, &policy);
        let mut faults = screened.errors;

        // Reference counting over ungrouped candidates, within budget.
        let mut refcount_garbage = Vec::new();
        let mut trace_scope = BTreeSet::new();
        let mut skipped = 0usize;
        let mut examined = 0usize;
        for &resource in &screened.eligible {
            if tracker.find(resource).is_some() {
                trace_scope.insert(resource);
                continue;
            }
            if examined >= self.config.refcount_budget {
                skipped += 1;
                continue;
            }
            examined += 1;
            let provider = &self.provider;
            match guarded(&mut faults, Some(resource), "get_handle", || provider.get_handle(resource)) {
                Some(Some(info)) if info.ref_count == 0 => refcount_garbage.push(resource),
                Some(Some(_)) => {
                    trace_scope.insert(resource);
                }
                Some(None) | None => {}
            }
        }
        result.refcount_skipped = skipped;
        let refcount = self.reclaim(&refcount_garbage, policy.parallel_collection);
        debug!(
            examined,
            collected = refcount.collected.len(),
            failed = refcount.errors.len(),
            deferred_to_trace = trace_scope.len(),
            "refcount pass done"
        );

        // Tracing: everything the provider still holds outside the scope is a root.
        let (retained, traced_garbage): (Vec<ResourceId>, Vec<ResourceId>) =
            match self.mark_live(|r| !trace_scope.contains(&r), &mut faults) {
                Some(live) => {
                    let split: (Vec<ResourceId>, Vec<ResourceId>) =
                        trace_scope.iter().copied().partition(|r| live.contains(r));
                    debug!(live = live.len(), "trace pass done");
                    split
                }
                None => {
                    warn!(scope = trace_scope.len(), "trace incomplete; retaining its whole scope");
                    (trace_scope.iter().copied().collect(), Vec::new())
                }
            };

        // Group adjustment over what the trace found.
        let garbage: BTreeSet<ResourceId> = traced_garbage.into_iter().collect();
        let parts = partition_by_group(tracker, &garbage, policy.respect_entanglement);
        let traced = self.reclaim(&parts.collectable, policy.parallel_collection);

        result.refcount_collected = refcount.collected;
        result.traced_collected = traced.collected;
        result.retained = retained;
        result.deferred = parts.deferred;
        result.dissolved_groups = parts.dissolved;
        result.oversight_required = screened.oversight_required;
        result.vanished = screened.vanished;
        result.memory_freed = refcount.memory_freed + traced.memory_freed;
        result.errors = faults;
        result.errors.extend(refcount.errors);
        result.errors.extend(traced.errors);
        result.duration_ms = duration_ms(started.elapsed());
        result.warnings.extend(overrun_warning(result.duration_ms, &policy));
        result.success = result.errors.is_empty();

        self.stats.hybrid_runs += 1;
        self.finish_run(
            result.refcount_collected.len() + result.traced_collected.len(),
            result.deferred.len(),
            &result.oversight_required,
            result.memory_freed,
            result.success,
        );
        result
    }

    // -- shared passes ------------------------------------------------------

    /// Split candidates into eligible, withheld for oversight and vanished.
    /// Vanished resources are forgotten and removed from their group. A
    /// candidate whose lookup panicked is left for the next run.
    fn screen(
        &mut self,
        tracker: &mut GroupTracker,
        candidates: Vec<ResourceId>,
        policy: &GcPolicy,
    ) -> Screened {
        let mut out = Screened::default();
        for resource in candidates {
            let provider = &self.provider;
            let Some(handle) =
                guarded(&mut out.errors, Some(resource), "get_handle", || provider.get_handle(resource))
            else {
                continue;
            };
            match handle {
                None => {
                    debug!(resource = %resource, "candidate vanished from provider");
                    self.forget(resource);
                    if let Some(group) = tracker.group_of(resource) {
                        if let Err(e) = tracker.remove_from_group(group, resource) {
                            warn!(resource = %resource, error = %e, "could not ungroup vanished resource");
                        }
                    }
                    out.vanished.push(resource);
                }
                Some(info)
                    if policy.require_oversight
                        && info.critical
                        && !self.approved.contains(&resource) =>
                {
                    debug!(resource = %resource, "critical resource held for oversight");
                    out.oversight_required.push(resource);
                }
                Some(_) => {
                    out.eligible.insert(resource);
                }
            }
        }
        out
    }

    /// Every resource reachable from a root over provider reference edges,
    /// or `None` if a provider call panicked before the trace finished.
    fn mark_live(
        &self,
        is_root: impl Fn(ResourceId) -> bool,
        errors: &mut Vec<GcError>,
    ) -> Option<BTreeSet<ResourceId>> {
        let provider = &self.provider;
        let mut live = BTreeSet::new();
        let mut queue: VecDeque<ResourceId> = guarded(errors, None, "resources", || provider.resources())?
            .into_iter()
            .filter(|r| is_root(*r))
            .collect();
        while let Some(resource) = queue.pop_front() {
            if !live.insert(resource) {
                continue;
            }
            if let Some(info) = guarded(errors, Some(resource), "get_handle", || provider.get_handle(resource))? {
                queue.extend(info.references.into_iter().filter(|r| !live.contains(r)));
            }
        }
        Some(live)
    }

    /// Hand `ids` to the provider and settle the bookkeeping per outcome.
    fn reclaim(&mut self, ids: &[ResourceId], parallel: bool) -> Reclaimed {
        let mut out = Reclaimed::default();
        if ids.is_empty() {
            return out;
        }

        let provider = &self.provider;
        let outcomes = catch_unwind(AssertUnwindSafe(|| {
            if parallel {
                provider.reclaim_batch(ids)
            } else {
                ids.iter().map(|&id| (id, provider.reclaim(id))).collect()
            }
        }))
        .unwrap_or_else(|_| {
            tracing::error!(resources = ids.len(), "resource provider panicked during reclaim");
            ids.iter()
                .map(|&id| {
                    (
                        id,
                        Err(ReclaimError::Refused {
                            resource: id,
                            reason: "provider panicked".to_owned(),
                        }),
                    )
                })
                .collect()
        });

        for (resource, outcome) in outcomes {
            match outcome {
                Ok(bytes) => {
                    out.memory_freed += bytes;
                    out.collected.push(resource);
                    self.forget(resource);
                }
                Err(e) => {
                    warn!(resource = %resource, error = %e, "reclaim failed");
                    out.errors.push(GcError {
                        resource: Some(resource),
                        message: e.to_string(),
                    });
                }
            }
        }
        out
    }

    fn finish_run(
        &mut self,
        collected: usize,
        deferred: usize,
        oversight_required: &[ResourceId],
        memory_freed: u64,
        success: bool,
    ) {
        self.stats.collected += collected as u64;
        self.stats.memory_freed += memory_freed;
        self.stats.oversight_requests += oversight_required.len() as u64;
        info!(
            collected,
            deferred,
            oversight_required = oversight_required.len(),
            memory_freed,
            success,
            "gc run completed"
        );
        self.emit(LifecycleEvent::GcCompleted {
            collected,
            deferred,
            oversight_required: oversight_required.len(),
            memory_freed,
            success,
        });
    }
}

/// Apply the entanglement rule to `eligible`.
///
/// Ungrouped resources are collectable. With `respect` a group whose every
/// member is eligible is dissolved and collected whole; any other group's
/// eligible members are deferred. Without `respect` grouped resources are
/// detached from their group and collected individually.
fn partition_by_group(
    tracker: &mut GroupTracker,
    eligible: &BTreeSet<ResourceId>,
    respect: bool,
) -> Partitioned {
    let mut out = Partitioned::default();
    let mut settled = BTreeSet::new();

    for &resource in eligible {
        if settled.contains(&resource) {
            continue;
        }
        let Some(group) = tracker.find(resource) else {
            out.collectable.push(resource);
            continue;
        };

        if !respect {
            if let Err(e) = tracker.remove_from_group(group, resource) {
                warn!(resource = %resource, error = %e, "could not detach resource from group");
            }
            out.collectable.push(resource);
            continue;
        }

        let members: Vec<ResourceId> = tracker
            .group(group)
            .map(|g| g.participants().iter().copied().collect())
            .unwrap_or_default();
        settled.extend(members.iter().copied());

        if members.iter().all(|m| eligible.contains(m)) {
            match tracker.dissolve_group(group) {
                Ok(former) => {
                    debug!(group = %group, members = former.len(), "group expired as a whole");
                    out.dissolved.push(group);
                    out.collectable.extend(former);
                }
                Err(e) => {
                    warn!(group = %group, error = %e, "could not dissolve expired group");
                    out.deferred.extend(members);
                }
            }
        } else {
            debug!(group = %group, "group still partly alive; deferring its candidates");
            out.deferred
                .extend(members.into_iter().filter(|m| eligible.contains(m)));
        }
    }

    out.collectable.sort_unstable();
    out.deferred.sort_unstable();
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
