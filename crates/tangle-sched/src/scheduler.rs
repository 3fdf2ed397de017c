//! The deadline scheduler.
//!
//! [`DeadlineScheduler`] owns the pending-deadline heap, the timer set and the
//! candidate set. Per resource it walks the states
//!
//! ```text
//! unscheduled -> armed (resettable) -> candidate -> collected
//!                    \______________________\____-> cancelled
//! ```
//!
//! Arming a timer also registers a callback on the [`Clock`]. Callbacks only
//! record `(resource, generation)` in an inbox; all state changes happen in
//! [`DeadlineScheduler::process_timer_queue`], which first drains that inbox
//! and then pops every heap entry whose time has come. Either path promotes
//! the resource to a GC candidate exactly once.
//!
//! The scheduler never touches the [`GroupTracker`] on its own: callers pass
//! `&mut GroupTracker` to the operations that may need it.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tangle_core::prelude::*;
//! use tangle_sched::prelude::*;
//!
//! let clock = Arc::new(VirtualClock::new());
//! let mut tracker = GroupTracker::new(clock.clone());
//! let mut scheduler = DeadlineScheduler::new(clock.clone(), Arc::new(InMemoryProvider::new()));
//!
//! let r = ResourceId::new(9);
//! let handle = scheduler.schedule_decoherence(r, Duration::from_millis(2_500));
//! assert_eq!(handle.priority, Priority::Critical);
//!
//! clock.advance(2_000);
//! assert!(scheduler.reset_activity(r));
//! clock.advance(2_000);
//! assert!(scheduler.process_timer_queue(&mut tracker).new_candidates.is_empty());
//!
//! assert!(scheduler.cancel_decoherence(r));
//! assert!(!scheduler.cancel_decoherence(r));
//! ```

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tangle_core::clock::{CallbackId, Clock};
use tangle_core::event::{EventBus, EventSink, LifecycleEvent};
use tangle_core::id::ResourceId;
use tangle_core::tracker::GroupTracker;

use crate::gc::{guarded, GcResult};
use crate::heap::{DeadlineHeap, Priority, ScheduleEntry};
use crate::policy::{ResetWindow, SchedulerConfig};
use crate::provider::ResourceProvider;
use crate::timer::{Timer, TimerHandle, TimerSet};
use crate::SchedError;

type FiredInbox = Arc<Mutex<Vec<(ResourceId, u64)>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Outcome of one [`DeadlineScheduler::process_timer_queue`] call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerProcessingResult {
    /// Heap entries popped.
    pub processed: usize,
    /// Resources that became GC candidates in this call.
    pub new_candidates: Vec<ResourceId>,
    /// Clock callbacks whose timer had since been replaced, reset or cancelled.
    pub stale_callbacks: usize,
    /// One line per inconsistent heap entry.
    pub errors: Vec<String>,
    /// Set when the candidate watermark forced a collection.
    pub gc: Option<GcResult>,
}

/// Outcome of one [`DeadlineScheduler::tick`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub at_ms: u64,
    pub timers: TimerProcessingResult,
    pub memory_pressure: f64,
    /// Set when memory pressure forced a collection.
    pub gc: Option<GcResult>,
}

/// Running totals plus current sizes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub scheduled: u64,
    pub rescheduled: u64,
    pub cancelled: u64,
    pub resets: u64,
    pub fired: u64,
    pub stale_callbacks: u64,
    pub gc_runs: u64,
    pub hybrid_runs: u64,
    pub collected: u64,
    pub memory_freed: u64,
    pub oversight_requests: u64,
    pub timers: usize,
    pub armed: usize,
    pub candidates: usize,
    pub queued: usize,
}

// ---------------------------------------------------------------------------
// DeadlineScheduler
// ---------------------------------------------------------------------------

pub struct DeadlineScheduler {
    pub(crate) config: SchedulerConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) provider: Arc<dyn ResourceProvider>,
    pub(crate) events: EventBus,
    pub(crate) heap: DeadlineHeap,
    pub(crate) timers: TimerSet,
    pub(crate) candidates: BTreeSet<ResourceId>,
    pub(crate) approved: BTreeSet<ResourceId>,
    fired: FiredInbox,
    pub(crate) stats: SchedulerStats,
}

impl DeadlineScheduler {
    /// A scheduler with [`SchedulerConfig::default`].
    pub fn new(clock: Arc<dyn Clock>, provider: Arc<dyn ResourceProvider>) -> Self {
        Self {
            config: SchedulerConfig::default(),
            clock,
            provider,
            events: EventBus::new(),
            heap: DeadlineHeap::new(),
            timers: TimerSet::new(),
            candidates: BTreeSet::new(),
            approved: BTreeSet::new(),
            fired: Arc::new(Mutex::new(Vec::new())),
            stats: SchedulerStats::default(),
        }
    }

    pub fn with_config(
        clock: Arc<dyn Clock>,
        provider: Arc<dyn ResourceProvider>,
        config: SchedulerConfig,
    ) -> Result<Self, SchedError> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new(clock, provider)
        })
    }

    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) {
        self.events.subscribe(sink);
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub(crate) fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    pub(crate) fn emit(&self, event: LifecycleEvent) {
        self.events.publish(self.now(), event);
    }

    // -- queries ------------------------------------------------------------

    pub fn timer(&self, resource: ResourceId) -> Option<&Timer> {
        self.timers.get(resource)
    }

    pub fn is_scheduled(&self, resource: ResourceId) -> bool {
        self.timers.contains(resource)
    }

    pub fn is_candidate(&self, resource: ResourceId) -> bool {
        self.candidates.contains(&resource)
    }

    /// Current GC candidates in id order.
    pub fn candidates(&self) -> Vec<ResourceId> {
        self.candidates.iter().copied().collect()
    }

    pub fn queue(&self) -> &DeadlineHeap {
        &self.heap
    }

    /// Owned copies of every timer, ordered by resource.
    pub fn snapshot_timers(&self) -> Vec<Timer> {
        self.timers.snapshot()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            timers: self.timers.len(),
            armed: self.timers.armed_count(),
            candidates: self.candidates.len(),
            queued: self.heap.len(),
            ..self.stats.clone()
        }
    }

    // -- scheduling ---------------------------------------------------------

    /// Arm a deadline `duration` from now, replacing any existing timer.
    pub fn schedule_decoherence(&mut self, resource: ResourceId, duration: Duration) -> TimerHandle {
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let now = self.now();
        let replaced = self.discard(resource);

        let generation = self.timers.next_generation();
        let mut timer = Timer::armed(resource, now, duration_ms, generation);
        let entry = self.entry_for(resource, timer.deadline, timer.priority);
        timer.callback = Some(self.arm_callback(resource, timer.deadline, generation));
        let handle = timer.handle();
        self.heap.push(entry);
        self.timers.insert(timer);

        let deadline_ms = handle.deadline_ms;
        if replaced {
            self.stats.rescheduled += 1;
            debug!(resource = %resource, deadline_ms, priority = %handle.priority, "decoherence rescheduled");
            self.emit(LifecycleEvent::DecoherenceRescheduled {
                resource,
                deadline_ms,
                duration_ms,
            });
        } else {
            self.stats.scheduled += 1;
            debug!(resource = %resource, deadline_ms, priority = %handle.priority, "decoherence scheduled");
            self.emit(LifecycleEvent::DecoherenceScheduled {
                resource,
                deadline_ms,
                duration_ms,
            });
        }
        handle
    }

    /// Replace an existing timer. Returns `false` if there was none.
    pub fn reschedule_decoherence(&mut self, resource: ResourceId, duration: Duration) -> bool {
        if !self.timers.contains(resource) {
            return false;
        }
        self.schedule_decoherence(resource, duration);
        true
    }

    /// Drop the timer, its queue entry, any candidacy and any oversight
    /// approval. Returns `false` if nothing was scheduled.
    pub fn cancel_decoherence(&mut self, resource: ResourceId) -> bool {
        self.approved.remove(&resource);
        if !self.discard(resource) {
            return false;
        }
        self.stats.cancelled += 1;
        debug!(resource = %resource, "decoherence cancelled");
        self.emit(LifecycleEvent::DecoherenceCancelled { resource });
        true
    }

    /// Push an armed timer's deadline out from now. The priority bucket is
    /// kept. Returns `false` for unknown resources and for candidates.
    pub fn reset_activity(&mut self, resource: ResourceId) -> bool {
        let (duration_ms, priority, old_callback) = match self.timers.get(resource) {
            Some(t) if t.active => {
                let window = match self.config.reset_window {
                    ResetWindow::OriginalDuration => t.duration_ms,
                    ResetWindow::Fixed(ms) => ms,
                };
                (window, t.priority, t.callback)
            }
            _ => return false,
        };
        if let Some(id) = old_callback {
            self.clock.cancel(id);
        }

        let now = self.now();
        let deadline = now.saturating_add(duration_ms);
        let generation = self.timers.next_generation();
        let callback = self.arm_callback(resource, deadline, generation);
        if let Some(t) = self.timers.get_mut(resource) {
            t.deadline = deadline;
            t.generation = generation;
            t.reset_count += 1;
            t.last_activity_reset = Some(now);
            t.callback = Some(callback);
        }

        let mut entry = match self.heap.remove(resource) {
            Some(entry) => entry,
            None => self.entry_for(resource, deadline, priority),
        };
        entry.scheduled_time = deadline;
        self.heap.push(entry);
        self.stats.resets += 1;

        debug!(resource = %resource, deadline_ms = deadline, "activity reset");
        self.emit(LifecycleEvent::DecoherenceRescheduled {
            resource,
            deadline_ms: deadline,
            duration_ms,
        });
        true
    }

    /// Record the oversight collaborator's approval for a critical resource.
    /// Returns `false` if it was already approved.
    pub fn approve_oversight(&mut self, resource: ResourceId) -> bool {
        let fresh = self.approved.insert(resource);
        if fresh {
            info!(resource = %resource, "oversight approval recorded");
        }
        fresh
    }

    // -- timer queue --------------------------------------------------------

    /// Turn every elapsed deadline into a GC candidate.
    ///
    /// Fires due clock callbacks, drains their inbox, then pops every due
    /// heap entry. If the candidate set ends up above the configured
    /// watermark, a GC run with the scheduler's policy follows immediately.
    pub fn process_timer_queue(&mut self, tracker: &mut GroupTracker) -> TimerProcessingResult {
        let mut result = TimerProcessingResult::default();
        self.clock.fire_due();
        let now = self.now();

        let fired = std::mem::take(&mut *lock(&self.fired));
        for (resource, generation) in fired {
            if self.timers.is_current(resource, generation) {
                self.heap.remove(resource);
                self.promote(resource, &mut result);
            } else {
                result.stale_callbacks += 1;
                self.stats.stale_callbacks += 1;
            }
        }

        while let Some(entry) = self.heap.pop_due(now) {
            result.processed += 1;
            let resource = entry.resource_id;
            let timer = self
                .timers
                .get(resource)
                .map(|t| (t.active, t.deadline, t.priority));
            match timer {
                Some((true, deadline, _)) if deadline == entry.scheduled_time => {
                    self.promote(resource, &mut result);
                }
                Some((true, deadline, priority)) => {
                    warn!(resource = %resource, "queue entry disagrees with timer; requeued");
                    result.errors.push(format!(
                        "{resource}: queued for {} but timer deadline is {deadline}",
                        entry.scheduled_time
                    ));
                    let requeue = self.entry_for(resource, deadline, priority);
                    self.heap.push(requeue);
                }
                Some((false, ..)) => {
                    warn!(resource = %resource, "queue entry for an expired timer dropped");
                    result.errors.push(format!("{resource}: queue entry for an expired timer"));
                }
                None => {
                    warn!(resource = %resource, "queue entry without a timer dropped");
                    result.errors.push(format!("{resource}: queue entry without a timer"));
                }
            }
        }

        if self.candidates.len() > self.config.candidate_watermark {
            info!(
                candidates = self.candidates.len(),
                watermark = self.config.candidate_watermark,
                "candidate watermark exceeded; collecting"
            );
            let policy = self.config.policy.clone();
            result.gc = Some(self.trigger_gc(tracker, &policy));
        }
        result
    }

    /// One pass of the scheduler loop: process the queue, then collect if the
    /// provider reports memory pressure at or above the policy threshold.
    pub fn tick(&mut self, tracker: &mut GroupTracker) -> TickReport {
        let timers = self.process_timer_queue(tracker);
        let provider = &self.provider;
        let memory_pressure = guarded(&mut Vec::new(), None, "memory_pressure", || {
            provider.memory_pressure()
        })
        .unwrap_or(0.0);
        let gc = if timers.gc.is_none() && memory_pressure >= self.config.policy.memory_threshold {
            info!(memory_pressure, "memory pressure; collecting");
            let policy = self.config.policy.clone();
            Some(self.trigger_gc(tracker, &policy))
        } else {
            None
        };
        TickReport {
            at_ms: self.now(),
            timers,
            memory_pressure,
            gc,
        }
    }

    // -- internals ----------------------------------------------------------

    fn promote(&mut self, resource: ResourceId, result: &mut TimerProcessingResult) {
        if let Some(t) = self.timers.get_mut(resource) {
            t.active = false;
            if let Some(id) = t.callback.take() {
                self.clock.cancel(id);
            }
        }
        if self.candidates.insert(resource) {
            self.stats.fired += 1;
            result.new_candidates.push(resource);
            debug!(resource = %resource, "deadline elapsed; now a gc candidate");
        }
    }

    fn arm_callback(&self, resource: ResourceId, deadline: u64, generation: u64) -> CallbackId {
        let inbox = Arc::clone(&self.fired);
        self.clock.schedule_at(
            deadline,
            Box::new(move |_| lock(&inbox).push((resource, generation))),
        )
    }

    fn entry_for(&self, resource: ResourceId, deadline: u64, priority: Priority) -> ScheduleEntry {
        let entry = ScheduleEntry::new(resource, deadline, priority);
        let provider = &self.provider;
        match guarded(&mut Vec::new(), Some(resource), "get_handle", || provider.get_handle(resource)).flatten() {
            Some(info) => entry
                .with_dependencies(info.references)
                .with_oversight(info.critical),
            None => entry,
        }
    }

    /// Remove the timer, queue entry and candidacy of `resource`.
    fn discard(&mut self, resource: ResourceId) -> bool {
        let Some(timer) = self.timers.remove(resource) else {
            return false;
        };
        if let Some(id) = timer.callback {
            self.clock.cancel(id);
        }
        self.heap.remove(resource);
        self.candidates.remove(&resource);
        true
    }

    /// Drop every trace of a resource that no longer exists.
    pub(crate) fn forget(&mut self, resource: ResourceId) {
        self.discard(resource);
        self.approved.remove(&resource);
    }
}

impl std::fmt::Debug for DeadlineScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadlineScheduler")
            .field("timers", &self.timers.len())
            .field("queued", &self.heap.len())
            .field("candidates", &self.candidates.len())
            .field("config", &self.config)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
