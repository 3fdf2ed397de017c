//! Per-resource deadline timers.
//!
//! A [`Timer`] is the scheduler's record of one resource's decoherence
//! deadline. At most one exists per resource; the [`TimerSet`] enforces that
//! by keying on [`ResourceId`]. A timer is *armed* while `active` is true and
//! becomes inactive once its deadline has been observed, at which point its
//! resource is a GC candidate.
//!
//! Every (re)arm gets a fresh `generation`. Clock callbacks carry the
//! generation they were armed with, so a callback that fires after its timer
//! was replaced or reset is recognised as stale and ignored.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tangle_core::clock::CallbackId;
use tangle_core::id::ResourceId;

use crate::heap::Priority;

// ---------------------------------------------------------------------------
// TimerHandle
// ---------------------------------------------------------------------------

/// Returned by `schedule_decoherence`; identifies one arming of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerHandle {
    pub resource: ResourceId,
    pub deadline_ms: u64,
    pub priority: Priority,
    pub generation: u64,
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timer {
    pub resource_id: ResourceId,
    /// When the timer was first armed (ms).
    pub scheduled_time: u64,
    /// When the resource decoheres (ms).
    pub deadline: u64,
    /// Duration requested at scheduling time.
    pub duration_ms: u64,
    /// Bucket assigned at scheduling time; resets keep it.
    pub priority: Priority,
    pub active: bool,
    pub reset_count: u32,
    pub last_activity_reset: Option<u64>,
    pub generation: u64,
    #[serde(skip)]
    pub(crate) callback: Option<CallbackId>,
}

impl Timer {
    pub(crate) fn armed(resource_id: ResourceId, now: u64, duration_ms: u64, generation: u64) -> Self {
        Self {
            resource_id,
            scheduled_time: now,
            deadline: now.saturating_add(duration_ms),
            duration_ms,
            priority: Priority::for_duration(duration_ms),
            active: true,
            reset_count: 0,
            last_activity_reset: None,
            generation,
            callback: None,
        }
    }

    /// Milliseconds left before the deadline (0 once due).
    pub fn remaining_ms(&self, now: u64) -> u64 {
        self.deadline.saturating_sub(now)
    }

    pub fn handle(&self) -> TimerHandle {
        TimerHandle {
            resource: self.resource_id,
            deadline_ms: self.deadline,
            priority: self.priority,
            generation: self.generation,
        }
    }
}

// ---------------------------------------------------------------------------
// TimerSet
// ---------------------------------------------------------------------------

/// Timers keyed by resource.
#[derive(Debug, Clone, Default)]
pub struct TimerSet {
    timers: HashMap<ResourceId, Timer>,
    next_generation: u64,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn contains(&self, resource: ResourceId) -> bool {
        self.timers.contains_key(&resource)
    }

    pub fn get(&self, resource: ResourceId) -> Option<&Timer> {
        self.timers.get(&resource)
    }

    pub(crate) fn get_mut(&mut self, resource: ResourceId) -> Option<&mut Timer> {
        self.timers.get_mut(&resource)
    }

    /// Store `timer`, returning the one it replaces.
    pub(crate) fn insert(&mut self, timer: Timer) -> Option<Timer> {
        self.timers.insert(timer.resource_id, timer)
    }

    pub(crate) fn remove(&mut self, resource: ResourceId) -> Option<Timer> {
        self.timers.remove(&resource)
    }

    pub(crate) fn next_generation(&mut self) -> u64 {
        let g = self.next_generation;
        self.next_generation += 1;
        g
    }

    /// Whether `generation` is the live arming of `resource`'s timer.
    pub fn is_current(&self, resource: ResourceId, generation: u64) -> bool {
        self.timers
            .get(&resource)
            .is_some_and(|t| t.active && t.generation == generation)
    }

    pub fn armed_count(&self) -> usize {
        self.timers.values().filter(|t| t.active).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Timer> {
        self.timers.values()
    }

    /// Owned copies ordered by resource id.
    pub fn snapshot(&self) -> Vec<Timer> {
        let mut out: Vec<Timer> = self.timers.values().cloned().collect();
        out.sort_by_key(|t| t.resource_id);
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
