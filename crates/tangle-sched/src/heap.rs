//! Binary min-heap of pending deadlines.
//!
//! [`DeadlineHeap`] orders [`ScheduleEntry`] values by
//! `(scheduled_time, priority, insertion sequence)`, so two entries due at the
//! same millisecond pop most-urgent first and otherwise in the order they were
//! pushed. `push` and `pop_min` are O(log n), `peek` is O(1), and removing an
//! arbitrary resource's entry is an O(n) scan followed by an O(log n) fix-up.
//!
//! # Example
//!
//! ```
//! use tangle_core::id::ResourceId;
//! use tangle_sched::heap::{DeadlineHeap, Priority, ScheduleEntry};
//!
//! let mut heap = DeadlineHeap::new();
//! heap.push(ScheduleEntry::new(ResourceId::new(1), 2_000, Priority::Critical));
//! heap.push(ScheduleEntry::new(ResourceId::new(2), 500, Priority::Immediate));
//!
//! assert_eq!(heap.peek().map(|e| e.resource_id), Some(ResourceId::new(2)));
//! assert!(heap.remove(ResourceId::new(2)).is_some());
//! assert_eq!(heap.pop_min().map(|e| e.scheduled_time), Some(2_000));
//! assert!(heap.is_empty());
//! ```

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tangle_core::id::ResourceId;

/// Reclaim cost assumed for an entry when the provider gives no better hint.
pub const DEFAULT_ESTIMATED_DURATION_MS: u64 = 100;

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Urgency bucket of a deadline. Declaration order is urgency order:
/// `Immediate < Critical < High < Normal < Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Immediate,
    Critical,
    High,
    Normal,
    Low,
}

impl Priority {
    /// Bucket for a deadline `duration_ms` away.
    pub fn for_duration(duration_ms: u64) -> Self {
        match duration_ms {
            0..=999 => Self::Immediate,
            1_000..=4_999 => Self::Critical,
            5_000..=9_999 => Self::High,
            10_000..=29_999 => Self::Normal,
            _ => Self::Low,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ScheduleEntry
// ---------------------------------------------------------------------------

/// One pending deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub resource_id: ResourceId,
    /// Absolute time (ms) at which the entry becomes due.
    pub scheduled_time: u64,
    pub priority: Priority,
    /// Expected reclaim cost in milliseconds.
    pub estimated_duration_ms: u64,
    /// Resources this one references; they are reclaimed no earlier than it.
    pub dependencies: BTreeSet<ResourceId>,
    pub can_parallelize: bool,
    pub requires_oversight: bool,
    /// Insertion sequence, assigned by [`DeadlineHeap::push`].
    #[serde(default)]
    seq: u64,
}

impl ScheduleEntry {
    /// An entry with no dependencies, parallelisable, without oversight.
    pub fn new(resource_id: ResourceId, scheduled_time: u64, priority: Priority) -> Self {
        Self {
            resource_id,
            scheduled_time,
            priority,
            estimated_duration_ms: DEFAULT_ESTIMATED_DURATION_MS,
            dependencies: BTreeSet::new(),
            can_parallelize: true,
            requires_oversight: false,
            seq: 0,
        }
    }

    pub fn with_dependencies(mut self, dependencies: impl IntoIterator<Item = ResourceId>) -> Self {
        self.dependencies = dependencies.into_iter().collect();
        self.can_parallelize = self.can_parallelize && self.dependencies.is_empty();
        self
    }

    pub fn with_oversight(mut self, requires_oversight: bool) -> Self {
        self.requires_oversight = requires_oversight;
        if requires_oversight {
            self.can_parallelize = false;
        }
        self
    }

    pub fn with_estimated_duration(mut self, ms: u64) -> Self {
        self.estimated_duration_ms = ms;
        self
    }

    fn key(&self) -> (u64, Priority, u64) {
        (self.scheduled_time, self.priority, self.seq)
    }
}

// ---------------------------------------------------------------------------
// DeadlineHeap
// ---------------------------------------------------------------------------

/// Array-backed binary min-heap of [`ScheduleEntry`].
#[derive(Debug, Clone, Default)]
pub struct DeadlineHeap {
    entries: Vec<ScheduleEntry>,
    next_seq: u64,
}

impl DeadlineHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, mut entry: ScheduleEntry) {
        entry.seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(entry);
        self.sift_up(self.entries.len() - 1);
    }

    pub fn peek(&self) -> Option<&ScheduleEntry> {
        self.entries.first()
    }

    pub fn pop_min(&mut self) -> Option<ScheduleEntry> {
        self.take_at(0)
    }

    /// Pop the earliest entry if it is due at or before `now_ms`.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<ScheduleEntry> {
        match self.peek() {
            Some(entry) if entry.scheduled_time <= now_ms => self.pop_min(),
            _ => None,
        }
    }

    /// Remove the entry for `resource`, wherever it sits.
    pub fn remove(&mut self, resource: ResourceId) -> Option<ScheduleEntry> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.resource_id == resource)?;
        self.take_at(idx)
    }

    pub fn contains(&self, resource: ResourceId) -> bool {
        self.entries.iter().any(|e| e.resource_id == resource)
    }

    pub fn get(&self, resource: ResourceId) -> Option<&ScheduleEntry> {
        self.entries.iter().find(|e| e.resource_id == resource)
    }

    /// Entries in heap (not sorted) order.
    pub fn iter(&self) -> impl Iterator<Item = &ScheduleEntry> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    // -- internals ----------------------------------------------------------

    fn take_at(&mut self, idx: usize) -> Option<ScheduleEntry> {
        if idx >= self.entries.len() {
            return None;
        }
        let removed = self.entries.swap_remove(idx);
        if idx < self.entries.len() {
            self.sift_down(idx);
            self.sift_up(idx);
        }
        Some(removed)
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.entries[idx].key() >= self.entries[parent].key() {
                break;
            }
            self.entries.swap(idx, parent);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * idx + 1;
            let right = left + 1;
            let mut smallest = idx;
            if left < len && self.entries[left].key() < self.entries[smallest].key() {
                smallest = left;
            }
            if right < len && self.entries[right].key() < self.entries[smallest].key() {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.entries.swap(idx, smallest);
            idx = smallest;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(raw: u64, at: u64, priority: Priority) -> ScheduleEntry {
        ScheduleEntry::new(ResourceId::new(raw), at, priority)
    }

    fn drain(heap: &mut DeadlineHeap) -> Vec<u64> {
        std::iter::from_fn(|| heap.pop_min())
            .map(|e| e.resource_id.to_raw())
            .collect()
    }

    #[test]
    fn priority_buckets_follow_duration() {
        assert_eq!(Priority::for_duration(0), Priority::Immediate);
        assert_eq!(Priority::for_duration(999), Priority::Immediate);
        assert_eq!(Priority::for_duration(1_000), Priority::Critical);
        assert_eq!(Priority::for_duration(4_999), Priority::Critical);
        assert_eq!(Priority::for_duration(5_000), Priority::High);
        assert_eq!(Priority::for_duration(10_000), Priority::Normal);
        assert_eq!(Priority::for_duration(29_999), Priority::Normal);
        assert_eq!(Priority::for_duration(30_000), Priority::Low);
        assert!(Priority::Immediate < Priority::Low);
    }

    #[test]
    fn pops_in_time_order() {
        let mut heap = DeadlineHeap::new();
        for (raw, at) in [(1, 50), (2, 10), (3, 40), (4, 20), (5, 30)] {
            heap.push(entry(raw, at, Priority::Normal));
        }
        assert_eq!(drain(&mut heap), vec![2, 4, 5, 3, 1]);
    }

    #[test]
    fn ties_break_on_priority_then_insertion() {
        let mut heap = DeadlineHeap::new();
        heap.push(entry(1, 100, Priority::Low));
        heap.push(entry(2, 100, Priority::Immediate));
        heap.push(entry(3, 100, Priority::Low));
        heap.push(entry(4, 100, Priority::Immediate));
        assert_eq!(drain(&mut heap), vec![2, 4, 1, 3]);
    }

    #[test]
    fn remove_from_middle_keeps_heap_order() {
        let mut heap = DeadlineHeap::new();
        for raw in 0..20u64 {
            heap.push(entry(raw, (raw * 37) % 101, Priority::Normal));
        }
        assert!(heap.remove(ResourceId::new(7)).is_some());
        assert!(heap.remove(ResourceId::new(0)).is_some());
        assert!(heap.remove(ResourceId::new(7)).is_none());
        assert!(!heap.contains(ResourceId::new(7)));

        let times: Vec<u64> = std::iter::from_fn(|| heap.pop_min())
            .map(|e| e.scheduled_time)
            .collect();
        assert_eq!(times.len(), 18);
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn pop_due_respects_now() {
        let mut heap = DeadlineHeap::new();
        heap.push(entry(1, 1_000, Priority::Critical));
        assert!(heap.pop_due(999).is_none());
        assert_eq!(heap.pop_due(1_000).map(|e| e.resource_id), Some(ResourceId::new(1)));
        assert!(heap.pop_due(u64::MAX).is_none());
    }

    #[test]
    fn builders_adjust_parallelism() {
        let e = entry(1, 0, Priority::High).with_dependencies([ResourceId::new(2)]);
        assert!(!e.can_parallelize);
        let e = entry(1, 0, Priority::High).with_oversight(true);
        assert!(e.requires_oversight);
        assert!(!e.can_parallelize);
    }
}
