//! Bounded journal of lifecycle events with a query API.
//!
//! [`EventJournal`] is an [`EventSink`] that keeps the most recent events in
//! publication order. When full, the oldest entry is evicted. Attach one
//! journal to both the tracker's and the scheduler's bus to get a single
//! interleaved history.
//!
//! # Query API
//!
//! - **Resource**: [`EventJournal::events_for_resource`]
//! - **Group**: [`EventJournal::events_for_group`]
//! - **Kind**: [`EventJournal::events_of_kind`], [`EventJournal::count_of_kind`]
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tangle_core::event::{EventBus, EventKind, LifecycleEvent};
//! use tangle_core::id::ResourceId;
//! use tangle_core::journal::EventJournal;
//!
//! let journal = Arc::new(EventJournal::with_capacity(16));
//! let mut bus = EventBus::new();
//! bus.subscribe(journal.clone());
//!
//! let r = ResourceId::new(1);
//! bus.publish(10, LifecycleEvent::DecoherenceCancelled { resource: r });
//!
//! assert_eq!(journal.len(), 1);
//! assert_eq!(journal.events_for_resource(r).len(), 1);
//! assert_eq!(journal.count_of_kind(EventKind::DecoherenceCancelled), 1);
//! ```

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::event::{EventEnvelope, EventKind, EventSink};
use crate::id::{GroupId, ResourceId};

/// Default number of retained events.
pub const DEFAULT_JOURNAL_CAPACITY: usize = 4096;

/// Ring buffer of recent [`EventEnvelope`]s.
#[derive(Debug)]
pub struct EventJournal {
    capacity: usize,
    inner: Mutex<JournalState>,
}

#[derive(Debug, Default)]
struct JournalState {
    entries: VecDeque<EventEnvelope>,
    evicted: u64,
}

impl EventJournal {
    /// Journal retaining [`DEFAULT_JOURNAL_CAPACITY`] events.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_JOURNAL_CAPACITY)
    }

    /// Journal retaining at most `capacity` events (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(JournalState {
                entries: VecDeque::with_capacity(capacity.min(1024)),
                evicted: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, JournalState> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    /// Whether no events are retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of events evicted since creation.
    pub fn evicted(&self) -> u64 {
        self.state().evicted
    }

    /// Forget all retained events.
    pub fn clear(&self) {
        self.state().entries.clear();
    }

    /// Copy of all retained events, oldest first.
    pub fn events(&self) -> Vec<EventEnvelope> {
        self.state().entries.iter().cloned().collect()
    }

    /// Retained events naming `resource`.
    pub fn events_for_resource(&self, resource: ResourceId) -> Vec<EventEnvelope> {
        self.filtered(|e| e.event.involves_resource(resource))
    }

    /// Retained events naming `group`.
    pub fn events_for_group(&self, group: GroupId) -> Vec<EventEnvelope> {
        self.filtered(|e| e.event.involves_group(group))
    }

    /// Retained events of one kind.
    pub fn events_of_kind(&self, kind: EventKind) -> Vec<EventEnvelope> {
        self.filtered(|e| e.event.kind() == kind)
    }

    /// Count of retained events of one kind.
    pub fn count_of_kind(&self, kind: EventKind) -> usize {
        self.state()
            .entries
            .iter()
            .filter(|e| e.event.kind() == kind)
            .count()
    }

    fn filtered(&self, pred: impl Fn(&EventEnvelope) -> bool) -> Vec<EventEnvelope> {
        self.state()
            .entries
            .iter()
            .filter(|e| pred(e))
            .cloned()
            .collect()
    }
}

impl Default for EventJournal {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventJournal {
    fn publish(&self, envelope: &EventEnvelope) {
        let mut state = self.state();
        if state.entries.len() == self.capacity {
            state.entries.pop_front();
            state.evicted += 1;
        }
        state.entries.push_back(envelope.clone());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
