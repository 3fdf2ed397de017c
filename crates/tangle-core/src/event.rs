//! Publish-only lifecycle event stream.
//!
//! The tracker and the scheduler publish a [`LifecycleEvent`] for every
//! externally meaningful transition. Events go through an [`EventBus`], a
//! plain observer list of [`EventSink`]s. Nothing in the engine depends on
//! anyone listening: a bus with no sinks is valid and publishing to it is a
//! no-op.
//!
//! Two sinks ship with the crate:
//!
//! - [`EventJournal`](crate::journal::EventJournal): bounded, queryable history.
//! - [`ChannelSink`]: forwards into a bounded `std::sync::mpsc` channel and
//!   drops (with a warning) when the consumer falls behind.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::group::GroupKind;
use crate::id::{GroupId, ResourceId};

// ---------------------------------------------------------------------------
// LifecycleEvent
// ---------------------------------------------------------------------------

/// A single lifecycle transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A new group was formed from two or more resources.
    GroupCreated {
        group: GroupId,
        participants: Vec<ResourceId>,
        kind: GroupKind,
    },
    /// `absorbed` was folded into `survivor`.
    GroupsMerged {
        survivor: GroupId,
        absorbed: GroupId,
        rank: u32,
    },
    /// `fragment` was carved out of `original`.
    GroupSplit {
        original: GroupId,
        fragment: GroupId,
        fragment_participants: Vec<ResourceId>,
    },
    /// The group no longer exists; its members are ungrouped.
    GroupDissolved {
        group: GroupId,
        former_participants: Vec<ResourceId>,
    },
    ParticipantAdded {
        group: GroupId,
        resource: ResourceId,
    },
    ParticipantRemoved {
        group: GroupId,
        resource: ResourceId,
    },
    DecoherenceScheduled {
        resource: ResourceId,
        deadline_ms: u64,
        duration_ms: u64,
    },
    DecoherenceRescheduled {
        resource: ResourceId,
        deadline_ms: u64,
        duration_ms: u64,
    },
    DecoherenceCancelled {
        resource: ResourceId,
    },
    GcStarted {
        candidates: usize,
    },
    GcCompleted {
        collected: usize,
        deferred: usize,
        oversight_required: usize,
        memory_freed: u64,
        success: bool,
    },
}

/// Discriminant of a [`LifecycleEvent`], used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    GroupCreated,
    GroupsMerged,
    GroupSplit,
    GroupDissolved,
    ParticipantAdded,
    ParticipantRemoved,
    DecoherenceScheduled,
    DecoherenceRescheduled,
    DecoherenceCancelled,
    GcStarted,
    GcCompleted,
}

impl EventKind {
    /// The wire name of the event (e.g. `"group_created"`).
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::GroupCreated => "group_created",
            EventKind::GroupsMerged => "groups_merged",
            EventKind::GroupSplit => "group_split",
            EventKind::GroupDissolved => "group_dissolved",
            EventKind::ParticipantAdded => "participant_added",
            EventKind::ParticipantRemoved => "participant_removed",
            EventKind::DecoherenceScheduled => "decoherence_scheduled",
            EventKind::DecoherenceRescheduled => "decoherence_rescheduled",
            EventKind::DecoherenceCancelled => "decoherence_cancelled",
            EventKind::GcStarted => "gc_started",
            EventKind::GcCompleted => "gc_completed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LifecycleEvent {
    /// The event's discriminant.
    pub fn kind(&self) -> EventKind {
        match self {
            LifecycleEvent::GroupCreated { .. } => EventKind::GroupCreated,
            LifecycleEvent::GroupsMerged { .. } => EventKind::GroupsMerged,
            LifecycleEvent::GroupSplit { .. } => EventKind::GroupSplit,
            LifecycleEvent::GroupDissolved { .. } => EventKind::GroupDissolved,
            LifecycleEvent::ParticipantAdded { .. } => EventKind::ParticipantAdded,
            LifecycleEvent::ParticipantRemoved { .. } => EventKind::ParticipantRemoved,
            LifecycleEvent::DecoherenceScheduled { .. } => EventKind::DecoherenceScheduled,
            LifecycleEvent::DecoherenceRescheduled { .. } => EventKind::DecoherenceRescheduled,
            LifecycleEvent::DecoherenceCancelled { .. } => EventKind::DecoherenceCancelled,
            LifecycleEvent::GcStarted { .. } => EventKind::GcStarted,
            LifecycleEvent::GcCompleted { .. } => EventKind::GcCompleted,
        }
    }

    /// Whether `resource` is named by this event.
    pub fn involves_resource(&self, resource: ResourceId) -> bool {
        match self {
            LifecycleEvent::GroupCreated { participants, .. } => participants.contains(&resource),
            LifecycleEvent::GroupSplit {
                fragment_participants,
                ..
            } => fragment_participants.contains(&resource),
            LifecycleEvent::GroupDissolved {
                former_participants,
                ..
            } => former_participants.contains(&resource),
            LifecycleEvent::ParticipantAdded { resource: r, .. }
            | LifecycleEvent::ParticipantRemoved { resource: r, .. }
            | LifecycleEvent::DecoherenceScheduled { resource: r, .. }
            | LifecycleEvent::DecoherenceRescheduled { resource: r, .. }
            | LifecycleEvent::DecoherenceCancelled { resource: r } => *r == resource,
            LifecycleEvent::GroupsMerged { .. }
            | LifecycleEvent::GcStarted { .. }
            | LifecycleEvent::GcCompleted { .. } => false,
        }
    }

    /// Whether `group` is named by this event.
    pub fn involves_group(&self, group: GroupId) -> bool {
        match self {
            LifecycleEvent::GroupCreated { group: g, .. }
            | LifecycleEvent::GroupDissolved { group: g, .. }
            | LifecycleEvent::ParticipantAdded { group: g, .. }
            | LifecycleEvent::ParticipantRemoved { group: g, .. } => *g == group,
            LifecycleEvent::GroupsMerged {
                survivor, absorbed, ..
            } => *survivor == group || *absorbed == group,
            LifecycleEvent::GroupSplit {
                original, fragment, ..
            } => *original == group || *fragment == group,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// EventEnvelope
// ---------------------------------------------------------------------------

/// An event stamped with the clock time at which it was published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub at_ms: u64,
    pub event: LifecycleEvent,
}

// ---------------------------------------------------------------------------
// EventSink / EventBus
// ---------------------------------------------------------------------------

/// Receives published events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn publish(&self, envelope: &EventEnvelope);
}

/// Observer list. Cloning a bus shares its sinks.
#[derive(Clone, Default)]
pub struct EventBus {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventBus {
    /// A bus with no subscribers.
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Attach a sink. The same sink may be attached to several buses.
    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// Number of attached sinks.
    pub fn subscriber_count(&self) -> usize {
        self.sinks.len()
    }

    /// Deliver `event` to every sink in subscription order.
    pub fn publish(&self, at_ms: u64, event: LifecycleEvent) {
        if self.sinks.is_empty() {
            return;
        }
        let envelope = EventEnvelope { at_ms, event };
        for sink in &self.sinks {
            sink.publish(&envelope);
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sinks.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ChannelSink
// ---------------------------------------------------------------------------

/// Forwards events into a bounded channel. Full channel -> event dropped.
pub struct ChannelSink {
    tx: SyncSender<EventEnvelope>,
    dropped: AtomicU64,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel.
    pub fn bounded(capacity: usize) -> (Self, Receiver<EventEnvelope>) {
        let (tx, rx) = mpsc::sync_channel(capacity);
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Events discarded because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, envelope: &EventEnvelope) {
        match self.tx.try_send(envelope.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(env)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(event = %env.event.kind(), "event channel full, dropping event");
            }
            Err(TrySendError::Disconnected(env)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(event = %env.event.kind(), "event channel closed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
