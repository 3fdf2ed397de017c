//! Tangle Core -- group tracking for entangled in-memory resources.
//!
//! This crate provides the bookkeeping half of the Tangle lifecycle engine:
//! a union-find backed [`GroupTracker`](tracker::GroupTracker) that keeps
//! groups of mutually-dependent resources consistent under merge, split and
//! dissolution, together with the shared plumbing the scheduler builds on
//! (identifiers, the [`Clock`](clock::Clock) abstraction and the lifecycle
//! event stream).
//!
//! # Modules
//!
//! - [`id`]: resource and group identifiers.
//! - [`clock`]: virtual and system clocks with deferred callbacks.
//! - [`event`], [`journal`]: publish-only event stream and a bounded journal.
//! - [`group`], [`union_find`], [`tracker`]: group records, the forest, and
//!   the registry that ties them together.
//! - [`integrity`]: validation and automated repair.
//! - [`view`]: owned, hashable snapshots for external callers.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use tangle_core::prelude::*;
//!
//! let clock = Arc::new(VirtualClock::new());
//! let mut tracker = GroupTracker::new(clock);
//!
//! let a = ResourceId::new(1);
//! let b = ResourceId::new(2);
//! let group = tracker.create_group(&[a, b], GroupKind::Bell).unwrap();
//!
//! assert_eq!(tracker.find(a), tracker.find(b));
//! assert!(tracker.validate_group_integrity(group).unwrap().is_valid);
//! ```

#![deny(unsafe_code)]

pub mod clock;
pub mod event;
pub mod group;
pub mod id;
pub mod integrity;
pub mod journal;
pub mod tracker;
pub mod union_find;
pub mod view;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Precondition failures of tracker operations.
///
/// Returned before any state is touched: a failed call never leaves the
/// tracker partially modified.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackerError {
    /// No group with this id exists (never created, merged away, or dissolved).
    #[error("group {0} does not exist")]
    GroupNotFound(id::GroupId),

    /// The resource is already a participant of another group.
    #[error("resource {resource} already belongs to group {group}")]
    AlreadyGrouped {
        resource: id::ResourceId,
        group: id::GroupId,
    },

    /// Groups need at least two participants.
    #[error("a group needs at least 2 participants, got {count}")]
    TooFewParticipants {
        count: usize,
    },

    /// The same resource was listed twice.
    #[error("resource {resource} listed more than once")]
    DuplicateParticipant {
        resource: id::ResourceId,
    },

    /// The requested split does not partition the group into two non-empty sides.
    #[error("invalid partition of group {group}: {reason}")]
    InvalidPartition {
        group: id::GroupId,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::clock::{CallbackId, Clock, ClockCallback, SystemClock, VirtualClock};
    pub use crate::event::{ChannelSink, EventBus, EventEnvelope, EventKind, EventSink, LifecycleEvent};
    pub use crate::group::{Group, GroupKind, GroupOperation};
    pub use crate::id::{GroupId, ResourceId};
    pub use crate::integrity::{
        IntegrityError, IntegrityErrorKind, IntegrityWarning, RepairAction, RepairResult,
        ValidationResult,
    };
    pub use crate::journal::EventJournal;
    pub use crate::tracker::{GroupMetrics, GroupTracker, TrackerConfig};
    pub use crate::view::TrackerView;
    pub use crate::TrackerError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
