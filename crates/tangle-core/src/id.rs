//! Resource and group identifiers.
//!
//! A [`ResourceId`] is supplied by the caller: the engine never allocates
//! resources, it only tracks metadata about their lifecycle. A [`GroupId`] is
//! allocated by the [`GroupTracker`](crate::tracker::GroupTracker) through a
//! [`GroupIdAllocator`] and is never reused, so a stale group id held by a
//! caller can never alias a newer group.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// ResourceId
// ---------------------------------------------------------------------------

/// Opaque identifier for a trackable resource handle.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId(u64);

impl ResourceId {
    /// Wrap a raw caller-provided identifier.
    #[inline]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw `u64` representation.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceId({})", self.0)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// GroupId
// ---------------------------------------------------------------------------

/// Opaque identifier for an entanglement group.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(u64);

impl GroupId {
    /// Reconstruct from a raw `u64`.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw `u64` representation.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({})", self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// GroupIdAllocator
// ---------------------------------------------------------------------------

/// Hands out monotonically increasing [`GroupId`]s.
#[derive(Debug, Default)]
pub struct GroupIdAllocator {
    next: u64,
}

impl GroupIdAllocator {
    /// Create an allocator whose first id is `g0`.
    pub fn new() -> Self {
        Self { next: 0 }
    }

    /// Allocate the next unused id.
    pub fn allocate(&mut self) -> GroupId {
        let id = GroupId(self.next);
        self.next += 1;
        id
    }

    /// Number of ids handed out so far.
    pub fn allocated(&self) -> u64 {
        self.next
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
