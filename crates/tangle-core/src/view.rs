//! Read-only snapshots of tracker state.
//!
//! The tracker never hands out mutable access to its registries. External
//! callers that need to inspect everything at once (dashboards, external
//! checkpointing, determinism tests) take a [`TrackerView`]: an owned copy
//! ordered by id, serialisable with `serde`, with a BLAKE3 digest over its
//! canonical JSON form.
//!
//! ```
//! use std::sync::Arc;
//! use tangle_core::prelude::*;
//!
//! let mut tracker = GroupTracker::new(Arc::new(VirtualClock::new()));
//! tracker
//!     .create_group(&[ResourceId::new(1), ResourceId::new(2)], GroupKind::Bell)
//!     .unwrap();
//!
//! let view = tracker.view();
//! assert_eq!(view.groups.len(), 1);
//! assert_eq!(view.state_hash().len(), 64);
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::group::GroupKind;
use crate::id::{GroupId, ResourceId};
use crate::tracker::GroupTracker;

/// Copy of one group record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub id: GroupId,
    pub participants: Vec<ResourceId>,
    pub kind: GroupKind,
    pub strength: f64,
    pub stability: f64,
    pub rank: u32,
    pub created_at: u64,
    pub representative: ResourceId,
}

/// Copy of one union-find node (without its timestamp).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub parent: Option<ResourceId>,
    pub rank: u32,
    pub group: GroupId,
}

/// Owned, ordered copy of the whole tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerView {
    pub groups: BTreeMap<GroupId, GroupSnapshot>,
    pub memberships: BTreeMap<ResourceId, GroupId>,
    pub nodes: BTreeMap<ResourceId, NodeSnapshot>,
}

impl TrackerView {
    /// Group of `resource` at the time of capture.
    pub fn group_for(&self, resource: ResourceId) -> Option<&GroupSnapshot> {
        self.memberships
            .get(&resource)
            .and_then(|g| self.groups.get(g))
    }

    /// BLAKE3 hex digest (64 chars) of the canonical JSON encoding.
    pub fn state_hash(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }
}

impl GroupTracker {
    /// Capture a read-only view of the current state.
    pub fn view(&self) -> TrackerView {
        let groups = self
            .groups
            .values()
            .map(|g| {
                (
                    g.id,
                    GroupSnapshot {
                        id: g.id,
                        participants: g.participants.iter().copied().collect(),
                        kind: g.kind.clone(),
                        strength: g.strength,
                        stability: g.stability,
                        rank: g.rank,
                        created_at: g.created_at,
                        representative: g.representative,
                    },
                )
            })
            .collect();
        let memberships = self.membership.iter().map(|(r, g)| (*r, *g)).collect();
        let nodes = self
            .forest
            .iter()
            .map(|n| {
                (
                    n.resource_id,
                    NodeSnapshot {
                        parent: n.parent,
                        rank: n.rank,
                        group: n.group_id,
                    },
                )
            })
            .collect();
        TrackerView {
            groups,
            memberships,
            nodes,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
