//! Group records.
//!
//! A [`Group`] is the canonical record for one entanglement group: its
//! participants, kind, coherence metrics and a bounded [`OperationLog`].
//! Groups are only ever mutated by the
//! [`GroupTracker`](crate::tracker::GroupTracker); callers get shared
//! borrows or a [`TrackerView`](crate::view::TrackerView).

use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::{GroupId, ResourceId};

/// Strength multiplier applied to both sides of a split.
pub const SPLIT_STRENGTH_PENALTY: f64 = 0.8;
/// Stability multiplier applied to both sides of a split.
pub const SPLIT_STABILITY_PENALTY: f64 = 0.9;

// ---------------------------------------------------------------------------
// GroupKind
// ---------------------------------------------------------------------------

/// The entanglement pattern a group was created with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    /// Pairwise, maximally correlated.
    Bell,
    /// All-or-nothing multi-party correlation.
    Ghz,
    /// Multi-party, robust to losing one member.
    W,
    /// Graph-shaped dependency cluster.
    Cluster,
    /// Caller-defined pattern.
    Custom(String),
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKind::Bell => f.write_str("bell"),
            GroupKind::Ghz => f.write_str("ghz"),
            GroupKind::W => f.write_str("w"),
            GroupKind::Cluster => f.write_str("cluster"),
            GroupKind::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

// ---------------------------------------------------------------------------
// OperationLog
// ---------------------------------------------------------------------------

/// What happened to a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupOperation {
    Created { participants: usize },
    Absorbed { other: GroupId },
    SplitOff { fragment: GroupId, moved: usize },
    SplitFrom { original: GroupId },
    ParticipantAdded { resource: ResourceId },
    ParticipantRemoved { resource: ResourceId },
    Repaired { actions: usize },
}

/// A timestamped [`GroupOperation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub at_ms: u64,
    pub operation: GroupOperation,
}

/// Fixed-capacity history; the oldest record is evicted first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationLog {
    capacity: usize,
    records: VecDeque<OperationRecord>,
}

impl OperationLog {
    /// An empty log holding at most `capacity` records (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: VecDeque::new(),
        }
    }

    /// Append a record, evicting the oldest if full.
    pub fn record(&mut self, at_ms: u64, operation: GroupOperation) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(OperationRecord { at_ms, operation });
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &OperationRecord> {
        self.records.iter()
    }

    /// The most recent record.
    pub fn last(&self) -> Option<&OperationRecord> {
        self.records.back()
    }
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A canonical entanglement group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub(crate) id: GroupId,
    pub(crate) participants: BTreeSet<ResourceId>,
    pub(crate) kind: GroupKind,
    pub(crate) strength: f64,
    pub(crate) stability: f64,
    pub(crate) rank: u32,
    pub(crate) created_at: u64,
    /// Root of this group's union-find tree.
    pub(crate) representative: ResourceId,
    pub(crate) log: OperationLog,
}

impl Group {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: GroupId,
        participants: BTreeSet<ResourceId>,
        representative: ResourceId,
        kind: GroupKind,
        strength: f64,
        stability: f64,
        created_at: u64,
        log_capacity: usize,
    ) -> Self {
        Self {
            id,
            participants,
            kind,
            strength: clamp_unit(strength),
            stability: clamp_unit(stability),
            rank: 0,
            created_at,
            representative,
            log: OperationLog::new(log_capacity),
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn participants(&self) -> &BTreeSet<ResourceId> {
        &self.participants
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn contains(&self, resource: ResourceId) -> bool {
        self.participants.contains(&resource)
    }

    pub fn kind(&self) -> &GroupKind {
        &self.kind
    }

    /// Correlation strength in `[0, 1]`.
    pub fn strength(&self) -> f64 {
        self.strength
    }

    /// Stability in `[0, 1]`.
    pub fn stability(&self) -> f64 {
        self.stability
    }

    /// Union-by-rank rank.
    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// The resource at the root of this group's union-find tree.
    pub fn representative(&self) -> ResourceId {
        self.representative
    }

    pub fn operation_log(&self) -> &OperationLog {
        &self.log
    }

    /// Apply the disruption penalty shared by both sides of a split.
    pub(crate) fn apply_split_penalty(&mut self) {
        self.strength = clamp_unit(self.strength * SPLIT_STRENGTH_PENALTY);
        self.stability = clamp_unit(self.stability * SPLIT_STABILITY_PENALTY);
    }
}

/// Clamp into `[0, 1]`, mapping NaN to 0.
pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> Group {
        let a = ResourceId::new(1);
        let b = ResourceId::new(2);
        Group::new(
            GroupId::from_raw(0),
            [a, b].into_iter().collect(),
            a,
            GroupKind::Bell,
            1.0,
            1.0,
            0,
            4,
        )
    }

    #[test]
    fn split_penalty_scales_metrics() {
        let mut g = pair();
        g.apply_split_penalty();
        assert!((g.strength() - 0.8).abs() < 1e-12);
        assert!((g.stability() - 0.9).abs() < 1e-12);
    }

    #[test]
    fn metrics_are_clamped() {
        assert_eq!(clamp_unit(1.7), 1.0);
        assert_eq!(clamp_unit(-0.2), 0.0);
        assert_eq!(clamp_unit(f64::NAN), 0.0);
    }

    #[test]
    fn operation_log_is_bounded() {
        let mut log = OperationLog::new(2);
        for i in 0..5 {
            log.record(
                i,
                GroupOperation::ParticipantAdded {
                    resource: ResourceId::new(i),
                },
            );
        }
        assert_eq!(log.len(), 2);
        assert_eq!(log.iter().next().map(|r| r.at_ms), Some(3));
        assert_eq!(log.last().map(|r| r.at_ms), Some(4));
    }

    #[test]
    fn kind_display() {
        assert_eq!(GroupKind::Ghz.to_string(), "ghz");
        assert_eq!(GroupKind::Custom("ring".into()).to_string(), "custom:ring");
    }
}
