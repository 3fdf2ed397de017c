//! Integrity validation and automated repair.
//!
//! [`GroupTracker::validate_group_integrity`] cross-checks one group against
//! the membership map and the union-find forest without mutating anything.
//! Structural problems become [`IntegrityError`]s, soft concerns become
//! [`IntegrityWarning`]s, and each error carries a machine-usable
//! [`RepairAction`] suggestion.
//!
//! [`GroupTracker::repair_broken_entanglements`] runs validation over every
//! group, applies the suggested actions, re-validates and reports what is
//! left.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::group::GroupOperation;
use crate::id::{GroupId, ResourceId};
use crate::tracker::GroupTracker;
use crate::TrackerError;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Category of a structural problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityErrorKind {
    /// The map, the forest and the group record disagree about a member.
    InvalidRelationship,
    /// A participant has no union-find node.
    MissingParticipant,
}

/// A structural problem found in one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityError {
    pub kind: IntegrityErrorKind,
    pub resource: ResourceId,
    pub detail: String,
}

/// A non-fatal observation about a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityWarning {
    LowStability { stability: f64, threshold: f64 },
    LowStrength { strength: f64, threshold: f64 },
    OversizedGroup { size: usize, threshold: usize },
}

/// A fix the tracker knows how to apply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairAction {
    /// Point the membership map entry of `resource` at `group`.
    RemapParticipant { resource: ResourceId, group: GroupId },
    /// Create a missing union-find node.
    RecreateNode { resource: ResourceId, group: GroupId },
    /// `resource` belongs to another group; drop it from this one.
    DropParticipant { resource: ResourceId, group: GroupId },
    /// Re-root every member beneath the representative.
    RebuildTree { group: GroupId },
}

/// Outcome of [`GroupTracker::validate_group_integrity`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub group: GroupId,
    pub is_valid: bool,
    pub errors: Vec<IntegrityError>,
    pub warnings: Vec<IntegrityWarning>,
    pub suggestions: Vec<RepairAction>,
}

/// Outcome of [`GroupTracker::repair_broken_entanglements`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepairResult {
    pub groups_checked: usize,
    pub errors_found: usize,
    pub errors_fixed: usize,
    pub errors_remaining: usize,
    pub actions_applied: usize,
    /// Membership entries that pointed at groups which no longer exist.
    pub orphaned_mappings_removed: usize,
    /// Groups dissolved because repair left them with fewer than two members.
    pub dissolved: Vec<GroupId>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl GroupTracker {
    /// Cross-check every participant of `group`. Read-only.
    pub fn validate_group_integrity(&self, group: GroupId) -> Result<ValidationResult, TrackerError> {
        let record = self
            .groups
            .get(&group)
            .ok_or(TrackerError::GroupNotFound(group))?;

        let mut errors = Vec::new();
        let mut suggestions = BTreeSet::new();

        for &member in &record.participants {
            match self.membership.get(&member) {
                None => {
                    errors.push(IntegrityError {
                        kind: IntegrityErrorKind::InvalidRelationship,
                        resource: member,
                        detail: "participant has no group mapping".to_owned(),
                    });
                    suggestions.insert(RepairAction::RemapParticipant {
                        resource: member,
                        group,
                    });
                }
                Some(&other) if other != group => {
                    errors.push(IntegrityError {
                        kind: IntegrityErrorKind::InvalidRelationship,
                        resource: member,
                        detail: format!("participant is mapped to {other}"),
                    });
                    let claimed_elsewhere = self
                        .groups
                        .get(&other)
                        .is_some_and(|g| g.contains(member));
                    suggestions.insert(if claimed_elsewhere {
                        RepairAction::DropParticipant {
                            resource: member,
                            group,
                        }
                    } else {
                        RepairAction::RemapParticipant {
                            resource: member,
                            group,
                        }
                    });
                }
                Some(_) => {}
            }

            match self.forest.get(member) {
                None => {
                    errors.push(IntegrityError {
                        kind: IntegrityErrorKind::MissingParticipant,
                        resource: member,
                        detail: "no union-find node".to_owned(),
                    });
                    suggestions.insert(RepairAction::RecreateNode {
                        resource: member,
                        group,
                    });
                }
                Some(node) => {
                    let root_group = self
                        .forest
                        .root_of(member)
                        .and_then(|root| self.forest.get(root))
                        .map(|root| root.group_id);
                    let problem = if node.group_id != group {
                        Some(format!("node is tagged with {}", node.group_id))
                    } else {
                        match root_group {
                            None => Some("parent chain is broken".to_owned()),
                            Some(g) if g != group => Some(format!("chain resolves to {g}")),
                            Some(_) => None,
                        }
                    };
                    if let Some(detail) = problem {
                        errors.push(IntegrityError {
                            kind: IntegrityErrorKind::InvalidRelationship,
                            resource: member,
                            detail,
                        });
                        suggestions.insert(RepairAction::RebuildTree { group });
                    }
                }
            }
        }

        if !record.participants.contains(&record.representative) {
            errors.push(IntegrityError {
                kind: IntegrityErrorKind::InvalidRelationship,
                resource: record.representative,
                detail: "representative is not a participant".to_owned(),
            });
            suggestions.insert(RepairAction::RebuildTree { group });
        }

        let mut warnings = Vec::new();
        if record.stability < self.config.low_stability_threshold {
            warnings.push(IntegrityWarning::LowStability {
                stability: record.stability,
                threshold: self.config.low_stability_threshold,
            });
        }
        if record.strength < self.config.low_strength_threshold {
            warnings.push(IntegrityWarning::LowStrength {
                strength: record.strength,
                threshold: self.config.low_strength_threshold,
            });
        }
        if record.len() > self.config.oversized_group_threshold {
            warnings.push(IntegrityWarning::OversizedGroup {
                size: record.len(),
                threshold: self.config.oversized_group_threshold,
            });
        }

        Ok(ValidationResult {
            group,
            is_valid: errors.is_empty(),
            errors,
            warnings,
            suggestions: suggestions.into_iter().collect(),
        })
    }

    // -----------------------------------------------------------------------
    // Repair
    // -----------------------------------------------------------------------

    /// Validate every group and apply the suggested repairs.
    pub fn repair_broken_entanglements(&mut self) -> RepairResult {
        let mut result = RepairResult::default();
        let now = self.now();

        // Map entries pointing at vanished groups.
        let orphans: Vec<ResourceId> = self
            .membership
            .iter()
            .filter(|(_, g)| !self.groups.contains_key(g))
            .map(|(r, _)| *r)
            .collect();
        for resource in &orphans {
            self.membership.remove(resource);
            if self
                .forest
                .get(*resource)
                .is_some_and(|n| !self.groups.contains_key(&n.group_id))
            {
                self.forest.remove(*resource);
            }
        }
        result.orphaned_mappings_removed = orphans.len();

        let ids: Vec<GroupId> = self.groups.keys().copied().collect();
        for group in ids {
            let Ok(report) = self.validate_group_integrity(group) else {
                continue;
            };
            result.groups_checked += 1;
            if report.is_valid {
                continue;
            }
            result.errors_found += report.errors.len();
            warn!(group = %group, errors = report.errors.len(), "group failed integrity check");

            for action in &report.suggestions {
                self.apply_repair(action);
                result.actions_applied += 1;
            }
            self.rebuild_tree(group, now);
            if let Some(g) = self.groups.get_mut(&group) {
                g.log.record(
                    now,
                    GroupOperation::Repaired {
                        actions: report.suggestions.len(),
                    },
                );
            }

            let remaining_members = self.groups.get(&group).map_or(0, |g| g.len());
            if remaining_members < 2 {
                if self.dissolve_group(group).is_ok() {
                    result.dissolved.push(group);
                }
                continue;
            }
            if let Ok(after) = self.validate_group_integrity(group) {
                result.errors_remaining += after.errors.len();
            }
        }
        result.errors_fixed = result.errors_found.saturating_sub(result.errors_remaining);

        info!(
            checked = result.groups_checked,
            found = result.errors_found,
            fixed = result.errors_fixed,
            remaining = result.errors_remaining,
            "integrity repair finished"
        );
        result
    }

    fn apply_repair(&mut self, action: &RepairAction) {
        let now = self.now();
        match *action {
            RepairAction::RemapParticipant { resource, group } => {
                self.membership.insert(resource, group);
            }
            RepairAction::RecreateNode { resource, group } => {
                if let Some(rep) = self.groups.get(&group).map(|g| g.representative) {
                    self.forest.insert_child(resource, rep, group, now);
                }
            }
            RepairAction::DropParticipant { resource, group } => {
                if let Some(g) = self.groups.get_mut(&group) {
                    g.participants.remove(&resource);
                }
            }
            RepairAction::RebuildTree { group } => self.rebuild_tree(group, now),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
