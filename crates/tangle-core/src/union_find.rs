//! Union-find forest over resources.
//!
//! Each grouped resource owns one [`UnionFindNode`]. Following `parent`
//! links from any node ends at a root; the root's `group_id` names the
//! resource's canonical group. [`Forest::find_root`] compresses the walked
//! path so that every visited node points straight at the root afterwards.
//!
//! Rank is stored on every node but only meaningful on roots, where it
//! mirrors the owning group's rank.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::id::{GroupId, ResourceId};

// ---------------------------------------------------------------------------
// UnionFindNode
// ---------------------------------------------------------------------------

/// One resource's position in the forest. `parent == None` marks a root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnionFindNode {
    pub resource_id: ResourceId,
    pub parent: Option<ResourceId>,
    pub rank: u32,
    pub group_id: GroupId,
    pub last_modified: u64,
}

// ---------------------------------------------------------------------------
// Forest
// ---------------------------------------------------------------------------

/// The set of all union-find nodes.
#[derive(Debug, Clone, Default)]
pub struct Forest {
    nodes: HashMap<ResourceId, UnionFindNode>,
}

impl Forest {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, resource: ResourceId) -> bool {
        self.nodes.contains_key(&resource)
    }

    pub fn get(&self, resource: ResourceId) -> Option<&UnionFindNode> {
        self.nodes.get(&resource)
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnionFindNode> {
        self.nodes.values()
    }

    /// Insert (or overwrite) a root node.
    pub fn insert_root(&mut self, resource: ResourceId, group: GroupId, rank: u32, now: u64) {
        self.nodes.insert(
            resource,
            UnionFindNode {
                resource_id: resource,
                parent: None,
                rank,
                group_id: group,
                last_modified: now,
            },
        );
    }

    /// Insert (or overwrite) a node whose parent is `parent`.
    pub fn insert_child(&mut self, resource: ResourceId, parent: ResourceId, group: GroupId, now: u64) {
        self.nodes.insert(
            resource,
            UnionFindNode {
                resource_id: resource,
                parent: Some(parent),
                rank: 0,
                group_id: group,
                last_modified: now,
            },
        );
    }

    pub fn remove(&mut self, resource: ResourceId) -> Option<UnionFindNode> {
        self.nodes.remove(&resource)
    }

    /// Walk to the root without modifying anything.
    ///
    /// Returns `None` if `resource` has no node, a parent link dangles, or the
    /// chain loops.
    pub fn root_of(&self, resource: ResourceId) -> Option<ResourceId> {
        let mut current = resource;
        for _ in 0..=self.nodes.len() {
            match self.nodes.get(&current)?.parent {
                None => return Some(current),
                Some(parent) => current = parent,
            }
        }
        None
    }

    /// Number of parent hops from `resource` to its root.
    pub fn depth(&self, resource: ResourceId) -> Option<usize> {
        let mut current = resource;
        for hops in 0..=self.nodes.len() {
            match self.nodes.get(&current)?.parent {
                None => return Some(hops),
                Some(parent) => current = parent,
            }
        }
        None
    }

    /// Find the root of `resource`, rewriting every node on the walked path
    /// to point directly at it.
    pub fn find_root(&mut self, resource: ResourceId, now: u64) -> Option<ResourceId> {
        let root = self.root_of(resource)?;

        let mut current = resource;
        while current != root {
            let node = self.nodes.get_mut(&current)?;
            let next = node.parent?;
            if next != root {
                node.parent = Some(root);
                node.last_modified = now;
            }
            current = next;
        }
        Some(root)
    }

    /// Attach the root `child_root` beneath the root `parent_root`.
    pub fn link(&mut self, child_root: ResourceId, parent_root: ResourceId, now: u64) {
        if child_root == parent_root {
            return;
        }
        if let Some(node) = self.nodes.get_mut(&child_root) {
            node.parent = Some(parent_root);
            node.last_modified = now;
        }
    }

    pub fn set_rank(&mut self, resource: ResourceId, rank: u32, now: u64) {
        if let Some(node) = self.nodes.get_mut(&resource) {
            node.rank = rank;
            node.last_modified = now;
        }
    }

    pub fn set_group(&mut self, resource: ResourceId, group: GroupId, now: u64) {
        if let Some(node) = self.nodes.get_mut(&resource) {
            node.group_id = group;
            node.last_modified = now;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn r(raw: u64) -> ResourceId {
        ResourceId::new(raw)
    }

    /// Chain 4 -> 3 -> 2 -> 1 (root).
    fn chain() -> Forest {
        let g = GroupId::from_raw(0);
        let mut f = Forest::new();
        f.insert_root(r(1), g, 0, 0);
        f.insert_child(r(2), r(1), g, 0);
        f.insert_child(r(3), r(2), g, 0);
        f.insert_child(r(4), r(3), g, 0);
        f
    }

    #[test]
    fn find_compresses_path() {
        let mut f = chain();
        assert_eq!(f.depth(r(4)), Some(3));

        assert_eq!(f.find_root(r(4), 7), Some(r(1)));

        assert_eq!(f.depth(r(4)), Some(1));
        assert_eq!(f.depth(r(3)), Some(1));
        assert_eq!(f.get(r(4)).unwrap().last_modified, 7);
        // Already pointing at the root: untouched.
        assert_eq!(f.get(r(2)).unwrap().last_modified, 0);
    }

    #[test]
    fn dangling_parent_has_no_root() {
        let mut f = chain();
        f.remove(r(2));
        assert_eq!(f.root_of(r(4)), None);
        assert_eq!(f.find_root(r(4), 1), None);
    }

    #[test]
    fn cycle_is_detected() {
        let g = GroupId::from_raw(0);
        let mut f = Forest::new();
        f.insert_child(r(1), r(2), g, 0);
        f.insert_child(r(2), r(1), g, 0);
        assert_eq!(f.root_of(r(1)), None);
        assert_eq!(f.depth(r(1)), None);
    }

    #[test]
    fn link_attaches_root_under_root() {
        let mut f = Forest::new();
        f.insert_root(r(1), GroupId::from_raw(0), 0, 0);
        f.insert_root(r(9), GroupId::from_raw(1), 0, 0);
        f.link(r(9), r(1), 3);
        assert_eq!(f.root_of(r(9)), Some(r(1)));
    }
}
