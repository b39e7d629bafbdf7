//! Commit graph model.
//!
//! Commits reference their parents by id only. The repository owns commit
//! storage; algorithms hold ids and loaded payloads, never a linked object
//! graph.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::hash::Hash;

/// Opaque, totally ordered commit identifier assigned by the repository.
pub trait CommitId: Clone + Ord + Hash + Debug + Send + Sync + 'static {}

impl<T> CommitId for T where T: Clone + Ord + Hash + Debug + Send + Sync + 'static {}

/// An immutable node of the commit DAG.
///
/// `parents` maps every parent to the diffs that turn the parent's state
/// into this commit's state. `level` is the longest path from a root.
///
/// # Invariants
///
/// - a root commit has no parents and level 0
/// - `level` is greater than the level of every parent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit<K: Ord, D> {
    id: K,
    parents: BTreeMap<K, Vec<D>>,
    level: u64,
}

impl<K: CommitId, D> Commit<K, D> {
    /// Creates a root commit.
    pub fn root(id: K) -> Self {
        Self {
            id,
            parents: BTreeMap::new(),
            level: 0,
        }
    }

    /// Creates a commit from its parts.
    pub fn new(id: K, parents: BTreeMap<K, Vec<D>>, level: u64) -> Self {
        Self { id, parents, level }
    }

    /// Creates a single-parent commit one level above `parent_level`.
    pub fn child(id: K, parent: K, diffs: Vec<D>, parent_level: u64) -> Self {
        let mut parents = BTreeMap::new();
        parents.insert(parent, diffs);
        Self {
            id,
            parents,
            level: parent_level + 1,
        }
    }

    /// Returns the commit id.
    pub fn id(&self) -> &K {
        &self.id
    }

    /// Returns the parent edges.
    pub fn parents(&self) -> &BTreeMap<K, Vec<D>> {
        &self.parents
    }

    /// Returns the parent ids in ascending order.
    pub fn parent_ids(&self) -> BTreeSet<K> {
        self.parents.keys().cloned().collect()
    }

    /// Returns the diffs from `parent` to this commit.
    pub fn diffs_from(&self, parent: &K) -> Option<&[D]> {
        self.parents.get(parent).map(Vec::as_slice)
    }

    /// Returns the level.
    pub fn level(&self) -> u64 {
        self.level
    }

    /// Returns true if this commit has no parents.
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// Returns true if this commit has more than one parent.
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// Consumes the commit and returns its parent edges.
    pub fn into_parents(self) -> BTreeMap<K, Vec<D>> {
        self.parents
    }

    /// Graph ordering key: deeper commits first, then higher ids.
    pub(crate) fn walk_key(&self) -> WalkKey<K> {
        WalkKey {
            level: self.level,
            id: self.id.clone(),
        }
    }
}

/// Priority of a commit during backward walks.
///
/// Ordered by level, then id, so a max-heap pops the deepest, highest-id
/// commit first. A parent always sits below each of its children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WalkKey<K> {
    pub(crate) level: u64,
    pub(crate) id: K,
}

impl<K: Ord> Ord for WalkKey<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.level
            .cmp(&other.level)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl<K: Ord> PartialOrd for WalkKey<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    #[test]
    fn root_commit() {
        let root: Commit<u64, i32> = Commit::root(1);
        assert!(root.is_root());
        assert!(!root.is_merge());
        assert_eq!(root.level(), 0);
        assert!(root.parent_ids().is_empty());
    }

    #[test]
    fn child_commit() {
        let child = Commit::child(2u64, 1u64, vec![10, 20], 0);
        assert_eq!(child.level(), 1);
        assert_eq!(child.diffs_from(&1), Some(&[10, 20][..]));
        assert_eq!(child.diffs_from(&3), None);
    }

    #[test]
    fn merge_commit() {
        let mut parents = BTreeMap::new();
        parents.insert(3u64, vec![1]);
        parents.insert(2u64, vec![2]);
        let merge = Commit::new(4u64, parents, 2);

        assert!(merge.is_merge());
        assert_eq!(merge.parent_ids().into_iter().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn walk_order_prefers_depth_then_id() {
        let mut heap = BinaryHeap::new();
        heap.push(WalkKey { level: 1, id: 9u64 });
        heap.push(WalkKey { level: 3, id: 6u64 });
        heap.push(WalkKey { level: 3, id: 7u64 });
        heap.push(WalkKey { level: 0, id: 1u64 });

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|key| key.id)).collect();
        assert_eq!(order, vec![7, 6, 9, 1]);
    }
}
