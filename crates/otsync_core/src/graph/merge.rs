//! Deterministic multi-way merge.

use super::walk::{exhausted, Walk};
use super::OtAlgorithms;
use crate::commit::{Commit, CommitId};
use crate::diff::{self, Diff};
use crate::error::{OtError, OtResult};
use crate::repository::{RepoCommit, Repository};
use crate::system::OtSystem;
use futures::future;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, enabled, info, trace, Level};

/// Payload of a merge commit, before an id is assigned.
///
/// Two callers merging the same heads over the same graph content obtain
/// equal results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeResult<K: Ord, D> {
    /// Diffs from every merged head to the merged state.
    pub parents: BTreeMap<K, Vec<D>>,
    /// Level of the merge commit.
    pub level: u64,
}

impl<K: CommitId, D> MergeResult<K, D> {
    /// Turns the result into a commit with the given id.
    pub fn into_commit(self, id: K) -> Commit<K, D> {
        Commit::new(id, self.parents, self.level)
    }
}

/// The part of the graph between a set of heads and their single common
/// ancestor.
///
/// Every loaded commit has all of its parents either loaded or equal to
/// `base`. The base itself is treated as a root.
struct LoadedGraph<K: Ord, D> {
    base: K,
    base_level: u64,
    commits: BTreeMap<K, Commit<K, D>>,
}

impl<K: CommitId, D: Diff> LoadedGraph<K, D> {
    fn level(&self, id: &K) -> u64 {
        self.commits
            .get(id)
            .map_or(self.base_level, |commit| commit.level())
    }

    fn parents(&self, id: &K) -> Option<&BTreeMap<K, Vec<D>>> {
        self.commits.get(id).map(|commit| commit.parents())
    }

    fn is_ancestor(&self, ancestor: &K, descendant: &K) -> bool {
        let level = self.level(ancestor);
        let mut stack = vec![descendant.clone()];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            for parent in self.parents(&id).into_iter().flat_map(BTreeMap::keys) {
                if parent == ancestor {
                    return true;
                }
                if self.level(parent) > level && seen.insert(parent.clone()) {
                    stack.push(parent.clone());
                }
            }
        }
        false
    }

    fn exclude_parents(&self, nodes: &BTreeSet<K>) -> BTreeSet<K> {
        nodes
            .iter()
            .filter(|node| {
                !nodes
                    .iter()
                    .any(|other| other != *node && self.is_ancestor(node, other))
            })
            .cloned()
            .collect()
    }

    /// Diffs along any path from `from` down to `to`.
    fn path(&self, from: &K, to: &K) -> OtResult<Vec<D>> {
        let mut dead = HashSet::new();
        let mut diffs = self
            .find_path(from, to, &mut dead)
            .ok_or_else(|| OtError::diverged(from, to))?;
        diffs.reverse();
        Ok(diffs.into_iter().flatten().collect())
    }

    // Collects edge diff lists from `to` back to `from`, nearest edge first.
    fn find_path(&self, from: &K, to: &K, dead: &mut HashSet<K>) -> Option<Vec<Vec<D>>> {
        if from == to {
            return Some(Vec::new());
        }
        if self.level(to) <= self.level(from) || dead.contains(to) {
            return None;
        }
        for (parent, edge) in self.parents(to)? {
            if let Some(mut rest) = self.find_path(from, parent, dead) {
                rest.insert(0, edge.clone());
                return Some(rest);
            }
        }
        dead.insert(to.clone());
        None
    }

    /// Maps every node of an antichain to the diffs reaching their merge.
    ///
    /// The deepest node is the pivot: its parents replace it in a recursive
    /// merge of the remaining nodes, then its own edge is transformed
    /// against that merge.
    fn merge<S>(&self, system: &S, nodes: &BTreeSet<K>) -> OtResult<BTreeMap<K, Vec<D>>>
    where
        S: OtSystem<D>,
    {
        if nodes.len() == 1 {
            return Ok(nodes.iter().map(|node| (node.clone(), Vec::new())).collect());
        }

        let pivot = nodes
            .iter()
            .max_by(|a, b| self.level(a).cmp(&self.level(b)).then_with(|| a.cmp(b)))
            .ok_or(OtError::NoHeads)?;
        let pivot_parents = self
            .parents(pivot)
            .ok_or_else(|| exhausted("merging past the merge base"))?;

        let mut rest: BTreeSet<K> = nodes.iter().filter(|node| *node != pivot).cloned().collect();
        rest.extend(pivot_parents.keys().cloned());
        let rest = self.exclude_parents(&rest);
        let mut merged = self.merge(system, &rest)?;

        let (parent, parent_to_pivot) = pivot_parents
            .iter()
            .next()
            .ok_or_else(|| OtError::InvalidCommit(format!("commit {pivot:?} has no parents")))?;
        let parent_to_merged = match merged.get(parent) {
            Some(diffs) => diffs.clone(),
            None => {
                let via = rest
                    .iter()
                    .find(|node| self.is_ancestor(parent, node))
                    .ok_or_else(|| OtError::diverged(parent, pivot))?;
                let mut diffs = self.path(parent, via)?;
                diffs.extend(merged[via].iter().cloned());
                system.squash(&diffs)
            }
        };

        merged.retain(|node, _| nodes.contains(node));

        if pivot_parents.len() > 1 {
            // A merge commit holds nothing beyond its parents, all of which
            // are already part of the recursive merge.
            let to_merged = diff::concat(&system.invert(parent_to_pivot), &parent_to_merged);
            merged.insert(pivot.clone(), system.squash(&to_merged));
            return Ok(merged);
        }

        let result = system.transform(parent_to_pivot, &parent_to_merged)?;
        if let Some(resolution) = result.resolution {
            debug!(?pivot, ?resolution, "conflict resolved during merge");
        }
        for diffs in merged.values_mut() {
            *diffs = system.squash(&diff::concat(diffs, &result.left));
        }
        merged.insert(pivot.clone(), system.squash(&result.right));
        Ok(merged)
    }
}

impl<R, S> OtAlgorithms<R, S>
where
    R: Repository,
    S: OtSystem<R::Diff>,
{
    /// Loads every commit between `heads` and the first commit all of them
    /// pass through.
    async fn load_merge_graph(
        &self,
        heads: &BTreeSet<R::Id>,
    ) -> OtResult<LoadedGraph<R::Id, R::Diff>> {
        let mut walk = Walk::start(self.repo.as_ref(), heads).await?;
        let mut reach: BTreeMap<R::Id, BTreeSet<R::Id>> = heads
            .iter()
            .map(|head| (head.clone(), BTreeSet::from([head.clone()])))
            .collect();
        let mut commits = BTreeMap::new();

        loop {
            if reach.len() == 1 {
                if let Some((base, reached_by)) = reach.iter().next() {
                    if reached_by == heads {
                        let base_level = walk.level_of(base).unwrap_or_default();
                        debug!(?heads, ?base, loaded = commits.len(), "loaded merge graph");
                        return Ok(LoadedGraph {
                            base: base.clone(),
                            base_level,
                            commits,
                        });
                    }
                }
            }

            let commit = walk
                .pop()
                .ok_or_else(|| exhausted("looking for a merge base"))?;
            walk.expand(&commit).await?;
            let reached = reach.remove(commit.id()).unwrap_or_default();
            for parent in commit.parents().keys() {
                reach
                    .entry(parent.clone())
                    .or_default()
                    .extend(reached.iter().cloned());
            }
            commits.insert(commit.id().clone(), commit);
        }
    }

    /// Computes the merge of `heads` without touching the repository.
    ///
    /// Heads that are ancestors of other heads are dropped first. The graph
    /// between the heads and their nearest single common ancestor is then
    /// merged recursively, so history shared by only some of the heads is
    /// accounted for once. The result depends only on the graph content.
    pub async fn compute_merge(
        &self,
        heads: &BTreeSet<R::Id>,
    ) -> OtResult<MergeResult<R::Id, R::Diff>> {
        let heads = self.exclude_parents(heads).await?;
        let commits =
            future::try_join_all(heads.iter().map(|head| self.repo.load_commit(head))).await?;
        let level = commits
            .iter()
            .map(Commit::level)
            .max()
            .ok_or(OtError::NoHeads)?
            + 1;

        if heads.len() == 1 {
            let parents = heads.into_iter().map(|head| (head, Vec::new())).collect();
            return Ok(MergeResult { parents, level });
        }

        let graph = self.load_merge_graph(&heads).await?;
        debug!(base = ?graph.base, "merging over common ancestor");
        let parents = graph.merge(self.system.as_ref(), &heads)?;
        Ok(MergeResult { parents, level })
    }

    /// Merges `heads` and pushes the merge commit.
    ///
    /// If only one head is left after dropping ancestors, that head's commit
    /// is returned and nothing is pushed.
    pub async fn merge(&self, heads: &BTreeSet<R::Id>) -> OtResult<RepoCommit<R>> {
        let heads = self.exclude_parents(heads).await?;
        if heads.len() == 1 {
            if let Some(head) = heads.iter().next() {
                return self.repo.load_commit(head).await;
            }
        }

        let result = self.compute_merge(&heads).await?;
        if enabled!(Level::TRACE) {
            match self.to_graphviz(&heads).await {
                Ok(dot) => trace!("merging {:?}\n{}", heads, dot),
                Err(err) => trace!("graph rendering failed: {}", err),
            }
        }

        let id = self.repo.create_commit_id().await?;
        let commit = result.into_commit(id);
        self.repo.push(commit.clone()).await?;
        info!(commit = ?commit.id(), parents = ?heads, "pushed merge commit");
        Ok(commit)
    }

    /// Merges whatever heads the repository currently has.
    ///
    /// Returns the single resulting head.
    pub async fn merge_heads_and_push(&self) -> OtResult<R::Id> {
        let heads = self.repo.get_heads().await?;
        match heads.len() {
            0 => Err(OtError::NoHeads),
            1 => heads.into_iter().next().ok_or(OtError::NoHeads),
            _ => Ok(self.merge(&heads).await?.id().clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::TransformResult;

    #[derive(Debug, Clone, PartialEq)]
    struct Add(i64);

    impl Diff for Add {
        fn is_empty(&self) -> bool {
            self.0 == 0
        }

        fn invert(&self) -> Vec<Self> {
            vec![Add(-self.0)]
        }

        fn try_squash(&self, next: &Self) -> Option<Self> {
            Some(Add(self.0 + next.0))
        }
    }

    struct AddOt;

    impl OtSystem<Add> for AddOt {
        fn transform_one(&self, left: &Add, right: &Add) -> OtResult<TransformResult<Add>> {
            Ok(TransformResult::of(vec![left.clone()], vec![right.clone()]))
        }
    }

    /// Builds a loaded graph from `(child, parent, delta)` edges over base 1.
    fn graph(edges: &[(u64, u64, i64)]) -> LoadedGraph<u64, Add> {
        let mut parents: BTreeMap<u64, BTreeMap<u64, Vec<Add>>> = BTreeMap::new();
        for (child, parent, delta) in edges {
            parents
                .entry(*child)
                .or_default()
                .insert(*parent, vec![Add(*delta)]);
        }
        let mut levels = BTreeMap::from([(1u64, 0u64)]);
        let mut commits = BTreeMap::new();
        for (child, edges) in parents {
            let level = edges.keys().map(|parent| levels[parent]).max().unwrap() + 1;
            levels.insert(child, level);
            commits.insert(child, Commit::new(child, edges, level));
        }
        LoadedGraph {
            base: 1,
            base_level: 0,
            commits,
        }
    }

    fn value(graph: &LoadedGraph<u64, Add>, id: u64) -> i64 {
        graph.path(&1, &id).unwrap().iter().map(|add| add.0).sum()
    }

    #[test]
    fn shared_history_is_counted_once() {
        // 2 and 3 fork from 1 and are merged twice, into 4 and 5.
        let graph = graph(&[
            (2, 1, 1),
            (3, 1, 2),
            (4, 2, 2),
            (4, 3, 1),
            (5, 2, 2),
            (5, 3, 1),
            (6, 4, 10),
            (7, 5, 20),
            (8, 1, 100),
        ]);

        let heads = BTreeSet::from([6, 7, 8]);
        let merged = graph.merge(&AddOt, &heads).unwrap();
        for head in heads {
            let total = value(&graph, head) + merged[&head].iter().map(|add| add.0).sum::<i64>();
            assert_eq!(total, 133, "head {head}");
        }
    }

    #[test]
    fn exclusion_and_ancestry() {
        let graph = graph(&[(2, 1, 1), (3, 2, 1), (4, 2, 1)]);
        assert!(graph.is_ancestor(&1, &3));
        assert!(!graph.is_ancestor(&3, &4));
        assert_eq!(
            graph.exclude_parents(&BTreeSet::from([1, 2, 3, 4])),
            BTreeSet::from([3, 4])
        );
        assert!(graph.path(&3, &4).is_err());
    }
}
