//! Backward priority walk over the commit graph.

use crate::commit::WalkKey;
use crate::error::{OtError, OtResult};
use crate::repository::{RepoCommit, Repository};
use futures::future;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

/// Visits commits from a set of heads towards the roots.
///
/// Commits are popped deepest first (level, then id, descending) and each
/// commit is visited at most once. Since a parent's level is lower than any
/// of its children's, every child reachable from the heads is popped before
/// its parent.
///
/// Parents are loaded only when the caller expands a popped commit, so a
/// walk may stop at a commit whose ancestors are no longer stored.
pub(crate) struct Walk<'a, R: Repository> {
    repo: &'a R,
    queue: BinaryHeap<WalkKey<R::Id>>,
    frontier: HashMap<R::Id, RepoCommit<R>>,
    visited: HashSet<R::Id>,
}

impl<'a, R: Repository> Walk<'a, R> {
    /// Loads the heads and queues them.
    pub(crate) async fn start(repo: &'a R, heads: &BTreeSet<R::Id>) -> OtResult<Walk<'a, R>> {
        let mut walk = Walk {
            repo,
            queue: BinaryHeap::new(),
            frontier: HashMap::new(),
            visited: heads.iter().cloned().collect(),
        };
        let ids: Vec<R::Id> = heads.iter().cloned().collect();
        walk.enqueue(&ids).await?;
        Ok(walk)
    }

    async fn enqueue(&mut self, ids: &[R::Id]) -> OtResult<()> {
        let repo = self.repo;
        let commits = future::try_join_all(ids.iter().map(|id| repo.load_commit(id))).await?;
        for commit in commits {
            self.queue.push(commit.walk_key());
            self.frontier.insert(commit.id().clone(), commit);
        }
        Ok(())
    }

    /// Removes the next commit from the frontier.
    pub(crate) fn pop(&mut self) -> Option<RepoCommit<R>> {
        let key = self.queue.pop()?;
        self.frontier.remove(&key.id)
    }

    /// Loads and queues the not yet visited parents of `commit`.
    pub(crate) async fn expand(&mut self, commit: &RepoCommit<R>) -> OtResult<()> {
        let fresh: Vec<R::Id> = commit
            .parents()
            .keys()
            .filter(|parent| self.visited.insert((*parent).clone()))
            .cloned()
            .collect();
        self.enqueue(&fresh).await
    }

    /// Returns the level of a queued commit.
    pub(crate) fn level_of(&self, id: &R::Id) -> Option<u64> {
        self.frontier.get(id).map(|commit| commit.level())
    }

    /// Returns the level of the commit `pop` would return.
    pub(crate) fn peek_level(&self) -> Option<u64> {
        self.queue.peek().map(|key| key.level)
    }
}

/// Error for a walk that ran out of commits.
pub(crate) fn exhausted(what: &str) -> OtError {
    OtError::IncompleteGraph(format!("walk exhausted while {what}"))
}
