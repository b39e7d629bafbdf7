//! History replay.

use super::walk::{exhausted, Walk};
use super::OtAlgorithms;
use crate::diff;
use crate::error::{OtError, OtResult};
use crate::repository::Repository;
use crate::system::OtSystem;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Where a replay starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayBase<K> {
    /// The nearest snapshot or root below the target.
    Root,
    /// A specific ancestor of the target.
    Commit(K),
}

impl<R, S> OtAlgorithms<R, S>
where
    R: Repository,
    S: OtSystem<R::Diff>,
{
    /// Returns the squashed diffs leading from `base` to `target`.
    ///
    /// With [`ReplayBase::Root`] the walk stops at the first commit that
    /// either has a stored snapshot (which is prepended) or is a root. With
    /// [`ReplayBase::Commit`] the base must be an ancestor of `target`,
    /// otherwise [`OtError::DivergedHistory`] is returned.
    pub async fn load_all_changes(
        &self,
        base: &ReplayBase<R::Id>,
        target: &R::Id,
    ) -> OtResult<Vec<R::Diff>> {
        let base_level = match base {
            ReplayBase::Root => None,
            ReplayBase::Commit(id) if id == target => return Ok(Vec::new()),
            ReplayBase::Commit(id) => Some(self.repo.load_commit(id).await?.level()),
        };

        let mut walk = Walk::start(self.repo.as_ref(), &BTreeSet::from([target.clone()])).await?;
        // Diffs from each frontier commit up to the target.
        let mut pending: HashMap<R::Id, Vec<R::Diff>> = HashMap::new();
        pending.insert(target.clone(), Vec::new());

        loop {
            if let (ReplayBase::Commit(id), Some(level)) = (base, base_level) {
                if walk.peek_level().map_or(true, |next| next < level) {
                    return Err(OtError::diverged(id, target));
                }
            }

            let commit = walk
                .pop()
                .ok_or_else(|| exhausted("looking for a snapshot or root"))?;
            let changes = pending.remove(commit.id()).unwrap_or_default();

            match base {
                ReplayBase::Commit(id) if id == commit.id() => return Ok(changes),
                ReplayBase::Commit(_) => {}
                ReplayBase::Root => {
                    if let Some(snapshot) = self.repo.load_snapshot(commit.id()).await? {
                        debug!(commit = ?commit.id(), "replaying from snapshot");
                        return Ok(self.system.squash(&diff::concat(&snapshot, &changes)));
                    }
                    if commit.is_root() {
                        return Ok(changes);
                    }
                }
            }

            walk.expand(&commit).await?;
            for (parent, diffs) in commit.parents() {
                pending
                    .entry(parent.clone())
                    .or_insert_with(|| self.system.squash(&diff::concat(diffs, &changes)));
            }
        }
    }

    /// Returns the diffs that build the state of `head` from scratch.
    pub async fn checkout(&self, head: &R::Id) -> OtResult<Vec<R::Diff>> {
        self.load_all_changes(&ReplayBase::Root, head).await
    }
}
