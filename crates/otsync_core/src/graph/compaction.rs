//! History compaction.
//!
//! A compaction snapshots the state at a cut that every head passes
//! through and lets the repository drop what lies behind it.

use super::surface::Surface;
use super::walk::exhausted;
use super::OtAlgorithms;
use crate::error::OtResult;
use crate::repository::Repository;
use crate::system::OtSystem;
use tracing::{debug, info};

impl<R, S> OtAlgorithms<R, S>
where
    R: Repository,
    S: OtSystem<R::Diff>,
{
    /// Stores a snapshot and lets the repository drop older commits.
    ///
    /// The snapshot is taken at the nearest commit that `commit` and every
    /// current head pass through, which is `commit` itself when all heads
    /// descend from it. Side branches forking below `commit` move the cut
    /// down to their fork point, so replays and merges of those branches
    /// never reach a deleted commit. Returns the commit the snapshot was
    /// stored at.
    pub async fn compact(&self, commit: &R::Id) -> OtResult<R::Id> {
        let mut start = self.repo.get_heads().await?;
        start.insert(commit.clone());
        let cut = self
            .find_surface(&start, |surface: &Surface<R::Id>| {
                surface.len() == 1 && surface.is_common_cut()
            })
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| exhausted("looking for a compaction point"))?;
        if &cut != commit {
            debug!(requested = ?commit, ?cut, "compaction point moved to branch point");
        }

        let diffs = self.checkout(&cut).await?;
        let len = diffs.len();
        self.repo.save_snapshot(&cut, diffs).await?;
        self.repo.cleanup_before(&cut).await?;
        info!(commit = ?cut, diffs = len, "compacted history");
        Ok(cut)
    }
}
