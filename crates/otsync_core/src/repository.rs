//! Repository abstraction.
//!
//! The repository is the sole owner of commit storage. Graph algorithms and
//! state managers reach it only through this trait.

use crate::commit::{Commit, CommitId};
use crate::error::OtResult;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// A commit as stored by repository `R`.
pub type RepoCommit<R> = Commit<<R as Repository>::Id, <R as Repository>::Diff>;

/// Persistent store of the commit graph.
///
/// Implementations must guarantee:
///
/// - `push` is atomic and rejects a commit whose stated parents are no
///   longer heads with [`OtError::PushConflict`](crate::OtError::PushConflict)
/// - `get_heads` and `load_commit` reflect a consistent view of the graph
///   at call time
/// - transient I/O failures surface as
///   [`OtError::RepositoryUnavailable`](crate::OtError::RepositoryUnavailable)
///
/// Compactions targeting overlapping ranges are serialized by the
/// implementation.
#[async_trait]
pub trait Repository: Send + Sync + 'static {
    /// Commit identifier.
    type Id: CommitId;
    /// Diff payload.
    type Diff: crate::diff::Diff;

    /// Allocates a fresh commit id.
    async fn create_commit_id(&self) -> OtResult<Self::Id>;

    /// Appends a commit to the graph.
    async fn push(&self, commit: RepoCommit<Self>) -> OtResult<()>;

    /// Returns the commits that have no children.
    async fn get_heads(&self) -> OtResult<BTreeSet<Self::Id>>;

    /// Loads a commit by id.
    async fn load_commit(&self, id: &Self::Id) -> OtResult<RepoCommit<Self>>;

    /// Loads the snapshot stored for a commit, if any.
    async fn load_snapshot(&self, id: &Self::Id) -> OtResult<Option<Vec<Self::Diff>>>;

    /// Stores the squashed diffs from a root to `id`.
    async fn save_snapshot(&self, id: &Self::Id, diffs: Vec<Self::Diff>) -> OtResult<()>;

    /// Deletes the ancestors of `id` that no head reaches without passing
    /// through `id`, together with their snapshots.
    ///
    /// Callers store a snapshot at `id` first so replays stop there.
    async fn cleanup_before(&self, id: &Self::Id) -> OtResult<()>;
}
