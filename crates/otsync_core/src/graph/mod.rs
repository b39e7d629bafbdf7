//! Graph algorithms over a [`Repository`].
//!
//! Every algorithm works purely through the repository interface and an
//! OT system. None of them retries: errors surface to the caller.

mod compaction;
mod graphviz;
mod merge;
mod replay;
mod surface;
mod walk;

pub use merge::MergeResult;
pub use replay::ReplayBase;
pub use surface::{Surface, SurfaceEntry};

use crate::repository::Repository;
use crate::system::OtSystem;
use std::sync::Arc;

/// Graph algorithms bound to one repository and one OT system.
pub struct OtAlgorithms<R, S> {
    repo: Arc<R>,
    system: Arc<S>,
}

impl<R, S> OtAlgorithms<R, S>
where
    R: Repository,
    S: OtSystem<R::Diff>,
{
    /// Creates the algorithms.
    pub fn new(repo: Arc<R>, system: Arc<S>) -> Self {
        Self { repo, system }
    }

    /// Returns the repository.
    pub fn repository(&self) -> &Arc<R> {
        &self.repo
    }

    /// Returns the OT system.
    pub fn system(&self) -> &Arc<S> {
        &self.system
    }
}

impl<R, S> Clone for OtAlgorithms<R, S> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
            system: Arc::clone(&self.system),
        }
    }
}
