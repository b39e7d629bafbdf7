//! # OTSync Core
//!
//! Commit graph model and operational transformation algorithms.
//!
//! This crate provides:
//! - The diff contract every domain diff type implements
//! - OT systems: pairwise transform rules lifted to whole diff sequences
//! - An immutable commit DAG keyed by opaque, ordered ids
//! - The repository abstraction that owns commit storage
//! - Graph algorithms: common parents, frontier search, replay, merge and
//!   snapshot compaction
//!
//! ## Architecture
//!
//! Replicas evolve by appending commits to a shared DAG. Each commit records,
//! per parent, the diffs that lead from that parent to it. When replicas
//! diverge, [`OtAlgorithms::merge`] finds their merge base, transforms the
//! divergent branches against each other and pushes a multi-parent commit
//! that reconciles them.
//!
//! ## Key Invariants
//!
//! - A root commit has no parents and level 0
//! - A commit's level is greater than the level of each of its parents
//! - `squash` is idempotent
//! - `transform` converges
//! - Merging the same heads over the same graph gives the same commit payload

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod commit;
mod diff;
mod error;
mod graph;
mod merged;
mod repository;
mod system;
mod transform;

pub use codec::{decode, decode_diffs, encode, encode_diffs, CommitRow, SnapshotRow};
pub use commit::{Commit, CommitId};
pub use diff::{concat, invert, squash, Diff};
pub use error::{OtError, OtResult};
pub use graph::{MergeResult, OtAlgorithms, ReplayBase, Surface, SurfaceEntry};
pub use merged::{MergedDiff, MergedOtSystem};
pub use repository::{RepoCommit, Repository};
pub use system::{transform_sequences, OtSystem};
pub use transform::{ConflictResolution, TransformResult};
