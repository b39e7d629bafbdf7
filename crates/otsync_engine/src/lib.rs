//! # otsync Engine
//!
//! Live replica management on top of the otsync commit graph.
//!
//! This crate provides:
//! - `OtStateManager`, which keeps one replica in sync with a repository
//! - The `OtState` contract for application state driven by diffs
//! - Pluggable push retry policies with exponential backoff
//! - Poll mode for read-mostly replicas
//!
//! ## Architecture
//!
//! A manager owns one replica. Local diffs are applied to it at once and
//! queued; `commit` turns the queue into a candidate commit on top of the
//! current revision and `push` sends it. When another writer moved the
//! repository first, the manager fetches the new head, merging several
//! heads when needed, rebases its candidate and local diffs through the
//! OT system and retries.
//!
//! ## Key Invariants
//!
//! - The replica equals its revision plus the candidate plus the working diffs
//! - At most one push is in flight per manager; concurrent callers share it
//! - Only the push loop retries; graph algorithms surface every error
//! - Closing aborts in-flight work without rolling back applied diffs

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod state;

pub use config::{RetryConfig, RetryPolicy, StateManagerConfig};
pub use state::{ManagerPhase, OtState, OtStateManager, SyncStats};
