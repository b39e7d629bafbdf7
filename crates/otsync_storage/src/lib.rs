//! # OTSync Storage
//!
//! Repository implementations for otsync.
//!
//! This crate provides:
//! - [`MemoryRepository`], which keeps commits and snapshots as encoded rows
//! - Strict (optimistic concurrency) and relaxed head checks
//! - Latency and failure injection for exercising retry paths
//!
//! Rows use the persisted layout of `otsync_core`: one row per parent edge
//! and one snapshot row per commit, with diffs encoded as CBOR.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod memory;

pub use memory::{HeadCheck, MemoryRepository};
