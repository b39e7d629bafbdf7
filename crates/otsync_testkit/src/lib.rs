//! # OTSync Testkit
//!
//! Test utilities for otsync.
//!
//! This crate provides:
//! - [`TestOp`], a counter register diff with add and set operations
//! - [`LogDiff`], log positions plus produced chunks, with a configurable
//!   conflict tie-break
//! - [`GraphBuilder`] and ready-made graphs for merge tests
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use otsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn merge_diamond() {
//!     let repo = diamond().build().await.unwrap();
//!     let algorithms = OtAlgorithms::new(repo, Arc::new(TestOt));
//!     // ...
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod generators;
pub mod graph_builder;
pub mod log_diff;
pub mod test_op;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::generators::*;
    pub use crate::graph_builder::*;
    pub use crate::log_diff::*;
    pub use crate::test_op::*;
}

pub use generators::*;
pub use graph_builder::*;
pub use log_diff::*;
pub use test_op::*;
