//! CLI command implementations.

pub mod graph;
pub mod simulate;
