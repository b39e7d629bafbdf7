//! Property-based test generators using proptest.
//!
//! Op sequences are generated relative to a base register value so that
//! every `Set` states the value it actually overwrites.

use crate::graph_builder::GraphBuilder;
use crate::log_diff::{Chunk, LogDiff};
use crate::test_op::TestOp;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum RawOp {
    Add(i64),
    Set(i64),
}

fn raw_op_strategy() -> impl Strategy<Value = RawOp> {
    prop_oneof![
        3 => (-20i64..20).prop_map(RawOp::Add),
        1 => (-50i64..50).prop_map(RawOp::Set),
    ]
}

fn resolve(base: i64, raw: Vec<RawOp>) -> Vec<TestOp> {
    let mut value = base;
    raw.into_iter()
        .map(|raw| {
            let op = match raw {
                RawOp::Add(delta) => TestOp::Add(delta),
                RawOp::Set(next) => TestOp::set(value, next),
            };
            value = op.apply(value);
            op
        })
        .collect()
}

/// Strategy for a base value and a valid op sequence starting from it.
pub fn test_ops_strategy(max_len: usize) -> impl Strategy<Value = (i64, Vec<TestOp>)> {
    (
        -100i64..100,
        prop::collection::vec(raw_op_strategy(), 0..=max_len),
    )
        .prop_map(|(base, raw)| (base, resolve(base, raw)))
}

/// Strategy for a base value and two sequences diverging from it.
pub fn divergent_ops_strategy(
    max_len: usize,
) -> impl Strategy<Value = (i64, Vec<TestOp>, Vec<TestOp>)> {
    (
        -100i64..100,
        prop::collection::vec(raw_op_strategy(), 0..=max_len),
        prop::collection::vec(raw_op_strategy(), 0..=max_len),
    )
        .prop_map(|(base, left, right)| (base, resolve(base, left), resolve(base, right)))
}

/// Strategy for a single log diff over a small set of logs and chunk ids.
pub fn log_diff_strategy() -> impl Strategy<Value = LogDiff> {
    (
        prop::sample::select(vec!["clicks", "views", "errors"]),
        0u64..50,
        0u64..50,
        prop::collection::vec((1u64..6, 0i64..100, 1u64..40), 0..3),
    )
        .prop_map(|(log, from, len, chunks)| {
            let chunks = chunks
                .into_iter()
                .map(|(id, min_key, count)| Chunk::new(id, min_key, min_key + count as i64, count));
            LogDiff::advance(log, from, from + len, chunks)
        })
}

/// A random commit DAG whose edges carry register diffs.
///
/// Every commit has a register value; each edge adds the difference between
/// the child's and the parent's value, so all paths to a commit agree.
#[derive(Debug, Clone)]
pub struct DagSpec {
    /// Register value per commit, indexed by `id - 1`.
    pub values: Vec<i64>,
    /// Parent ids per commit, indexed by `id - 1`. Empty for the root.
    pub parents: Vec<Vec<u64>>,
}

impl DagSpec {
    /// Returns the register value of a commit.
    pub fn value(&self, id: u64) -> i64 {
        self.values[(id - 1) as usize]
    }

    /// Returns the commit ids.
    pub fn ids(&self) -> impl Iterator<Item = u64> {
        1..=self.values.len() as u64
    }

    /// Returns a builder for the graph.
    pub fn builder(&self) -> GraphBuilder<TestOp> {
        self.ids().fold(GraphBuilder::new().root(1), |builder, id| {
            self.parents[(id - 1) as usize]
                .iter()
                .fold(builder, |builder, parent| {
                    builder.add(*parent, id, self.value(id) - self.value(*parent))
                })
        })
    }
}

/// Strategy for a rooted DAG of up to `max_commits` commits.
///
/// Commit `1` is the root. Every later commit picks one or two parents
/// among the commits before it.
pub fn dag_strategy(max_commits: usize) -> impl Strategy<Value = DagSpec> {
    prop::collection::vec(
        (-100i64..100, any::<prop::sample::Index>(), any::<prop::sample::Index>(), any::<bool>()),
        1..max_commits.max(2),
    )
    .prop_map(|nodes| {
        let mut values = vec![0];
        let mut parents = vec![Vec::new()];
        for (i, (value, first, second, is_merge)) in nodes.into_iter().enumerate() {
            let existing = i + 1;
            let mut picked = vec![first.index(existing) as u64 + 1];
            let other = second.index(existing) as u64 + 1;
            if is_merge && !picked.contains(&other) {
                picked.push(other);
            }
            values.push(value);
            parents.push(picked);
        }
        DagSpec { values, parents }
    })
}
