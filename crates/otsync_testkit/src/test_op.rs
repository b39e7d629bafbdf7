//! A counter register diff used throughout the test suites.

use otsync_core::{ConflictResolution, Diff, OtResult, OtSystem, TransformResult};
use serde::{Deserialize, Serialize};

/// Increments or overwrites an integer register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestOp {
    /// Adds a delta.
    Add(i64),
    /// Replaces `prev` with `next`.
    Set {
        /// Value before the write.
        prev: i64,
        /// Value after the write.
        next: i64,
    },
}

impl TestOp {
    /// Shorthand for [`TestOp::Set`].
    pub fn set(prev: i64, next: i64) -> Self {
        TestOp::Set { prev, next }
    }

    /// Applies the op to a register value.
    pub fn apply(&self, value: i64) -> i64 {
        match self {
            TestOp::Add(delta) => value + delta,
            TestOp::Set { next, .. } => *next,
        }
    }
}

impl Diff for TestOp {
    fn is_empty(&self) -> bool {
        match self {
            TestOp::Add(delta) => *delta == 0,
            TestOp::Set { prev, next } => prev == next,
        }
    }

    fn invert(&self) -> Vec<Self> {
        match self {
            TestOp::Add(delta) => vec![TestOp::Add(-delta)],
            TestOp::Set { prev, next } => vec![TestOp::set(*next, *prev)],
        }
    }

    fn try_squash(&self, next: &Self) -> Option<Self> {
        let squashed = match (*self, *next) {
            (TestOp::Add(a), TestOp::Add(b)) => TestOp::Add(a + b),
            (TestOp::Set { prev, .. }, TestOp::Set { next, .. }) => TestOp::set(prev, next),
            (TestOp::Add(delta), TestOp::Set { prev, next }) => TestOp::set(prev - delta, next),
            (TestOp::Set { prev, next }, TestOp::Add(delta)) => TestOp::set(prev, next + delta),
        };
        Some(squashed)
    }
}

/// Applies a sequence of ops to a register value.
pub fn apply_ops(value: i64, ops: &[TestOp]) -> i64 {
    ops.iter().fold(value, |value, op| op.apply(value))
}

/// OT rules for [`TestOp`].
///
/// Adds commute, a set overrides a concurrent add, and of two different
/// concurrent sets the one writing the greater value wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestOt;

impl OtSystem<TestOp> for TestOt {
    fn transform_one(&self, left: &TestOp, right: &TestOp) -> OtResult<TransformResult<TestOp>> {
        match (*left, *right) {
            (TestOp::Add(l), TestOp::Add(r)) => Ok(TransformResult::of(
                vec![TestOp::Add(l)],
                vec![TestOp::Add(r)],
            )),
            (TestOp::Add(delta), TestOp::Set { prev, next }) => Ok(TransformResult::of(
                Vec::new(),
                vec![TestOp::set(prev + delta, next)],
            )),
            (TestOp::Set { .. }, TestOp::Add(_)) => {
                self.transform_one(right, left).map(TransformResult::mirror)
            }
            (TestOp::Set { next: l, .. }, TestOp::Set { next: r, .. }) => {
                if l == r {
                    Ok(TransformResult::empty())
                } else if l > r {
                    Ok(TransformResult::conflict(ConflictResolution::Left))
                } else {
                    Ok(TransformResult::conflict(ConflictResolution::Right))
                }
            }
        }
    }
}
