//! Composite OT system over two independent diff streams.

use crate::diff::{self, Diff};
use crate::error::OtResult;
use crate::system::OtSystem;
use crate::transform::TransformResult;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// A diff made of two independent sub-diff sequences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedDiff<A, B> {
    /// Changes to the first component.
    pub first: Vec<A>,
    /// Changes to the second component.
    pub second: Vec<B>,
}

impl<A, B> MergedDiff<A, B> {
    /// Creates a merged diff.
    pub fn new(first: Vec<A>, second: Vec<B>) -> Self {
        Self { first, second }
    }

    /// A diff touching only the first component.
    pub fn first(diffs: Vec<A>) -> Self {
        Self {
            first: diffs,
            second: Vec::new(),
        }
    }

    /// A diff touching only the second component.
    pub fn second(diffs: Vec<B>) -> Self {
        Self {
            first: Vec::new(),
            second: diffs,
        }
    }
}

impl<A: Diff, B: Diff> Diff for MergedDiff<A, B> {
    fn is_empty(&self) -> bool {
        self.first.iter().all(Diff::is_empty) && self.second.iter().all(Diff::is_empty)
    }

    fn invert(&self) -> Vec<Self> {
        vec![MergedDiff {
            first: diff::invert(&self.first),
            second: diff::invert(&self.second),
        }]
    }

    fn try_squash(&self, next: &Self) -> Option<Self> {
        Some(MergedDiff {
            first: diff::squash(&diff::concat(&self.first, &next.first)),
            second: diff::squash(&diff::concat(&self.second, &next.second)),
        })
    }
}

/// Transforms each component of a [`MergedDiff`] with its own system.
///
/// A conflict in one component is resolved inside that component and does
/// not discard the other component's changes. The composite result reports
/// the resolution of the first component that had one, so callers still see
/// that a conflict happened, while its diffs stay per component.
pub struct MergedOtSystem<A, B, S1, S2> {
    first: S1,
    second: S2,
    _diffs: PhantomData<fn() -> (A, B)>,
}

impl<A, B, S1, S2> MergedOtSystem<A, B, S1, S2> {
    /// Combines two systems.
    pub fn new(first: S1, second: S2) -> Self {
        Self {
            first,
            second,
            _diffs: PhantomData,
        }
    }
}

impl<A, B, S1, S2> MergedOtSystem<A, B, S1, S2>
where
    A: Diff,
    B: Diff,
{
    fn split(diffs: &[MergedDiff<A, B>]) -> (Vec<A>, Vec<B>) {
        let mut first = Vec::new();
        let mut second = Vec::new();
        for diff in diffs {
            first.extend_from_slice(&diff.first);
            second.extend_from_slice(&diff.second);
        }
        (first, second)
    }

    fn join(first: Vec<A>, second: Vec<B>) -> Vec<MergedDiff<A, B>> {
        let merged = MergedDiff { first, second };
        if Diff::is_empty(&merged) {
            Vec::new()
        } else {
            vec![merged]
        }
    }
}

impl<A, B, S1, S2> OtSystem<MergedDiff<A, B>> for MergedOtSystem<A, B, S1, S2>
where
    A: Diff,
    B: Diff,
    S1: OtSystem<A>,
    S2: OtSystem<B>,
{
    fn transform_one(
        &self,
        left: &MergedDiff<A, B>,
        right: &MergedDiff<A, B>,
    ) -> OtResult<TransformResult<MergedDiff<A, B>>> {
        self.transform(std::slice::from_ref(left), std::slice::from_ref(right))
    }

    fn transform(
        &self,
        left: &[MergedDiff<A, B>],
        right: &[MergedDiff<A, B>],
    ) -> OtResult<TransformResult<MergedDiff<A, B>>> {
        let (left_first, left_second) = Self::split(left);
        let (right_first, right_second) = Self::split(right);

        let first = self.first.transform(&left_first, &right_first)?;
        let second = self.second.transform(&left_second, &right_second)?;

        let left = Self::join(first.left, second.left);
        let right = Self::join(first.right, second.right);
        Ok(match first.resolution.or(second.resolution) {
            Some(resolution) => TransformResult::resolved(resolution, left, right),
            None => TransformResult::of(left, right),
        })
    }

    fn squash(&self, diffs: &[MergedDiff<A, B>]) -> Vec<MergedDiff<A, B>> {
        let (first, second) = Self::split(diffs);
        Self::join(self.first.squash(&first), self.second.squash(&second))
    }

    fn invert(&self, diffs: &[MergedDiff<A, B>]) -> Vec<MergedDiff<A, B>> {
        let (first, second) = Self::split(diffs);
        Self::join(self.first.invert(&first), self.second.invert(&second))
    }
}
