//! Transform results.

use serde::{Deserialize, Serialize};

/// The side whose changes survive an irreconcilable conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictResolution {
    /// The left branch wins; the right branch's changes are discarded.
    Left,
    /// The right branch wins; the left branch's changes are discarded.
    Right,
}

impl ConflictResolution {
    /// Returns the opposite side.
    pub fn flip(self) -> Self {
        match self {
            ConflictResolution::Left => ConflictResolution::Right,
            ConflictResolution::Right => ConflictResolution::Left,
        }
    }
}

/// Outcome of transforming two diff sequences that diverge from one state.
///
/// `left` holds the left branch's changes rebased to apply after the right
/// branch, `right` holds the right branch's changes rebased to apply after
/// the left branch. For a base state `s`:
///
/// ```text
/// apply(apply(s, L), right) == apply(apply(s, R), left)
/// ```
///
/// A `resolution` other than `None` records that a conflict was resolved in
/// that direction; the losing side's conflicting changes are gone from the
/// result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformResult<D> {
    /// Direction of an auto-resolved conflict, if there was one.
    pub resolution: Option<ConflictResolution>,
    /// Left changes, to apply on top of the right branch.
    pub left: Vec<D>,
    /// Right changes, to apply on top of the left branch.
    pub right: Vec<D>,
}

impl<D> TransformResult<D> {
    /// Neither side has anything to apply.
    pub fn empty() -> Self {
        Self {
            resolution: None,
            left: Vec::new(),
            right: Vec::new(),
        }
    }

    /// A conflict-free result.
    pub fn of(left: Vec<D>, right: Vec<D>) -> Self {
        Self {
            resolution: None,
            left,
            right,
        }
    }

    /// A conflict to be resolved in favour of `resolution`.
    ///
    /// Pairwise rules return this; the sequence transform replaces it with
    /// the diffs that carry the losing side over to the winner.
    pub fn conflict(resolution: ConflictResolution) -> Self {
        Self {
            resolution: Some(resolution),
            left: Vec::new(),
            right: Vec::new(),
        }
    }

    /// A resolved conflict with explicit diffs.
    pub fn resolved(resolution: ConflictResolution, left: Vec<D>, right: Vec<D>) -> Self {
        Self {
            resolution: Some(resolution),
            left,
            right,
        }
    }

    /// Returns true if a conflict was detected.
    pub fn has_conflict(&self) -> bool {
        self.resolution.is_some()
    }

    /// Swaps the two sides.
    ///
    /// Lets a pairwise rule for `(A, B)` answer for `(B, A)` as well.
    pub fn mirror(self) -> Self {
        Self {
            resolution: self.resolution.map(ConflictResolution::flip),
            left: self.right,
            right: self.left,
        }
    }
}
