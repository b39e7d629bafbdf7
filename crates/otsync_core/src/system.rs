//! The OT system contract and its default sequence transform.

use crate::diff::{self, Diff};
use crate::error::OtResult;
use crate::transform::{ConflictResolution, TransformResult};

/// Per-diff-type policy: how divergent changes are reconciled.
///
/// Implementors supply `transform_one`, the rule for a single pair of
/// diffs. The provided `transform` lifts it to whole sequences and resolves
/// any conflict a pairwise rule reports. Squash, invert and the emptiness
/// test default to the [`Diff`] contract.
///
/// # Invariants
///
/// - `transform` converges: `apply(apply(s, L), right) == apply(apply(s, R), left)`
/// - `squash(&squash(x)) == squash(x)`
/// - results are deterministic for the same inputs
///
/// Tie-break rules for conflicts belong to the concrete system.
pub trait OtSystem<D: Diff>: Send + Sync {
    /// Transforms one left diff against one right diff from the same state.
    ///
    /// May return [`TransformResult::conflict`] to request resolution of the
    /// enclosing sequences in one direction.
    fn transform_one(&self, left: &D, right: &D) -> OtResult<TransformResult<D>>;

    /// Transforms two diverging diff sequences.
    fn transform(&self, left: &[D], right: &[D]) -> OtResult<TransformResult<D>> {
        transform_sequences(self, left, right)
    }

    /// Compresses a diff sequence.
    fn squash(&self, diffs: &[D]) -> Vec<D> {
        diff::squash(diffs)
    }

    /// Produces the sequence undoing `diffs`.
    fn invert(&self, diffs: &[D]) -> Vec<D> {
        diff::invert(diffs)
    }

    /// Returns true if `diff` is a no-op.
    fn is_empty(&self, diff: &D) -> bool {
        diff.is_empty()
    }
}

/// Default sequence transform built on [`OtSystem::transform_one`].
///
/// Walks both sequences pairwise. If any pair conflicts the whole
/// transform resolves in the reported direction: the losing side undoes its
/// own changes and replays the winner's.
pub fn transform_sequences<D, S>(system: &S, left: &[D], right: &[D]) -> OtResult<TransformResult<D>>
where
    D: Diff,
    S: OtSystem<D> + ?Sized,
{
    let result = transform_pairwise(system, left, right)?;
    match result.resolution {
        None => Ok(result),
        Some(resolution) => Ok(resolve_conflict(system, resolution, left, right)),
    }
}

fn resolve_conflict<D, S>(
    system: &S,
    resolution: ConflictResolution,
    left: &[D],
    right: &[D],
) -> TransformResult<D>
where
    D: Diff,
    S: OtSystem<D> + ?Sized,
{
    match resolution {
        ConflictResolution::Left => {
            let carry = diff::concat(&system.invert(right), left);
            TransformResult::resolved(resolution, system.squash(&carry), Vec::new())
        }
        ConflictResolution::Right => {
            let carry = diff::concat(&system.invert(left), right);
            TransformResult::resolved(resolution, Vec::new(), system.squash(&carry))
        }
    }
}

fn transform_pairwise<D, S>(system: &S, left: &[D], right: &[D]) -> OtResult<TransformResult<D>>
where
    D: Diff,
    S: OtSystem<D> + ?Sized,
{
    if left.is_empty() && right.is_empty() {
        return Ok(TransformResult::empty());
    }
    if left.is_empty() {
        return Ok(TransformResult::of(Vec::new(), right.to_vec()));
    }
    if right.is_empty() {
        return Ok(TransformResult::of(left.to_vec(), Vec::new()));
    }

    if left.len() == 1 {
        let first = system.transform_one(&left[0], &right[0])?;
        if first.has_conflict() {
            return Ok(first);
        }
        // first.left now starts where right[0] ended.
        let rest = transform_pairwise(system, &first.left, &right[1..])?;
        if rest.has_conflict() {
            return Ok(rest);
        }
        return Ok(TransformResult::of(
            rest.left,
            diff::concat(&first.right, &rest.right),
        ));
    }

    let first = transform_pairwise(system, &left[..1], right)?;
    if first.has_conflict() {
        return Ok(first);
    }
    let rest = transform_pairwise(system, &left[1..], &first.right)?;
    if rest.has_conflict() {
        return Ok(rest);
    }
    Ok(TransformResult::of(
        diff::concat(&first.left, &rest.left),
        rest.right,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OtError;

    /// A register that is either incremented or overwritten.
    #[derive(Debug, Clone, PartialEq)]
    enum Op {
        Add(i64),
        Set { prev: i64, next: i64 },
        Opaque,
    }

    impl Diff for Op {
        fn is_empty(&self) -> bool {
            match self {
                Op::Add(delta) => *delta == 0,
                Op::Set { prev, next } => prev == next,
                Op::Opaque => false,
            }
        }

        fn invert(&self) -> Vec<Self> {
            match self {
                Op::Add(delta) => vec![Op::Add(-delta)],
                Op::Set { prev, next } => vec![Op::Set {
                    prev: *next,
                    next: *prev,
                }],
                Op::Opaque => vec![Op::Opaque],
            }
        }

        fn try_squash(&self, next: &Self) -> Option<Self> {
            match (self, next) {
                (Op::Add(a), Op::Add(b)) => Some(Op::Add(a + b)),
                (Op::Set { prev, .. }, Op::Set { next, .. }) => Some(Op::Set {
                    prev: *prev,
                    next: *next,
                }),
                _ => None,
            }
        }
    }

    struct RegisterOt;

    impl OtSystem<Op> for RegisterOt {
        fn transform_one(&self, left: &Op, right: &Op) -> OtResult<TransformResult<Op>> {
            match (left, right) {
                (Op::Add(l), Op::Add(r)) => Ok(TransformResult::of(
                    vec![Op::Add(*l)],
                    vec![Op::Add(*r)],
                )),
                (Op::Add(l), Op::Set { prev, next }) => Ok(TransformResult::of(
                    Vec::new(),
                    vec![Op::Set {
                        prev: prev + l,
                        next: *next,
                    }],
                )),
                (Op::Set { .. }, Op::Add(_)) => {
                    self.transform_one(right, left).map(TransformResult::mirror)
                }
                (Op::Set { next: l, .. }, Op::Set { next: r, .. }) => {
                    if l == r {
                        Ok(TransformResult::empty())
                    } else if l > r {
                        Ok(TransformResult::conflict(ConflictResolution::Left))
                    } else {
                        Ok(TransformResult::conflict(ConflictResolution::Right))
                    }
                }
                _ => Err(OtError::Transform(format!("{left:?} vs {right:?}"))),
            }
        }
    }

    fn apply(mut value: i64, ops: &[Op]) -> i64 {
        for op in ops {
            match op {
                Op::Add(delta) => value += delta,
                Op::Set { prev, next } => {
                    assert_eq!(value, *prev, "set applied to the wrong state");
                    value = *next;
                }
                Op::Opaque => {}
            }
        }
        value
    }

    fn assert_converges(base: i64, left: &[Op], right: &[Op]) -> TransformResult<Op> {
        let result = RegisterOt.transform(left, right).unwrap();
        let via_left = apply(apply(base, left), &result.right);
        let via_right = apply(apply(base, right), &result.left);
        assert_eq!(via_left, via_right);
        result
    }

    #[test]
    fn empty_sides_pass_through() {
        let result = assert_converges(0, &[], &[Op::Add(2)]);
        assert!(result.left.is_empty());
        assert_eq!(result.right, vec![Op::Add(2)]);

        let result = assert_converges(0, &[Op::Add(3)], &[]);
        assert_eq!(result.left, vec![Op::Add(3)]);
        assert!(result.right.is_empty());
    }

    #[test]
    fn adds_commute() {
        let result = assert_converges(10, &[Op::Add(1), Op::Add(2)], &[Op::Add(5)]);
        assert!(!result.has_conflict());
    }

    #[test]
    fn set_overrides_add() {
        let result = assert_converges(
            1,
            &[Op::Add(4)],
            &[Op::Set { prev: 1, next: 9 }, Op::Add(1)],
        );
        assert!(result.left.is_empty());
        assert_eq!(apply(5, &result.right), 10);
    }

    #[test]
    fn conflicting_sets_resolve_towards_winner() {
        let left = [Op::Add(1), Op::Set { prev: 1, next: 7 }];
        let right = [Op::Set { prev: 0, next: 3 }];

        let result = assert_converges(0, &left, &right);
        assert_eq!(result.resolution, Some(ConflictResolution::Left));
        assert!(result.right.is_empty());
        assert_eq!(apply(3, &result.left), 7);

        let result = assert_converges(0, &right, &left);
        assert_eq!(result.resolution, Some(ConflictResolution::Right));
        assert!(result.left.is_empty());
    }

    #[test]
    fn missing_rule_is_an_error() {
        let result = RegisterOt.transform(&[Op::Opaque], &[Op::Add(1)]);
        assert!(matches!(result, Err(OtError::Transform(_))));
    }
}
