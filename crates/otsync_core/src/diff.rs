//! The diff contract.
//!
//! A diff is an opaque delta that moves a replica from one state to another.
//! The engine never looks inside a diff; it only needs to know whether a diff
//! is a no-op, how to undo it and whether two adjacent diffs can be folded
//! into one.

use std::fmt::Debug;

/// The minimal interface a domain diff type must satisfy.
///
/// # Invariants
///
/// - `invert` produces diffs that, applied after `self`, restore the
///   state `self` was applied to
/// - `try_squash` is a pure function: the same pair always gives the same answer
/// - a squashed diff has the same net effect as the pair it replaces
pub trait Diff: Clone + Debug + PartialEq + Send + Sync + 'static {
    /// Returns true if applying this diff leaves any state unchanged.
    fn is_empty(&self) -> bool;

    /// Returns the diffs that undo this one.
    fn invert(&self) -> Vec<Self>;

    /// Folds `self` followed by `next` into a single diff, if possible.
    fn try_squash(&self, next: &Self) -> Option<Self> {
        let _ = next;
        None
    }
}

/// Compresses a diff sequence into a shorter equivalent.
///
/// Empty diffs are dropped and adjacent diffs are folded until no adjacent
/// pair squashes any further, so `squash(&squash(x)) == squash(x)`.
pub fn squash<D: Diff>(diffs: &[D]) -> Vec<D> {
    let mut result: Vec<D> = Vec::with_capacity(diffs.len());
    for diff in diffs {
        if diff.is_empty() {
            continue;
        }
        push_squashed(&mut result, diff.clone());
    }
    result
}

fn push_squashed<D: Diff>(stack: &mut Vec<D>, mut diff: D) {
    loop {
        let folded = match stack.last() {
            Some(top) => top.try_squash(&diff),
            None => None,
        };
        match folded {
            Some(folded) => {
                stack.pop();
                if folded.is_empty() {
                    return;
                }
                diff = folded;
            }
            None => {
                stack.push(diff);
                return;
            }
        }
    }
}

/// Returns the sequence that undoes `diffs`: each diff inverted, in reverse order.
pub fn invert<D: Diff>(diffs: &[D]) -> Vec<D> {
    diffs.iter().rev().flat_map(Diff::invert).collect()
}

/// Concatenates two diff sequences.
pub fn concat<D: Clone>(first: &[D], second: &[D]) -> Vec<D> {
    let mut result = Vec::with_capacity(first.len() + second.len());
    result.extend_from_slice(first);
    result.extend_from_slice(second);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Op {
        Add(i64),
        Mark(&'static str),
        Toggle,
    }

    impl Diff for Op {
        fn is_empty(&self) -> bool {
            matches!(self, Op::Add(0))
        }

        fn invert(&self) -> Vec<Self> {
            match self {
                Op::Add(delta) => vec![Op::Add(-delta)],
                Op::Mark(name) => vec![Op::Mark(*name)],
                Op::Toggle => vec![Op::Toggle],
            }
        }

        fn try_squash(&self, next: &Self) -> Option<Self> {
            match (self, next) {
                (Op::Add(a), Op::Add(b)) => Some(Op::Add(a + b)),
                (Op::Toggle, Op::Toggle) => Some(Op::Add(0)),
                _ => None,
            }
        }
    }

    #[test]
    fn squash_folds_adjacent() {
        let squashed = squash(&[Op::Add(1), Op::Add(2), Op::Mark("x"), Op::Add(3)]);
        assert_eq!(squashed, vec![Op::Add(3), Op::Mark("x"), Op::Add(3)]);
    }

    #[test]
    fn squash_drops_cancelled_pairs() {
        let squashed = squash(&[Op::Add(5), Op::Add(-5)]);
        assert!(squashed.is_empty());
    }

    #[test]
    fn squash_refolds_after_cancellation() {
        // The toggles cancel, which exposes Add(1) to Add(2).
        let diffs = [Op::Add(1), Op::Toggle, Op::Toggle, Op::Add(2)];
        assert_eq!(squash(&diffs), vec![Op::Add(3)]);

        let diffs = [Op::Add(1), Op::Mark("m"), Op::Add(2)];
        let once = squash(&diffs);
        assert_eq!(squash(&once), once);
    }

    #[test]
    fn squash_is_idempotent_with_empties_between() {
        let diffs = [Op::Add(1), Op::Add(0), Op::Add(2)];
        let once = squash(&diffs);
        assert_eq!(once, vec![Op::Add(3)]);
        assert_eq!(squash(&once), once);
    }

    #[test]
    fn invert_reverses_order() {
        let inverted = invert(&[Op::Add(1), Op::Mark("a"), Op::Add(2)]);
        assert_eq!(inverted, vec![Op::Add(-2), Op::Mark("a"), Op::Add(-1)]);
    }

    #[test]
    fn concat_keeps_order() {
        assert_eq!(concat(&[1, 2], &[3]), vec![1, 2, 3]);
    }
}
