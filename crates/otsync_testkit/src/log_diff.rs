//! Log processing diffs: consumed log positions plus the chunks produced
//! from them.

use otsync_core::{ConflictResolution, Diff, OtResult, OtSystem, TransformResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Movement of one log's read position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionDiff {
    /// Position before.
    pub from: u64,
    /// Position after.
    pub to: u64,
}

impl PositionDiff {
    /// Creates a position diff.
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    /// Returns true if the position does not move.
    pub fn is_empty(&self) -> bool {
        self.from == self.to
    }

    /// Returns the reverse movement.
    pub fn inverse(&self) -> Self {
        Self {
            from: self.to,
            to: self.from,
        }
    }
}

/// An aggregated chunk of log records.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk id.
    pub id: u64,
    /// Smallest key in the chunk.
    pub min_key: i64,
    /// Largest key in the chunk.
    pub max_key: i64,
    /// Number of records.
    pub count: u64,
}

impl Chunk {
    /// Creates a chunk.
    pub fn new(id: u64, min_key: i64, max_key: i64, count: u64) -> Self {
        Self {
            id,
            min_key,
            max_key,
            count,
        }
    }
}

/// Chunks added and removed by one change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDiff {
    /// Chunks that appear.
    pub added: BTreeSet<Chunk>,
    /// Chunks that disappear.
    pub removed: BTreeSet<Chunk>,
}

impl ChunkDiff {
    /// Returns true if no chunk changes.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Swaps added and removed.
    pub fn inverse(&self) -> Self {
        Self {
            added: self.removed.clone(),
            removed: self.added.clone(),
        }
    }

    /// Composes `self` followed by `next`.
    pub fn then(&self, next: &ChunkDiff) -> ChunkDiff {
        let added = self
            .added
            .difference(&next.removed)
            .chain(next.added.difference(&self.removed))
            .cloned()
            .collect();
        let removed = self
            .removed
            .difference(&next.added)
            .chain(next.removed.difference(&self.added))
            .cloned()
            .collect();
        ChunkDiff { added, removed }
    }

    /// Returns the part of `self` not already done by `other`.
    fn without(&self, other: &ChunkDiff) -> ChunkDiff {
        ChunkDiff {
            added: self.added.difference(&other.added).cloned().collect(),
            removed: self.removed.difference(&other.removed).cloned().collect(),
        }
    }

    fn added_ids(&self) -> BTreeMap<u64, &Chunk> {
        self.added.iter().map(|chunk| (chunk.id, chunk)).collect()
    }
}

/// Read positions of several logs together with the chunks produced from
/// the records between them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogDiff {
    /// Position movement per log name.
    pub positions: BTreeMap<String, PositionDiff>,
    /// Chunk changes.
    pub chunks: ChunkDiff,
}

impl LogDiff {
    /// Creates a diff moving one log and adding chunks.
    pub fn advance(log: &str, from: u64, to: u64, added: impl IntoIterator<Item = Chunk>) -> Self {
        let mut positions = BTreeMap::new();
        positions.insert(log.to_string(), PositionDiff::new(from, to));
        Self {
            positions,
            chunks: ChunkDiff {
                added: added.into_iter().collect(),
                removed: BTreeSet::new(),
            },
        }
    }
}

impl Diff for LogDiff {
    fn is_empty(&self) -> bool {
        self.positions.values().all(PositionDiff::is_empty) && self.chunks.is_empty()
    }

    fn invert(&self) -> Vec<Self> {
        vec![LogDiff {
            positions: self
                .positions
                .iter()
                .map(|(log, diff)| (log.clone(), diff.inverse()))
                .collect(),
            chunks: self.chunks.inverse(),
        }]
    }

    fn try_squash(&self, next: &Self) -> Option<Self> {
        let mut positions = self.positions.clone();
        for (log, diff) in &next.positions {
            let merged = match positions.get(log) {
                Some(prev) => PositionDiff::new(prev.from, diff.to),
                None => *diff,
            };
            positions.insert(log.clone(), merged);
        }
        positions.retain(|_, diff| !diff.is_empty());
        Some(LogDiff {
            positions,
            chunks: self.chunks.then(&next.chunks),
        })
    }
}

/// OT rules for [`LogDiff`].
///
/// Two diffs moving the same log to different positions conflict, as do two
/// diffs adding different chunks under the same id. The side that is ahead
/// on more of the shared logs wins; `prefer_on_tie` decides otherwise.
#[derive(Debug, Clone, Copy)]
pub struct LogOt {
    prefer_on_tie: ConflictResolution,
}

impl Default for LogOt {
    fn default() -> Self {
        Self {
            prefer_on_tie: ConflictResolution::Right,
        }
    }
}

impl LogOt {
    /// Creates the system with the default tie-break.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the winner of a conflict that positions do not decide.
    pub fn with_prefer_on_tie(mut self, prefer_on_tie: ConflictResolution) -> Self {
        self.prefer_on_tie = prefer_on_tie;
        self
    }

    fn winner(&self, left: &LogDiff, right: &LogDiff) -> Option<ConflictResolution> {
        let mut left_ahead = 0usize;
        let mut right_ahead = 0usize;
        for (log, l) in &left.positions {
            if let Some(r) = right.positions.get(log) {
                if l.to > r.to {
                    left_ahead += 1;
                } else if l.to < r.to {
                    right_ahead += 1;
                }
            }
        }

        let left_chunks = left.chunks.added_ids();
        let chunks_collide = right
            .chunks
            .added_ids()
            .iter()
            .any(|(id, chunk)| left_chunks.get(id).is_some_and(|other| other != chunk));

        if left_ahead == 0 && right_ahead == 0 && !chunks_collide {
            return None;
        }
        Some(match left_ahead.cmp(&right_ahead) {
            std::cmp::Ordering::Greater => ConflictResolution::Left,
            std::cmp::Ordering::Less => ConflictResolution::Right,
            std::cmp::Ordering::Equal => self.prefer_on_tie,
        })
    }
}

impl OtSystem<LogDiff> for LogOt {
    fn transform_one(&self, left: &LogDiff, right: &LogDiff) -> OtResult<TransformResult<LogDiff>> {
        if let Some(resolution) = self.winner(left, right) {
            return Ok(TransformResult::conflict(resolution));
        }

        let only = |diff: &LogDiff, other: &LogDiff| LogDiff {
            positions: diff
                .positions
                .iter()
                .filter(|(log, _)| !other.positions.contains_key(*log))
                .map(|(log, position)| (log.clone(), *position))
                .collect(),
            chunks: diff.chunks.without(&other.chunks),
        };
        let rebased_left = only(left, right);
        let rebased_right = only(right, left);

        let keep = |diff: LogDiff| if Diff::is_empty(&diff) { Vec::new() } else { vec![diff] };
        Ok(TransformResult::of(keep(rebased_left), keep(rebased_right)))
    }
}

/// Materialized log processing state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogState {
    /// Current position per log.
    pub positions: BTreeMap<String, u64>,
    /// Live chunks.
    pub chunks: BTreeSet<Chunk>,
}

impl LogState {
    /// Applies a diff.
    pub fn apply(&mut self, diff: &LogDiff) {
        for (log, position) in &diff.positions {
            self.positions.insert(log.clone(), position.to);
        }
        for chunk in &diff.chunks.removed {
            self.chunks.remove(chunk);
        }
        self.chunks.extend(diff.chunks.added.iter().cloned());
    }

    /// Applies a diff sequence.
    pub fn apply_all(&mut self, diffs: &[LogDiff]) {
        for diff in diffs {
            self.apply(diff);
        }
    }
}
