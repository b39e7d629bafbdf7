//! Builds commit graphs with explicit ids in a memory repository.

use crate::test_op::TestOp;
use otsync_core::{Commit, Diff, OtError, OtResult, Repository};
use otsync_storage::MemoryRepository;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Declarative description of a commit graph.
///
/// Levels are derived from the edges. The repository uses relaxed head
/// checks so that several heads can coexist, and allocates fresh ids above
/// the largest declared one.
#[derive(Debug, Clone)]
pub struct GraphBuilder<D> {
    roots: BTreeSet<u64>,
    edges: BTreeMap<u64, BTreeMap<u64, Vec<D>>>,
}

impl<D> Default for GraphBuilder<D> {
    fn default() -> Self {
        Self {
            roots: BTreeSet::new(),
            edges: BTreeMap::new(),
        }
    }
}

impl<D> GraphBuilder<D>
where
    D: Diff + Serialize + DeserializeOwned,
{
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a root commit.
    pub fn root(mut self, id: u64) -> Self {
        self.roots.insert(id);
        self
    }

    /// Declares the diffs leading from `parent` to `child`.
    pub fn edge(mut self, parent: u64, child: u64, diffs: Vec<D>) -> Self {
        self.edges.entry(child).or_default().insert(parent, diffs);
        self
    }

    fn levels(&self) -> OtResult<BTreeMap<u64, u64>> {
        let mut levels: BTreeMap<u64, u64> = self.roots.iter().map(|root| (*root, 0)).collect();
        let mut pending: BTreeSet<u64> = self.edges.keys().copied().collect();

        while !pending.is_empty() {
            let ready: Vec<(u64, u64)> = pending
                .iter()
                .filter_map(|child| {
                    let parents = self.edges.get(child)?;
                    let max = parents
                        .keys()
                        .map(|parent| levels.get(parent).copied())
                        .collect::<Option<Vec<u64>>>()?
                        .into_iter()
                        .max()?;
                    Some((*child, max + 1))
                })
                .collect();
            if ready.is_empty() {
                return Err(OtError::InvalidCommit(format!(
                    "commits {pending:?} have undeclared parents or form a cycle"
                )));
            }
            for (child, level) in ready {
                pending.remove(&child);
                levels.insert(child, level);
            }
        }
        Ok(levels)
    }

    /// Pushes the graph into a fresh repository.
    pub async fn build(self) -> OtResult<Arc<MemoryRepository<D>>> {
        let levels = self.levels()?;
        let first_free = levels.keys().next_back().map_or(1, |max| max + 1);
        let repo = MemoryRepository::relaxed().with_first_id(first_free);

        let mut order: Vec<(u64, u64)> = levels.iter().map(|(id, level)| (*level, *id)).collect();
        order.sort_unstable();

        let mut edges = self.edges;
        for (level, id) in order {
            let commit = match edges.remove(&id) {
                Some(parents) => Commit::new(id, parents, level),
                None => Commit::root(id),
            };
            repo.push(commit).await?;
        }
        Ok(Arc::new(repo))
    }
}

impl GraphBuilder<TestOp> {
    /// Declares an edge carrying a single [`TestOp::Add`].
    pub fn add(self, parent: u64, child: u64, delta: i64) -> Self {
        self.edge(parent, child, vec![TestOp::Add(delta)])
    }
}

/// The two-branch diamond used by merge tests.
///
/// ```text
/// 1 -> 2 -> 4 -> 6
/// 1 -> 3 -> 4
/// 2 -> 5 -> 7
/// 3 -> 5
/// ```
///
/// Register values: 1 = 0, 2 = 1, 3 = 2, 4 = 3, 5 = 3, 6 = 13, 7 = 23.
pub fn diamond() -> GraphBuilder<TestOp> {
    GraphBuilder::new()
        .root(1)
        .add(1, 2, 1)
        .add(1, 3, 2)
        .add(2, 4, 2)
        .add(3, 4, 1)
        .add(2, 5, 2)
        .add(3, 5, 1)
        .add(4, 6, 10)
        .add(5, 7, 20)
}

/// A linear history `1 -> 2 -> ... -> len`, each step adding one.
pub fn chain(len: u64) -> GraphBuilder<TestOp> {
    (2..=len).fold(GraphBuilder::new().root(1), |builder, id| {
        builder.add(id - 1, id, 1)
    })
}
