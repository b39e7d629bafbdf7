//! In-memory repository.

use async_trait::async_trait;
use otsync_core::{
    Commit, CommitRow, Diff, OtError, OtResult, RepoCommit, Repository, SnapshotRow,
};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// How `push` validates the parents of an incoming commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeadCheck {
    /// Every parent must be a current head. A root is only accepted by an
    /// empty repository.
    #[default]
    Strict,
    /// Parents only need to exist, so concurrent writers create branches
    /// that are merged later.
    Relaxed,
}

#[derive(Default)]
struct Graph {
    commits: BTreeMap<u64, Vec<CommitRow<u64>>>,
    levels: BTreeMap<u64, u64>,
    snapshots: BTreeMap<u64, SnapshotRow<u64>>,
    heads: BTreeSet<u64>,
}

impl Graph {
    fn parents_of(&self, id: u64) -> impl Iterator<Item = u64> + '_ {
        self.commits
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(|row| row.parent_id)
    }

    /// Collects the stored commits reachable from `start` through parent
    /// edges, never entering `barrier`.
    fn reachable(&self, start: Vec<u64>, barrier: Option<u64>) -> BTreeSet<u64> {
        let mut seen = BTreeSet::new();
        let mut stack = start;
        while let Some(id) = stack.pop() {
            if Some(id) == barrier || !self.commits.contains_key(&id) || !seen.insert(id) {
                continue;
            }
            stack.extend(self.parents_of(id));
        }
        seen
    }
}

/// A repository that keeps encoded commit and snapshot rows in memory.
///
/// Commit ids are allocated from a counter starting at 1. Latency and
/// transient failures can be injected to exercise retry paths.
pub struct MemoryRepository<D> {
    graph: RwLock<Graph>,
    next_id: AtomicU64,
    head_check: HeadCheck,
    latency: Option<Duration>,
    available: AtomicBool,
    fail_next: AtomicU32,
    pushes: AtomicU64,
    rejected: AtomicU64,
    _diff: PhantomData<fn() -> D>,
}

impl<D> Default for MemoryRepository<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> MemoryRepository<D> {
    /// Creates an empty repository with strict head checks.
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(Graph::default()),
            next_id: AtomicU64::new(1),
            head_check: HeadCheck::Strict,
            latency: None,
            available: AtomicBool::new(true),
            fail_next: AtomicU32::new(0),
            pushes: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            _diff: PhantomData,
        }
    }

    /// Creates an empty repository with relaxed head checks.
    pub fn relaxed() -> Self {
        Self::new().with_head_check(HeadCheck::Relaxed)
    }

    /// Sets the head check policy.
    pub fn with_head_check(mut self, head_check: HeadCheck) -> Self {
        self.head_check = head_check;
        self
    }

    /// Starts id allocation at `first`.
    pub fn with_first_id(self, first: u64) -> Self {
        self.next_id.store(first, Ordering::SeqCst);
        self
    }

    /// Delays every operation by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Returns the head check policy.
    pub fn head_check(&self) -> HeadCheck {
        self.head_check
    }

    /// Makes the next `count` operations fail with
    /// [`OtError::RepositoryUnavailable`].
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Takes the repository offline or brings it back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Returns the number of accepted pushes.
    pub fn push_count(&self) -> u64 {
        self.pushes.load(Ordering::SeqCst)
    }

    /// Returns the number of rejected pushes.
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::SeqCst)
    }

    /// Returns the number of stored commits.
    pub fn commit_count(&self) -> usize {
        self.graph.read().commits.len()
    }

    /// Returns the number of stored snapshots.
    pub fn snapshot_count(&self) -> usize {
        self.graph.read().snapshots.len()
    }

    /// Returns true if the commit is stored.
    pub fn contains(&self, id: u64) -> bool {
        self.graph.read().commits.contains_key(&id)
    }

    /// Returns the raw rows of a commit.
    pub fn commit_rows(&self, id: u64) -> Option<Vec<CommitRow<u64>>> {
        self.graph.read().commits.get(&id).cloned()
    }

    async fn enter(&self, operation: &str) -> OtResult<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(OtError::RepositoryUnavailable(format!(
                "{operation}: repository offline"
            )));
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(OtError::RepositoryUnavailable(format!(
                "{operation}: injected failure"
            )));
        }
        Ok(())
    }
}

impl<D> MemoryRepository<D>
where
    D: Diff + Serialize + DeserializeOwned,
{
    fn validate(&self, graph: &Graph, commit: &Commit<u64, D>) -> OtResult<()> {
        let id = *commit.id();
        if graph.commits.contains_key(&id) {
            return Err(OtError::InvalidCommit(format!("commit {id} already exists")));
        }

        if commit.is_root() {
            if commit.level() != 0 {
                return Err(OtError::InvalidCommit(format!(
                    "root commit {id} has level {}",
                    commit.level()
                )));
            }
            if self.head_check == HeadCheck::Strict && !graph.commits.is_empty() {
                return Err(OtError::push_conflict(id));
            }
            return Ok(());
        }

        for parent in commit.parents().keys() {
            let parent_level = graph
                .levels
                .get(parent)
                .copied()
                .ok_or_else(|| OtError::not_found(parent))?;
            if commit.level() <= parent_level {
                return Err(OtError::InvalidCommit(format!(
                    "commit {id} at level {} is not above parent {parent} at level {parent_level}",
                    commit.level()
                )));
            }
        }

        if self.head_check == HeadCheck::Strict
            && !commit.parents().keys().all(|parent| graph.heads.contains(parent))
        {
            return Err(OtError::push_conflict(id));
        }
        Ok(())
    }
}

#[async_trait]
impl<D> Repository for MemoryRepository<D>
where
    D: Diff + Serialize + DeserializeOwned,
{
    type Id = u64;
    type Diff = D;

    async fn create_commit_id(&self) -> OtResult<u64> {
        self.enter("create_commit_id").await?;
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn push(&self, commit: RepoCommit<Self>) -> OtResult<()> {
        self.enter("push").await?;
        let rows = commit.to_rows()?;

        let mut graph = self.graph.write();
        if let Err(err) = self.validate(&graph, &commit) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            debug!(commit = commit.id(), error = %err, "push rejected");
            return Err(err);
        }

        let id = *commit.id();
        for parent in commit.parents().keys() {
            graph.heads.remove(parent);
        }
        graph.heads.insert(id);
        graph.levels.insert(id, commit.level());
        graph.commits.insert(id, rows);
        self.pushes.fetch_add(1, Ordering::SeqCst);
        debug!(commit = id, level = commit.level(), "push accepted");
        Ok(())
    }

    async fn get_heads(&self) -> OtResult<BTreeSet<u64>> {
        self.enter("get_heads").await?;
        Ok(self.graph.read().heads.clone())
    }

    async fn load_commit(&self, id: &u64) -> OtResult<RepoCommit<Self>> {
        self.enter("load_commit").await?;
        let rows = self
            .graph
            .read()
            .commits
            .get(id)
            .cloned()
            .ok_or_else(|| OtError::not_found(id))?;
        Commit::from_rows(&rows)
    }

    async fn load_snapshot(&self, id: &u64) -> OtResult<Option<Vec<D>>> {
        self.enter("load_snapshot").await?;
        let row = self.graph.read().snapshots.get(id).cloned();
        row.map(|row| row.decode()).transpose()
    }

    async fn save_snapshot(&self, id: &u64, diffs: Vec<D>) -> OtResult<()> {
        self.enter("save_snapshot").await?;
        let row = SnapshotRow::encode(*id, &diffs)?;

        let mut graph = self.graph.write();
        if !graph.commits.contains_key(id) {
            return Err(OtError::not_found(id));
        }
        graph.snapshots.insert(*id, row);
        Ok(())
    }

    async fn cleanup_before(&self, id: &u64) -> OtResult<()> {
        self.enter("cleanup_before").await?;

        let mut graph = self.graph.write();
        if !graph.commits.contains_key(id) {
            return Err(OtError::not_found(id));
        }

        let ancestors = graph.reachable(graph.parents_of(*id).collect(), None);
        let kept = graph.reachable(graph.heads.iter().copied().collect(), Some(*id));
        let doomed: Vec<u64> = ancestors.difference(&kept).copied().collect();
        for commit in &doomed {
            graph.commits.remove(commit);
            graph.levels.remove(commit);
            graph.snapshots.remove(commit);
        }
        info!(before = id, removed = doomed.len(), "cleaned up commits");
        Ok(())
    }
}
