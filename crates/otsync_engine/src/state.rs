//! Replica state manager.

use crate::config::StateManagerConfig;
use futures::future::{self, AbortHandle, BoxFuture, FutureExt, Shared};
use otsync_core::{
    concat, Commit, OtAlgorithms, OtError, OtResult, OtSystem, RepoCommit, ReplayBase,
    Repository,
};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Application state driven by diffs.
pub trait OtState<D>: Send + 'static {
    /// Resets the state to the empty state of a root commit.
    fn init(&mut self);

    /// Applies one diff.
    fn apply(&mut self, diff: &D);
}

/// Lifecycle of a state manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerPhase {
    /// Not checked out yet.
    Initial,
    /// The replica matches its revision plus uncommitted working diffs.
    CheckedOut,
    /// A committed candidate has not been pushed yet.
    Pending,
    /// The manager was closed.
    Closed,
}

impl ManagerPhase {
    /// Returns true if the replica has been checked out and not closed.
    pub fn is_open(&self) -> bool {
        matches!(self, ManagerPhase::CheckedOut | ManagerPhase::Pending)
    }
}

impl fmt::Display for ManagerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Commits pushed by this manager.
    pub pushes: u64,
    /// Completed fetches.
    pub fetches: u64,
    /// Merge commits created while fetching.
    pub merges: u64,
    /// Fetches that rebased local changes.
    pub rebases: u64,
    /// Push attempts after a failure.
    pub retries: u64,
    /// Last push or fetch error.
    pub last_error: Option<String>,
}

struct Replica<K: Ord, D, St> {
    phase: ManagerPhase,
    state: St,
    revision: Option<K>,
    revision_level: u64,
    // Squashed diffs from the empty state to `revision`.
    base: Vec<D>,
    working: Vec<D>,
    candidate: Option<Commit<K, D>>,
}

impl<K: Ord, D, St> Replica<K, D, St> {
    fn require_open(&self, operation: &str) -> OtResult<()> {
        match self.phase {
            ManagerPhase::Closed => Err(OtError::Cancelled),
            phase if phase.is_open() => Ok(()),
            phase => Err(OtError::InvalidStateTransition {
                from: phase.to_string(),
                to: operation.to_string(),
            }),
        }
    }

    fn settle_phase(&mut self) {
        if self.phase.is_open() {
            self.phase = if self.candidate.is_some() {
                ManagerPhase::Pending
            } else {
                ManagerPhase::CheckedOut
            };
        }
    }
}

struct InFlight<K> {
    generation: u64,
    task: Shared<BoxFuture<'static, OtResult<K>>>,
    abort: AbortHandle,
}

struct PushSlot<K> {
    next_generation: u64,
    in_flight: Option<InFlight<K>>,
}

struct Inner<R: Repository, S, St> {
    algorithms: OtAlgorithms<R, S>,
    config: StateManagerConfig,
    replica: Mutex<Replica<R::Id, R::Diff, St>>,
    // Serializes repository round trips that read and move the revision.
    sync: tokio::sync::Mutex<()>,
    push: Mutex<PushSlot<R::Id>>,
    poller: Mutex<Option<JoinHandle<()>>>,
    stats: RwLock<SyncStats>,
}

/// Keeps one replica of the state in sync with a repository.
///
/// Local changes are applied to the replica immediately with [`add`] and
/// collected into a candidate commit by [`commit`]. [`push`] sends the
/// candidate; when the repository has moved on, remote changes are fetched,
/// the candidate is rebased on top of them and the push is retried under the
/// configured [`RetryPolicy`](crate::RetryPolicy).
///
/// The manager is a cheap handle: clones share the same replica.
///
/// [`add`]: OtStateManager::add
/// [`commit`]: OtStateManager::commit
/// [`push`]: OtStateManager::push
pub struct OtStateManager<R: Repository, S, St> {
    inner: Arc<Inner<R, S, St>>,
}

impl<R: Repository, S, St> Clone for OtStateManager<R, S, St> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R, S, St> OtStateManager<R, S, St>
where
    R: Repository,
    S: OtSystem<R::Diff> + 'static,
    St: OtState<R::Diff>,
{
    /// Creates a manager around an empty replica.
    pub fn new(algorithms: OtAlgorithms<R, S>, state: St, config: StateManagerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                algorithms,
                config,
                replica: Mutex::new(Replica {
                    phase: ManagerPhase::Initial,
                    state,
                    revision: None,
                    revision_level: 0,
                    base: Vec::new(),
                    working: Vec::new(),
                    candidate: None,
                }),
                sync: tokio::sync::Mutex::new(()),
                push: Mutex::new(PushSlot {
                    next_generation: 0,
                    in_flight: None,
                }),
                poller: Mutex::new(None),
                stats: RwLock::new(SyncStats::default()),
            }),
        }
    }

    /// Returns the graph algorithms used by the manager.
    pub fn algorithms(&self) -> &OtAlgorithms<R, S> {
        &self.inner.algorithms
    }

    /// Returns the current phase.
    pub fn phase(&self) -> ManagerPhase {
        self.inner.replica.lock().phase
    }

    /// Returns the commit the replica is based on.
    pub fn revision(&self) -> Option<R::Id> {
        self.inner.replica.lock().revision.clone()
    }

    /// Runs `f` against the replica.
    pub fn with_state<T>(&self, f: impl FnOnce(&St) -> T) -> T {
        f(&self.inner.replica.lock().state)
    }

    /// Returns the diffs added since the last commit.
    pub fn working_diffs(&self) -> Vec<R::Diff> {
        self.inner.replica.lock().working.clone()
    }

    /// Returns the committed but unpushed candidate.
    pub fn candidate(&self) -> Option<RepoCommit<R>> {
        self.inner.replica.lock().candidate.clone()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    /// Loads the repository head into a fresh replica.
    ///
    /// Several heads are merged first. Uncommitted and unpushed local
    /// changes are discarded.
    pub async fn checkout(&self) -> OtResult<R::Id> {
        self.ensure_not_closed()?;
        let _sync = self.inner.sync.lock().await;

        let algorithms = &self.inner.algorithms;
        let head = algorithms.merge_heads_and_push().await?;
        let diffs = algorithms.checkout(&head).await?;
        let level = algorithms.repository().load_commit(&head).await?.level();

        let mut replica = self.inner.replica.lock();
        if replica.phase == ManagerPhase::Closed {
            return Err(OtError::Cancelled);
        }
        replica.state.init();
        for diff in &diffs {
            replica.state.apply(diff);
        }
        replica.revision = Some(head.clone());
        replica.revision_level = level;
        replica.base = diffs;
        replica.working.clear();
        replica.candidate = None;
        replica.phase = ManagerPhase::CheckedOut;
        info!(revision = ?head, diffs = replica.base.len(), "checked out");
        Ok(head)
    }

    /// Applies a local change to the replica and records it.
    pub fn add(&self, diff: R::Diff) -> OtResult<()> {
        let mut replica = self.inner.replica.lock();
        replica.require_open("add")?;
        replica.state.apply(&diff);
        replica.working.push(diff);
        Ok(())
    }

    /// Applies several local changes in order.
    pub fn add_all(&self, diffs: impl IntoIterator<Item = R::Diff>) -> OtResult<()> {
        let mut replica = self.inner.replica.lock();
        replica.require_open("add")?;
        for diff in diffs {
            replica.state.apply(&diff);
            replica.working.push(diff);
        }
        Ok(())
    }

    /// Moves the working diffs into the candidate commit.
    ///
    /// The candidate has the current revision as its only parent. An
    /// existing unpushed candidate absorbs the new diffs. Returns `None` if
    /// there was nothing to commit. Waits for an in-flight push or fetch to
    /// finish first.
    pub async fn commit(&self) -> OtResult<Option<RepoCommit<R>>> {
        self.ensure_open("commit")?;
        let _sync = self.inner.sync.lock().await;
        let system = self.inner.algorithms.system();

        let needs_id = {
            let replica = self.inner.replica.lock();
            replica.require_open("commit")?;
            if system.squash(&replica.working).is_empty() {
                return Ok(None);
            }
            replica.candidate.is_none()
        };
        let fresh_id = if needs_id {
            Some(self.inner.algorithms.repository().create_commit_id().await?)
        } else {
            None
        };

        let mut replica = self.inner.replica.lock();
        replica.require_open("commit")?;
        let working = std::mem::take(&mut replica.working);
        let revision = replica
            .revision
            .clone()
            .ok_or_else(|| OtError::InvalidStateTransition {
                from: ManagerPhase::Initial.to_string(),
                to: "commit".to_string(),
            })?;

        let candidate = match (replica.candidate.take(), fresh_id) {
            (Some(existing), _) => {
                let mut diffs = existing.diffs_from(&revision).unwrap_or_default().to_vec();
                diffs.extend(working);
                Commit::child(
                    existing.id().clone(),
                    revision,
                    system.squash(&diffs),
                    replica.revision_level,
                )
            }
            (None, Some(id)) => {
                Commit::child(id, revision, system.squash(&working), replica.revision_level)
            }
            (None, None) => return Err(OtError::InvalidCommit("no id for new candidate".into())),
        };
        debug!(commit = ?candidate.id(), "committed working diffs");
        replica.candidate = Some(candidate.clone());
        replica.settle_phase();
        Ok(Some(candidate))
    }

    /// Pushes the candidate commit and returns the new revision.
    ///
    /// A push issued while another is in flight joins it instead of
    /// starting a second one. With no candidate the current revision is
    /// returned.
    pub async fn push(&self) -> OtResult<R::Id> {
        self.ensure_open("push")?;
        let (generation, task) = {
            let mut slot = self.inner.push.lock();
            match &slot.in_flight {
                Some(in_flight) => {
                    debug!("joining in-flight push");
                    (in_flight.generation, in_flight.task.clone())
                }
                None => {
                    let generation = slot.next_generation;
                    slot.next_generation += 1;
                    let (task, abort) = future::abortable(push_loop(Arc::clone(&self.inner)));
                    let task = task
                        .map(|result| result.unwrap_or_else(|_aborted| Err(OtError::Cancelled)))
                        .boxed()
                        .shared();
                    slot.in_flight = Some(InFlight {
                        generation,
                        task: task.clone(),
                        abort,
                    });
                    (generation, task)
                }
            }
        };

        let result = task.await;
        {
            let mut slot = self.inner.push.lock();
            if slot
                .in_flight
                .as_ref()
                .is_some_and(|in_flight| in_flight.generation == generation)
            {
                slot.in_flight = None;
            }
        }
        result
    }

    /// Commits the working diffs and pushes them.
    pub async fn commit_and_push(&self) -> OtResult<R::Id> {
        self.commit().await?;
        self.push().await
    }

    /// Pulls remote changes into the replica.
    ///
    /// Several remote heads are merged and the merge is pushed. Local
    /// changes are rebased on top of the remote ones. Returns the new
    /// revision.
    pub async fn fetch(&self) -> OtResult<R::Id> {
        self.ensure_open("fetch")?;
        let _sync = self.inner.sync.lock().await;
        let result = fetch_locked(&self.inner).await;
        if let Err(err) = &result {
            self.inner.stats.write().last_error = Some(err.to_string());
        }
        result
    }

    /// Starts fetching in the background every poll interval.
    ///
    /// Must be called inside a tokio runtime. The poller stops when the
    /// manager is closed or dropped.
    pub fn start_polling(&self) -> OtResult<()> {
        self.ensure_open("poll")?;
        let mut poller = self.inner.poller.lock();
        if poller.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }

        let weak: Weak<Inner<R, S, St>> = Arc::downgrade(&self.inner);
        let interval = self.inner.config.poll_interval;
        *poller = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                if !inner.replica.lock().phase.is_open() {
                    break;
                }
                let result = {
                    let _sync = inner.sync.lock().await;
                    fetch_locked(&inner).await
                };
                if let Err(err) = result {
                    warn!(error = %err, "poll fetch failed");
                    inner.stats.write().last_error = Some(err.to_string());
                }
            }
        }));
        debug!(?interval, "polling started");
        Ok(())
    }

    /// Closes the manager.
    ///
    /// An in-flight push fails with [`OtError::Cancelled`] and the poller
    /// stops. The replica keeps every change applied so far.
    pub fn close(&self) {
        self.inner.replica.lock().phase = ManagerPhase::Closed;
        if let Some(in_flight) = self.inner.push.lock().in_flight.take() {
            in_flight.abort.abort();
        }
        if let Some(poller) = self.inner.poller.lock().take() {
            poller.abort();
        }
        info!("state manager closed");
    }

    fn ensure_not_closed(&self) -> OtResult<()> {
        match self.phase() {
            ManagerPhase::Closed => Err(OtError::Cancelled),
            _ => Ok(()),
        }
    }

    fn ensure_open(&self, operation: &str) -> OtResult<()> {
        self.inner.replica.lock().require_open(operation)
    }
}

async fn push_loop<R, S, St>(inner: Arc<Inner<R, S, St>>) -> OtResult<R::Id>
where
    R: Repository,
    S: OtSystem<R::Diff> + 'static,
    St: OtState<R::Diff>,
{
    let first_attempt = Instant::now();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let err = match push_once(&inner).await {
            Ok(revision) => return Ok(revision),
            Err(err) => err,
        };
        inner.stats.write().last_error = Some(err.to_string());

        let Some(next) = inner
            .config
            .retry
            .next_attempt(attempt, &err, first_attempt, Instant::now())
        else {
            warn!(attempt, error = %err, "push failed");
            return Err(err);
        };
        inner.stats.write().retries += 1;
        warn!(attempt, error = %err, "push failed, retrying");
        tokio::time::sleep_until(next.into()).await;
    }
}

async fn push_once<R, S, St>(inner: &Inner<R, S, St>) -> OtResult<R::Id>
where
    R: Repository,
    S: OtSystem<R::Diff> + 'static,
    St: OtState<R::Diff>,
{
    let _sync = inner.sync.lock().await;
    let (candidate, revision) = {
        let replica = inner.replica.lock();
        replica.require_open("push")?;
        (replica.candidate.clone(), replica.revision.clone())
    };
    let Some(candidate) = candidate else {
        return revision.ok_or(OtError::NoHeads);
    };

    match inner.algorithms.repository().push(candidate.clone()).await {
        Ok(()) => {}
        Err(err) if err.is_push_conflict() => {
            debug!(commit = ?candidate.id(), "push rejected, rebasing");
            fetch_locked(inner).await?;
            return Err(err);
        }
        Err(OtError::CommitNotFound(missing)) => {
            // The parent was compacted away after the last fetch.
            debug!(commit = ?candidate.id(), %missing, "parent gone, rebasing");
            fetch_locked(inner).await?;
            return Err(OtError::push_conflict(candidate.id()));
        }
        Err(err) => return Err(err),
    }

    let mut replica = inner.replica.lock();
    if replica.phase == ManagerPhase::Closed {
        return Err(OtError::Cancelled);
    }
    if replica.candidate.as_ref().map(Commit::id) == Some(candidate.id()) {
        replica.candidate = None;
    }
    if let Some(diffs) = revision.as_ref().and_then(|parent| candidate.diffs_from(parent)) {
        replica.base = inner.algorithms.system().squash(&concat(&replica.base, diffs));
    }
    replica.revision = Some(candidate.id().clone());
    replica.revision_level = candidate.level();
    replica.settle_phase();
    inner.stats.write().pushes += 1;
    info!(commit = ?candidate.id(), level = candidate.level(), "pushed commit");
    Ok(candidate.id().clone())
}

/// Brings the replica to the repository head. The caller holds the sync lock.
async fn fetch_locked<R, S, St>(inner: &Inner<R, S, St>) -> OtResult<R::Id>
where
    R: Repository,
    S: OtSystem<R::Diff> + 'static,
    St: OtState<R::Diff>,
{
    let revision = {
        let replica = inner.replica.lock();
        replica.require_open("fetch")?;
        replica.revision.clone().ok_or(OtError::NoHeads)?
    };

    let algorithms = &inner.algorithms;
    let heads = algorithms.repository().get_heads().await?;
    if heads == BTreeSet::from([revision.clone()]) {
        inner.stats.write().fetches += 1;
        return Ok(revision);
    }

    let head = algorithms.merge_heads_and_push().await?;
    if heads.len() > 1 {
        inner.stats.write().merges += 1;
    }
    let system = algorithms.system();
    let remote = match algorithms
        .load_all_changes(&ReplayBase::Commit(revision.clone()), &head)
        .await
    {
        Err(OtError::CommitNotFound(missing)) => {
            // History behind the revision was compacted: go through the
            // empty state instead.
            debug!(?revision, %missing, "replaying head from snapshot");
            let snapshot = algorithms.checkout(&head).await?;
            let base = inner.replica.lock().base.clone();
            system.squash(&concat(&system.invert(&base), &snapshot))
        }
        other => other?,
    };
    let level = algorithms.repository().load_commit(&head).await?.level();

    let mut replica = inner.replica.lock();
    if replica.phase == ManagerPhase::Closed {
        return Err(OtError::Cancelled);
    }

    let committed = replica
        .candidate
        .as_ref()
        .and_then(|candidate| candidate.diffs_from(&revision))
        .map(<[R::Diff]>::to_vec)
        .unwrap_or_default();
    let rebased = !committed.is_empty() || !replica.working.is_empty();

    // state = revision + committed + working; bring it to head + committed' + working'.
    let past_committed = system.transform(&committed, &remote)?;
    let past_working = system.transform(&replica.working, &past_committed.right)?;
    for diff in &past_working.right {
        replica.state.apply(diff);
    }

    replica.working = system.squash(&past_working.left);
    let committed = system.squash(&past_committed.left);
    replica.candidate = match replica.candidate.take() {
        Some(candidate) if !committed.is_empty() => Some(Commit::child(
            candidate.id().clone(),
            head.clone(),
            committed,
            level,
        )),
        _ => None,
    };
    replica.base = system.squash(&concat(&replica.base, &remote));
    replica.revision = Some(head.clone());
    replica.revision_level = level;
    replica.settle_phase();

    {
        let mut stats = inner.stats.write();
        stats.fetches += 1;
        if rebased {
            stats.rebases += 1;
        }
    }
    info!(from = ?revision, to = ?head, rebased, "fetched");
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases() {
        assert!(!ManagerPhase::Initial.is_open());
        assert!(ManagerPhase::CheckedOut.is_open());
        assert!(ManagerPhase::Pending.is_open());
        assert!(!ManagerPhase::Closed.is_open());
        assert_eq!(ManagerPhase::Pending.to_string(), "Pending");
    }

    #[test]
    fn closed_replica_reports_cancellation() {
        let mut replica: Replica<u64, i64, ()> = Replica {
            phase: ManagerPhase::Initial,
            state: (),
            revision: None,
            revision_level: 0,
            base: Vec::new(),
            working: Vec::new(),
            candidate: None,
        };
        assert!(matches!(
            replica.require_open("add"),
            Err(OtError::InvalidStateTransition { .. })
        ));

        replica.phase = ManagerPhase::Closed;
        assert_eq!(replica.require_open("add"), Err(OtError::Cancelled));
    }
}
