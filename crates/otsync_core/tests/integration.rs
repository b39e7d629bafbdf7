//! Graph algorithm tests against the memory repository.

use otsync_core::{
    encode, Commit, ConflictResolution, Diff, OtAlgorithms, OtError, OtSystem, ReplayBase,
    Repository,
};
use otsync_storage::MemoryRepository;
use otsync_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

type Algorithms = OtAlgorithms<MemoryRepository<TestOp>, TestOt>;

fn algorithms(repo: Arc<MemoryRepository<TestOp>>) -> Algorithms {
    OtAlgorithms::new(repo, Arc::new(TestOt))
}

fn set(ids: &[u64]) -> BTreeSet<u64> {
    ids.iter().copied().collect()
}

async fn value_of(algorithms: &Algorithms, id: u64) -> i64 {
    apply_ops(0, &algorithms.checkout(&id).await.unwrap())
}

// ============================================================================
// Surface search
// ============================================================================

#[tokio::test]
async fn common_parents_of_diamond() {
    let algorithms = algorithms(diamond().build().await.unwrap());

    let parents = algorithms.find_common_parents(&set(&[6, 7])).await.unwrap();
    assert_eq!(parents, set(&[2, 3]));

    let parents = algorithms.find_common_parents(&set(&[6])).await.unwrap();
    assert_eq!(parents, set(&[6]));
}

#[tokio::test]
async fn common_parent_of_fork() {
    let repo = chain(4).add(4, 5, 1).add(4, 6, 1).build().await.unwrap();
    let algorithms = algorithms(repo);

    let parents = algorithms
        .find_common_parents(&set(&[4, 5, 6]))
        .await
        .unwrap();
    assert_eq!(parents, set(&[4]));

    let parents = algorithms.find_common_parents(&set(&[5, 6])).await.unwrap();
    assert_eq!(parents, set(&[4]));
}

#[tokio::test]
async fn surface_with_custom_predicate() {
    let algorithms = algorithms(diamond().build().await.unwrap());

    let target = set(&[2, 3]);
    let surface = algorithms
        .find_surface(&set(&[6, 7]), |surface| {
            surface.ids().copied().collect::<BTreeSet<_>>() == target
        })
        .await
        .unwrap();
    assert_eq!(surface, target);

    let err = algorithms
        .find_surface(&set(&[6, 7]), |_| false)
        .await
        .unwrap_err();
    assert!(matches!(err, OtError::IncompleteGraph(_)));
}

#[tokio::test]
async fn exclude_parents_drops_ancestors() {
    let repo = chain(4).add(4, 5, 1).add(4, 6, 1).build().await.unwrap();
    let algorithms = algorithms(repo);

    let heads = algorithms.exclude_parents(&set(&[2, 4, 5, 6])).await.unwrap();
    assert_eq!(heads, set(&[5, 6]));

    let heads = algorithms.exclude_parents(&set(&[5, 6])).await.unwrap();
    assert_eq!(heads, set(&[5, 6]));
}

#[tokio::test]
async fn ancestry() {
    let algorithms = algorithms(diamond().build().await.unwrap());

    assert!(algorithms.is_ancestor(&1, &7).await.unwrap());
    assert!(algorithms.is_ancestor(&3, &6).await.unwrap());
    assert!(algorithms.is_ancestor(&6, &6).await.unwrap());
    assert!(!algorithms.is_ancestor(&6, &7).await.unwrap());
    assert!(!algorithms.is_ancestor(&4, &5).await.unwrap());
}

// ============================================================================
// Replay
// ============================================================================

#[tokio::test]
async fn checkout_reaches_every_commit_state() {
    let algorithms = algorithms(diamond().build().await.unwrap());

    let expected = [(1, 0), (2, 1), (3, 2), (4, 3), (5, 3), (6, 13), (7, 23)];
    for (id, value) in expected {
        assert_eq!(value_of(&algorithms, id).await, value, "commit {id}");
    }
}

#[tokio::test]
async fn replay_from_ancestor() {
    let algorithms = algorithms(diamond().build().await.unwrap());

    let diffs = algorithms
        .load_all_changes(&ReplayBase::Commit(2), &6)
        .await
        .unwrap();
    assert_eq!(diffs, vec![TestOp::Add(12)]);

    let diffs = algorithms
        .load_all_changes(&ReplayBase::Commit(6), &6)
        .await
        .unwrap();
    assert!(diffs.is_empty());
}

#[tokio::test]
async fn replay_from_non_ancestor_is_diverged() {
    let algorithms = algorithms(diamond().build().await.unwrap());

    let err = algorithms
        .load_all_changes(&ReplayBase::Commit(4), &7)
        .await
        .unwrap_err();
    assert!(matches!(err, OtError::DivergedHistory { .. }));

    let err = algorithms
        .load_all_changes(&ReplayBase::Commit(6), &2)
        .await
        .unwrap_err();
    assert!(matches!(err, OtError::DivergedHistory { .. }));
}

#[tokio::test]
async fn replay_of_unknown_commit_fails() {
    let algorithms = algorithms(diamond().build().await.unwrap());
    let err = algorithms.checkout(&42).await.unwrap_err();
    assert!(matches!(err, OtError::CommitNotFound(_)));
}

// ============================================================================
// Merge
// ============================================================================

#[tokio::test]
async fn merge_diamond_heads() {
    let repo = diamond().build().await.unwrap();
    let algorithms = algorithms(Arc::clone(&repo));

    let merge = algorithms.merge(&set(&[6, 7])).await.unwrap();
    assert_eq!(merge.parent_ids(), set(&[6, 7]));
    assert_eq!(merge.level(), 4);
    assert_eq!(repo.get_heads().await.unwrap(), set(&[*merge.id()]));

    let merged = value_of(&algorithms, *merge.id()).await;
    assert_eq!(merged, 33);
    for head in [6, 7] {
        let diffs = merge.diffs_from(&head).unwrap();
        assert_eq!(apply_ops(value_of(&algorithms, head).await, diffs), merged);
    }
}

#[tokio::test]
async fn merge_of_ancestor_and_descendant_pushes_nothing() {
    let repo = diamond().build().await.unwrap();
    let algorithms = algorithms(Arc::clone(&repo));

    let commit = algorithms.merge(&set(&[2, 6])).await.unwrap();
    assert_eq!(*commit.id(), 6);
    assert_eq!(repo.commit_count(), 7);
}

#[tokio::test]
async fn merge_resolves_conflicting_sets() {
    let repo = GraphBuilder::new()
        .root(1)
        .add(1, 2, 5)
        .edge(2, 3, vec![TestOp::set(5, 7)])
        .edge(2, 4, vec![TestOp::set(5, 9), TestOp::Add(1)])
        .build()
        .await
        .unwrap();
    let algorithms = algorithms(repo);

    let merge = algorithms.merge(&set(&[3, 4])).await.unwrap();
    assert_eq!(value_of(&algorithms, *merge.id()).await, 10);
    assert_eq!(merge.diffs_from(&4).map(<[TestOp]>::is_empty), Some(true));
}

#[tokio::test]
async fn merge_is_deterministic() {
    let first = algorithms(diamond().build().await.unwrap());
    let second = algorithms(diamond().build().await.unwrap());

    let a = first.compute_merge(&set(&[6, 7])).await.unwrap();
    let b = second.compute_merge(&set(&[6, 7])).await.unwrap();
    assert_eq!(encode(&a).unwrap(), encode(&b).unwrap());

    let a = first.merge(&set(&[6, 7])).await.unwrap();
    let b = second.merge(&set(&[6, 7])).await.unwrap();
    assert_eq!(a.to_rows().unwrap(), b.to_rows().unwrap());
}

#[tokio::test]
async fn merge_heads_and_push_leaves_one_head() {
    let repo = diamond().add(1, 8, 100).build().await.unwrap();
    let algorithms = algorithms(Arc::clone(&repo));

    let head = algorithms.merge_heads_and_push().await.unwrap();
    assert_eq!(repo.get_heads().await.unwrap(), set(&[head]));
    assert_eq!(value_of(&algorithms, head).await, 133);

    // Already merged.
    assert_eq!(algorithms.merge_heads_and_push().await.unwrap(), head);
}

#[tokio::test]
async fn merge_of_empty_repository_fails() {
    let algorithms = algorithms(Arc::new(MemoryRepository::relaxed()));
    let err = algorithms.merge_heads_and_push().await.unwrap_err();
    assert_eq!(err, OtError::NoHeads);
}

#[tokio::test]
async fn strict_repository_rejects_stale_merge() {
    let builder = GraphBuilder::new().root(1).add(1, 2, 1).add(1, 3, 2);
    let relaxed = builder.build().await.unwrap();
    let algorithms = algorithms(Arc::clone(&relaxed));

    let result = algorithms.compute_merge(&set(&[2, 3])).await.unwrap();
    relaxed
        .push(Commit::child(10, 2, vec![TestOp::Add(1)], 1))
        .await
        .unwrap();

    // Relaxed repositories accept merges of non-heads as well.
    relaxed.push(result.clone().into_commit(11)).await.unwrap();
    assert_eq!(relaxed.get_heads().await.unwrap(), set(&[10, 11]));

    let strict = Arc::new(MemoryRepository::<TestOp>::new());
    strict.push(Commit::root(1)).await.unwrap();
    strict
        .push(Commit::child(2, 1, vec![TestOp::Add(1)], 0))
        .await
        .unwrap();
    let err = strict
        .push(Commit::child(3, 1, vec![TestOp::Add(2)], 0))
        .await
        .unwrap_err();
    assert!(err.is_push_conflict());
}

// ============================================================================
// Compaction
// ============================================================================

#[tokio::test]
async fn compaction_preserves_replay() {
    let repo = chain(7).build().await.unwrap();
    let algorithms = algorithms(Arc::clone(&repo));

    let before = algorithms.checkout(&7).await.unwrap();
    assert_eq!(algorithms.compact(&5).await.unwrap(), 5);
    let after = algorithms.checkout(&7).await.unwrap();

    assert_eq!(apply_ops(0, &before), 6);
    assert_eq!(apply_ops(0, &after), apply_ops(0, &before));
    assert_eq!(repo.snapshot_count(), 1);
    for id in 1..=4 {
        assert!(!repo.contains(id), "commit {id} should be gone");
    }
    assert!(repo.contains(5));

    let diffs = algorithms
        .load_all_changes(&ReplayBase::Commit(5), &7)
        .await
        .unwrap();
    assert_eq!(diffs, vec![TestOp::Add(2)]);
}

#[tokio::test]
async fn compaction_keeps_side_branch_alive() {
    let repo = chain(5).add(1, 6, 100).build().await.unwrap();
    let algorithms = algorithms(Arc::clone(&repo));

    let cut = algorithms.compact(&5).await.unwrap();
    assert_eq!(cut, 1);
    assert_eq!(repo.commit_count(), 6);

    assert_eq!(value_of(&algorithms, 6).await, 100);
    assert_eq!(value_of(&algorithms, 5).await, 4);
    let head = algorithms.merge_heads_and_push().await.unwrap();
    assert_eq!(value_of(&algorithms, head).await, 104);

    // Once merged, the whole history lies behind the merge commit.
    assert_eq!(algorithms.compact(&head).await.unwrap(), head);
    assert_eq!(repo.commit_count(), 1);
    assert_eq!(value_of(&algorithms, head).await, 104);
}

#[tokio::test]
async fn compaction_below_merge_commit_keeps_replay() {
    let repo = chain(5)
        .add(1, 6, 100)
        .add(5, 7, 100)
        .add(6, 7, 4)
        .build()
        .await
        .unwrap();
    let algorithms = algorithms(Arc::clone(&repo));
    assert_eq!(value_of(&algorithms, 7).await, 104);

    algorithms.compact(&5).await.unwrap();
    assert_eq!(value_of(&algorithms, 7).await, 104);

    let later = repo.create_commit_id().await.unwrap();
    repo.push(Commit::child(later, 5, vec![TestOp::Add(1)], 4))
        .await
        .unwrap();
    let head = algorithms.merge_heads_and_push().await.unwrap();
    assert_eq!(value_of(&algorithms, head).await, 105);
}

#[tokio::test]
async fn compaction_moves_to_branch_point() {
    let repo = chain(6).add(3, 7, 100).build().await.unwrap();
    let algorithms = algorithms(Arc::clone(&repo));

    assert_eq!(algorithms.compact(&5).await.unwrap(), 3);
    assert!(!repo.contains(1));
    assert!(!repo.contains(2));
    assert!(repo.contains(3));

    assert_eq!(value_of(&algorithms, 6).await, 5);
    assert_eq!(value_of(&algorithms, 7).await, 102);
    let head = algorithms.merge_heads_and_push().await.unwrap();
    assert_eq!(value_of(&algorithms, head).await, 105);
}

#[tokio::test]
async fn graphviz_marks_heads_and_snapshots() {
    let repo = chain(4).build().await.unwrap();
    let algorithms = algorithms(repo);
    algorithms.compact(&2).await.unwrap();

    let dot = algorithms.to_graphviz(&set(&[4])).await.unwrap();
    assert!(dot.starts_with("digraph {"));
    assert!(dot.contains("\"4\" [label=\"4 @3\", shape=box]"));
    assert!(dot.contains("\"2\" [label=\"2 @1\", shape=ellipse, style=filled]"));
    assert!(dot.contains("\"1\" [style=dashed]"));
    assert!(dot.contains("\"3\" -> \"4\""));
}

// ============================================================================
// Log diffs
// ============================================================================

#[test]
fn log_position_conflict_resolves_right() {
    let left = vec![LogDiff::advance("clicks", 0, 10, [Chunk::new(1, 10, 20, 15)])];
    let right = vec![LogDiff::advance("clicks", 0, 20, [Chunk::new(1, 10, 25, 30)])];

    let result = LogOt::new().transform(&left, &right).unwrap();

    assert!(result.has_conflict());
    assert_eq!(result.resolution, Some(ConflictResolution::Right));
    assert!(result.left.is_empty());
    assert_eq!(result.right.len(), 1);

    let merged = &result.right[0];
    assert_eq!(merged.positions["clicks"], PositionDiff::new(10, 20));
    assert_eq!(merged.chunks.added, right[0].chunks.added);
    assert_eq!(merged.chunks.removed, left[0].chunks.added);
}

#[tokio::test]
async fn log_diffs_merge_through_the_graph() {
    let repo = GraphBuilder::new()
        .root(1)
        .edge(1, 2, vec![LogDiff::advance("clicks", 0, 10, [Chunk::new(1, 10, 20, 15)])])
        .edge(1, 3, vec![LogDiff::advance("clicks", 0, 20, [Chunk::new(1, 10, 25, 30)])])
        .edge(1, 4, vec![LogDiff::advance("views", 0, 5, [Chunk::new(9, 0, 4, 5)])])
        .build()
        .await
        .unwrap();
    let algorithms = OtAlgorithms::new(repo, Arc::new(LogOt::new()));

    let head = algorithms.merge_heads_and_push().await.unwrap();
    let mut state = LogState::default();
    state.apply_all(&algorithms.checkout(&head).await.unwrap());

    assert_eq!(state.positions["clicks"], 20);
    assert_eq!(state.positions["views"], 5);
    assert_eq!(
        state.chunks,
        BTreeSet::from([Chunk::new(1, 10, 25, 30), Chunk::new(9, 0, 4, 5)])
    );
}

// ============================================================================
// Properties
// ============================================================================

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_squash_is_idempotent((base, ops) in test_ops_strategy(12)) {
        let once = TestOt.squash(&ops);
        prop_assert_eq!(TestOt.squash(&once), once.clone());
        prop_assert_eq!(apply_ops(base, &once), apply_ops(base, &ops));
    }

    #[test]
    fn prop_log_squash_is_idempotent(diffs in prop::collection::vec(log_diff_strategy(), 0..6)) {
        let once = LogOt::new().squash(&diffs);
        prop_assert_eq!(LogOt::new().squash(&once), once);
    }

    #[test]
    fn prop_transform_converges((base, left, right) in divergent_ops_strategy(6)) {
        let result = TestOt.transform(&left, &right).unwrap();
        prop_assert_eq!(
            apply_ops(apply_ops(base, &left), &result.right),
            apply_ops(apply_ops(base, &right), &result.left)
        );
    }

    #[test]
    fn prop_invert_undoes((base, ops) in test_ops_strategy(8)) {
        let undone = apply_ops(apply_ops(base, &ops), &TestOt.invert(&ops));
        prop_assert_eq!(undone, base);
        prop_assert!(TestOt.squash(&otsync_core::concat(&ops, &TestOt.invert(&ops)))
            .iter()
            .all(|op| !Diff::is_empty(op)));
    }

    #[test]
    fn prop_checkout_round_trip(spec in dag_strategy(12)) {
        block_on(async {
            let algorithms = algorithms(spec.builder().build().await.unwrap());
            for id in spec.ids() {
                assert_eq!(value_of(&algorithms, id).await, spec.value(id));
            }
        });
    }

    #[test]
    fn prop_merge_converges_and_is_deterministic(spec in dag_strategy(10)) {
        block_on(async {
            let first = algorithms(spec.builder().build().await.unwrap());
            let second = algorithms(spec.builder().build().await.unwrap());
            let heads = first.repository().get_heads().await.unwrap();

            let a = first.compute_merge(&heads).await.unwrap();
            let b = second.compute_merge(&heads).await.unwrap();
            assert_eq!(encode(&a).unwrap(), encode(&b).unwrap());

            let merged: BTreeMap<u64, i64> = a
                .parents
                .iter()
                .map(|(head, diffs)| (*head, apply_ops(spec.value(*head), diffs)))
                .collect();
            let values: BTreeSet<i64> = merged.values().copied().collect();
            assert_eq!(values.len(), 1, "heads disagree after merge: {merged:?}");
        });
    }
}
