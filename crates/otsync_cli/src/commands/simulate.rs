//! Simulate command implementation.

use futures::future;
use otsync_core::{Commit, OtAlgorithms, Repository};
use otsync_engine::{OtState, OtStateManager, RetryConfig, StateManagerConfig};
use otsync_storage::MemoryRepository;
use otsync_testkit::{apply_ops, TestOp, TestOt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Options of the simulate command.
#[derive(Debug, Clone)]
pub struct Options {
    /// Number of replicas.
    pub replicas: usize,
    /// Number of edit rounds.
    pub rounds: usize,
    /// Use relaxed head checks.
    pub relaxed: bool,
    /// Seed for the generated edits.
    pub seed: u64,
    /// Repository latency in milliseconds.
    pub latency_ms: u64,
    /// Compact the history at the end.
    pub compact: bool,
}

#[derive(Debug, Default)]
struct Register(i64);

impl OtState<TestOp> for Register {
    fn init(&mut self) {
        self.0 = 0;
    }

    fn apply(&mut self, op: &TestOp) {
        self.0 = op.apply(self.0);
    }
}

type Repo = MemoryRepository<TestOp>;
type Replica = OtStateManager<Repo, TestOt, Register>;

fn random_op(rng: &mut StdRng, current: i64) -> TestOp {
    if rng.gen_bool(0.8) {
        TestOp::Add(rng.gen_range(-10..=10))
    } else {
        TestOp::set(current, rng.gen_range(-100..=100))
    }
}

/// Runs the simulate command.
pub async fn run(options: Options) -> Result<(), Box<dyn std::error::Error>> {
    if options.replicas == 0 {
        return Err("at least one replica is required".into());
    }

    let repo = if options.relaxed {
        Repo::relaxed()
    } else {
        Repo::new()
    };
    let repo = Arc::new(repo.with_latency(Duration::from_millis(options.latency_ms)));
    let root = repo.create_commit_id().await?;
    repo.push(Commit::root(root)).await?;

    let algorithms = OtAlgorithms::new(Arc::clone(&repo), Arc::new(TestOt));
    let config = StateManagerConfig::new().with_retry(
        RetryConfig::new(50)
            .with_initial_backoff(Duration::from_millis(1))
            .with_max_backoff(Duration::from_millis(50)),
    );

    let replicas: Vec<Replica> = (0..options.replicas)
        .map(|_| OtStateManager::new(algorithms.clone(), Register::default(), config.clone()))
        .collect();
    for replica in &replicas {
        replica.checkout().await?;
    }

    println!(
        "Simulating {} replicas for {} rounds ({} head checks, seed {})",
        options.replicas,
        options.rounds,
        if options.relaxed { "relaxed" } else { "strict" },
        options.seed
    );

    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut edits: Vec<Vec<TestOp>> = vec![Vec::new(); replicas.len()];
    for round in 0..options.rounds {
        for (index, replica) in replicas.iter().enumerate() {
            let current = replica.with_state(|register| register.0);
            let op = random_op(&mut rng, current);
            edits[index].push(op);
            replica.add(op)?;
        }
        let pushed = future::join_all(replicas.iter().map(|replica| replica.commit_and_push())).await;
        for result in pushed {
            result?;
        }
        info!(round, heads = repo.get_heads().await?.len(), "round complete");
    }

    for replica in &replicas {
        replica.fetch().await?;
    }
    for replica in &replicas {
        replica.fetch().await?;
    }

    let heads = repo.get_heads().await?;
    let values: Vec<i64> = replicas
        .iter()
        .map(|replica| replica.with_state(|register| register.0))
        .collect();

    println!();
    println!("Replicas:");
    for (index, replica) in replicas.iter().enumerate() {
        let stats = replica.stats();
        println!(
            "  #{index}: value {:>5}  revision {:?}  pushes {}  fetches {}  merges {}  rebases {}  retries {}",
            values[index],
            replica.revision(),
            stats.pushes,
            stats.fetches,
            stats.merges,
            stats.rebases,
            stats.retries,
        );
    }
    println!();
    println!("Heads:     {:?}", heads);
    println!("Commits:   {}", repo.commit_count());
    println!("Rejected:  {}", repo.rejected_count());

    let converged = values.windows(2).all(|pair| pair[0] == pair[1]) && heads.len() == 1;
    println!("Converged: {}", if converged { "yes" } else { "NO" });

    if let Some(replica) = replicas.first() {
        let own = apply_ops(0, &edits[0]);
        println!("Replica #0 alone would have reached {own}; shared value is {}", values[0]);
        if options.compact {
            let head = replica.revision().ok_or("replica has no revision")?;
            let before = repo.commit_count();
            let cut = algorithms.compact(&head).await?;
            let replayed = apply_ops(0, &algorithms.checkout(&head).await?);
            println!();
            println!("Compacted at {cut}: {before} -> {} commits", repo.commit_count());
            println!("Replay after compaction: {replayed}");
            if replayed != values[0] {
                return Err("replay after compaction does not match replica state".into());
            }
        }
    }

    if !converged {
        return Err("replicas did not converge".into());
    }
    Ok(())
}
