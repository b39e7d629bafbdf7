//! Graph command implementation.

use otsync_core::{OtAlgorithms, Repository};
use otsync_testkit::{diamond, TestOt};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Runs the graph command.
pub async fn run(merge: bool) -> Result<(), Box<dyn std::error::Error>> {
    let repo = diamond().build().await?;
    let algorithms = OtAlgorithms::new(Arc::clone(&repo), Arc::new(TestOt));

    let heads = repo.get_heads().await?;
    let bases = algorithms.find_common_parents(&heads).await?;
    println!("// heads {:?}, common parents {:?}", heads, bases);
    println!("{}", algorithms.to_graphviz(&heads).await?);

    if merge {
        let commit = algorithms.merge(&heads).await?;
        println!("// merged into {:?} at level {}", commit.id(), commit.level());
        println!(
            "{}",
            algorithms
                .to_graphviz(&BTreeSet::from([*commit.id()]))
                .await?
        );
    }
    Ok(())
}
