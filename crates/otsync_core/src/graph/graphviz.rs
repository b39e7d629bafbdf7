//! Graphviz rendering of the commit graph.

use super::OtAlgorithms;
use crate::error::{OtError, OtResult};
use crate::repository::Repository;
use crate::system::OtSystem;
use std::collections::{BTreeSet, VecDeque};
use std::fmt::Write;

impl<R, S> OtAlgorithms<R, S>
where
    R: Repository,
    S: OtSystem<R::Diff>,
{
    /// Renders every commit reachable from `heads` in DOT format.
    ///
    /// Heads are drawn as boxes, commits carrying a snapshot are filled and
    /// parents that are no longer stored are drawn dashed.
    pub async fn to_graphviz(&self, heads: &BTreeSet<R::Id>) -> OtResult<String> {
        let mut out = String::from("digraph {\n");
        let mut seen: BTreeSet<R::Id> = heads.clone();
        let mut queue: VecDeque<R::Id> = heads.iter().cloned().collect();

        while let Some(id) = queue.pop_front() {
            let commit = match self.repo.load_commit(&id).await {
                Ok(commit) => commit,
                Err(OtError::CommitNotFound(_)) => {
                    let _ = writeln!(out, "  \"{id:?}\" [style=dashed];");
                    continue;
                }
                Err(err) => return Err(err),
            };

            let shape = if heads.contains(&id) { "box" } else { "ellipse" };
            let fill = if self.repo.load_snapshot(&id).await?.is_some() {
                ", style=filled"
            } else {
                ""
            };
            let _ = writeln!(
                out,
                "  \"{id:?}\" [label=\"{id:?} @{}\", shape={shape}{fill}];",
                commit.level()
            );

            for (parent, diffs) in commit.parents() {
                let label = format!("{diffs:?}").replace('"', "\\\"");
                let _ = writeln!(out, "  \"{parent:?}\" -> \"{id:?}\" [label=\"{label}\"];");
                if seen.insert(parent.clone()) {
                    queue.push_back(parent.clone());
                }
            }
        }

        out.push_str("}\n");
        Ok(out)
    }
}
