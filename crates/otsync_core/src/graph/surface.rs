//! Frontier searches: common parents, ancestry and head exclusion.

use super::walk::{exhausted, Walk};
use super::OtAlgorithms;
use crate::error::{OtError, OtResult};
use crate::repository::Repository;
use crate::system::OtSystem;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// A frontier commit as seen by a surface predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceEntry<K> {
    /// Level of the commit.
    pub level: u64,
    /// Heads from which the commit was reached.
    pub reached_by: BTreeSet<K>,
}

/// The frontier of a backward search.
///
/// Holds every commit that has been reached but not yet visited, along with
/// the subset of start heads that reach it.
#[derive(Debug, Clone)]
pub struct Surface<K> {
    heads: BTreeSet<K>,
    entries: BTreeMap<K, SurfaceEntry<K>>,
}

impl<K: Ord + Clone> Surface<K> {
    /// Returns the heads the search started from.
    pub fn heads(&self) -> &BTreeSet<K> {
        &self.heads
    }

    /// Returns the frontier ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    /// Returns the frontier entries.
    pub fn entries(&self) -> &BTreeMap<K, SurfaceEntry<K>> {
        &self.entries
    }

    /// Returns true if `id` is on the frontier.
    pub fn contains(&self, id: &K) -> bool {
        self.entries.contains_key(id)
    }

    /// Returns the number of frontier commits.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the frontier is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the level of a frontier commit.
    pub fn level(&self, id: &K) -> Option<u64> {
        self.entries.get(id).map(|entry| entry.level)
    }

    /// Returns the highest level on the frontier.
    pub fn max_level(&self) -> Option<u64> {
        self.entries.values().map(|entry| entry.level).max()
    }

    /// Returns the heads reaching a frontier commit.
    pub fn reached_by(&self, id: &K) -> Option<&BTreeSet<K>> {
        self.entries.get(id).map(|entry| &entry.reached_by)
    }

    /// Returns true if every frontier commit is reached by every head.
    ///
    /// Every path from a head back to a root then crosses the frontier, and
    /// no frontier commit has a descendant with the same property.
    pub fn is_common_cut(&self) -> bool {
        !self.entries.is_empty()
            && self
                .entries
                .values()
                .all(|entry| entry.reached_by == self.heads)
    }

    fn into_ids(self) -> BTreeSet<K> {
        self.entries.into_keys().collect()
    }
}

impl<R, S> OtAlgorithms<R, S>
where
    R: Repository,
    S: OtSystem<R::Diff>,
{
    /// Walks back from `heads` until `predicate` accepts the frontier.
    ///
    /// The predicate is checked before every step, including the first.
    /// Returns [`OtError::IncompleteGraph`] if the walk runs out of commits
    /// without the predicate accepting.
    pub async fn find_surface<P>(
        &self,
        heads: &BTreeSet<R::Id>,
        mut predicate: P,
    ) -> OtResult<BTreeSet<R::Id>>
    where
        P: FnMut(&Surface<R::Id>) -> bool + Send,
    {
        let mut walk = Walk::start(self.repo.as_ref(), heads).await?;
        let mut surface = Surface {
            heads: heads.clone(),
            entries: heads
                .iter()
                .map(|head| {
                    let entry = SurfaceEntry {
                        level: walk.level_of(head).unwrap_or_default(),
                        reached_by: BTreeSet::from([head.clone()]),
                    };
                    (head.clone(), entry)
                })
                .collect(),
        };

        loop {
            if predicate(&surface) {
                return Ok(surface.into_ids());
            }

            let commit = walk
                .pop()
                .ok_or_else(|| exhausted("searching for a surface"))?;
            walk.expand(&commit).await?;

            let reached = surface
                .entries
                .remove(commit.id())
                .map(|entry| entry.reached_by)
                .unwrap_or_default();
            for parent in commit.parents().keys() {
                let level = walk.level_of(parent).unwrap_or_default();
                surface
                    .entries
                    .entry(parent.clone())
                    .or_insert_with(|| SurfaceEntry {
                        level,
                        reached_by: BTreeSet::new(),
                    })
                    .reached_by
                    .extend(reached.iter().cloned());
            }
        }
    }

    /// Finds the nearest commits every head passes through on its way to a
    /// root.
    ///
    /// A single head is its own common parent.
    pub async fn find_common_parents(
        &self,
        heads: &BTreeSet<R::Id>,
    ) -> OtResult<BTreeSet<R::Id>> {
        if heads.is_empty() {
            return Err(OtError::NoHeads);
        }
        if heads.len() == 1 {
            return Ok(heads.clone());
        }
        let parents = self.find_surface(heads, Surface::is_common_cut).await?;
        debug!(?heads, ?parents, "found common parents");
        Ok(parents)
    }

    /// Drops every head that is an ancestor of another head.
    pub async fn exclude_parents(&self, heads: &BTreeSet<R::Id>) -> OtResult<BTreeSet<R::Id>> {
        if heads.is_empty() {
            return Err(OtError::NoHeads);
        }
        if heads.len() == 1 {
            return Ok(heads.clone());
        }

        let mut walk = Walk::start(self.repo.as_ref(), heads).await?;
        let min_level = heads
            .iter()
            .filter_map(|head| walk.level_of(head))
            .min()
            .unwrap_or_default();

        let mut remaining = heads.clone();
        while let Some(commit) = walk.pop() {
            for parent in commit.parents().keys() {
                remaining.remove(parent);
            }
            if commit.level() <= min_level {
                break;
            }
            walk.expand(&commit).await?;
        }
        Ok(remaining)
    }

    /// Returns true if `ancestor` is reachable from `descendant`.
    ///
    /// A commit is its own ancestor.
    pub async fn is_ancestor(&self, ancestor: &R::Id, descendant: &R::Id) -> OtResult<bool> {
        if ancestor == descendant {
            return Ok(true);
        }
        let level = self.repo.load_commit(ancestor).await?.level();
        let surface = self
            .find_surface(&BTreeSet::from([descendant.clone()]), |surface| {
                surface.contains(ancestor) || surface.max_level().map_or(true, |max| max < level)
            })
            .await?;
        Ok(surface.contains(ancestor))
    }
}
