//! Placement index: authoritative hash-to-cluster locator.
//!
//! The same content may legitimately land in more than one cluster over
//! time, so the index keeps a set of clusters per hash. Lookups are filtered
//! through a caller-provided candidate list and resolve to the first
//! candidate that owns the hash.

use crate::error::{CairnError, Result};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

#[derive(Default)]
struct IndexInner {
    /// hash -> owning clusters.
    by_hash: HashMap<String, HashSet<String>>,
    /// cluster -> owned hashes, kept in step with `by_hash` so a
    /// whole-cluster replace does not scan the full map.
    by_cluster: HashMap<String, HashSet<String>>,
}

/// In-memory hash-to-cluster mapping with atomic per-cluster replacement.
#[derive(Default)]
pub struct PlacementIndex {
    inner: RwLock<IndexInner>,
}

impl PlacementIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union the given hashes into the cluster's set.
    pub fn add<I, S>(&self, cluster_id: &str, hashes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.inner.write();
        for hash in hashes {
            let hash = hash.into();
            inner
                .by_hash
                .entry(hash.clone())
                .or_default()
                .insert(cluster_id.to_string());
            inner
                .by_cluster
                .entry(cluster_id.to_string())
                .or_default()
                .insert(hash);
        }
    }

    /// Remove the given hashes from the cluster's set.
    pub fn remove<'a, I>(&self, cluster_id: &str, hashes: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut inner = self.inner.write();
        for hash in hashes {
            if let Some(owners) = inner.by_hash.get_mut(hash) {
                owners.remove(cluster_id);
                if owners.is_empty() {
                    inner.by_hash.remove(hash);
                }
            }
            if let Some(owned) = inner.by_cluster.get_mut(cluster_id) {
                owned.remove(hash);
            }
        }
    }

    /// Atomically replace the full hash set of one cluster.
    ///
    /// Concurrent finds observe either the pre- or the post-state, never a
    /// partial one.
    pub fn replace<I, S>(&self, cluster_id: &str, hashes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let next: HashSet<String> = hashes.into_iter().map(Into::into).collect();

        let mut inner = self.inner.write();
        if let Some(previous) = inner.by_cluster.remove(cluster_id) {
            for hash in previous {
                if let Some(owners) = inner.by_hash.get_mut(&hash) {
                    owners.remove(cluster_id);
                    if owners.is_empty() {
                        inner.by_hash.remove(&hash);
                    }
                }
            }
        }
        for hash in &next {
            inner
                .by_hash
                .entry(hash.clone())
                .or_default()
                .insert(cluster_id.to_string());
        }
        if !next.is_empty() {
            inner.by_cluster.insert(cluster_id.to_string(), next);
        }
    }

    /// Locate a hash among the candidate clusters.
    ///
    /// Tie-break is the first match in candidate order, so callers control
    /// preference by how they order the list.
    pub fn find(&self, candidate_cluster_ids: &[String], hash: &str) -> Result<String> {
        let inner = self.inner.read();
        let owners = inner
            .by_hash
            .get(hash)
            .ok_or_else(|| CairnError::NotFound(hash.to_string()))?;

        candidate_cluster_ids
            .iter()
            .find(|id| owners.contains(*id))
            .cloned()
            .ok_or_else(|| CairnError::NotFound(hash.to_string()))
    }

    /// Snapshot of all hashes currently owned by a cluster.
    pub fn cluster_hashes(&self, cluster_id: &str) -> HashSet<String> {
        self.inner
            .read()
            .by_cluster
            .get(cluster_id)
            .cloned()
            .unwrap_or_default()
    }
}
