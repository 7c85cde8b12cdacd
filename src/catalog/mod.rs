//! Persistent cluster catalog with locked access patterns.
//!
//! The catalog is the single writer of cluster state. Mutations run inside
//! RAII transactions: [`Catalog::save`] hands out a [`ClusterTx`] holding the
//! cluster's lock and a working copy; `commit` persists and publishes the
//! copy, dropping the transaction rolls it back. [`Catalog::save_all`] locks
//! every cluster in ascending id order, which keeps whole-catalog and
//! per-cluster transactions deadlock-free.

use crate::error::{CairnError, Result};
use crate::types::{Cluster, Clusters, Node};
use async_trait::async_trait;
use parking_lot::RwLock;
use rocksdb::{WriteBatch, DB};
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

type ClusterCell = Arc<Mutex<Cluster>>;

/// Effects of removing a node, injected into the catalog transaction.
///
/// Any hook returning an error rolls the whole mutation back.
#[async_trait]
pub trait NodeDeparture: Send + Sync {
    /// The node is about to leave; tell it to release its cluster binding.
    async fn node_leaving(&self, node: &Node) -> Result<()>;

    /// The removed node was the master; this survivor has been elected.
    async fn promote_master(&self, node: &Node) -> Result<()>;

    /// Final pass over the mutated cluster; usually a resync. Runs inside
    /// the transaction, so mutations land with the same commit.
    async fn resync(&self, cluster: &mut Cluster) -> Result<()>;
}

/// Persistent set of clusters with per-cluster mutual exclusion.
pub struct Catalog {
    db: Arc<DB>,
    clusters: RwLock<BTreeMap<String, ClusterCell>>,
}

impl Catalog {
    /// Open the catalog, loading any previously persisted clusters.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;

        let mut clusters = BTreeMap::new();
        for entry in db.iterator(rocksdb::IteratorMode::Start) {
            let (key, value) = entry?;
            let cluster: Cluster = bincode::deserialize(&value)?;
            let id = String::from_utf8_lossy(&key).to_string();
            clusters.insert(id, Arc::new(Mutex::new(cluster)));
        }

        info!(clusters = clusters.len(), "Catalog opened");

        Ok(Self {
            db: Arc::new(db),
            clusters: RwLock::new(clusters),
        })
    }

    fn cell(&self, cluster_id: &str) -> Result<ClusterCell> {
        self.clusters
            .read()
            .get(cluster_id)
            .cloned()
            .ok_or_else(|| CairnError::NotFound(cluster_id.to_string()))
    }

    /// Cluster ids in ascending order.
    pub fn ids(&self) -> Vec<String> {
        self.clusters.read().keys().cloned().collect()
    }

    /// Snapshot read of one cluster.
    pub async fn get(&self, cluster_id: &str) -> Result<Cluster> {
        let cell = self.cell(cluster_id)?;
        let guard = cell.lock().await;
        Ok(guard.clone())
    }

    /// Snapshot read of every cluster, in id order.
    ///
    /// Snapshots are taken one cluster at a time; use [`Catalog::lock_all`]
    /// when the view must be mutually consistent.
    pub async fn get_all(&self) -> Result<Clusters> {
        let cells: Vec<ClusterCell> = self.clusters.read().values().cloned().collect();
        let mut out = Vec::with_capacity(cells.len());
        for cell in cells {
            out.push(cell.lock().await.clone());
        }
        Ok(out)
    }

    /// Read-consistent view across the whole catalog.
    ///
    /// All cluster locks are held while the snapshot is taken, in id order.
    pub async fn lock_all(&self) -> Result<Clusters> {
        let cells: Vec<ClusterCell> = self.clusters.read().values().cloned().collect();
        let mut guards = Vec::with_capacity(cells.len());
        for cell in &cells {
            guards.push(cell.lock().await);
        }
        Ok(guards.iter().map(|g| (**g).clone()).collect())
    }

    /// Begin an exclusive write transaction on one cluster.
    pub async fn save(&self, cluster_id: &str) -> Result<ClusterTx> {
        let cell = self.cell(cluster_id)?;
        let guard = cell.lock_owned().await;
        let working = guard.clone();
        Ok(ClusterTx {
            db: Arc::clone(&self.db),
            guard,
            working,
        })
    }

    /// Begin an exclusive write transaction over every cluster.
    ///
    /// Locks are acquired in ascending id order.
    pub async fn save_all(&self) -> Result<CatalogTx> {
        let cells: Vec<(String, ClusterCell)> = self
            .clusters
            .read()
            .iter()
            .map(|(id, cell)| (id.clone(), Arc::clone(cell)))
            .collect();

        let mut guards = Vec::with_capacity(cells.len());
        let mut workings = Vec::with_capacity(cells.len());
        for (_, cell) in &cells {
            let guard = Arc::clone(cell).lock_owned().await;
            workings.push(guard.clone());
            guards.push(guard);
        }

        Ok(CatalogTx {
            db: Arc::clone(&self.db),
            guards,
            workings,
        })
    }

    /// Add a freshly registered cluster.
    pub fn register_cluster(&self, cluster: Cluster) -> Result<()> {
        let mut map = self.clusters.write();
        if map.contains_key(&cluster.id) {
            return Err(CairnError::Registered(cluster.id));
        }

        self.db
            .put(cluster.id.as_bytes(), bincode::serialize(&cluster)?)?;
        debug!(cluster_id = %cluster.id, nodes = cluster.nodes.len(), "Cluster registered");
        map.insert(cluster.id.clone(), Arc::new(Mutex::new(cluster)));
        Ok(())
    }

    /// Begin removing a cluster.
    ///
    /// The returned transaction holds the cluster lock; side effects (index
    /// cleanup, node wipes) run against [`UnregisterTx::cluster`] before
    /// `commit` makes the removal durable.
    pub async fn unregister_cluster(&self, cluster_id: &str) -> Result<UnregisterTx<'_>> {
        let cell = self.cell(cluster_id)?;
        let guard = cell.lock_owned().await;
        Ok(UnregisterTx {
            catalog: self,
            id: cluster_id.to_string(),
            guard,
        })
    }

    /// Remove a node from its cluster, driving the departure hooks.
    ///
    /// Hook order: `node_leaving` on the removed node, `promote_master` when
    /// the removed node was the master, `resync` over the mutated cluster.
    /// Any hook failure rolls the mutation back.
    pub async fn unregister_node(&self, node_id: &str, hooks: &dyn NodeDeparture) -> Result<()> {
        let cluster_id = self.cluster_id_of(node_id).await?;
        let mut tx = self.save(&cluster_id).await?;

        let position = tx
            .nodes
            .iter()
            .position(|n| n.id == node_id)
            .ok_or_else(|| CairnError::NotFound(node_id.to_string()))?;
        let removed = tx.nodes.remove(position);

        hooks.node_leaving(&removed).await?;

        if removed.master && !tx.nodes.is_empty() {
            // Highest quality survives; ties resolve to the smaller id.
            let successor = tx
                .nodes
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.quality.cmp(&b.quality).then(b.id.cmp(&a.id)))
                .map(|(i, _)| i)
                .expect("non-empty node list");

            let mut node = tx.nodes.remove(successor);
            node.master = true;
            tx.nodes.insert(0, node);

            hooks.promote_master(&tx.nodes[0]).await?;
        }

        hooks.resync(&mut *tx).await?;
        tx.commit()
    }

    /// Set or clear the admin freeze flag.
    pub async fn set_freeze(&self, cluster_id: &str, frozen: bool) -> Result<()> {
        let mut tx = self.save(cluster_id).await?;
        tx.frozen = frozen;
        tx.commit()
    }

    /// Reverse lookup: which cluster owns this node.
    pub async fn cluster_id_of(&self, node_id: &str) -> Result<String> {
        let cells: Vec<(String, ClusterCell)> = self
            .clusters
            .read()
            .iter()
            .map(|(id, cell)| (id.clone(), Arc::clone(cell)))
            .collect();

        for (id, cell) in cells {
            if cell.lock().await.nodes.iter().any(|n| n.id == node_id) {
                return Ok(id);
            }
        }
        Err(CairnError::NotFound(node_id.to_string()))
    }
}

/// Exclusive write transaction on a single cluster.
///
/// Mutations apply to a working copy; `commit` persists it and publishes it
/// to readers. Dropping the transaction without committing rolls back.
pub struct ClusterTx {
    db: Arc<DB>,
    guard: OwnedMutexGuard<Cluster>,
    working: Cluster,
}

impl ClusterTx {
    pub fn commit(mut self) -> Result<()> {
        self.db
            .put(self.working.id.as_bytes(), bincode::serialize(&self.working)?)?;
        *self.guard = self.working;
        Ok(())
    }
}

impl Deref for ClusterTx {
    type Target = Cluster;

    fn deref(&self) -> &Cluster {
        &self.working
    }
}

impl DerefMut for ClusterTx {
    fn deref_mut(&mut self) -> &mut Cluster {
        &mut self.working
    }
}

/// Exclusive write transaction over the whole catalog.
pub struct CatalogTx {
    db: Arc<DB>,
    guards: Vec<OwnedMutexGuard<Cluster>>,
    workings: Vec<Cluster>,
}

impl CatalogTx {
    /// Working copies, in ascending cluster-id order.
    pub fn clusters(&self) -> &[Cluster] {
        &self.workings
    }

    /// Mutable working copies, in ascending cluster-id order.
    pub fn clusters_mut(&mut self) -> &mut [Cluster] {
        &mut self.workings
    }

    pub fn commit(mut self) -> Result<()> {
        let mut batch = WriteBatch::default();
        for working in &self.workings {
            batch.put(working.id.as_bytes(), bincode::serialize(working)?);
        }
        self.db.write(batch)?;

        for (guard, working) in self.guards.iter_mut().zip(self.workings.drain(..)) {
            **guard = working;
        }
        Ok(())
    }
}

/// Pending removal of a cluster.
pub struct UnregisterTx<'a> {
    catalog: &'a Catalog,
    id: String,
    guard: OwnedMutexGuard<Cluster>,
}

impl UnregisterTx<'_> {
    pub fn cluster(&self) -> &Cluster {
        &self.guard
    }

    pub fn commit(self) -> Result<()> {
        self.catalog.db.delete(self.id.as_bytes())?;
        self.catalog.clusters.write().remove(&self.id);
        debug!(cluster_id = %self.id, "Cluster unregistered");
        Ok(())
    }
}
