//! Cluster health: master sync, slave catch-up, election, paralysis.
//!
//! A cluster whose master cannot be reached, or whose sync keeps failing,
//! is marked paralyzed; the placement lookup refuses paralyzed clusters
//! until a later sync round heals them. One bad slave never aborts a sync —
//! failures are collected and reported as a single error at the end.

use crate::catalog::Catalog;
use crate::config::HealthConfig;
use crate::datanode::DataNodeProvider;
use crate::error::{CairnError, Result};
use crate::index::PlacementIndex;
use crate::types::{Cluster, SyncContainer};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub struct HealthEngine {
    catalog: Arc<Catalog>,
    index: Arc<PlacementIndex>,
    nodes: Arc<dyn DataNodeProvider>,
    config: HealthConfig,
}

impl HealthEngine {
    pub fn new(
        catalog: Arc<Catalog>,
        index: Arc<PlacementIndex>,
        nodes: Arc<dyn DataNodeProvider>,
        config: HealthConfig,
    ) -> Self {
        Self {
            catalog,
            index,
            nodes,
            config,
        }
    }

    /// Bring a cluster back in step with its master.
    ///
    /// The master's inventory becomes the placement truth for the cluster,
    /// every slave pulls a full copy, and the catalog entry is refreshed
    /// (used bytes, snapshots, paralysis). `keep_frozen` leaves the admin
    /// freeze in place, which move uses to retire the drained source.
    pub async fn sync_cluster(&self, cluster_id: &str, keep_frozen: bool) -> Result<()> {
        let mut tx = self.catalog.save(cluster_id).await?;
        let outcome = self.sync_cluster_mut(&mut *tx, keep_frozen).await;
        // Persist the outcome either way; a failed sync must record the
        // paralysis it caused.
        tx.commit()?;
        outcome
    }

    /// Transaction-level sync: mutates the caller's working copy instead of
    /// taking the cluster lock, so it can run inside catalog transactions
    /// (node unregistration runs it while holding the cluster).
    pub(crate) async fn sync_cluster_mut(
        &self,
        cluster: &mut Cluster,
        keep_frozen: bool,
    ) -> Result<()> {
        let master = cluster
            .master()
            .cloned()
            .ok_or_else(|| CairnError::Join(cluster.id.clone()))?;

        let master_proxy = self.nodes.acquire(&master.address);
        match master_proxy.join(&cluster.id, &master.id, "").await {
            Ok(true) => {}
            Ok(false) => return Err(CairnError::Join(master.address.clone())),
            Err(e) => {
                // Unreachable master: the cluster cannot serve until a
                // probe or a later sync brings it back.
                cluster.paralyzed = true;
                warn!(cluster_id = %cluster.id, "Cluster marked paralyzed");
                return Err(e);
            }
        }

        let container = match self.sync_list_with_retries(&cluster.id, &master.address).await {
            Ok(container) => container,
            Err(err) => {
                cluster.paralyzed = true;
                warn!(cluster_id = %cluster.id, "Cluster marked paralyzed");
                return Err(err);
            }
        };

        self.index
            .replace(&cluster.id, container.file_items.keys().cloned());

        let mut catchups = JoinSet::new();
        for slave in cluster.nodes.iter().filter(|n| !n.master) {
            let proxy = self.nodes.acquire(&slave.address);
            let cluster_id = cluster.id.clone();
            let slave_id = slave.id.clone();
            let master_address = master.address.clone();
            catchups.spawn(async move {
                let joined = proxy
                    .join(&cluster_id, &slave_id, &master_address)
                    .await
                    .unwrap_or(false);
                let synced = joined && proxy.sync_full(&master_address).await.unwrap_or(false);
                (slave_id, synced)
            });
        }

        let mut failed_slaves = Vec::new();
        while let Some(joined) = catchups.join_next().await {
            match joined {
                Ok((_, true)) => {}
                Ok((slave_id, false)) => {
                    warn!(cluster_id = %cluster.id, slave_id = %slave_id, "Slave catch-up failed");
                    failed_slaves.push(slave_id);
                }
                Err(e) => {
                    warn!(cluster_id = %cluster.id, error = %e, "Slave catch-up task panicked");
                    failed_slaves.push("unknown".to_string());
                }
            }
        }

        cluster.paralyzed = false;
        if !keep_frozen {
            cluster.frozen = false;
        }
        cluster.used = container.file_items.values().map(|f| f.size).sum();
        cluster.snapshots = container.snapshots;

        debug!(cluster_id = %cluster.id, used = cluster.used, "Cluster synchronized");

        if failed_slaves.is_empty() {
            Ok(())
        } else {
            Err(CairnError::Sync(format!(
                "slaves failed to catch up: {}",
                failed_slaves.join(", ")
            )))
        }
    }

    async fn sync_list_with_retries(
        &self,
        cluster_id: &str,
        master_address: &str,
    ) -> Result<SyncContainer> {
        let proxy = self.nodes.acquire(master_address);
        let mut last = CairnError::Sync(cluster_id.to_string());
        for attempt in 0..self.config.sync_retries.max(1) {
            match proxy.sync_list().await {
                Ok(container) => return Ok(container),
                Err(err) => {
                    warn!(cluster_id, attempt, error = %err, "Sync list failed, requeueing");
                    last = err;
                }
            }
        }
        Err(last)
    }

    /// One probe round over the whole catalog: refresh node quality from
    /// ping RTTs, elect a new master where the old one is gone, and retry
    /// paralyzed clusters.
    pub async fn probe_round(&self) {
        let clusters = match self.catalog.get_all().await {
            Ok(clusters) => clusters,
            Err(e) => {
                warn!(error = %e, "Probe round could not read catalog");
                return;
            }
        };

        for cluster in clusters {
            if let Err(e) = self.probe_cluster(&cluster).await {
                warn!(cluster_id = %cluster.id, error = %e, "Probe failed");
            }
        }
    }

    async fn probe_cluster(&self, cluster: &Cluster) -> Result<()> {
        if cluster.nodes.is_empty() {
            return Ok(());
        }

        let mut master_alive = false;
        let mut reachable = 0usize;
        let mut qualities = Vec::with_capacity(cluster.nodes.len());
        for node in &cluster.nodes {
            let proxy = self.nodes.acquire(&node.address);
            match proxy.ping().await {
                Ok(rtt) => {
                    reachable += 1;
                    if node.master {
                        master_alive = true;
                    }
                    qualities.push((node.id.clone(), -(rtt.as_micros() as i64)));
                }
                Err(_) => {
                    qualities.push((node.id.clone(), i64::MIN));
                }
            }
        }

        {
            let mut tx = self.catalog.save(&cluster.id).await?;
            for (node_id, quality) in &qualities {
                if let Some(node) = tx.nodes.iter_mut().find(|n| n.id == *node_id) {
                    node.quality = *quality;
                }
            }
            tx.commit()?;
        }

        if master_alive {
            if cluster.paralyzed {
                // Master is back; a sync clears the paralysis.
                self.sync_cluster(&cluster.id, cluster.frozen).await?;
            }
            return Ok(());
        }

        if reachable == 0 {
            let mut tx = self.catalog.save(&cluster.id).await?;
            tx.paralyzed = true;
            tx.commit()?;
            warn!(cluster_id = %cluster.id, "Cluster marked paralyzed");
            return Err(CairnError::NoAvailableClusterNode(cluster.id.clone()));
        }

        self.elect_master(&cluster.id).await
    }

    /// Promote the best surviving node: highest quality, ties to the
    /// smaller node id. The winner moves to the head of the node list.
    pub async fn elect_master(&self, cluster_id: &str) -> Result<()> {
        let keep_frozen;
        {
            let mut tx = self.catalog.save(cluster_id).await?;

            let winner = tx
                .nodes
                .iter()
                .filter(|n| n.quality > i64::MIN)
                .max_by(|a, b| a.quality.cmp(&b.quality).then(b.id.cmp(&a.id)))
                .map(|n| n.id.clone())
                .ok_or_else(|| CairnError::NoAvailableClusterNode(cluster_id.to_string()))?;

            let position = tx
                .nodes
                .iter()
                .position(|n| n.id == winner)
                .expect("winner is a member");

            let proxy = self.nodes.acquire(&tx.nodes[position].address);
            if !proxy.mode(true).await? {
                return Err(CairnError::Mode(tx.nodes[position].address.clone()));
            }

            for node in tx.nodes.iter().filter(|n| n.id != winner) {
                let proxy = self.nodes.acquire(&node.address);
                if let Err(e) = proxy.mode(false).await {
                    debug!(node_id = %node.id, error = %e, "Demotion not acknowledged");
                }
            }

            for node in tx.nodes.iter_mut() {
                node.master = false;
            }
            let mut node = tx.nodes.remove(position);
            node.master = true;
            tx.nodes.insert(0, node);
            keep_frozen = tx.frozen;
            tx.commit()?;

            info!(cluster_id, master = %winner, "New master elected");
        }

        self.sync_cluster(cluster_id, keep_frozen).await
    }
}
