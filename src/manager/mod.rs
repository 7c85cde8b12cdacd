//! Manager-side cluster coordination engine.
//!
//! The [`ClusterManager`] owns the global catalog of storage clusters and
//! decides where every chunk lives. It drives cluster lifecycle (register,
//! unregister, node membership), the two-phase reservation protocol, the
//! placement lookup used by heads, and the maintenance operations (move,
//! balance, snapshots, consistency check).

mod balance;
mod consistency;
mod health;
mod reservation;
pub mod server;

pub use balance::ClusterBalancer;
pub use consistency::{check_consistency, normalize, FileRecord, FolderRecord, MetadataCursor};
pub use health::HealthEngine;
pub use reservation::ReservationTracker;

use crate::catalog::{Catalog, NodeDeparture};
use crate::config::ManagerConfig;
use crate::datanode::DataNodeProvider;
use crate::error::{CairnError, Result};
use crate::index::PlacementIndex;
use crate::types::{Cluster, Clusters, MapType, Node, ReservationMap};
use async_trait::async_trait;
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct ClusterManager {
    catalog: Arc<Catalog>,
    index: Arc<PlacementIndex>,
    nodes: Arc<dyn DataNodeProvider>,
    health: Arc<HealthEngine>,
    reservations: ReservationTracker,
    config: ManagerConfig,
}

impl ClusterManager {
    pub fn new(
        catalog: Arc<Catalog>,
        index: Arc<PlacementIndex>,
        nodes: Arc<dyn DataNodeProvider>,
        health: Arc<HealthEngine>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            catalog,
            index,
            nodes,
            health,
            reservations: ReservationTracker::new(),
            config,
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn index(&self) -> &Arc<PlacementIndex> {
        &self.index
    }

    pub fn health(&self) -> &Arc<HealthEngine> {
        &self.health
    }

    // ------------------------------------------------------------------
    // Cluster lifecycle
    // ------------------------------------------------------------------

    /// Create a cluster from a set of node addresses. The first address
    /// becomes the master.
    pub async fn register(&self, node_addresses: &[String]) -> Result<Cluster> {
        let mut cluster = Cluster::new(Uuid::new_v4().simple().to_string(), 0);

        let (nodes, cluster_size) = self.prepare_nodes(node_addresses, 0).await?;
        cluster.size = cluster_size;
        cluster.nodes = nodes;

        let mut master_address = String::new();
        for (i, node) in cluster.nodes.iter_mut().enumerate() {
            let join_target = master_address.clone();

            if i == 0 {
                node.master = true;
                master_address = node.address.clone();
            }

            let proxy = self.nodes.acquire(&node.address);
            if !proxy.join(&cluster.id, &node.id, &join_target).await? {
                return Err(CairnError::Join(node.address.clone()));
            }
        }

        self.catalog.register_cluster(cluster.clone())?;
        info!(cluster_id = %cluster.id, nodes = cluster.nodes.len(), "Cluster registered");

        Ok(cluster)
    }

    /// Add nodes to an existing cluster as slaves of its current master.
    pub async fn register_nodes_to(
        &self,
        cluster_id: &str,
        node_addresses: &[String],
    ) -> Result<()> {
        // Probing prospective nodes scans the whole catalog, so it runs
        // before this cluster's lock is taken.
        let snapshot = self.catalog.get(cluster_id).await?;
        let master_address = snapshot
            .master()
            .map(|m| m.address.clone())
            .ok_or_else(|| CairnError::Join(cluster_id.to_string()))?;

        let (nodes, _) = self.prepare_nodes(node_addresses, snapshot.size).await?;
        for node in &nodes {
            let proxy = self.nodes.acquire(&node.address);
            if !proxy.join(cluster_id, &node.id, &master_address).await? {
                return Err(CairnError::Join(node.address.clone()));
            }
        }

        let mut tx = self.catalog.save(cluster_id).await?;
        tx.nodes.extend(nodes);
        tx.commit()
    }

    /// Probe, size-check and identify a batch of prospective nodes.
    async fn prepare_nodes(
        &self,
        node_addresses: &[String],
        mut cluster_size: u64,
    ) -> Result<(Vec<Node>, u64)> {
        let mut nodes: Vec<Node> = Vec::with_capacity(node_addresses.len());

        for address in node_addresses {
            if nodes.iter().any(|n| &n.address == address) {
                return Err(CairnError::InvalidArgument(format!(
                    "node address entered twice: {}",
                    address
                )));
            }

            let proxy = self.nodes.acquire(address);
            proxy
                .ping()
                .await
                .map_err(|_| CairnError::Ping(address.clone()))?;

            let size = proxy.size().await?;
            if cluster_size > 0 && size != cluster_size {
                return Err(CairnError::SizeMismatch {
                    expected: cluster_size,
                    actual: size,
                });
            }
            cluster_size = size;

            let hardware_id = proxy.hardware_id().await?;
            let node_id = crate::types::node_id(&hardware_id, address, cluster_size);

            match self.catalog.cluster_id_of(&node_id).await {
                Err(CairnError::NotFound(_)) => {}
                Ok(_) => return Err(CairnError::Registered(node_id)),
                Err(e) => return Err(e),
            }

            nodes.push(Node {
                id: node_id,
                address: address.clone(),
                master: false,
                quality: 0,
            });
        }

        Ok((nodes, cluster_size))
    }

    /// Remove a cluster: forget its placements, wipe its nodes, drop it
    /// from the catalog.
    pub async fn unregister_cluster(&self, cluster_id: &str) -> Result<()> {
        let tx = self.catalog.unregister_cluster(cluster_id).await?;

        self.index.replace(cluster_id, Vec::<String>::new());

        for node in &tx.cluster().nodes {
            let proxy = self.nodes.acquire(&node.address);
            if let Err(e) = proxy.wipe().await {
                warn!(node_id = %node.id, error = %e, "Wipe failed during unregistration");
            }
        }

        tx.commit()
    }

    /// Remove a single node, promoting a survivor when the master leaves.
    pub async fn unregister_node(&self, node_id: &str) -> Result<()> {
        self.catalog
            .unregister_node(node_id, &DepartureEffects { manager: self })
            .await
    }

    pub async fn get_clusters(&self) -> Result<Clusters> {
        self.catalog.get_all().await
    }

    pub async fn get_cluster(&self, cluster_id: &str) -> Result<Cluster> {
        self.catalog.get(cluster_id).await
    }

    // ------------------------------------------------------------------
    // Reservation protocol
    // ------------------------------------------------------------------

    /// Claim capacity across clusters for an upload of `size` bytes.
    pub async fn reserve(&self, size: u64) -> Result<ReservationMap> {
        let mut tx = self.catalog.save_all().await?;
        let map = reservation::plan(size, tx.clusters_mut())?;
        tx.commit()?;

        self.reservations.track(&map.id);
        counter!("cairn_reservations_total").increment(1);
        info!(reservation_id = %map.id, size, slots = map.clusters.len(), "Reserved");

        Ok(map)
    }

    /// Settle a reservation: account consumed bytes per cluster and drop
    /// the claim. Deduplicated chunks make `cluster_usage` smaller than the
    /// reserved total.
    pub async fn commit(&self, reservation_id: &str, cluster_usage: &HashMap<String, u64>) -> Result<()> {
        let mut tx = self.catalog.save_all().await?;

        let known = tx
            .clusters()
            .iter()
            .any(|c| c.reservations.contains_key(reservation_id));
        if !known {
            return Err(CairnError::ReservationNotFound(reservation_id.to_string()));
        }

        for cluster in tx.clusters_mut() {
            let consumed = cluster_usage.get(&cluster.id).copied().unwrap_or(0);
            cluster.commit(reservation_id, consumed);
        }
        tx.commit()?;

        self.reservations.untrack(reservation_id);
        counter!("cairn_commits_total").increment(1);
        Ok(())
    }

    /// Abandon a reservation without accounting any usage.
    pub async fn discard(&self, reservation_id: &str) -> Result<()> {
        let mut tx = self.catalog.save_all().await?;
        for cluster in tx.clusters_mut() {
            cluster.discard(reservation_id);
        }
        tx.commit()?;

        self.reservations.untrack(reservation_id);
        counter!("cairn_discards_total").increment(1);
        Ok(())
    }

    /// Discard reservations older than the configured TTL.
    pub async fn sweep_expired_reservations(&self) {
        for reservation_id in self.reservations.take_expired(self.config.reservation_ttl) {
            warn!(reservation_id = %reservation_id, "Reservation expired, discarding");
            if let Err(e) = self.discard(&reservation_id).await {
                error!(reservation_id = %reservation_id, error = %e, "Expiry discard failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Placement lookup
    // ------------------------------------------------------------------

    /// Locate a hash: which cluster owns it and which node to talk to.
    ///
    /// Reads go to the best replica; creates and deletes to the master.
    pub async fn find(&self, hash: &str, map_type: MapType) -> Result<(String, String)> {
        let clusters = self.catalog.get_all().await?;
        let cluster_ids: Vec<String> = clusters.iter().map(|c| c.id.clone()).collect();

        let cluster_id = self.index.find(&cluster_ids, hash)?;
        let cluster = clusters
            .iter()
            .find(|c| c.id == cluster_id)
            .expect("find returned a cataloged cluster");

        if cluster.paralyzed {
            return Err(CairnError::NoAvailableClusterNode(cluster_id));
        }

        let node = match map_type {
            MapType::Read => cluster.high_quality_node(),
            _ => cluster.master(),
        };

        node.map(|n| (cluster_id.clone(), n.address.clone()))
            .ok_or(CairnError::NoAvailableActionNode)
    }

    /// Bulk [`ClusterManager::find`]: hash to node address. Deletes
    /// tolerate hashes nobody owns.
    pub async fn map(
        &self,
        hashes: &[String],
        map_type: MapType,
    ) -> Result<HashMap<String, String>> {
        let mut mapping = HashMap::with_capacity(hashes.len());
        for hash in hashes {
            match self.find(hash, map_type).await {
                Ok((_, address)) => {
                    mapping.insert(hash.clone(), address);
                }
                Err(CairnError::NotFound(_)) if map_type == MapType::Delete => {}
                Err(e) => return Err(e),
            }
        }
        Ok(mapping)
    }

    // ------------------------------------------------------------------
    // Maintenance operations
    // ------------------------------------------------------------------

    /// Drain one cluster into another.
    ///
    /// Both clusters freeze for the duration; the source keeps its freeze
    /// afterwards so it can be retired. Per-hash failures accumulate into a
    /// single sync error instead of aborting the drain.
    pub async fn move_cluster(&self, source_id: &str, target_id: &str) -> Result<()> {
        let source = self.catalog.get(source_id).await?;
        if source.used > 0 && source.frozen {
            return Err(CairnError::NotAvailableForClusterAction(source_id.into()));
        }
        self.catalog.set_freeze(source_id, true).await?;

        let target = self.catalog.get(target_id).await?;
        if target.used > 0 && target.frozen {
            return Err(CairnError::NotAvailableForClusterAction(target_id.into()));
        }
        self.catalog.set_freeze(target_id, true).await?;

        if source.used > target.available() {
            return Err(CairnError::NoSpace(source.used));
        }

        let source_master = source
            .master()
            .ok_or(CairnError::NoAvailableActionNode)?
            .clone();
        let target_master = target
            .master()
            .ok_or(CairnError::NoAvailableActionNode)?
            .clone();

        let source_proxy = self.nodes.acquire(&source_master.address);
        let target_proxy = self.nodes.acquire(&target_master.address);

        let container = match source_proxy.sync_list().await {
            Ok(container) => container,
            Err(e) => {
                error!(
                    node_id = %source_master.id,
                    address = %source_master.address,
                    error = %e,
                    "Unable to get sync list from data node"
                );
                return Err(CairnError::Ping(source_master.address.clone()));
            }
        };

        // A moved master must not carry snapshots into the target; losing
        // them here is required for a clean move.
        for i in (0..container.snapshots.len()).rev() {
            if !source_proxy.snapshot_delete(i as u64).await.unwrap_or(false) {
                error!(
                    node_id = %source_master.id,
                    address = %source_master.address,
                    "Unable to drop snapshots, the move must fail"
                );
                return Err(CairnError::Snapshot(source_id.to_string()));
            }
        }

        let mut sync_err = None;
        for hash in container.file_items.keys() {
            let moved = target_proxy
                .sync_move(hash, &source_master.address)
                .await
                .unwrap_or(false);
            if !moved {
                sync_err = Some(CairnError::Sync(format!(
                    "move {} -> {}",
                    source_id, target_id
                )));
            }
        }

        let (source_sync, target_sync) = tokio::join!(
            self.health.sync_cluster(source_id, true),
            self.health.sync_cluster(target_id, false),
        );
        if let Err(e) = source_sync {
            warn!(cluster_id = %source_id, error = %e, "Source resync reported errors");
        }
        if let Err(e) = target_sync {
            warn!(cluster_id = %target_id, error = %e, "Target resync reported errors");
        }

        match sync_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Even out committed bytes across the given clusters (all when empty).
    pub async fn balance_clusters(&self, cluster_ids: &[String]) -> Result<()> {
        ClusterBalancer::new(
            Arc::clone(&self.catalog),
            Arc::clone(&self.index),
            Arc::clone(&self.nodes),
        )
        .balance(cluster_ids)
        .await
    }

    /// Clear the admin freeze on the given clusters (all when empty).
    pub async fn unfreeze_clusters(&self, cluster_ids: &[String]) -> Result<()> {
        let ids = if cluster_ids.is_empty() {
            self.catalog.ids()
        } else {
            cluster_ids.to_vec()
        };

        for id in ids {
            self.catalog.set_freeze(&id, false).await?;
        }
        Ok(())
    }

    pub async fn create_snapshot(&self, cluster_id: &str) -> Result<()> {
        let cluster = self.catalog.get(cluster_id).await?;
        let master = cluster.master().ok_or(CairnError::NoAvailableActionNode)?;

        let proxy = self.nodes.acquire(&master.address);
        if !proxy.snapshot_create().await? {
            return Err(CairnError::Snapshot(cluster_id.to_string()));
        }

        self.health.sync_cluster(cluster_id, false).await
    }

    pub async fn delete_snapshot(&self, cluster_id: &str, snapshot_index: u64) -> Result<()> {
        let cluster = self.catalog.get(cluster_id).await?;
        let master = cluster.master().ok_or(CairnError::NoAvailableActionNode)?;

        let proxy = self.nodes.acquire(&master.address);
        if !proxy.snapshot_delete(snapshot_index).await? {
            return Err(CairnError::Snapshot(cluster_id.to_string()));
        }

        self.health.sync_cluster(cluster_id, false).await
    }

    pub async fn restore_snapshot(&self, cluster_id: &str, snapshot_index: u64) -> Result<()> {
        let cluster = self.catalog.get(cluster_id).await?;
        let master = cluster.master().ok_or(CairnError::NoAvailableActionNode)?;

        let proxy = self.nodes.acquire(&master.address);
        if !proxy.snapshot_restore(snapshot_index).await? {
            return Err(CairnError::Snapshot(cluster_id.to_string()));
        }

        self.health.sync_cluster(cluster_id, false).await
    }

    /// Resync one cluster from its master.
    pub async fn sync_cluster(&self, cluster_id: &str) -> Result<()> {
        let cluster = self.catalog.get(cluster_id).await?;
        self.health.sync_cluster(cluster_id, cluster.frozen).await
    }

    /// Resync every cluster; failures are collected per cluster.
    pub async fn sync_clusters(&self) -> Vec<(String, CairnError)> {
        let clusters = match self.catalog.get_all().await {
            Ok(clusters) => clusters,
            Err(e) => return vec![("catalog".to_string(), e)],
        };

        let mut failures = Vec::new();
        for cluster in clusters {
            if let Err(e) = self.health.sync_cluster(&cluster.id, cluster.frozen).await {
                failures.push((cluster.id.clone(), e));
            }
        }
        failures
    }

    /// Verify the file tree against the placement index, marking files
    /// whose chunks are gone as degraded.
    pub async fn check_consistency(&self, cursor: &dyn MetadataCursor) -> Result<()> {
        check_consistency(cursor, &self.catalog, &self.index).await
    }
}

/// Node-removal effects wired into the catalog transaction.
struct DepartureEffects<'a> {
    manager: &'a ClusterManager,
}

#[async_trait]
impl NodeDeparture for DepartureEffects<'_> {
    async fn node_leaving(&self, node: &Node) -> Result<()> {
        let proxy = self.manager.nodes.acquire(&node.address);
        match proxy.leave().await {
            Ok(true) => Ok(()),
            _ => Err(CairnError::Mode(node.address.clone())),
        }
    }

    async fn promote_master(&self, node: &Node) -> Result<()> {
        let proxy = self.manager.nodes.acquire(&node.address);
        match proxy.mode(true).await {
            Ok(true) => Ok(()),
            _ => Err(CairnError::Mode(node.address.clone())),
        }
    }

    async fn resync(&self, cluster: &mut Cluster) -> Result<()> {
        self.manager.health.sync_cluster_mut(cluster, false).await
    }
}
