// Shared fixtures for integration tests.

pub mod sim;

use async_trait::async_trait;
use cairn::catalog::Catalog;
use cairn::config::{HealthConfig, ManagerConfig};
use cairn::error::{CairnError, Result};
use cairn::head::ClusterFinder;
use cairn::index::PlacementIndex;
use cairn::manager::{ClusterManager, HealthEngine};
use cairn::types::{Cluster, MapType, Node};
use sim::SimNet;
use std::sync::Arc;
use tempfile::TempDir;

pub const MIB: u64 = 1024 * 1024;

/// A manager wired against the simulated fleet, catalog on a temp dir.
pub struct TestBed {
    pub net: Arc<SimNet>,
    pub manager: Arc<ClusterManager>,
    _catalog_dir: TempDir,
}

pub fn testbed() -> TestBed {
    testbed_with_ttl(std::time::Duration::from_secs(15 * 60))
}

pub fn testbed_with_ttl(reservation_ttl: std::time::Duration) -> TestBed {
    let catalog_dir = tempfile::tempdir().expect("temp catalog dir");
    let net = SimNet::new();

    let catalog = Arc::new(Catalog::open(catalog_dir.path()).expect("open catalog"));
    let index = Arc::new(PlacementIndex::new());
    let health = Arc::new(HealthEngine::new(
        Arc::clone(&catalog),
        Arc::clone(&index),
        net.clone(),
        HealthConfig {
            probe_enabled: false,
            ..HealthConfig::default()
        },
    ));
    let manager = Arc::new(ClusterManager::new(
        catalog,
        index,
        net.clone(),
        health,
        ManagerConfig {
            catalog_dir: catalog_dir.path().to_path_buf(),
            reservation_ttl,
            ..ManagerConfig::default()
        },
    ));

    TestBed {
        net,
        manager,
        _catalog_dir: catalog_dir,
    }
}

impl TestBed {
    /// Put a cluster with the given id straight into the catalog, backing
    /// every node with a live simulated data node.
    pub fn install_cluster(&self, cluster_id: &str, size: u64, node_count: usize) -> Cluster {
        let mut cluster = Cluster::new(cluster_id.to_string(), size);
        for i in 0..node_count {
            let address = format!("{}-n{}.local:9430", cluster_id, i);
            self.net
                .add_node(&address, &format!("hw-{}-{}", cluster_id, i), size);
            cluster.nodes.push(Node {
                id: format!("{}-n{}", cluster_id, i),
                address,
                master: i == 0,
                quality: -(i as i64),
            });
        }

        self.manager
            .catalog()
            .register_cluster(cluster.clone())
            .expect("register cluster");
        cluster
    }

    pub fn master_address(&self, cluster: &Cluster) -> String {
        cluster.master().expect("cluster has a master").address.clone()
    }
}

/// In-process stand-in for the head's HTTP lookup: a hash nobody owns
/// becomes "use the reserved slot", exactly like the client's 404 mapping.
pub struct LocalFinder {
    pub manager: Arc<ClusterManager>,
}

#[async_trait]
impl ClusterFinder for LocalFinder {
    async fn find_cluster(&self, hash: &str) -> Result<(String, String)> {
        match self.manager.find(hash, MapType::Create).await {
            Err(CairnError::NotFound(_)) => Err(CairnError::NoAvailableActionNode),
            other => other,
        }
    }
}
