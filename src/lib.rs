//! Cairn - control plane for a distributed, content-addressed file store.
//!
//! Cairn coordinates a fleet of storage clusters: small replication groups
//! with one master and zero or more slaves, all of equal raw capacity.
//! Chunks are addressed by their SHA-512/256 content hash and identical
//! content is stored once per cluster.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Cairn                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Head: write pipeline | placement lookup | manager client   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Manager: catalog | placement index | reservations | admin  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Health: master sync | slave catch-up | election | probes   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Data nodes: framed TCP proxies (create, sync, snapshots)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writers claim capacity with a two-phase reservation: `reserve` splits the
//! upload into block-sized slots across the least-loaded clusters, the head
//! uploads every slot in parallel, and `commit` settles the bytes that
//! actually consumed space — deduplicated chunks are free. Failures discard
//! the reservation and roll the uploaded chunks back.
//!
//! # Quick Start
//!
//! ```no_run
//! use cairn::config::CairnConfig;
//!
//! #[tokio::main]
//! async fn main() -> cairn::Result<()> {
//!     let config = CairnConfig::development();
//!     cairn::run(config).await
//! }
//! ```

pub mod catalog;
pub mod cli;
pub mod client;
pub mod config;
pub mod datanode;
pub mod error;
pub mod head;
pub mod index;
pub mod manager;
pub mod observability;
pub mod shutdown;
pub mod types;

// Re-exports
pub use error::{CairnError, Result};
pub use types::*;

use crate::catalog::Catalog;
use crate::client::ManagerClient;
use crate::config::CairnConfig;
use crate::datanode::TcpDataNodeProvider;
use crate::head::HeadNode;
use crate::index::PlacementIndex;
use crate::manager::{ClusterManager, HealthEngine};
use crate::shutdown::{ShutdownCoordinator, SignalHandler};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Run the manager with the given configuration.
pub async fn run(config: CairnConfig) -> Result<()> {
    info!("Starting Cairn node: {}", config.node.name);

    observability::init(&config.observability)?;

    std::fs::create_dir_all(&config.manager.catalog_dir)?;

    let catalog = Arc::new(Catalog::open(&config.manager.catalog_dir)?);
    let index = Arc::new(PlacementIndex::new());
    let nodes = Arc::new(TcpDataNodeProvider);
    let health = Arc::new(HealthEngine::new(
        Arc::clone(&catalog),
        Arc::clone(&index),
        nodes.clone(),
        config.health.clone(),
    ));
    let manager = Arc::new(ClusterManager::new(
        catalog,
        index,
        nodes,
        health,
        config.manager.clone(),
    ));

    // The placement index lives in memory; rebuild it from the masters.
    for (cluster_id, err) in manager.sync_clusters().await {
        warn!(cluster_id = %cluster_id, error = %err, "Startup sync failed");
    }

    let coordinator = ShutdownCoordinator::new();
    let mut handles = Vec::new();

    {
        info!("Starting manager service on {}", config.manager.bind_addr);
        let router = manager::server::router(Arc::clone(&manager), None);
        let bind_addr = config.manager.bind_addr;
        let handle = tokio::spawn(async move {
            if let Err(e) = manager::server::run(bind_addr, router).await {
                error!("Manager server error: {}", e);
            }
        });
        handles.push(("manager", handle));
    }

    if config.health.probe_enabled {
        let manager = Arc::clone(&manager);
        let interval = config.health.probe_interval;
        let shutdown = coordinator.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => manager.health().probe_round().await,
                    _ = shutdown.wait_for_shutdown() => break,
                }
            }
        });
        handles.push(("health-probe", handle));
    }

    {
        let manager = Arc::clone(&manager);
        let interval = config.manager.reservation_sweep_interval;
        let shutdown = coordinator.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => manager.sweep_expired_reservations().await,
                    _ = shutdown.wait_for_shutdown() => break,
                }
            }
        });
        handles.push(("reservation-sweep", handle));
    }

    if config.observability.metrics_enabled {
        info!("Starting metrics server on {}", config.observability.metrics_addr);
        let obs_config = config.observability.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = observability::run_metrics_server(obs_config).await {
                error!("Metrics server error: {}", e);
            }
        });
        handles.push(("metrics", handle));
    }

    let signal_coordinator = coordinator.clone();
    tokio::spawn(async move {
        SignalHandler::new(signal_coordinator).run().await;
    });

    coordinator.wait_for_shutdown().await;

    info!("Shutting down Cairn gracefully...");
    for (name, handle) in handles {
        if !handle.is_finished() {
            warn!(service = %name, "Force aborting service");
            handle.abort();
        }
    }

    info!("Cairn shutdown complete");
    Ok(())
}

/// Build a head service against the configured manager.
pub fn head_node(config: &CairnConfig) -> HeadNode {
    let manager = Arc::new(ManagerClient::new(config.head.manager_addr.clone()));
    HeadNode::new(manager, Arc::new(TcpDataNodeProvider))
}
