//! Core type definitions for the Cairn control plane.
//!
//! This module contains the fundamental data types shared by the manager and
//! head services: storage nodes, replication clusters, reservations, and
//! content-addressed chunks.
//!
//! # Key Types
//!
//! - [`Cluster`]: a master+slaves replication group of equal-capacity nodes
//! - [`Node`]: a single storage endpoint within a cluster
//! - [`ReservationMap`]: the two-phase space claim handed to a writer
//! - [`DataChunk`]: a stored chunk addressed by its SHA-512/256 hash
//!
//! # Examples
//!
//! ```rust
//! use cairn::types::{Cluster, Node, BLOCK_SIZE};
//!
//! let mut cluster = Cluster::new("c1".into(), 10 * BLOCK_SIZE);
//! cluster.nodes.push(Node {
//!     id: "n1".into(),
//!     address: "10.0.0.1:9430".into(),
//!     master: true,
//!     quality: 0,
//! });
//!
//! assert_eq!(cluster.available(), 10 * BLOCK_SIZE);
//! assert_eq!(cluster.master().unwrap().id, "n1");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512_256};
use std::collections::HashMap;

/// Fixed chunk ceiling: every reservation slot is at most this many bytes.
pub const BLOCK_SIZE: u64 = 32 * 1024 * 1024;

/// Length of a hex-encoded SHA-512/256 content hash.
pub const HASH_HEX_LEN: usize = 64;

/// Hex-encoded SHA-512/256 of a chunk payload.
pub fn content_hash(data: &[u8]) -> String {
    let digest = Sha512_256::digest(data);
    hex::encode(digest)
}

/// Derive a 20-byte node identifier from the node's identity triple.
///
/// The same hardware behind the same address with the same capacity always
/// produces the same id, so re-registration is detectable.
pub fn node_id(hardware_id: &str, address: &str, size: u64) -> String {
    let mut hasher = Sha512_256::new();
    hasher.update(hardware_id.as_bytes());
    hasher.update(address.as_bytes());
    hasher.update(size.to_be_bytes());
    hex::encode(&hasher.finalize()[..20])
}

/// A storage endpoint participating in a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// 20-byte identifier derived from (hardware id, address, capacity).
    pub id: String,
    /// Reachable endpoint, host:port.
    pub address: String,
    /// Exactly one node per non-empty cluster carries this flag.
    pub master: bool,
    /// Read-replica score, higher is better; updated by health pings.
    pub quality: i64,
}

/// Snapshot descriptor held on the master data node, referenced by index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub created_at: DateTime<Utc>,
}

/// A master+slaves replication group exposing a single logical store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    /// Opaque cluster identifier.
    pub id: String,
    /// Raw capacity of each node; all nodes share the identical size.
    pub size: u64,
    /// Bytes committed.
    pub used: u64,
    /// Pending claims: reservation id to reserved bytes.
    pub reservations: HashMap<String, u64>,
    /// Admin-set flag disabling new commits.
    pub frozen: bool,
    /// Set when the master is unreachable or sync has failed.
    pub paralyzed: bool,
    /// Snapshot descriptors, mirrored from the master data node.
    pub snapshots: Vec<SnapshotInfo>,
    /// Member nodes; position 0 is the master after elections.
    pub nodes: Vec<Node>,
}

impl Cluster {
    pub fn new(id: String, size: u64) -> Self {
        Self {
            id,
            size,
            used: 0,
            reservations: HashMap::new(),
            frozen: false,
            paralyzed: false,
            snapshots: Vec::new(),
            nodes: Vec::new(),
        }
    }

    /// Bytes still claimable: capacity minus committed minus reserved.
    pub fn available(&self) -> u64 {
        let reserved: u64 = self.reservations.values().sum();
        self.size.saturating_sub(self.used).saturating_sub(reserved)
    }

    /// Committed-plus-reserved load as a fraction of capacity.
    pub fn weight(&self) -> f64 {
        if self.size == 0 {
            return 1.0;
        }
        let reserved: u64 = self.reservations.values().sum();
        (self.used + reserved) as f64 / self.size as f64
    }

    /// The current master node, if the cluster is not empty.
    pub fn master(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.master)
    }

    /// The best read replica: highest quality, falling back to the master.
    pub fn high_quality_node(&self) -> Option<&Node> {
        self.nodes
            .iter()
            .max_by(|a, b| a.quality.cmp(&b.quality).then(b.id.cmp(&a.id)))
            .or_else(|| self.master())
    }

    /// Find a member node by id.
    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    /// Apply a commit: account the consumed bytes and drop the reservation.
    ///
    /// The writer may commit less than it reserved when deduplication made
    /// some uploads free.
    pub fn commit(&mut self, reservation_id: &str, consumed: u64) {
        self.used += consumed;
        self.reservations.remove(reservation_id);
    }

    /// Drop a reservation without touching `used`.
    pub fn discard(&mut self, reservation_id: &str) {
        self.reservations.remove(reservation_id);
    }
}

/// Ordered collection of clusters, as returned by catalog snapshots.
pub type Clusters = Vec<Cluster>;

/// One slot of a reservation: a chunk-sized claim against one cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSlot {
    /// Cluster the slot is reserved on.
    pub cluster_id: String,
    /// Address of the cluster's master at reservation time.
    pub address: String,
    /// Position and size of the chunk within the file.
    pub chunk: ChunkFrame,
}

/// Position of a chunk within the uploaded byte stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkFrame {
    /// Ordinal within the file; defines reconstruction order.
    pub sequence: u16,
    /// Byte offset where the chunk starts.
    pub index: u64,
    /// Byte length, at most [`BLOCK_SIZE`].
    pub size: u32,
}

impl ChunkFrame {
    pub fn starts(&self) -> u64 {
        self.index
    }

    pub fn ends(&self) -> u64 {
        self.index + self.size as u64
    }
}

/// Transient contract for one write: where each chunk of the upload goes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationMap {
    /// Unique reservation identifier.
    pub id: String,
    /// Slots in upload order; slot sizes sum to the requested total.
    pub clusters: Vec<ClusterSlot>,
}

impl ReservationMap {
    /// Total bytes claimed across all slots.
    pub fn total(&self) -> u64 {
        self.clusters.iter().map(|s| s.chunk.size as u64).sum()
    }
}

/// A successfully stored chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataChunk {
    /// Ordinal within the file.
    pub sequence: u16,
    /// Byte length of the payload.
    pub size: u32,
    /// Hex-encoded SHA-512/256 of the payload.
    pub hash: String,
}

/// What a read or write intends to do with the located chunk.
///
/// Reads prefer the best replica; creates and deletes go to the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapType {
    Read,
    Create,
    Delete,
}

/// One file entry in a master's sync listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileItem {
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// Full inventory of a master data node: snapshots plus stored hashes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncContainer {
    pub snapshots: Vec<SnapshotInfo>,
    pub file_items: HashMap<String, FileItem>,
}

impl Default for SnapshotInfo {
    fn default() -> Self {
        Self {
            created_at: Utc::now(),
        }
    }
}
