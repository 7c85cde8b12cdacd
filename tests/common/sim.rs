// In-memory data node fleet for integration tests.
// Proxies resolve by address through a shared net, so sync ops can pull
// chunks across nodes the way the real wire protocol does.

use async_trait::async_trait;
use cairn::datanode::{CreateOutcome, DataNode, DataNodeProvider};
use cairn::error::{CairnError, Result};
use cairn::types::{content_hash, FileItem, SnapshotInfo, SyncContainer};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One stored chunk; seeded chunks carry a size without a payload.
#[derive(Clone)]
pub struct SimChunk {
    pub data: Vec<u8>,
    pub size: u64,
}

#[derive(Default)]
pub struct SimNodeState {
    pub hardware_id: String,
    pub capacity: u64,
    pub latency: Duration,
    pub chunks: Mutex<HashMap<String, SimChunk>>,
    pub snapshots: Mutex<Vec<SnapshotInfo>>,
    pub online: AtomicBool,
    pub fail_create: AtomicBool,
    pub fail_delete: AtomicBool,
}

/// The simulated network: every node addressable by its endpoint string.
#[derive(Default)]
pub struct SimNet {
    nodes: Mutex<HashMap<String, Arc<SimNodeState>>>,
}

impl SimNet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Bring a node online at the given address.
    pub fn add_node(&self, address: &str, hardware_id: &str, capacity: u64) -> Arc<SimNodeState> {
        let state = Arc::new(SimNodeState {
            hardware_id: hardware_id.to_string(),
            capacity,
            latency: Duration::from_micros(100),
            ..Default::default()
        });
        state.online.store(true, Ordering::SeqCst);
        self.nodes
            .lock()
            .insert(address.to_string(), Arc::clone(&state));
        state
    }

    pub fn node(&self, address: &str) -> Option<Arc<SimNodeState>> {
        self.nodes.lock().get(address).cloned()
    }

    pub fn take_offline(&self, address: &str) {
        if let Some(state) = self.node(address) {
            state.online.store(false, Ordering::SeqCst);
        }
    }

    /// Plant a chunk with a synthetic size, no payload needed.
    pub fn seed_chunk(&self, address: &str, hash: &str, size: u64) {
        let state = self.node(address).expect("seeding a known node");
        state.chunks.lock().insert(
            hash.to_string(),
            SimChunk {
                data: Vec::new(),
                size,
            },
        );
    }

    pub fn chunk_count(&self, address: &str) -> usize {
        self.node(address).map(|s| s.chunks.lock().len()).unwrap_or(0)
    }

}

impl DataNodeProvider for SimNet {
    fn acquire(&self, address: &str) -> Arc<dyn DataNode> {
        Arc::new(SimDataNode {
            net: self.nodes.lock().clone(),
            address: address.to_string(),
        })
    }
}

/// Proxy bound to one address; the node map snapshot keeps lookups cheap.
pub struct SimDataNode {
    net: HashMap<String, Arc<SimNodeState>>,
    address: String,
}

impl SimDataNode {
    fn state(&self) -> Result<&Arc<SimNodeState>> {
        match self.net.get(&self.address) {
            Some(state) if state.online.load(Ordering::SeqCst) => Ok(state),
            _ => Err(CairnError::ConnectionFailed(self.address.clone())),
        }
    }

    fn peer(&self, address: &str) -> Result<&Arc<SimNodeState>> {
        match self.net.get(address) {
            Some(state) if state.online.load(Ordering::SeqCst) => Ok(state),
            _ => Err(CairnError::ConnectionFailed(address.to_string())),
        }
    }
}

#[async_trait]
impl DataNode for SimDataNode {
    async fn ping(&self) -> Result<Duration> {
        Ok(self.state()?.latency)
    }

    async fn size(&self) -> Result<u64> {
        Ok(self.state()?.capacity)
    }

    async fn hardware_id(&self) -> Result<String> {
        Ok(self.state()?.hardware_id.clone())
    }

    async fn join(&self, _cluster_id: &str, _node_id: &str, _master_address: &str) -> Result<bool> {
        self.state().map(|_| true)
    }

    async fn mode(&self, _master: bool) -> Result<bool> {
        self.state().map(|_| true)
    }

    async fn leave(&self) -> Result<bool> {
        self.state().map(|_| true)
    }

    async fn wipe(&self) -> Result<bool> {
        self.state()?.chunks.lock().clear();
        Ok(true)
    }

    async fn create(&self, data: &[u8]) -> Result<CreateOutcome> {
        let state = self.state()?;
        if state.fail_create.load(Ordering::SeqCst) {
            return Err(CairnError::Network(format!("{}: injected fault", self.address)));
        }

        let hash = content_hash(data);
        let mut chunks = state.chunks.lock();
        let exists = chunks.contains_key(&hash);
        if !exists {
            chunks.insert(
                hash.clone(),
                SimChunk {
                    data: data.to_vec(),
                    size: data.len() as u64,
                },
            );
        }
        Ok(CreateOutcome { exists, hash })
    }

    async fn delete(&self, hash: &str) -> Result<()> {
        let state = self.state()?;
        if state.fail_delete.load(Ordering::SeqCst) {
            return Err(CairnError::Network(format!("{}: injected fault", self.address)));
        }
        state.chunks.lock().remove(hash);
        Ok(())
    }

    async fn sync_list(&self) -> Result<SyncContainer> {
        let state = self.state()?;
        let file_items = state
            .chunks
            .lock()
            .iter()
            .map(|(hash, chunk)| {
                (
                    hash.clone(),
                    FileItem {
                        size: chunk.size,
                        created_at: Utc::now(),
                    },
                )
            })
            .collect();

        Ok(SyncContainer {
            snapshots: state.snapshots.lock().clone(),
            file_items,
        })
    }

    async fn sync_full(&self, source_address: &str) -> Result<bool> {
        let state = self.state()?;
        let source = self.peer(source_address)?;
        let copied = source.chunks.lock().clone();
        *state.chunks.lock() = copied;
        Ok(true)
    }

    async fn sync_move(&self, hash: &str, source_address: &str) -> Result<bool> {
        let state = self.state()?;
        let source = self.peer(source_address)?;
        match source.chunks.lock().remove(hash) {
            Some(chunk) => {
                state.chunks.lock().insert(hash.to_string(), chunk);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn snapshot_create(&self) -> Result<bool> {
        self.state()?.snapshots.lock().push(SnapshotInfo::default());
        Ok(true)
    }

    async fn snapshot_delete(&self, index: u64) -> Result<bool> {
        let state = self.state()?;
        let mut snapshots = state.snapshots.lock();
        if (index as usize) < snapshots.len() {
            snapshots.remove(index as usize);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn snapshot_restore(&self, index: u64) -> Result<bool> {
        Ok((index as usize) < self.state()?.snapshots.lock().len())
    }

    fn address(&self) -> &str {
        &self.address
    }
}
