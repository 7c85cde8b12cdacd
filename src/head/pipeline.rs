//! Write pipeline: drive one upload across a reservation.
//!
//! The byte stream is cut into reservation-slot-sized chunks, each chunk
//! hashed and uploaded in its own task. A chunk whose hash already has an
//! owner goes to that owner instead of the reserved slot, and a chunk the
//! target node already stores costs no usage — that is the whole of the
//! dedup story. Any failure flips a pipeline-wide flag: uploads already
//! dispatched finish their call, no further slot starts, and every chunk
//! stored so far is deleted again before the original cause is returned.

use crate::datanode::DataNodeProvider;
use crate::error::{CairnError, Result};
use crate::types::{content_hash, ClusterSlot, DataChunk, ReservationMap};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinSet;
use tracing::{error, warn};

/// Deletion attempts per chunk during revert; leftovers fall to the
/// garbage collector.
const REVERT_ATTEMPTS: u32 = 3;

/// Locates the owning cluster of a hash for an upload.
///
/// [`CairnError::NoAvailableActionNode`] means nobody owns the hash yet and
/// the writer should use its reserved slot.
#[async_trait]
pub trait ClusterFinder: Send + Sync {
    async fn find_cluster(&self, hash: &str) -> Result<(String, String)>;
}

/// Everything a successful pipeline hands back to the writer.
#[derive(Debug)]
pub struct PipelineOutput {
    /// Stored chunks, ordered by sequence.
    pub chunks: Vec<DataChunk>,
    /// Bytes that actually consumed space, per cluster, for commit.
    pub cluster_usage: HashMap<String, u64>,
}

struct ChunkState {
    chunk: DataChunk,
    address: String,
}

#[derive(Default)]
struct Progress {
    chunks: Vec<ChunkState>,
    cluster_usage: HashMap<String, u64>,
    cause: Option<CairnError>,
}

struct Shared {
    finder: Arc<dyn ClusterFinder>,
    nodes: Arc<dyn DataNodeProvider>,
    failed: AtomicBool,
    progress: Mutex<Progress>,
}

impl Shared {
    fn fail(&self, cause: CairnError) {
        let mut progress = self.progress.lock();
        if progress.cause.is_none() {
            progress.cause = Some(cause);
        }
        self.failed.store(true, Ordering::SeqCst);
    }
}

/// One upload across a reservation map.
pub struct WritePipeline {
    reservation: ReservationMap,
    shared: Arc<Shared>,
}

impl WritePipeline {
    pub fn new(
        reservation: ReservationMap,
        finder: Arc<dyn ClusterFinder>,
        nodes: Arc<dyn DataNodeProvider>,
    ) -> Self {
        Self {
            reservation,
            shared: Arc::new(Shared {
                finder,
                nodes,
                failed: AtomicBool::new(false),
                progress: Mutex::new(Progress::default()),
            }),
        }
    }

    /// Read exactly the reserved bytes and upload every slot in parallel.
    ///
    /// Either the whole input is stored and the output covers it, or the
    /// error of the first failing slot comes back and no new chunk stays
    /// addressable.
    pub async fn process<R>(self, mut reader: R) -> Result<PipelineOutput>
    where
        R: AsyncRead + Unpin,
    {
        let mut uploads = JoinSet::new();

        for slot in self.reservation.clusters.iter().cloned() {
            if self.shared.failed.load(Ordering::SeqCst) {
                break;
            }

            let mut buffer = vec![0u8; slot.chunk.size as usize];
            if let Err(e) = reader.read_exact(&mut buffer).await {
                // The caller sized the reservation; a short stream is fatal
                // and already-started uploads are rolled back below.
                self.shared.fail(match e.kind() {
                    std::io::ErrorKind::UnexpectedEof => CairnError::ShortRead {
                        expected: slot.chunk.size as usize,
                        actual: 0,
                    },
                    _ => e.into(),
                });
                break;
            }

            let shared = Arc::clone(&self.shared);
            uploads.spawn(async move {
                upload(shared, slot, buffer).await;
            });
        }

        while uploads.join_next().await.is_some() {}

        let failed = self.shared.failed.load(Ordering::SeqCst);
        let mut progress = std::mem::take(&mut *self.shared.progress.lock());

        if failed {
            revert(&self.shared.nodes, progress.chunks).await;
            return Err(progress
                .cause
                .take()
                .unwrap_or_else(|| CairnError::UploadFailed("upload failed".into())));
        }

        let mut chunks: Vec<DataChunk> =
            progress.chunks.into_iter().map(|s| s.chunk).collect();
        chunks.sort_by_key(|c| c.sequence);

        Ok(PipelineOutput {
            chunks,
            cluster_usage: progress.cluster_usage,
        })
    }
}

async fn upload(shared: Arc<Shared>, slot: ClusterSlot, data: Vec<u8>) {
    let hash = content_hash(&data);

    let (cluster_id, address) = match shared.finder.find_cluster(&hash).await {
        Ok(target) => target,
        Err(CairnError::NoAvailableActionNode) => {
            (slot.cluster_id.clone(), slot.address.clone())
        }
        Err(e) => {
            error!(
                sequence = slot.chunk.sequence,
                cluster_id = %slot.cluster_id,
                error = %e,
                "Find cluster failed"
            );
            shared.fail(e);
            return;
        }
    };

    let proxy = shared.nodes.acquire(&address);
    match proxy.create(&data).await {
        Ok(outcome) => {
            let mut progress = shared.progress.lock();
            let usage = progress.cluster_usage.entry(cluster_id).or_insert(0);
            if !outcome.exists {
                *usage += data.len() as u64;
            }
            progress.chunks.push(ChunkState {
                chunk: DataChunk {
                    sequence: slot.chunk.sequence,
                    size: data.len() as u32,
                    hash: outcome.hash,
                },
                address,
            });
        }
        Err(e) => {
            error!(
                sequence = slot.chunk.sequence,
                cluster_id = %slot.cluster_id,
                error = %e,
                "Create on cluster failed"
            );
            shared.fail(e);
        }
    }
}

/// Delete every chunk the failed pipeline managed to store.
///
/// Failing chunks rotate to the tail and get a bounded number of further
/// tries; whatever survives is left for the garbage collector. Revert
/// errors never replace the pipeline's original failure cause.
async fn revert(nodes: &Arc<dyn DataNodeProvider>, chunks: Vec<ChunkState>) {
    let mut queue: VecDeque<ChunkState> = chunks.into();
    let mut attempts: HashMap<String, u32> = HashMap::new();

    while let Some(state) = queue.pop_front() {
        let proxy = nodes.acquire(&state.address);
        match proxy.delete(&state.chunk.hash).await {
            Ok(()) => {}
            Err(e) => {
                let tries = attempts.entry(state.chunk.hash.clone()).or_insert(0);
                *tries += 1;
                if *tries < REVERT_ATTEMPTS {
                    warn!(hash = %state.chunk.hash, error = %e, "Revert delete failed, requeueing");
                    queue.push_back(state);
                } else {
                    warn!(
                        hash = %state.chunk.hash,
                        address = %state.address,
                        "Revert exhausted, leaving chunk to garbage collection"
                    );
                }
            }
        }
    }
}
