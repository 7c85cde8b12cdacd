//! Head service: the client-facing side of the control plane.
//!
//! A head turns uploads into the reserve / upload / commit sequence and
//! reads into placement lookups. The manager stays the single authority;
//! the head only talks to it and to the data nodes the reservation names.

mod pipeline;

pub use pipeline::{ClusterFinder, PipelineOutput, WritePipeline};

use crate::client::ManagerClient;
use crate::datanode::DataNodeProvider;
use crate::error::Result;
use crate::types::{DataChunk, MapType};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{info, warn};

pub struct HeadNode {
    manager: Arc<ManagerClient>,
    nodes: Arc<dyn DataNodeProvider>,
}

impl HeadNode {
    pub fn new(manager: Arc<ManagerClient>, nodes: Arc<dyn DataNodeProvider>) -> Self {
        Self { manager, nodes }
    }

    /// Store `size` bytes from the reader as content-addressed chunks.
    ///
    /// On success the reservation commits with the deduplicated usage; on
    /// any failure it is discarded and the pipeline has already deleted the
    /// chunks it managed to store.
    pub async fn upload<R>(&self, reader: R, size: u64) -> Result<Vec<DataChunk>>
    where
        R: AsyncRead + Unpin,
    {
        let reservation = self.manager.reserve(size).await?;
        let reservation_id = reservation.id.clone();

        let pipeline = WritePipeline::new(
            reservation,
            Arc::clone(&self.manager) as Arc<dyn ClusterFinder>,
            Arc::clone(&self.nodes),
        );

        match pipeline.process(reader).await {
            Ok(output) => {
                self.manager
                    .commit(&reservation_id, &output.cluster_usage)
                    .await?;
                info!(
                    reservation_id = %reservation_id,
                    chunks = output.chunks.len(),
                    "Upload committed"
                );
                Ok(output.chunks)
            }
            Err(e) => {
                if let Err(discard_err) = self.manager.discard(&reservation_id).await {
                    warn!(
                        reservation_id = %reservation_id,
                        error = %discard_err,
                        "Discard after failed upload also failed"
                    );
                }
                Err(e)
            }
        }
    }

    /// Locate the best node to read a chunk from.
    pub async fn locate(&self, hash: &str) -> Result<String> {
        let hashes = vec![hash.to_string()];
        let mapping = self.manager.map(&hashes, MapType::Read).await?;
        mapping
            .into_values()
            .next()
            .ok_or_else(|| crate::error::CairnError::NotFound(hash.to_string()))
    }

    /// Delete a file's chunks from their owning clusters, best effort per
    /// chunk; hashes nobody owns are already gone.
    pub async fn delete(&self, chunks: &[DataChunk]) -> Result<()> {
        let hashes: Vec<String> = chunks.iter().map(|c| c.hash.clone()).collect();
        let mapping = self.manager.map(&hashes, MapType::Delete).await?;

        for (hash, address) in mapping {
            let proxy = self.nodes.acquire(&address);
            if let Err(e) = proxy.delete(&hash).await {
                warn!(hash = %hash, address = %address, error = %e, "Chunk delete failed");
            }
        }
        Ok(())
    }
}
