//! Remote-procedure façade for storage data nodes.
//!
//! A [`DataNode`] is a stateless proxy for one remote endpoint; proxies are
//! created per call through a [`DataNodeProvider`]. Transient network errors
//! are retried here with bounded exponential back-off; every other layer
//! sees at most one failure per call.

mod tcp;
pub mod wire;

pub use tcp::TcpDataNode;

use crate::error::Result;
use crate::types::SyncContainer;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Deadline for control-plane ops.
pub const CONTROL_DEADLINE: Duration = Duration::from_secs(30);

/// Deadline for payload transfers: at least the control deadline, scaled by
/// payload size at an assumed 1 MB/s floor.
pub fn transfer_deadline(bytes: u64) -> Duration {
    CONTROL_DEADLINE.max(Duration::from_secs(bytes / (1024 * 1024)))
}

/// Result of storing a chunk.
#[derive(Debug, Clone)]
pub struct CreateOutcome {
    /// The chunk was already present; the node did not double-count it.
    pub exists: bool,
    /// Hex-encoded content hash as computed by the node.
    pub hash: String,
}

/// Operations every data node exposes to the control plane.
#[async_trait]
pub trait DataNode: Send + Sync {
    /// Liveness probe; resolves to the round-trip time.
    async fn ping(&self) -> Result<Duration>;

    /// Raw capacity in bytes.
    async fn size(&self) -> Result<u64>;

    /// Identity fingerprint of the underlying hardware.
    async fn hardware_id(&self) -> Result<String>;

    /// Bind the node to a cluster. An empty `master_address` means the node
    /// itself becomes the master.
    async fn join(&self, cluster_id: &str, node_id: &str, master_address: &str) -> Result<bool>;

    /// Promote (`true`) or demote (`false`) the node.
    async fn mode(&self, master: bool) -> Result<bool>;

    /// Release the node from its cluster.
    async fn leave(&self) -> Result<bool>;

    /// Destroy all stored data.
    async fn wipe(&self) -> Result<bool>;

    /// Store a chunk; dedup is reported through [`CreateOutcome::exists`].
    async fn create(&self, data: &[u8]) -> Result<CreateOutcome>;

    /// Best-effort delete; a missing chunk is success.
    async fn delete(&self, hash: &str) -> Result<()>;

    /// Master-only: full inventory of hashes and snapshots.
    async fn sync_list(&self) -> Result<SyncContainer>;

    /// Slave-only: pull everything from the master at `source_address`.
    async fn sync_full(&self, source_address: &str) -> Result<bool>;

    /// Pull one hash from another cluster's master; the source releases it.
    async fn sync_move(&self, hash: &str, source_address: &str) -> Result<bool>;

    async fn snapshot_create(&self) -> Result<bool>;

    async fn snapshot_delete(&self, index: u64) -> Result<bool>;

    async fn snapshot_restore(&self, index: u64) -> Result<bool>;

    /// Endpoint this proxy talks to.
    fn address(&self) -> &str;
}

/// Hands out proxies by address; implementations decide the transport.
pub trait DataNodeProvider: Send + Sync {
    fn acquire(&self, address: &str) -> Arc<dyn DataNode>;
}

/// Provider for the TCP wire protocol.
#[derive(Debug, Default, Clone)]
pub struct TcpDataNodeProvider;

impl DataNodeProvider for TcpDataNodeProvider {
    fn acquire(&self, address: &str) -> Arc<dyn DataNode> {
        Arc::new(TcpDataNode::new(address.to_string()))
    }
}

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// Bounded exponential retry for transient transport failures.
pub(crate) async fn with_retry<T, F, Fut>(address: &str, op: &str, f: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < RETRY_ATTEMPTS => {
                attempt += 1;
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                debug!(address, op, attempt, ?delay, error = %err, "Retrying data node call");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CairnError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = with_retry("127.0.0.1:9430", "ping", || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(CairnError::ConnectionFailed("refused".into()))
            } else {
                Ok(7u32)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up_on_fatal_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry("127.0.0.1:9430", "join", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CairnError::Join("refused".into()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_transfer_deadline_scales_with_size() {
        assert_eq!(transfer_deadline(1024), CONTROL_DEADLINE);
        assert_eq!(
            transfer_deadline(120 * 1024 * 1024),
            Duration::from_secs(120)
        );
    }
}
