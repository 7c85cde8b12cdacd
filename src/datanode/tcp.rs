//! TCP implementation of the data-node proxy.

use super::wire::{self, *};
use super::{with_retry, CreateOutcome, DataNode, CONTROL_DEADLINE};
use crate::error::{CairnError, Result};
use crate::types::SyncContainer;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::io::{AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::time::timeout;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Stateless proxy for one data node over the framed TCP protocol.
///
/// Each call opens a fresh connection; the node side treats connections as
/// one-shot command channels.
pub struct TcpDataNode {
    address: String,
}

impl TcpDataNode {
    pub fn new(address: String) -> Self {
        Self { address }
    }

    async fn connect(&self) -> Result<BufStream<TcpStream>> {
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.address))
            .await
            .map_err(|_| CairnError::Timeout(CONNECT_TIMEOUT.as_millis() as u64))?
            .map_err(|e| CairnError::ConnectionFailed(format!("{}: {}", self.address, e)))?;
        Ok(BufStream::new(stream))
    }

    async fn bounded<T, F>(&self, deadline: Duration, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        timeout(deadline, fut)
            .await
            .map_err(|_| CairnError::Timeout(deadline.as_millis() as u64))?
    }

    /// Ops that carry no payload and answer with a bare ack.
    async fn simple_ack(&self, op_name: &str, op: &'static [u8; 2]) -> Result<bool> {
        with_retry(&self.address, op_name, || async {
            self.bounded(CONTROL_DEADLINE, async {
                let mut stream = self.connect().await?;
                write_op(&mut stream, op).await?;
                stream.flush().await?;
                read_ack(&mut stream).await
            })
            .await
        })
        .await
    }
}

#[async_trait]
impl DataNode for TcpDataNode {
    async fn ping(&self) -> Result<Duration> {
        with_retry(&self.address, "ping", || async {
            self.bounded(CONTROL_DEADLINE, async {
                let started = Instant::now();
                let mut stream = self.connect().await?;
                write_op(&mut stream, OP_PING).await?;
                stream.flush().await?;
                if !read_ack(&mut stream).await? {
                    return Err(CairnError::Ping(self.address.clone()));
                }
                Ok(started.elapsed())
            })
            .await
        })
        .await
    }

    async fn size(&self) -> Result<u64> {
        with_retry(&self.address, "size", || async {
            self.bounded(CONTROL_DEADLINE, async {
                let mut stream = self.connect().await?;
                write_op(&mut stream, OP_SIZE).await?;
                stream.flush().await?;
                if !read_ack(&mut stream).await? {
                    return Err(CairnError::Protocol("size refused".into()));
                }
                read_u64(&mut stream).await
            })
            .await
        })
        .await
    }

    async fn hardware_id(&self) -> Result<String> {
        with_retry(&self.address, "hardware_id", || async {
            self.bounded(CONTROL_DEADLINE, async {
                let mut stream = self.connect().await?;
                write_op(&mut stream, OP_HARDWARE_ID).await?;
                stream.flush().await?;
                if !read_ack(&mut stream).await? {
                    return Err(CairnError::Protocol("hardware id refused".into()));
                }
                read_str(&mut stream).await
            })
            .await
        })
        .await
    }

    async fn join(&self, cluster_id: &str, node_id: &str, master_address: &str) -> Result<bool> {
        with_retry(&self.address, "join", || async {
            self.bounded(CONTROL_DEADLINE, async {
                let mut stream = self.connect().await?;
                write_op(&mut stream, OP_JOIN).await?;
                write_str(&mut stream, cluster_id).await?;
                write_str(&mut stream, node_id).await?;
                write_str(&mut stream, master_address).await?;
                stream.flush().await?;
                read_ack(&mut stream).await
            })
            .await
        })
        .await
    }

    async fn mode(&self, master: bool) -> Result<bool> {
        with_retry(&self.address, "mode", || async {
            self.bounded(CONTROL_DEADLINE, async {
                let mut stream = self.connect().await?;
                write_op(&mut stream, OP_MODE).await?;
                write_flag(&mut stream, master).await?;
                stream.flush().await?;
                read_ack(&mut stream).await
            })
            .await
        })
        .await
    }

    async fn leave(&self) -> Result<bool> {
        self.simple_ack("leave", OP_LEAVE).await
    }

    async fn wipe(&self) -> Result<bool> {
        self.simple_ack("wipe", OP_WIPE).await
    }

    async fn create(&self, data: &[u8]) -> Result<CreateOutcome> {
        let deadline = super::transfer_deadline(data.len() as u64);
        with_retry(&self.address, "create", || async {
            self.bounded(deadline, async {
                let mut stream = self.connect().await?;
                write_op(&mut stream, OP_CREATE).await?;
                write_blob(&mut stream, data).await?;
                stream.flush().await?;
                if !read_ack(&mut stream).await? {
                    return Err(CairnError::UploadFailed(self.address.clone()));
                }
                let exists = read_flag(&mut stream).await?;
                let hash = read_str(&mut stream).await?;
                Ok(CreateOutcome { exists, hash })
            })
            .await
        })
        .await
    }

    async fn delete(&self, hash: &str) -> Result<()> {
        with_retry(&self.address, "delete", || async {
            self.bounded(CONTROL_DEADLINE, async {
                let mut stream = self.connect().await?;
                write_op(&mut stream, OP_DELETE).await?;
                write_str(&mut stream, hash).await?;
                stream.flush().await?;
                // A refused delete means the chunk is gone already.
                read_ack(&mut stream).await?;
                Ok(())
            })
            .await
        })
        .await
    }

    async fn sync_list(&self) -> Result<SyncContainer> {
        with_retry(&self.address, "sync_list", || async {
            self.bounded(CONTROL_DEADLINE, async {
                let mut stream = self.connect().await?;
                write_op(&mut stream, OP_SYNC_LIST).await?;
                stream.flush().await?;
                if !read_ack(&mut stream).await? {
                    return Err(CairnError::Sync(format!(
                        "{} refused sync list",
                        self.address
                    )));
                }
                wire::read_container(&mut stream).await
            })
            .await
        })
        .await
    }

    async fn sync_full(&self, source_address: &str) -> Result<bool> {
        // A full pull can shuttle the whole node; no transfer cap applies.
        with_retry(&self.address, "sync_full", || async {
            let mut stream = self.connect().await?;
            write_op(&mut stream, OP_SYNC_FULL).await?;
            write_str(&mut stream, source_address).await?;
            stream.flush().await?;
            read_ack(&mut stream).await
        })
        .await
    }

    async fn sync_move(&self, hash: &str, source_address: &str) -> Result<bool> {
        let deadline = super::transfer_deadline(crate::types::BLOCK_SIZE);
        with_retry(&self.address, "sync_move", || async {
            self.bounded(deadline, async {
                let mut stream = self.connect().await?;
                write_op(&mut stream, OP_SYNC_MOVE).await?;
                write_str(&mut stream, hash).await?;
                write_str(&mut stream, source_address).await?;
                stream.flush().await?;
                read_ack(&mut stream).await
            })
            .await
        })
        .await
    }

    async fn snapshot_create(&self) -> Result<bool> {
        self.simple_ack("snapshot_create", OP_SNAPSHOT_CREATE).await
    }

    async fn snapshot_delete(&self, index: u64) -> Result<bool> {
        with_retry(&self.address, "snapshot_delete", || async {
            self.bounded(CONTROL_DEADLINE, async {
                let mut stream = self.connect().await?;
                write_op(&mut stream, OP_SNAPSHOT_DELETE).await?;
                write_u64(&mut stream, index).await?;
                stream.flush().await?;
                read_ack(&mut stream).await
            })
            .await
        })
        .await
    }

    async fn snapshot_restore(&self, index: u64) -> Result<bool> {
        with_retry(&self.address, "snapshot_restore", || async {
            self.bounded(CONTROL_DEADLINE, async {
                let mut stream = self.connect().await?;
                write_op(&mut stream, OP_SNAPSHOT_RESTORE).await?;
                write_u64(&mut stream, index).await?;
                stream.flush().await?;
                read_ack(&mut stream).await
            })
            .await
        })
        .await
    }

    fn address(&self) -> &str {
        &self.address
    }
}
