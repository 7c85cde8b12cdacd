//! Binary framing for the data-node wire protocol.
//!
//! Every request opens with a two-byte op tag followed by fixed-layout
//! fields; every response opens with a one-byte ack (`+` accepted, `-`
//! refused) followed by op-specific payload. The layout lives in this one
//! module so it can be checked against deployed data nodes field by field.

use crate::error::{CairnError, Result};
use crate::types::{FileItem, SnapshotInfo, SyncContainer};
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const OP_PING: &[u8; 2] = b"PI";
pub const OP_SIZE: &[u8; 2] = b"SZ";
pub const OP_HARDWARE_ID: &[u8; 2] = b"HW";
pub const OP_JOIN: &[u8; 2] = b"JO";
pub const OP_MODE: &[u8; 2] = b"MO";
pub const OP_LEAVE: &[u8; 2] = b"LE";
pub const OP_WIPE: &[u8; 2] = b"WI";
pub const OP_CREATE: &[u8; 2] = b"CR";
pub const OP_DELETE: &[u8; 2] = b"DE";
pub const OP_SYNC_LIST: &[u8; 2] = b"SL";
pub const OP_SYNC_FULL: &[u8; 2] = b"SF";
pub const OP_SYNC_MOVE: &[u8; 2] = b"SM";
pub const OP_SNAPSHOT_CREATE: &[u8; 2] = b"SC";
pub const OP_SNAPSHOT_DELETE: &[u8; 2] = b"SD";
pub const OP_SNAPSHOT_RESTORE: &[u8; 2] = b"SR";

const ACK_ACCEPTED: u8 = b'+';
const ACK_REFUSED: u8 = b'-';

/// Longest string field the protocol accepts.
const MAX_STR_LEN: usize = 4096;

pub async fn write_op<W: AsyncWrite + Unpin>(w: &mut W, op: &[u8; 2]) -> Result<()> {
    w.write_all(op).await?;
    Ok(())
}

pub async fn write_str<W: AsyncWrite + Unpin>(w: &mut W, value: &str) -> Result<()> {
    if value.len() > MAX_STR_LEN {
        return Err(CairnError::Protocol("string field too long".into()));
    }
    w.write_u16(value.len() as u16).await?;
    w.write_all(value.as_bytes()).await?;
    Ok(())
}

pub async fn write_u64<W: AsyncWrite + Unpin>(w: &mut W, value: u64) -> Result<()> {
    w.write_u64(value).await?;
    Ok(())
}

pub async fn write_flag<W: AsyncWrite + Unpin>(w: &mut W, value: bool) -> Result<()> {
    w.write_u8(value as u8).await?;
    Ok(())
}

/// 32-bit length prefix plus payload, the Create framing.
pub async fn write_blob<W: AsyncWrite + Unpin>(w: &mut W, data: &[u8]) -> Result<()> {
    w.write_u32(data.len() as u32).await?;
    w.write_all(data).await?;
    Ok(())
}

/// Read the one-byte ack; `Ok(true)` accepted, `Ok(false)` refused.
pub async fn read_ack<R: AsyncRead + Unpin>(r: &mut R) -> Result<bool> {
    match r.read_u8().await? {
        ACK_ACCEPTED => Ok(true),
        ACK_REFUSED => Ok(false),
        other => Err(CairnError::Protocol(format!(
            "unexpected ack byte 0x{:02x}",
            other
        ))),
    }
}

pub async fn read_str<R: AsyncRead + Unpin>(r: &mut R) -> Result<String> {
    let len = r.read_u16().await? as usize;
    if len > MAX_STR_LEN {
        return Err(CairnError::Protocol("string field too long".into()));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|_| CairnError::Protocol("invalid utf8 in string field".into()))
}

pub async fn read_u64<R: AsyncRead + Unpin>(r: &mut R) -> Result<u64> {
    Ok(r.read_u64().await?)
}

pub async fn read_flag<R: AsyncRead + Unpin>(r: &mut R) -> Result<bool> {
    Ok(r.read_u8().await? != 0)
}

/// Sync listing payload: snapshot stamps, then hash entries.
pub async fn read_container<R: AsyncRead + Unpin>(r: &mut R) -> Result<SyncContainer> {
    let snapshot_count = r.read_u16().await? as usize;
    let mut snapshots = Vec::with_capacity(snapshot_count);
    for _ in 0..snapshot_count {
        snapshots.push(SnapshotInfo {
            created_at: read_timestamp(r).await?,
        });
    }

    let file_count = r.read_u32().await? as usize;
    let mut file_items = HashMap::with_capacity(file_count);
    for _ in 0..file_count {
        let hash = read_str(r).await?;
        let size = r.read_u64().await?;
        let created_at = read_timestamp(r).await?;
        file_items.insert(hash, FileItem { size, created_at });
    }

    Ok(SyncContainer {
        snapshots,
        file_items,
    })
}

async fn read_timestamp<R: AsyncRead + Unpin>(r: &mut R) -> Result<chrono::DateTime<Utc>> {
    let secs = r.read_i64().await?;
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| CairnError::Protocol(format!("timestamp out of range: {}", secs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_str_roundtrip() {
        let mut buf = Vec::new();
        write_str(&mut buf, "cluster-1").await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(read_str(&mut cursor).await.unwrap(), "cluster-1");
    }

    #[tokio::test]
    async fn test_ack_bytes() {
        let mut cursor = std::io::Cursor::new(vec![b'+', b'-', b'?']);
        assert!(read_ack(&mut cursor).await.unwrap());
        assert!(!read_ack(&mut cursor).await.unwrap());
        assert!(read_ack(&mut cursor).await.is_err());
    }

    #[tokio::test]
    async fn test_container_roundtrip() {
        let mut buf = Vec::new();
        // one snapshot, one file entry
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&1_700_000_000i64.to_be_bytes());
        buf.extend_from_slice(&1u32.to_be_bytes());
        write_str(&mut buf, &"ab".repeat(32)).await.unwrap();
        buf.extend_from_slice(&42u64.to_be_bytes());
        buf.extend_from_slice(&1_700_000_000i64.to_be_bytes());

        let mut cursor = std::io::Cursor::new(buf);
        let container = read_container(&mut cursor).await.unwrap();

        assert_eq!(container.snapshots.len(), 1);
        assert_eq!(container.file_items.len(), 1);
        assert_eq!(container.file_items[&"ab".repeat(32)].size, 42);
    }
}
