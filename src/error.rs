//! Error types for the Cairn control plane.
//!
//! This module provides a unified error type [`CairnError`] for all control
//! plane operations, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! - **Protocol**: errors that travel between manager, head and data nodes
//!   (ping, join, mode, sync, snapshot failures)
//! - **Capacity**: reservation and placement errors
//! - **Catalog**: cluster registration and lookup errors
//! - **Network**: connection and timeout errors
//! - **Configuration**: invalid settings or missing configuration
//!
//! # Example
//!
//! ```rust
//! use cairn::error::{CairnError, Result};
//!
//! fn locate(hash: &str) -> Result<String> {
//!     if hash.len() != 64 {
//!         return Err(CairnError::InvalidArgument("hash must be 64 hex chars".into()));
//!     }
//!     Err(CairnError::NotFound(hash.into()))
//! }
//!
//! fn handle(err: &CairnError) {
//!     if err.is_retryable() {
//!         println!("retrying...");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

/// Main error type for Cairn operations.
#[derive(Error, Debug)]
pub enum CairnError {
    // Protocol errors shared with data nodes
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not enough space for {0} bytes")]
    NoSpace(u64),

    #[error("Data node did not answer ping: {0}")]
    Ping(String),

    #[error("Data node refused to join cluster: {0}")]
    Join(String),

    #[error("Data node refused mode change: {0}")]
    Mode(String),

    #[error("Node is already registered: {0}")]
    Registered(String),

    #[error("Synchronization failed: {0}")]
    Sync(String),

    #[error("Snapshot operation failed: {0}")]
    Snapshot(String),

    #[error("Cluster is not available: {0}")]
    NoAvailableClusterNode(String),

    #[error("No node owns the requested content")]
    NoAvailableActionNode,

    #[error("Cluster is not available for this action: {0}")]
    NotAvailableForClusterAction(String),

    // Catalog errors
    #[error("Cluster size mismatch: cluster is {expected}, node reports {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Reservation not found: {0}")]
    ReservationNotFound(String),

    // Pipeline errors
    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    // Network errors
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // External errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("RocksDB error: {0}")]
    RocksDb(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CairnError {
    /// Check if the error is worth retrying at the transport layer.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CairnError::ConnectionFailed(_)
                | CairnError::Timeout(_)
                | CairnError::Network(_)
                | CairnError::Io(_)
        )
    }

    /// HTTP status code for the admin surface.
    pub fn http_status(&self) -> u16 {
        match self {
            CairnError::NotFound(_) | CairnError::ReservationNotFound(_) => 404,
            CairnError::NoAvailableClusterNode(_)
            | CairnError::NotAvailableForClusterAction(_) => 503,
            CairnError::NoSpace(_) => 507,
            _ => 500,
        }
    }
}

impl From<rocksdb::Error> for CairnError {
    fn from(e: rocksdb::Error) -> Self {
        CairnError::RocksDb(e.to_string())
    }
}

impl From<bincode::Error> for CairnError {
    fn from(e: bincode::Error) -> Self {
        CairnError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for CairnError {
    fn from(e: serde_json::Error) -> Self {
        CairnError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for CairnError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CairnError::Timeout(0)
        } else if e.is_connect() {
            CairnError::ConnectionFailed(e.to_string())
        } else {
            CairnError::Network(e.to_string())
        }
    }
}

/// Result type alias for Cairn operations.
pub type Result<T> = std::result::Result<T, CairnError>;
