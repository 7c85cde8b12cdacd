//! Command-line interface for Cairn.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Cairn - control plane for a distributed, content-addressed file store.
#[derive(Parser)]
#[command(name = "cairn")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CAIRN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "CAIRN_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Start a manager node
    Manager {
        /// Bind address for the admin HTTP surface
        #[arg(long, default_value = "0.0.0.0:9400")]
        bind_addr: String,

        /// Catalog directory
        #[arg(long, default_value = "/var/lib/cairn/catalog")]
        catalog_dir: PathBuf,
    },

    /// Cluster administration commands
    Cluster {
        #[command(subcommand)]
        command: ClusterCommands,
    },

    /// Print version information
    Version,
}

/// Cluster administration against a running manager.
#[derive(Subcommand)]
pub enum ClusterCommands {
    /// List clusters (all, or one by id)
    List {
        /// Manager address
        #[arg(short, long, default_value = "http://127.0.0.1:9400")]
        addr: String,

        /// Cluster id
        #[arg(long)]
        cluster_id: Option<String>,
    },

    /// Register a new cluster from data node addresses
    Register {
        #[arg(short, long, default_value = "http://127.0.0.1:9400")]
        addr: String,

        /// Data node addresses; the first becomes the master
        #[arg(required = true)]
        nodes: Vec<String>,
    },

    /// Drain one cluster into another
    Move {
        #[arg(short, long, default_value = "http://127.0.0.1:9400")]
        addr: String,

        /// Source cluster id
        source: String,

        /// Target cluster id
        target: String,
    },

    /// Even out usage across clusters (all when none given)
    Balance {
        #[arg(short, long, default_value = "http://127.0.0.1:9400")]
        addr: String,

        /// Cluster ids to balance
        clusters: Vec<String>,
    },

    /// Clear the admin freeze flag (all clusters when none given)
    Unfreeze {
        #[arg(short, long, default_value = "http://127.0.0.1:9400")]
        addr: String,

        /// Cluster ids to unfreeze
        clusters: Vec<String>,
    },

    /// Resync clusters from their masters (all when no id given)
    Sync {
        #[arg(short, long, default_value = "http://127.0.0.1:9400")]
        addr: String,

        /// Cluster id
        #[arg(long)]
        cluster_id: Option<String>,
    },

    /// Check file metadata against the placement index
    Check {
        #[arg(short, long, default_value = "http://127.0.0.1:9400")]
        addr: String,
    },

    /// Locate the cluster owning a content hash
    Find {
        #[arg(short, long, default_value = "http://127.0.0.1:9400")]
        addr: String,

        /// Hex-encoded SHA-512/256 hash
        hash: String,
    },
}
