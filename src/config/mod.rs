//! Configuration module for Cairn.

use crate::error::{CairnError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for a Cairn node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CairnConfig {
    /// Node identity and role.
    pub node: NodeConfig,
    /// Manager service configuration.
    pub manager: ManagerConfig,
    /// Head service configuration.
    pub head: HeadConfig,
    /// Health probe configuration.
    pub health: HealthConfig,
    /// Observability configuration.
    pub observability: ObservabilityConfig,
}

impl CairnConfig {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CairnError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| CairnError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.node.name.is_empty() {
            return Err(CairnError::InvalidConfig {
                field: "node.name".to_string(),
                reason: "Node name must not be empty".to_string(),
            });
        }

        if self.manager.reservation_ttl.is_zero() {
            return Err(CairnError::InvalidConfig {
                field: "manager.reservation_ttl".to_string(),
                reason: "Reservation TTL must be non-zero".to_string(),
            });
        }

        if self.node.role.is_head() && self.head.manager_addr.is_empty() {
            return Err(CairnError::InvalidConfig {
                field: "head.manager_addr".to_string(),
                reason: "Head nodes require a manager address".to_string(),
            });
        }

        Ok(())
    }

    /// Create a minimal development configuration.
    pub fn development() -> Self {
        Self {
            node: NodeConfig {
                name: "dev-node".to_string(),
                role: NodeRole::Manager,
            },
            manager: ManagerConfig {
                bind_addr: "127.0.0.1:9400".parse().expect("valid socket address"),
                catalog_dir: PathBuf::from("/tmp/cairn/catalog"),
                reservation_ttl: Duration::from_secs(15 * 60),
                reservation_sweep_interval: Duration::from_secs(60),
            },
            head: HeadConfig {
                manager_addr: "http://127.0.0.1:9400".to_string(),
            },
            health: HealthConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Node-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Human-readable node name.
    pub name: String,
    /// Node role.
    pub role: NodeRole,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "cairn-node".to_string(),
            role: NodeRole::Manager,
        }
    }
}

/// Node role enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Manager: owns the catalog and the placement index.
    Manager,
    /// Head: client-facing upload/download service.
    Head,
}

impl NodeRole {
    pub fn is_manager(&self) -> bool {
        matches!(self, NodeRole::Manager)
    }

    pub fn is_head(&self) -> bool {
        matches!(self, NodeRole::Head)
    }
}

/// Manager service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Bind address for the admin HTTP surface.
    pub bind_addr: SocketAddr,
    /// Directory for the persistent cluster catalog.
    pub catalog_dir: PathBuf,
    /// Reservations older than this are auto-discarded.
    #[serde(with = "duration_secs")]
    pub reservation_ttl: Duration,
    /// How often the expiry sweep runs.
    #[serde(with = "duration_secs")]
    pub reservation_sweep_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9400".parse().expect("valid socket address"),
            catalog_dir: PathBuf::from("/var/lib/cairn/catalog"),
            reservation_ttl: Duration::from_secs(15 * 60),
            reservation_sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Head service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadConfig {
    /// Base URL of the manager's HTTP surface.
    pub manager_addr: String,
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self {
            manager_addr: "http://127.0.0.1:9400".to_string(),
        }
    }
}

/// Health probe configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Whether the periodic probe loop runs.
    pub probe_enabled: bool,
    /// Interval between probe rounds.
    #[serde(with = "duration_secs")]
    pub probe_interval: Duration,
    /// Bounded retries for a failing cluster sync before paralysis sticks.
    pub sync_retries: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_enabled: true,
            probe_interval: Duration::from_secs(30),
            sync_retries: 3,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level filter (trace, debug, info, warn, error).
    pub log_level: String,
    /// Emit logs as JSON.
    pub json_logs: bool,
    /// Whether the Prometheus endpoint runs.
    pub metrics_enabled: bool,
    /// Bind address for the metrics endpoint.
    pub metrics_addr: SocketAddr,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_addr: "127.0.0.1:9490".parse().expect("valid socket address"),
        }
    }
}

/// Durations serialize as whole seconds in config files.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_development_config_validates() {
        assert!(CairnConfig::development().validate().is_ok());
    }

    #[test]
    fn test_head_requires_manager_addr() {
        let mut config = CairnConfig::development();
        config.node.role = NodeRole::Head;
        config.head.manager_addr.clear();

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = CairnConfig::development();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: CairnConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.node.name, "dev-node");
        assert_eq!(parsed.manager.reservation_ttl, Duration::from_secs(900));
    }
}
