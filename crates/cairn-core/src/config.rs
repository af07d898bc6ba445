// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Configuration management for Cairn.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Main configuration for a Cairn node.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Cluster membership configuration.
    pub cluster: ClusterConfig,
    /// Xaction (bulk operation) configuration.
    pub xaction: XactionConfig,
    /// Local object storage configuration.
    pub storage: StorageConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(crate::Error::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed or fails validation.
    pub fn parse(content: &str) -> crate::Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the cluster section is inconsistent.
    pub fn validate(&self) -> crate::Result<()> {
        let cluster = &self.cluster;
        if cluster.heartbeat_interval_ms == 0 {
            return Err(crate::Error::Config("cluster.heartbeat_interval_ms must be >= 1".into()));
        }
        if cluster.missed_heartbeats == 0 {
            return Err(crate::Error::Config("cluster.missed_heartbeats must be >= 1".into()));
        }
        if let Some(primary) = &cluster.primary {
            if !cluster.proxies.iter().any(|p| &p.id == primary) {
                return Err(crate::Error::Config(format!(
                    "cluster.primary {primary:?} is not listed in cluster.proxies"
                )));
            }
        }
        let mut ids: Vec<&str> =
            cluster.proxies.iter().chain(cluster.targets.iter()).map(|n| n.id.as_str()).collect();
        ids.sort_unstable();
        if let Some(dup) = ids.windows(2).find(|w| w[0] == w[1]) {
            return Err(crate::Error::Config(format!("duplicate node id {:?}", dup[0])));
        }
        if self.xaction.max_concurrent_units == 0 {
            return Err(crate::Error::Config("xaction.max_concurrent_units must be >= 1".into()));
        }
        Ok(())
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the primary proxy endpoint binds to.
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: SocketAddr::from(([127, 0, 0, 1], 8080)) }
    }
}

/// A statically configured cluster node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeConfig {
    /// Unique node id.
    pub id: String,
    /// Public URL of the node.
    pub url: String,
}

/// Cluster membership configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cluster uuid. Generated on first start if absent.
    pub uuid: Option<String>,
    /// Proxy nodes.
    pub proxies: Vec<NodeConfig>,
    /// Target nodes.
    pub targets: Vec<NodeConfig>,
    /// Explicitly designated primary proxy.
    pub primary: Option<String>,
    /// Expected interval between node heartbeats, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Number of consecutive missed heartbeats before a node is unreachable.
    pub missed_heartbeats: u32,
    /// Where to persist the cluster map. Not persisted if unset.
    pub smap_path: Option<PathBuf>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            uuid: None,
            proxies: vec![NodeConfig { id: "p1".into(), url: "http://127.0.0.1:8080".into() }],
            targets: vec![NodeConfig { id: "t1".into(), url: "http://127.0.0.1:8081".into() }],
            primary: None,
            heartbeat_interval_ms: 1000,
            missed_heartbeats: 3,
            smap_path: None,
        }
    }
}

impl ClusterConfig {
    /// Heartbeat interval as a `Duration`.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// Xaction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XactionConfig {
    /// Maximum number of per-target work units running at once, per xaction.
    pub max_concurrent_units: usize,
    /// How long terminal xactions are kept for status queries, in seconds.
    pub retention_secs: u64,
    /// Interval between garbage-collection sweeps, in seconds.
    pub gc_interval_secs: u64,
    /// Default timeout for blocking waits, in seconds.
    pub default_wait_timeout_secs: u64,
}

impl Default for XactionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_units: 8,
            retention_secs: 600,
            gc_interval_secs: 30,
            default_wait_timeout_secs: 120,
        }
    }
}

/// Local object storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for target stores, one subdirectory per target.
    /// Objects are kept in memory if unset.
    pub data_dir: Option<PathBuf>,
    /// Interval between storage usage metric refreshes, in seconds.
    pub metrics_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: None, metrics_interval_secs: 15 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format.
    #[default]
    Pretty,
    /// JSON format.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Log output format.
    pub format: LogFormat,
    /// Include HTTP request/response logging.
    pub log_requests: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Pretty, log_requests: true }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics collection and endpoint.
    pub enabled: bool,
    /// Port for the metrics endpoint (separate from main server).
    pub port: u16,
    /// Bind address for metrics server.
    pub bind: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: false, port: 9091, bind: "127.0.0.1".to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.bind.port(), 8080);
        assert_eq!(config.cluster.missed_heartbeats, 3);
        assert_eq!(config.cluster.proxies.len(), 1);
        assert_eq!(config.cluster.targets.len(), 1);
        assert_eq!(config.xaction.max_concurrent_units, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
bind = "0.0.0.0:51080"

[cluster]
uuid = "c0ffee"
primary = "p2"
heartbeat_interval_ms = 250
missed_heartbeats = 4
proxies = [
  { id = "p1", url = "http://10.0.0.1:51080" },
  { id = "p2", url = "http://10.0.0.2:51080" },
]
targets = [
  { id = "t1", url = "http://10.0.0.3:51081" },
]

[xaction]
retention_secs = 60

[storage]
data_dir = "/var/lib/cairn"

[logging]
level = "debug"
format = "json"
"#;
        let config = Config::parse(toml).unwrap();
        assert_eq!(config.server.bind.port(), 51080);
        assert_eq!(config.cluster.uuid.as_deref(), Some("c0ffee"));
        assert_eq!(config.cluster.primary.as_deref(), Some("p2"));
        assert_eq!(config.cluster.heartbeat_interval(), Duration::from_millis(250));
        assert_eq!(config.cluster.proxies.len(), 2);
        assert_eq!(config.xaction.retention_secs, 60);
        assert_eq!(config.xaction.max_concurrent_units, 8);
        assert_eq!(config.storage.data_dir, Some(PathBuf::from("/var/lib/cairn")));
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_zero_heartbeat_interval_rejected() {
        let toml = r#"
[cluster]
heartbeat_interval_ms = 0
"#;
        assert!(matches!(Config::parse(toml), Err(crate::Error::Config(_))));

        let mut config = Config::default();
        config.cluster.heartbeat_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_primary_must_be_a_proxy() {
        let toml = r#"
[cluster]
primary = "t1"
"#;
        assert!(matches!(Config::parse(toml), Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_duplicate_node_ids_rejected() {
        let toml = r#"
[cluster]
proxies = [{ id = "n1", url = "http://a" }]
targets = [{ id = "n1", url = "http://b" }]
"#;
        assert!(matches!(Config::parse(toml), Err(crate::Error::Config(_))));
    }
}
