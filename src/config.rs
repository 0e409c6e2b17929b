//! Configuration management for the mesh chat daemon.
//!
//! A single TOML file with `[node]`, `[network]` and `[logging]` tables.
//! Every field has a default, so a partial file (or none at all) is valid.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::MeshError;
use crate::network::address::PeerAddress;
use crate::network::dedup_filter::DEFAULT_DEDUP_CAPACITY;
use crate::network::server::DEFAULT_BACKLOG;
use crate::network::wire::DEFAULT_MAX_FRAME_SIZE;

pub const DEFAULT_CONFIG_PATH: &str = "meshchat.toml";
pub const DEFAULT_PORT: u16 = 9001;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_nickname")]
    pub nickname: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            nickname: default_nickname(),
        }
    }
}

fn default_nickname() -> String {
    "Anonymous".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Pending-connection queue length for the listening socket
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Peers dialed at startup, as "host:port"
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,
    /// Number of recent message ids remembered for loop suppression
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: u32,
    /// 0 disables the limit
    #[serde(default)]
    pub handshake_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            port: default_port(),
            backlog: default_backlog(),
            bootstrap_peers: Vec::new(),
            dedup_capacity: default_dedup_capacity(),
            max_frame_size: default_max_frame_size(),
            handshake_timeout_secs: 0,
        }
    }
}

impl NetworkConfig {
    /// Parsed bootstrap peers. Malformed entries are reported, not skipped.
    pub fn bootstrap_addresses(&self) -> Result<Vec<PeerAddress>, MeshError> {
        self.bootstrap_peers
            .iter()
            .map(|entry| {
                PeerAddress::parse(entry).ok_or_else(|| {
                    MeshError::Config(format!("invalid bootstrap peer '{}', expected host:port", entry))
                })
            })
            .collect()
    }
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_backlog() -> u32 {
    DEFAULT_BACKLOG
}

fn default_dedup_capacity() -> usize {
    DEFAULT_DEDUP_CAPACITY
}

fn default_max_frame_size() -> u32 {
    DEFAULT_MAX_FRAME_SIZE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    /// "pretty" or "json"
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "pretty".to_string()
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, MeshError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| MeshError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, MeshError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), MeshError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| MeshError::Config(e.to_string()))?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), MeshError> {
        if self.node.nickname.trim().is_empty() {
            return Err(MeshError::Config("nickname must not be empty".to_string()));
        }
        if self.network.backlog == 0 {
            return Err(MeshError::Config("backlog must be at least 1".to_string()));
        }
        if self.network.dedup_capacity == 0 {
            return Err(MeshError::Config(
                "dedup_capacity must be at least 1".to_string(),
            ));
        }
        self.network.bootstrap_addresses()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [node]
            nickname = "alice"

            [network]
            port = 9100
            bootstrap_peers = ["10.0.0.2:9001"]
            "#,
        )
        .unwrap();

        assert_eq!(config.node.nickname, "alice");
        assert_eq!(config.network.port, 9100);
        assert_eq!(config.network.backlog, DEFAULT_BACKLOG);
        assert_eq!(config.network.dedup_capacity, DEFAULT_DEDUP_CAPACITY);
        assert_eq!(config.logging.level, "info");
        assert_eq!(
            config.network.bootstrap_addresses().unwrap(),
            vec![PeerAddress::new("10.0.0.2", 9001)]
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meshchat.toml");

        let mut config = Config::default();
        config.node.nickname = "bob".to_string();
        config.network.handshake_timeout_secs = 5;
        config.save_to_file(&path).unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded.node.nickname, "bob");
        assert_eq!(loaded.network.handshake_timeout_secs, 5);
        assert_eq!(loaded.network.port, DEFAULT_PORT);
    }

    #[test]
    fn test_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.network.port, DEFAULT_PORT);
    }

    #[test]
    fn test_invalid_bootstrap_peer_rejected() {
        let mut config = Config::default();
        config.network.bootstrap_peers = vec!["nohost".to_string()];
        assert!(matches!(config.validate(), Err(MeshError::Config(_))));
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[network\nport = ").unwrap();
        assert!(matches!(
            Config::load_from_file(&path),
            Err(MeshError::Config(_))
        ));
    }
}
