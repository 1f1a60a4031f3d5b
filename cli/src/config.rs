// Configuration management for the PairLink coordinator
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/pairlink/config.json
// - Linux: ~/.config/pairlink/config.json
// - Windows: %APPDATA%\pairlink\config.json

use anyhow::{Context, Result};
use pairlink_core::{CoordinatorConfig, PeerCandidate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port the websocket + HTTP server listens on
    pub listen_port: u16,

    /// Interface to bind
    pub bind_address: String,

    /// Events buffered per connection before deliveries are dropped
    pub outbound_queue_depth: usize,

    /// Longest identity accepted at registration
    pub max_identity_len: usize,

    /// Send peer-disconnected to the partner of a departing identity
    pub notify_peer_disconnect: bool,

    /// Default log filter when RUST_LOG is unset
    pub log_level: String,

    /// Directory for daily rolling log files (stderr only when unset)
    pub log_dir: Option<String>,

    /// LAN peers announced to clients through GET /api/candidates
    pub known_peers: Vec<PeerCandidate>,
}

impl Default for Config {
    fn default() -> Self {
        let core = CoordinatorConfig::default();
        Self {
            listen_port: 3000,
            bind_address: "0.0.0.0".to_string(),
            outbound_queue_depth: core.outbound_queue_depth,
            max_identity_len: core.max_identity_len,
            notify_peer_disconnect: core.notify_peer_disconnect,
            log_level: "info".to_string(),
            log_dir: None,
            known_peers: Vec::new(),
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("pairlink");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    /// Load config from `path`, writing defaults there if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value (in memory; call `save` to persist)
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "listen_port" => {
                self.listen_port = value.parse().context("Invalid port number")?;
            }
            "bind_address" => {
                value
                    .parse::<std::net::IpAddr>()
                    .context("Invalid IP address")?;
                self.bind_address = value.to_string();
            }
            "outbound_queue_depth" => {
                let depth: usize = value.parse().context("Invalid number")?;
                if depth == 0 {
                    anyhow::bail!("outbound_queue_depth must be at least 1");
                }
                self.outbound_queue_depth = depth;
            }
            "max_identity_len" => {
                let len: usize = value.parse().context("Invalid number")?;
                if len == 0 || len > pairlink_core::identity::MAX_IDENTITY_LEN {
                    anyhow::bail!(
                        "max_identity_len must be between 1 and {}",
                        pairlink_core::identity::MAX_IDENTITY_LEN
                    );
                }
                self.max_identity_len = len;
            }
            "notify_peer_disconnect" => {
                self.notify_peer_disconnect = value.parse().context("Invalid boolean value")?;
            }
            "log_level" => {
                self.log_level = value.to_string();
            }
            "log_dir" => {
                self.log_dir = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "known_peers" => {
                self.known_peers = serde_json::from_str(value)
                    .context("known_peers must be a JSON array of {identity, hostname}")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "listen_port" => Some(self.listen_port.to_string()),
            "bind_address" => Some(self.bind_address.clone()),
            "outbound_queue_depth" => Some(self.outbound_queue_depth.to_string()),
            "max_identity_len" => Some(self.max_identity_len.to_string()),
            "notify_peer_disconnect" => Some(self.notify_peer_disconnect.to_string()),
            "log_level" => Some(self.log_level.clone()),
            "log_dir" => self.log_dir.clone(),
            "known_peers" => serde_json::to_string(&self.known_peers).ok(),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            ("listen_port".to_string(), self.listen_port.to_string()),
            ("bind_address".to_string(), self.bind_address.clone()),
            (
                "outbound_queue_depth".to_string(),
                self.outbound_queue_depth.to_string(),
            ),
            ("max_identity_len".to_string(), self.max_identity_len.to_string()),
            (
                "notify_peer_disconnect".to_string(),
                self.notify_peer_disconnect.to_string(),
            ),
            ("log_level".to_string(), self.log_level.clone()),
            (
                "log_dir".to_string(),
                self.log_dir.clone().unwrap_or_else(|| "(stderr)".to_string()),
            ),
            (
                "known_peers".to_string(),
                format!("{} peer(s)", self.known_peers.len()),
            ),
        ]
    }

    /// Core knobs derived from this config
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            outbound_queue_depth: self.outbound_queue_depth,
            max_identity_len: self.max_identity_len,
            notify_peer_disconnect: self.notify_peer_disconnect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen_port, 3000);
        assert_eq!(config.bind_address, "0.0.0.0");
        assert!(config.notify_peer_disconnect);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config.listen_port, deserialized.listen_port);
        assert_eq!(config.log_level, deserialized.log_level);
    }

    #[test]
    fn test_missing_keys_fall_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{"listen_port": 8080}"#).unwrap();
        assert_eq!(config.listen_port, 8080);
        assert_eq!(config.outbound_queue_depth, 64);
    }

    #[test]
    fn test_set_and_get() {
        let mut config = Config::default();

        config.set("listen_port", "4000").unwrap();
        config.set("notify_peer_disconnect", "false").unwrap();
        config.set("log_dir", "/var/log/pairlink").unwrap();

        assert_eq!(config.get("listen_port").as_deref(), Some("4000"));
        assert_eq!(config.get("notify_peer_disconnect").as_deref(), Some("false"));
        assert_eq!(config.get("log_dir").as_deref(), Some("/var/log/pairlink"));
        assert!(config.get("nope").is_none());
    }

    #[test]
    fn test_set_rejects_invalid_values() {
        let mut config = Config::default();

        assert!(config.set("listen_port", "huge").is_err());
        assert!(config.set("bind_address", "not-an-ip").is_err());
        assert!(config.set("outbound_queue_depth", "0").is_err());
        assert!(config.set("max_identity_len", "1000").is_err());
        assert!(config.set("unknown_key", "1").is_err());
    }

    #[test]
    fn test_set_known_peers() {
        let mut config = Config::default();

        config
            .set("known_peers", r#"[{"identity": 1001, "hostname": "laptop"}]"#)
            .unwrap();

        assert_eq!(config.known_peers.len(), 1);
        assert_eq!(config.known_peers[0].identity.as_str(), "1001");
        assert_eq!(
            config.get("known_peers").as_deref(),
            Some(r#"[{"identity":"1001","hostname":"laptop"}]"#)
        );
        assert!(config.set("known_peers", "laptop").is_err());
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.listen_port, 3000);

        let mut changed = config;
        changed.set("listen_port", "5050").unwrap();
        changed.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap().listen_port, 5050);
    }

    #[test]
    fn test_coordinator_config_mapping() {
        let mut config = Config::default();
        config.set("outbound_queue_depth", "16").unwrap();

        let core = config.coordinator_config();
        assert_eq!(core.outbound_queue_depth, 16);
        assert!(core.notify_peer_disconnect);
    }
}
