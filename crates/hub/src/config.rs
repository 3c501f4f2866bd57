//! Hub configuration
//!
//! Values here only seed the hub records on first initialization. Once the
//! interface, key pair and global settings exist in the store, the stored
//! records are authoritative.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Store directory path
    pub store_path: PathBuf,

    /// Hub interface defaults
    pub interface: InterfaceConfig,

    /// Global settings defaults
    pub global: GlobalConfig,

    /// Aggregate config rendering policy
    pub render: RenderConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            store_path: meshgate_common::default_store_path(),
            interface: InterfaceConfig::default(),
            global: GlobalConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

/// Hub interface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceConfig {
    /// Address ranges owned by the hub, in CIDR notation
    pub addresses: Vec<String>,

    /// WireGuard listen port
    pub listen_port: u16,

    /// Command run after the interface comes up
    pub post_up: String,

    /// Command run after the interface goes down
    pub post_down: String,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            addresses: vec!["10.252.1.1/24".to_string()],
            listen_port: 51820,
            post_up: String::new(),
            post_down: String::new(),
        }
    }
}

/// Cross-peer defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Host or host:port peers connect to; empty uses this machine's hostname
    pub endpoint_address: String,

    /// DNS servers handed to peers that use the hub's DNS
    pub dns_servers: Vec<String>,

    pub mtu: u32,

    pub persistent_keepalive: u32,

    /// Routing fwmark; empty disables it
    pub forward_mark: String,

    /// Where the aggregate WireGuard config is written
    pub config_file_path: PathBuf,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            endpoint_address: String::new(),
            dns_servers: vec!["1.1.1.1".to_string()],
            mtu: 1450,
            persistent_keepalive: 15,
            forward_mark: "0xca6c".to_string(),
            config_file_path: PathBuf::from("/etc/wireguard/wg0.conf"),
        }
    }
}

/// Rendering policy for the aggregate config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Keep disabled peers in the hub config
    pub include_disabled_peers: bool,
}

impl HubConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Self = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the database path
    pub fn db_path(&self) -> PathBuf {
        self.store_path.join("state.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HubConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.interface.listen_port, 51820);
        assert_eq!(config.global.mtu, 1450);
        assert!(!config.render.include_disabled_peers);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
store_path = "/var/lib/meshgate"

[interface]
addresses = ["10.9.0.1/24", "fd00:9::1/64"]

[global]
endpoint_address = "vpn.example.com:51999"

[render]
include_disabled_peers = true
"#,
        )
        .unwrap();

        let config = HubConfig::load(&path).unwrap();
        assert_eq!(config.db_path(), PathBuf::from("/var/lib/meshgate/state.db"));
        assert_eq!(config.interface.addresses.len(), 2);
        assert_eq!(config.interface.listen_port, 51820);
        assert_eq!(config.global.endpoint_address, "vpn.example.com:51999");
        assert_eq!(config.global.dns_servers, vec!["1.1.1.1"]);
        assert!(config.render.include_disabled_peers);
    }
}
