//! Core data model for the hub and its peers

use crate::crypto::{KeyPair, PublicKey, SecretKey};
use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// Peer types
// ============================================================================

/// A remote endpoint of the overlay, as persisted in the `peers` collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub id: String,
    /// Absent for bring-your-own-key peers
    #[serde(default)]
    pub private_key: Option<SecretKey>,
    pub public_key: PublicKey,
    #[serde(default)]
    pub preshared_key: Option<SecretKey>,
    pub name: String,
    /// Contact label (e-mail or similar)
    #[serde(default)]
    pub email: String,
    pub allocated_ips: Vec<IpNetwork>,
    #[serde(default)]
    pub allowed_ips: Vec<IpNetwork>,
    #[serde(default)]
    pub extra_allowed_ips: Vec<IpNetwork>,
    pub use_server_dns: bool,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Peer {
    /// Whether the hub can issue a complete client config for this peer
    pub fn has_private_key(&self) -> bool {
        self.private_key.is_some()
    }

    /// Ranges the hub routes to this peer: its own addresses plus extra ranges
    pub fn hub_allowed_ips(&self) -> impl Iterator<Item = &IpNetwork> {
        self.allocated_ips.iter().chain(self.extra_allowed_ips.iter())
    }
}

/// Caller-supplied peer fields for create and edit.
///
/// Addresses arrive as text so that malformed input can be reported as a
/// validation error rather than a decode failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerInput {
    pub name: String,
    pub email: String,
    pub allocated_ips: Vec<String>,
    pub allowed_ips: Vec<String>,
    pub extra_allowed_ips: Vec<String>,
    pub use_server_dns: bool,
    pub enabled: bool,
    /// `None` or empty: generate a full key pair
    pub public_key: Option<String>,
    /// `None` or empty: generate; `"-"`: no preshared key
    pub preshared_key: Option<String>,
}

impl Default for PeerInput {
    /// New peers start enabled
    fn default() -> Self {
        Self {
            name: String::new(),
            email: String::new(),
            allocated_ips: Vec::new(),
            allowed_ips: Vec::new(),
            extra_allowed_ips: Vec::new(),
            use_server_dns: false,
            enabled: true,
            public_key: None,
            preshared_key: None,
        }
    }
}

impl PeerInput {
    /// Input that reproduces the mutable fields of an existing peer
    pub fn from_peer(peer: &Peer) -> Self {
        Self {
            name: peer.name.clone(),
            email: peer.email.clone(),
            allocated_ips: peer.allocated_ips.iter().map(ToString::to_string).collect(),
            allowed_ips: peer.allowed_ips.iter().map(ToString::to_string).collect(),
            extra_allowed_ips: peer
                .extra_allowed_ips
                .iter()
                .map(ToString::to_string)
                .collect(),
            use_server_dns: peer.use_server_dns,
            enabled: peer.enabled,
            public_key: Some(peer.public_key.to_string()),
            preshared_key: None,
        }
    }
}

/// A peer together with its rendered client configuration, if one can be issued
#[derive(Debug, Clone, Serialize)]
pub struct PeerData {
    pub peer: Peer,
    pub client_config: Option<String>,
}

// ============================================================================
// Hub types
// ============================================================================

/// The hub's own network interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubInterface {
    /// Ranges owned by the hub; the address part is the hub's own address
    pub addresses: Vec<IpNetwork>,
    pub listen_port: u16,
    #[serde(default)]
    pub post_up: String,
    #[serde(default)]
    pub post_down: String,
    pub updated_at: DateTime<Utc>,
}

/// The hub's key pair, generated once at first run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubKeyPair {
    pub private_key: SecretKey,
    pub public_key: PublicKey,
    pub updated_at: DateTime<Utc>,
}

impl HubKeyPair {
    pub fn generate() -> Self {
        let KeyPair {
            private_key,
            public_key,
        } = KeyPair::generate();
        Self {
            private_key,
            public_key,
            updated_at: Utc::now(),
        }
    }
}

/// Interface and identity of the hub
#[derive(Debug, Clone, PartialEq)]
pub struct Hub {
    pub interface: HubInterface,
    pub keypair: HubKeyPair,
}

/// Cross-peer defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// Host or host:port that peers dial
    pub endpoint_address: String,
    #[serde(default)]
    pub dns_servers: Vec<String>,
    /// 0 means unset
    #[serde(default)]
    pub mtu: u32,
    /// Seconds; 0 means unset
    #[serde(default)]
    pub persistent_keepalive: u32,
    #[serde(default)]
    pub forward_mark: Option<String>,
    /// Where the aggregate hub configuration is written
    pub config_file_path: PathBuf,
    pub updated_at: DateTime<Utc>,
}
