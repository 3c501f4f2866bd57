//! Peer lifecycle management
//!
//! Create, edit and delete run under one operation lock covering the whole
//! read, allocate, validate, write and apply sequence. Address allocation has
//! no reservation step of its own, so without the lock two concurrent creates
//! could pick the same address or accept the same public key.
//!
//! A failed config apply does not undo the peer mutation; it is reported in
//! [`Mutation::apply_error`] and the next successful apply closes the gap.

use crate::allocator;
use crate::render::{self, ClientConfigOptions, HubConfigOptions};
use meshgate_common::crypto::{self, KeyPair, SecretKey};
use meshgate_common::{Error, HubRecords, Peer, PeerData, PeerInput, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Preshared key input that disables the preshared key
pub const PRESHARED_KEY_DISABLED: &str = "-";

/// Outcome of a stored mutation
#[derive(Debug)]
pub struct Mutation<T> {
    pub value: T,
    /// Set when the peer change was stored but the hub config was not applied
    pub apply_error: Option<Error>,
}

impl<T> Mutation<T> {
    pub fn is_applied(&self) -> bool {
        self.apply_error.is_none()
    }

    /// Treat a failed apply as an error. The mutation stays persisted.
    pub fn into_result(self) -> Result<T> {
        match self.apply_error {
            None => Ok(self.value),
            Some(e) => Err(e),
        }
    }
}

/// Peer lifecycle manager
pub struct PeerService {
    records: HubRecords,
    hub_options: HubConfigOptions,
    op_lock: Mutex<()>,
}

impl PeerService {
    pub fn new(records: HubRecords, hub_options: HubConfigOptions) -> Self {
        Self {
            records,
            hub_options,
            op_lock: Mutex::new(()),
        }
    }

    pub fn records(&self) -> &HubRecords {
        &self.records
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Create a peer, allocating addresses and keys as needed
    pub fn create_new(&self, input: PeerInput) -> Result<Mutation<Peer>> {
        let _guard = self.op_lock.lock();

        let peer = self.prepare_new(input)?;
        self.records.save_peer(&peer)?;
        info!(
            "Created peer {} ({}) at {}",
            peer.name,
            peer.id,
            display_list(&peer.allocated_ips)
        );

        Ok(Mutation {
            value: peer,
            apply_error: self.apply_locked(),
        })
    }

    /// Replace the mutable fields of a peer. Keys, ID and creation time are kept.
    pub fn edit_peer(&self, id: &str, input: PeerInput) -> Result<Mutation<PeerData>> {
        let _guard = self.op_lock.lock();

        let mut peer = self.records.get_peer(id)?;
        let interface = self.records.get_hub_interface()?;
        let peers = self.records.list_peers()?;
        let used = allocator::compute_allocated(&interface, &peers, Some(&peer.id));

        validate_labels(&input)?;
        let requested = non_blank(&input.allocated_ips);
        if requested.is_empty() {
            warn!("Rejected edit of peer {}: no allocated addresses", id);
            return Err(Error::Validation(
                "a peer needs at least one allocated address".to_string(),
            ));
        }
        let allocated = checked(
            allocator::validate_allocation(&interface.addresses, &used, &requested),
            "allocated IPs",
        )?;
        let allowed = checked(
            allocator::parse_cidr_list(&input.allowed_ips, false),
            "allowed IPs",
        )?;

        peer.name = input.name;
        peer.email = input.email;
        peer.enabled = input.enabled;
        peer.use_server_dns = input.use_server_dns;
        peer.allocated_ips = allocated;
        peer.allowed_ips = allowed;
        peer.updated_at = Utc::now();

        self.records.save_peer(&peer)?;
        info!("Updated peer {} ({})", peer.name, peer.id);

        let apply_error = self.apply_locked();
        // The edit is stored; a render failure only costs the client config
        let client_config = self
            .client_config(&peer, &ClientConfigOptions::default())
            .unwrap_or_else(|e| {
                warn!("Cannot render client config for peer {}: {}", peer.id, e);
                None
            });

        Ok(Mutation {
            value: PeerData {
                peer,
                client_config,
            },
            apply_error,
        })
    }

    /// Remove a peer and revoke its access in the hub config
    pub fn delete_peer(&self, id: &str) -> Result<Mutation<Peer>> {
        let _guard = self.op_lock.lock();

        let peer = self.records.get_peer(id)?;
        self.records.delete_peer(id)?;
        info!("Deleted peer {} ({})", peer.name, peer.id);

        Ok(Mutation {
            value: peer,
            apply_error: self.apply_locked(),
        })
    }

    /// Regenerate and write the aggregate hub config
    pub fn apply_config(&self) -> Result<()> {
        let _guard = self.op_lock.lock();
        match self.apply_locked() {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn list_peers(&self) -> Result<Vec<Peer>> {
        let mut peers = self.records.list_peers()?;
        peers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(peers)
    }

    /// A peer with its client config, rendered with `options`
    pub fn get_peer(&self, id: &str, options: &ClientConfigOptions) -> Result<PeerData> {
        let peer = self.records.get_peer(id)?;
        let client_config = self.client_config(&peer, options)?;
        Ok(PeerData {
            peer,
            client_config,
        })
    }

    /// Render the hub config without writing it
    pub fn render_hub_config(&self) -> Result<String> {
        let _guard = self.op_lock.lock();
        let hub = self.records.get_hub()?;
        let peers = self.records.list_peers()?;
        let settings = self.records.get_global_settings()?;
        Ok(render::render_hub_config(&hub, &peers, &settings, &self.hub_options))
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Everything up to, but not including, the store write. Any error here
    /// leaves the store untouched.
    fn prepare_new(&self, input: PeerInput) -> Result<Peer> {
        let interface = self.records.get_hub_interface()?;
        let peers = self.records.list_peers()?;
        let used = allocator::compute_allocated(&interface, &peers, None);

        validate_labels(&input)?;
        let requested = non_blank(&input.allocated_ips);
        let candidates: Vec<String> = if requested.is_empty() {
            allocator::suggest_addresses(&interface.addresses, &used)?
                .iter()
                .map(ToString::to_string)
                .collect()
        } else {
            requested
        };

        let allocated_ips = checked(
            allocator::validate_allocation(&interface.addresses, &used, &candidates),
            "allocated IPs",
        )?;
        let allowed_ips = checked(
            allocator::parse_cidr_list(&input.allowed_ips, false),
            "allowed IPs",
        )?;
        let extra_allowed_ips = checked(
            allocator::parse_cidr_list(&input.extra_allowed_ips, true),
            "extra allowed IPs",
        )?;

        let (private_key, public_key) = match non_empty(input.public_key.as_deref()) {
            None => {
                let kp = KeyPair::generate();
                (Some(kp.private_key), kp.public_key)
            }
            Some(supplied) => {
                let public_key = crypto::parse_public_key(supplied)?;
                let supplied_text = public_key.to_string();
                if peers.iter().any(|p| p.public_key.to_string() == supplied_text) {
                    warn!("Rejected duplicate public key {}", supplied_text);
                    return Err(Error::DuplicateKey(supplied_text));
                }
                (None, public_key)
            }
        };

        let preshared_key = resolve_preshared_key(input.preshared_key.as_deref(), &input.name)?;

        let now = Utc::now();
        Ok(Peer {
            id: Uuid::new_v4().to_string(),
            private_key,
            public_key,
            preshared_key,
            name: input.name,
            email: input.email,
            allocated_ips,
            allowed_ips,
            extra_allowed_ips,
            use_server_dns: input.use_server_dns,
            enabled: input.enabled,
            created_at: now,
            updated_at: now,
        })
    }

    /// Render and write the hub config. Caller holds the operation lock.
    fn apply_locked(&self) -> Option<Error> {
        match self.write_hub_config() {
            Ok(path) => {
                debug!("Applied hub config to {:?}", path);
                None
            }
            Err(e) => {
                error!("Cannot apply hub config: {}", e);
                Some(Error::ConfigApply(e.to_string()))
            }
        }
    }

    fn write_hub_config(&self) -> Result<PathBuf> {
        let hub = self.records.get_hub()?;
        let peers = self.records.list_peers()?;
        let settings = self.records.get_global_settings()?;
        let text = render::render_hub_config(&hub, &peers, &settings, &self.hub_options);
        render::write_config_file(&settings.config_file_path, &text)?;
        Ok(settings.config_file_path)
    }

    fn client_config(&self, peer: &Peer, options: &ClientConfigOptions) -> Result<Option<String>> {
        if !peer.has_private_key() {
            return Ok(None);
        }
        let hub = self.records.get_hub()?;
        let settings = self.records.get_global_settings()?;
        Ok(Some(render::render_peer_config(peer, &hub, &settings, options)))
    }
}

/// Apply the preshared key policy: empty generates, `-` disables, anything
/// else must parse.
pub fn resolve_preshared_key(input: Option<&str>, peer_name: &str) -> Result<Option<SecretKey>> {
    match non_empty(input) {
        None => Ok(Some(crypto::generate_preshared_key())),
        Some(PRESHARED_KEY_DISABLED) => {
            info!("Skipped preshared key generation for peer {}", peer_name);
            Ok(None)
        }
        Some(supplied) => crypto::parse_preshared_key(supplied).map(Some),
    }
}

/// Name and contact end up in comment lines of the hub config, so a line
/// break there would start a new directive.
fn validate_labels(input: &PeerInput) -> Result<()> {
    for (field, value) in [("name", &input.name), ("email", &input.email)] {
        if value.chars().any(char::is_control) {
            warn!("Rejected peer {} containing control characters", field);
            return Err(Error::Validation(format!(
                "peer {} must not contain control characters",
                field
            )));
        }
    }
    Ok(())
}

fn non_blank(entries: &[String]) -> Vec<String> {
    entries
        .iter()
        .filter(|s| !s.trim().is_empty())
        .cloned()
        .collect()
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn checked<T>(result: Result<T>, what: &str) -> Result<T> {
    result.map_err(|e| {
        warn!("Invalid {} input: {}", what, e);
        e
    })
}

fn display_list<T: ToString>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
