//! WireGuard configuration rendering.
//!
//! Rendering is pure: the same peer, hub and settings always produce the
//! same text, with a fixed line order. Only [`write_config_file`] touches
//! the filesystem.

use meshgate_common::{GlobalSettings, Hub, Peer, Result};
use std::io::Write as _;
use std::path::Path;
use tracing::{debug, warn};

/// Which optional interface lines to keep in a client config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfigOptions {
    pub include_dns: bool,
    pub include_mtu: bool,
    pub include_fwmark: bool,
}

impl Default for ClientConfigOptions {
    fn default() -> Self {
        Self {
            include_dns: true,
            include_mtu: true,
            include_fwmark: true,
        }
    }
}

/// Aggregate hub config policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubConfigOptions {
    /// Render disabled peers too. Off by default, so a disabled peer's key
    /// is absent from the data plane and its traffic is refused.
    pub include_disabled_peers: bool,
}

fn join<T: ToString>(items: impl IntoIterator<Item = T>) -> String {
    items
        .into_iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Split `settings.endpoint_address` into host and port, falling back to
/// the hub's listen port when none is embedded.
pub fn endpoint(endpoint_address: &str, listen_port: u16) -> String {
    let address = endpoint_address.trim();

    // [v6]:port or [v6]
    if let Some(rest) = address.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = match tail.strip_prefix(':') {
                Some(p) => parse_port(p, listen_port),
                None => listen_port,
            };
            return format!("[{}]:{}", host, port);
        }
    }

    match address.matches(':').count() {
        0 => format!("{}:{}", address, listen_port),
        1 => {
            let (host, port) = address.split_once(':').unwrap_or((address, ""));
            format!("{}:{}", host, parse_port(port, listen_port))
        }
        // Bare IPv6 address
        _ => format!("[{}]:{}", address, listen_port),
    }
}

fn parse_port(port: &str, fallback: u16) -> u16 {
    port.parse().unwrap_or_else(|e| {
        warn!("Endpoint port {:?} is incorrectly formatted: {}", port, e);
        fallback
    })
}

/// Client-side config for one peer
pub fn render_peer_config(
    peer: &Peer,
    hub: &Hub,
    settings: &GlobalSettings,
    options: &ClientConfigOptions,
) -> String {
    let mut out = String::from("[Interface]\n");
    out.push_str(&format!("Address = {}\n", join(&peer.allocated_ips)));
    if let Some(key) = &peer.private_key {
        out.push_str(&format!("PrivateKey = {}\n", key));
    }
    if peer.use_server_dns && options.include_dns && !settings.dns_servers.is_empty() {
        out.push_str(&format!("DNS = {}\n", settings.dns_servers.join(",")));
    }
    if options.include_mtu && settings.mtu > 0 {
        out.push_str(&format!("MTU = {}\n", settings.mtu));
    }
    if options.include_fwmark {
        if let Some(mark) = forward_mark(settings) {
            out.push_str(&format!("FwMark = {}\n", mark));
        }
    }

    out.push_str("\n[Peer]\n");
    out.push_str(&format!("PublicKey = {}\n", hub.keypair.public_key));
    if let Some(psk) = &peer.preshared_key {
        out.push_str(&format!("PresharedKey = {}\n", psk));
    }
    out.push_str(&format!("AllowedIPs = {}\n", join(&peer.allowed_ips)));
    out.push_str(&format!(
        "Endpoint = {}\n",
        endpoint(&settings.endpoint_address, hub.interface.listen_port)
    ));
    if settings.persistent_keepalive > 0 {
        out.push_str(&format!(
            "PersistentKeepalive = {}\n",
            settings.persistent_keepalive
        ));
    }

    out
}

fn forward_mark(settings: &GlobalSettings) -> Option<&str> {
    settings.forward_mark.as_deref().filter(|m| !m.is_empty())
}

/// Aggregate config consumed by the hub's WireGuard interface
pub fn render_hub_config(
    hub: &Hub,
    peers: &[Peer],
    settings: &GlobalSettings,
    options: &HubConfigOptions,
) -> String {
    let iface = &hub.interface;
    let mut out = String::from(
        "# This file was generated by meshgate. Manual changes will be overwritten.\n",
    );
    out.push_str(&format!("# Interface updated at: {}\n", iface.updated_at.to_rfc3339()));
    out.push_str(&format!("# Key pair updated at: {}\n", hub.keypair.updated_at.to_rfc3339()));
    out.push_str("\n[Interface]\n");
    out.push_str(&format!("Address = {}\n", join(&iface.addresses)));
    out.push_str(&format!("ListenPort = {}\n", iface.listen_port));
    out.push_str(&format!("PrivateKey = {}\n", hub.keypair.private_key));
    if settings.mtu > 0 {
        out.push_str(&format!("MTU = {}\n", settings.mtu));
    }
    if let Some(mark) = forward_mark(settings) {
        out.push_str(&format!("FwMark = {}\n", mark));
    }
    if !iface.post_up.is_empty() {
        out.push_str(&format!("PostUp = {}\n", iface.post_up));
    }
    if !iface.post_down.is_empty() {
        out.push_str(&format!("PostDown = {}\n", iface.post_down));
    }

    let mut ordered: Vec<&Peer> = peers
        .iter()
        .filter(|p| p.enabled || options.include_disabled_peers)
        .collect();
    ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    for peer in ordered {
        out.push_str(&format!("\n# ID: {}\n", peer.id));
        out.push_str(&format!("# Name: {}\n", peer.name));
        if !peer.email.is_empty() {
            out.push_str(&format!("# Email: {}\n", peer.email));
        }
        if !peer.enabled {
            out.push_str("# Disabled\n");
        }
        out.push_str(&format!("# Created at: {}\n", peer.created_at.to_rfc3339()));
        out.push_str(&format!("# Updated at: {}\n", peer.updated_at.to_rfc3339()));
        out.push_str("[Peer]\n");
        out.push_str(&format!("PublicKey = {}\n", peer.public_key));
        if let Some(psk) = &peer.preshared_key {
            out.push_str(&format!("PresharedKey = {}\n", psk));
        }
        out.push_str(&format!("AllowedIPs = {}\n", join(peer.hub_allowed_ips())));
    }

    out
}

/// Replace the file at `path` with `contents` in one step.
///
/// Writes a temp file next to the target and renames it over the old one, so
/// readers see either the previous or the new config, never a partial one.
pub fn write_config_file(path: &Path, contents: &str) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    debug!("Wrote {} bytes to {:?}", contents.len(), path);
    Ok(())
}
