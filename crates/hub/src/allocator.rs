//! Address allocation inside the hub's ranges.
//!
//! Every peer address and the hub's own address in each owned range must be
//! unique. The network and broadcast identifiers of a range (first and last
//! address, for IPv6 as well) are never handed out.

use ipnetwork::IpNetwork;
use meshgate_common::{Error, HubInterface, Peer, Result};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::debug;

/// Addresses currently in use
pub type UsedAddresses = HashSet<IpAddr>;

/// Parse an address-with-prefix. A bare address without `/prefix` is rejected.
pub fn parse_cidr(s: &str) -> Result<IpNetwork> {
    let s = s.trim();
    if !s.contains('/') {
        return Err(Error::Validation(format!(
            "{} must be in CIDR format (address/prefix)",
            s
        )));
    }
    s.parse()
        .map_err(|e| Error::Validation(format!("invalid CIDR {}: {}", s, e)))
}

/// Parse a list of CIDRs. With `allow_empty`, blank entries are skipped
/// instead of rejected.
pub fn parse_cidr_list(entries: &[String], allow_empty: bool) -> Result<Vec<IpNetwork>> {
    let mut parsed = Vec::with_capacity(entries.len());
    for entry in entries {
        if allow_empty && entry.trim().is_empty() {
            continue;
        }
        parsed.push(parse_cidr(entry)?);
    }
    Ok(parsed)
}

/// Collect every address in use by the hub and by peers, skipping
/// `exclude_peer_id` so a peer being edited does not collide with itself.
pub fn compute_allocated(
    interface: &HubInterface,
    peers: &[Peer],
    exclude_peer_id: Option<&str>,
) -> UsedAddresses {
    let hub = interface.addresses.iter().map(|n| n.ip());
    let peer_addrs = peers
        .iter()
        .filter(|p| Some(p.id.as_str()) != exclude_peer_id)
        .flat_map(|p| p.allocated_ips.iter().map(|n| n.ip()));

    hub.chain(peer_addrs).collect()
}

fn width(range: &IpNetwork) -> u32 {
    match range {
        IpNetwork::V4(_) => 32,
        IpNetwork::V6(_) => 128,
    }
}

fn to_u128(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

fn from_u128(value: u128, range: &IpNetwork) -> IpAddr {
    match range {
        // Values for an IPv4 range never exceed 32 bits
        IpNetwork::V4(_) => IpAddr::V4(Ipv4Addr::from(value as u32)),
        IpNetwork::V6(_) => IpAddr::V6(Ipv6Addr::from(value)),
    }
}

/// Network and broadcast identifiers of a range, as integers
fn bounds(range: &IpNetwork) -> (u128, u128) {
    let host_bits = width(range) - u32::from(range.prefix());
    let host_mask = if host_bits >= 128 {
        u128::MAX
    } else {
        (1u128 << host_bits) - 1
    };
    let network = to_u128(range.ip()) & !host_mask;
    (network, network | host_mask)
}

/// Whether `ip` is the network or broadcast identifier of `range`
pub fn is_reserved(range: &IpNetwork, ip: IpAddr) -> bool {
    let (network, broadcast) = bounds(range);
    let value = to_u128(ip);
    value == network || value == broadcast
}

/// First address of `range`, in ascending order, that is neither in `used`
/// nor a reserved identifier.
pub fn next_available(range: &IpNetwork, used: &UsedAddresses) -> Result<IpAddr> {
    let (network, broadcast) = bounds(range);
    let exhausted = || Error::AllocationExhausted(range.to_string());

    let first = network.checked_add(1).ok_or_else(exhausted)?;
    // Terminates within used.len() + 1 steps for any range with a free host
    for value in first..broadcast {
        let ip = from_u128(value, range);
        if !used.contains(&ip) {
            return Ok(ip);
        }
    }

    Err(exhausted())
}

/// One host address (/32 or /128) per hub range.
///
/// Each suggestion is added to the working set so overlapping ranges never
/// receive the same address twice.
pub fn suggest_addresses(hub_ranges: &[IpNetwork], used: &UsedAddresses) -> Result<Vec<IpNetwork>> {
    let mut working = used.clone();
    let mut suggested = Vec::with_capacity(hub_ranges.len());

    for range in hub_ranges {
        let ip = next_available(range, &working)?;
        let host_prefix = width(range) as u8;
        let net = IpNetwork::new(ip, host_prefix)
            .map_err(|e| Error::Validation(format!("cannot build host network for {}: {}", ip, e)))?;
        debug!("Suggested {} from {}", net, range);
        working.insert(ip);
        suggested.push(net);
    }

    Ok(suggested)
}

/// Validate a requested allocation against the hub ranges and the used set.
///
/// Rejects malformed entries, addresses outside every hub range, reserved
/// identifiers, addresses already in use, and the same address listed twice.
pub fn validate_allocation(
    hub_ranges: &[IpNetwork],
    used: &UsedAddresses,
    candidates: &[String],
) -> Result<Vec<IpNetwork>> {
    let mut seen = HashSet::new();
    let mut allocation = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let net = parse_cidr(candidate).map_err(|_| {
            Error::Validation(format!(
                "Invalid ip allocation input {}. Must be in CIDR format",
                candidate
            ))
        })?;
        let ip = net.ip();

        if used.contains(&ip) || !seen.insert(ip) {
            return Err(Error::DuplicateAddress(ip.to_string()));
        }

        let containing: Vec<&IpNetwork> =
            hub_ranges.iter().filter(|range| range.contains(ip)).collect();
        if containing.is_empty() {
            return Err(Error::Validation(format!(
                "IP {} does not belong to any network of the hub",
                ip
            )));
        }

        // Overlapping ranges: reserved in any of them means reserved
        if let Some(range) = containing.iter().find(|range| is_reserved(range, ip)) {
            return Err(Error::Validation(format!(
                "IP {} is a reserved identifier of {}",
                ip, range
            )));
        }

        allocation.push(net);
    }

    Ok(allocation)
}
