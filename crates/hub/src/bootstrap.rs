//! First-run initialization of the hub records

use crate::allocator;
use crate::config::{GlobalConfig, HubConfig, InterfaceConfig};
use chrono::Utc;
use meshgate_common::{Error, GlobalSettings, Hub, HubInterface, HubKeyPair, HubRecords, Result};
use tracing::{info, warn};

/// Create any missing hub singleton from `config`, then load them.
///
/// Records that already exist are left untouched, so running this on every
/// start is safe.
pub fn initialize(records: &HubRecords, config: &HubConfig) -> Result<(Hub, GlobalSettings)> {
    if records.find_hub_interface()?.is_none() {
        let interface = interface_from_config(&config.interface)?;
        records.save_hub_interface(&interface)?;
        info!(
            "Initialized hub interface with {} address range(s), port {}",
            interface.addresses.len(),
            interface.listen_port
        );
    }

    if records.find_hub_keypair()?.is_none() {
        let keypair = HubKeyPair::generate();
        records.save_hub_keypair(&keypair)?;
        info!("Generated hub key pair, public key {}", keypair.public_key);
    }

    if records.find_global_settings()?.is_none() {
        let settings = settings_from_config(&config.global);
        records.save_global_settings(&settings)?;
        info!(
            "Initialized global settings, endpoint {}",
            settings.endpoint_address
        );
    }

    Ok((records.get_hub()?, records.get_global_settings()?))
}

fn interface_from_config(config: &InterfaceConfig) -> Result<HubInterface> {
    let addresses = allocator::parse_cidr_list(&config.addresses, true)
        .map_err(|e| Error::InvalidConfig(format!("interface addresses: {}", e)))?;
    if addresses.is_empty() {
        return Err(Error::InvalidConfig(
            "the hub interface needs at least one address range".to_string(),
        ));
    }

    Ok(HubInterface {
        addresses,
        listen_port: config.listen_port,
        post_up: config.post_up.trim().to_string(),
        post_down: config.post_down.trim().to_string(),
        updated_at: Utc::now(),
    })
}

fn settings_from_config(config: &GlobalConfig) -> GlobalSettings {
    let endpoint_address = match config.endpoint_address.trim() {
        "" => local_hostname(),
        configured => configured.to_string(),
    };
    let forward_mark = match config.forward_mark.trim() {
        "" => None,
        mark => Some(mark.to_string()),
    };

    GlobalSettings {
        endpoint_address,
        dns_servers: config
            .dns_servers
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        mtu: config.mtu,
        persistent_keepalive: config.persistent_keepalive,
        forward_mark,
        config_file_path: config.config_file_path.clone(),
        updated_at: Utc::now(),
    }
}

fn local_hostname() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            warn!("Cannot read hostname, using localhost as endpoint: {}", e);
            "localhost".to_string()
        }
    }
}
