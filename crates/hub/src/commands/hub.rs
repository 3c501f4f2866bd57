//! Hub Commands

use super::Context;
use crate::output::{print_document, print_item, print_success, TableDisplay};
use anyhow::Result;
use serde::Serialize;

/// Hub summary for display
#[derive(Serialize)]
pub struct HubDisplay {
    pub public_key: String,
    pub addresses: String,
    pub listen_port: u16,
    pub endpoint: String,
    pub config_file: String,
    pub peers: usize,
}

impl TableDisplay for HubDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Public Key", "Addresses", "Port", "Endpoint", "Config File", "Peers"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.public_key.clone(),
            self.addresses.clone(),
            self.listen_port.to_string(),
            self.endpoint.clone(),
            self.config_file.clone(),
            self.peers.to_string(),
        ]
    }
}

/// Records are created when the context opens; this writes the config and
/// reports what the hub looks like.
pub fn init(ctx: &Context) -> Result<()> {
    ctx.service.apply_config()?;

    let records = ctx.service.records();
    let hub = records.get_hub()?;
    let settings = records.get_global_settings()?;
    let display = HubDisplay {
        public_key: hub.keypair.public_key.to_string(),
        addresses: hub
            .interface
            .addresses
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", "),
        listen_port: hub.interface.listen_port,
        endpoint: settings.endpoint_address,
        config_file: settings.config_file_path.display().to_string(),
        peers: records.list_peers()?.len(),
    };

    print_success("Hub initialized");
    print_item(&display, ctx.format);
    Ok(())
}

pub fn apply(ctx: &Context, dry_run: bool) -> Result<()> {
    if dry_run {
        print_document(&ctx.service.render_hub_config()?);
        return Ok(());
    }

    ctx.service.apply_config()?;
    let path = ctx.service.records().get_global_settings()?.config_file_path;
    print_success(&format!("Hub config written to {}", path.display()));
    Ok(())
}
