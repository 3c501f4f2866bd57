//! Peer Commands

use clap::{Args, Subcommand};
use anyhow::Result;
use serde::Serialize;

use super::{check_applied, Context};
use crate::output::{print_document, print_item, print_list, print_success, OutputFormat, TableDisplay};
use meshgate_common::{Peer, PeerData, PeerInput};
use meshgate_hub::ClientConfigOptions;

#[derive(Subcommand)]
pub enum PeerCommands {
    /// List all peers
    List,

    /// Show a peer and its client config
    Show {
        /// Peer ID
        id: String,

        /// Leave the DNS line out of the client config
        #[arg(long)]
        no_dns: bool,

        /// Leave the MTU line out of the client config
        #[arg(long)]
        no_mtu: bool,

        /// Leave the FwMark line out of the client config
        #[arg(long)]
        no_fwmark: bool,
    },

    /// Create a new peer
    Create(CreateArgs),

    /// Edit a peer; options not given keep their stored value
    Edit(EditArgs),

    /// Delete a peer
    Delete {
        /// Peer ID
        id: String,
    },
}

#[derive(Args)]
pub struct CreateArgs {
    /// Peer name
    #[arg(short, long)]
    pub name: String,

    /// Contact e-mail
    #[arg(short, long, default_value = "")]
    pub email: String,

    /// Overlay address (CIDR); allocated automatically when omitted
    #[arg(long = "address")]
    pub addresses: Vec<String>,

    /// Ranges the peer routes through the tunnel
    #[arg(long = "allowed-ip", default_value = "0.0.0.0/0")]
    pub allowed_ips: Vec<String>,

    /// Extra ranges the hub routes to this peer
    #[arg(long = "extra-allowed-ip")]
    pub extra_allowed_ips: Vec<String>,

    /// Public key of a peer that keeps its own private key
    #[arg(long)]
    pub public_key: Option<String>,

    /// Preshared key; "-" disables it, omitted generates one
    #[arg(long, allow_hyphen_values = true)]
    pub preshared_key: Option<String>,

    /// Do not hand out the hub's DNS servers
    #[arg(long)]
    pub no_server_dns: bool,

    /// Create the peer disabled
    #[arg(long)]
    pub disabled: bool,
}

#[derive(Args)]
pub struct EditArgs {
    /// Peer ID
    pub id: String,

    #[arg(short, long)]
    pub name: Option<String>,

    #[arg(short, long)]
    pub email: Option<String>,

    /// Replace the overlay addresses
    #[arg(long = "address")]
    pub addresses: Vec<String>,

    /// Replace the tunnel routes
    #[arg(long = "allowed-ip")]
    pub allowed_ips: Vec<String>,

    #[arg(long)]
    pub enabled: Option<bool>,

    #[arg(long)]
    pub server_dns: Option<bool>,
}

impl From<CreateArgs> for PeerInput {
    fn from(args: CreateArgs) -> Self {
        Self {
            name: args.name,
            email: args.email,
            allocated_ips: args.addresses,
            allowed_ips: args.allowed_ips,
            extra_allowed_ips: args.extra_allowed_ips,
            use_server_dns: !args.no_server_dns,
            enabled: !args.disabled,
            public_key: args.public_key,
            preshared_key: args.preshared_key,
        }
    }
}

impl EditArgs {
    /// Stored fields overlaid with the options that were given
    fn merge(self, peer: &Peer) -> PeerInput {
        let mut input = PeerInput::from_peer(peer);
        if let Some(name) = self.name {
            input.name = name;
        }
        if let Some(email) = self.email {
            input.email = email;
        }
        if !self.addresses.is_empty() {
            input.allocated_ips = self.addresses;
        }
        if !self.allowed_ips.is_empty() {
            input.allowed_ips = self.allowed_ips;
        }
        if let Some(enabled) = self.enabled {
            input.enabled = enabled;
        }
        if let Some(dns) = self.server_dns {
            input.use_server_dns = dns;
        }
        input
    }
}

/// Peer display wrapper for serialization
#[derive(Serialize)]
pub struct PeerDisplay {
    pub id: String,
    pub name: String,
    pub email: String,
    pub addresses: String,
    pub public_key: String,
    pub enabled: bool,
    pub own_key: bool,
    pub created_at: String,
}

impl From<&Peer> for PeerDisplay {
    fn from(peer: &Peer) -> Self {
        Self {
            id: peer.id.clone(),
            name: peer.name.clone(),
            email: peer.email.clone(),
            addresses: peer
                .allocated_ips
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            public_key: peer.public_key.to_string(),
            enabled: peer.enabled,
            own_key: !peer.has_private_key(),
            created_at: peer.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

impl TableDisplay for PeerDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Name", "Email", "Addresses", "Public Key", "Enabled", "Own Key", "Created"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            self.email.clone(),
            self.addresses.clone(),
            self.public_key.clone(),
            self.enabled.to_string(),
            self.own_key.to_string(),
            self.created_at.clone(),
        ]
    }
}

fn print_peer_data(data: &PeerData, format: OutputFormat) {
    if format == OutputFormat::Json {
        match serde_json::to_string_pretty(data) {
            Ok(json) => println!("{}", json),
            Err(e) => crate::output::print_error(&format!("Cannot encode output: {}", e)),
        }
        return;
    }

    print_item(&PeerDisplay::from(&data.peer), format);
    match &data.client_config {
        Some(config) => {
            println!();
            print_document(config);
        }
        None => println!("No client config: this peer keeps its own private key."),
    }
}

pub fn execute(cmd: PeerCommands, ctx: &Context) -> Result<()> {
    let service = &ctx.service;

    match cmd {
        PeerCommands::List => {
            let peers = service.list_peers()?;
            let displays: Vec<PeerDisplay> = peers.iter().map(PeerDisplay::from).collect();
            print_list(&displays, ctx.format);
        }

        PeerCommands::Show {
            id,
            no_dns,
            no_mtu,
            no_fwmark,
        } => {
            let options = ClientConfigOptions {
                include_dns: !no_dns,
                include_mtu: !no_mtu,
                include_fwmark: !no_fwmark,
            };
            let data = service.get_peer(&id, &options)?;
            print_peer_data(&data, ctx.format);
        }

        PeerCommands::Create(args) => {
            let created = service.create_new(args.into())?;
            print_success(&format!("Peer '{}' created", created.value.name));
            let data = service.get_peer(&created.value.id, &ClientConfigOptions::default())?;
            print_peer_data(&data, ctx.format);
            check_applied(created.apply_error)?;
        }

        PeerCommands::Edit(args) => {
            let current = service.get_peer(&args.id, &ClientConfigOptions::default())?.peer;
            let id = args.id.clone();
            let edited = service.edit_peer(&id, args.merge(&current))?;
            print_success(&format!("Peer '{}' updated", edited.value.peer.name));
            print_peer_data(&edited.value, ctx.format);
            check_applied(edited.apply_error)?;
        }

        PeerCommands::Delete { id } => {
            let deleted = service.delete_peer(&id)?;
            print_success(&format!("Peer '{}' deleted", deleted.value.name));
            check_applied(deleted.apply_error)?;
        }
    }

    Ok(())
}
