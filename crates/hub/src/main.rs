//! meshgate CLI - Main Entry Point
//!
//! Administers the hub: initializes its records, manages peers and writes
//! the aggregate WireGuard configuration.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

use commands::{hub, peer};
use meshgate_common::Error;
use meshgate_hub::HubConfig;

/// meshgate - WireGuard hub peer management
#[derive(Parser)]
#[command(name = "meshgate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store directory holding state.db
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(flatten)]
    overrides: HubOverrides,

    #[command(subcommand)]
    command: Commands,
}

/// Values that seed the hub records on first initialization
#[derive(Args, Default)]
#[command(next_help_heading = "Hub defaults")]
struct HubOverrides {
    /// Hub address ranges, comma separated
    #[arg(long, global = true, env = "WG_SERVER_INTERFACE_ADDRESSES", value_delimiter = ',')]
    interface_addresses: Option<Vec<String>>,

    #[arg(long, global = true, env = "WG_SERVER_LISTEN_PORT")]
    listen_port: Option<u16>,

    #[arg(long, global = true, env = "WG_SERVER_POST_UP_SCRIPT")]
    post_up: Option<String>,

    #[arg(long, global = true, env = "WG_SERVER_POST_DOWN_SCRIPT")]
    post_down: Option<String>,

    /// Host or host:port peers connect to
    #[arg(long, global = true, env = "WG_ENDPOINT_ADDRESS")]
    endpoint_address: Option<String>,

    /// DNS servers, comma separated
    #[arg(long, global = true, env = "WG_DNS", value_delimiter = ',')]
    dns: Option<Vec<String>>,

    #[arg(long, global = true, env = "WG_MTU")]
    mtu: Option<u32>,

    #[arg(long, global = true, env = "WG_PERSISTENT_KEEPALIVE")]
    persistent_keepalive: Option<u32>,

    /// Routing fwmark; empty disables it
    #[arg(long, global = true, env = "WG_FORWARD_MARK")]
    forward_mark: Option<String>,

    /// Where the hub config is written
    #[arg(long, global = true, env = "WG_CONFIG_FILE_PATH")]
    config_file_path: Option<PathBuf>,
}

impl HubOverrides {
    fn apply(self, config: &mut HubConfig) {
        if let Some(addresses) = self.interface_addresses {
            config.interface.addresses = addresses;
        }
        if let Some(port) = self.listen_port {
            config.interface.listen_port = port;
        }
        if let Some(cmd) = self.post_up {
            config.interface.post_up = cmd;
        }
        if let Some(cmd) = self.post_down {
            config.interface.post_down = cmd;
        }
        if let Some(endpoint) = self.endpoint_address {
            config.global.endpoint_address = endpoint;
        }
        if let Some(dns) = self.dns {
            config.global.dns_servers = dns;
        }
        if let Some(mtu) = self.mtu {
            config.global.mtu = mtu;
        }
        if let Some(keepalive) = self.persistent_keepalive {
            config.global.persistent_keepalive = keepalive;
        }
        if let Some(mark) = self.forward_mark {
            config.global.forward_mark = mark;
        }
        if let Some(path) = self.config_file_path {
            config.global.config_file_path = path;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the hub records and write the hub config
    Init,

    /// Manage peers
    #[command(subcommand)]
    Peer(peer::PeerCommands),

    /// Regenerate the hub config from the stored records
    Apply {
        /// Print the config instead of writing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

/// Process exit status for a failed command
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<Error>() {
        Some(e) if e.is_store_error() => 3,
        Some(Error::ConfigApply(_)) => 4,
        Some(Error::NotFound { .. }) => 5,
        Some(Error::InvalidConfig(_)) => 6,
        _ => 1,
    }
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { "debug" } else { "info" };
    let filter = if cli.debug {
        tracing_subscriber::EnvFilter::new(log_level)
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level))
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    if let Err(e) = run(cli) {
        output::print_error(&format!("{:#}", e));
        std::process::exit(exit_code(&e));
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Version = cli.command {
        println!("meshgate v{}", meshgate_common::VERSION);
        return Ok(());
    }

    let config_path = cli
        .config
        .unwrap_or_else(|| meshgate_common::default_store_path().join("config.toml"));
    let mut config = HubConfig::load(&config_path)?;
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    cli.overrides.apply(&mut config);

    let ctx = commands::Context::open(&config, cli.format)?;

    match cli.command {
        Commands::Init => hub::init(&ctx)?,
        Commands::Peer(cmd) => peer::execute(cmd, &ctx)?,
        Commands::Apply { dry_run } => hub::apply(&ctx, dry_run)?,
        Commands::Version => {}
    }

    Ok(())
}
