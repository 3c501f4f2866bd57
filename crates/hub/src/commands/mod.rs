//! CLI Commands

pub mod hub;
pub mod peer;

use crate::output::{print_warning, OutputFormat};
use anyhow::Context as _;
use meshgate_common::{Database, Error, HubRecords};
use meshgate_hub::{bootstrap, HubConfig, HubConfigOptions, PeerService};
use std::sync::Arc;

/// Opened store and engine shared by every command
pub struct Context {
    pub service: PeerService,
    pub format: OutputFormat,
}

impl Context {
    /// Open the store and create any missing hub record
    pub fn open(config: &HubConfig, format: OutputFormat) -> anyhow::Result<Self> {
        let db_path = config.db_path();
        let db = Database::open(&db_path)
            .with_context(|| format!("opening store at {}", db_path.display()))?;
        let records = HubRecords::new(Arc::new(db));
        bootstrap::initialize(&records, config)?;

        let options = HubConfigOptions {
            include_disabled_peers: config.render.include_disabled_peers,
        };
        Ok(Self {
            service: PeerService::new(records, options),
            format,
        })
    }
}

/// Surface a failed config apply after the mutation itself was reported
pub fn check_applied(apply_error: Option<Error>) -> anyhow::Result<()> {
    match apply_error {
        None => Ok(()),
        Some(e) => {
            print_warning("The change is stored but the hub config was not updated");
            Err(e.into())
        }
    }
}
