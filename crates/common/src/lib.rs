//! meshgate Common Library
//!
//! Data model, key management and record storage shared by the meshgate
//! hub engine and its command-line front end.

pub mod crypto;
pub mod db;
pub mod error;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use crypto::{KeyPair, PublicKey, SecretKey};
pub use db::Database;
pub use error::{Error, Result};
pub use store::{Collection, HubRecords, MemoryStore, RecordStore};
pub use types::*;

/// meshgate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".meshgate")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
