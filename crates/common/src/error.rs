//! Error types for meshgate

use thiserror::Error;

/// Result type alias using meshgate Error
pub type Result<T> = std::result::Result<T, Error>;

/// meshgate error types
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or out-of-range address input
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Public key {0} is already used by another peer")]
    DuplicateKey(String),

    #[error("Address {0} is already allocated")]
    DuplicateAddress(String),

    #[error("Invalid key: {0}")]
    KeyParse(String),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("No available address in range {0}")]
    AllocationExhausted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(String),

    /// Rendering or writing the aggregate hub configuration failed.
    /// The peer mutation that triggered it has already been persisted.
    #[error("Failed to apply hub configuration: {0}")]
    ConfigApply(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// True for failures of the persistence layer itself
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Database(_) | Error::Serialization(_) | Error::Store(_)
        )
    }
}
