//! Error types for selah-core

use thiserror::Error;

/// Result type alias using selah-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in selah-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local storage failure (quota, corruption, inconsistent rows)
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Remote store call failed
    #[error("Remote error: {0}")]
    Remote(#[from] crate::sync::RemoteError),

    /// Sync was requested while the remote store is unreachable
    #[error("Remote store is unreachable; changes stay queued until connectivity returns")]
    Offline,

    /// Sync was requested after the engine was shut down
    #[error("Sync engine has been shut down")]
    ShutDown,
}
