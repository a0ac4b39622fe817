use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] selah_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Note text cannot be empty")]
    EmptyContent,
    #[error("ID cannot be empty")]
    EmptyId,
    #[error("Nothing found for id/prefix: {0}")]
    EntityNotFound(String),
    #[error("{0}")]
    AmbiguousId(String),
    #[error("Could not resolve a data directory; pass --db-path or set SELAH_DB_PATH")]
    NoDataDir,
    #[error("Sync is not configured. Set SELAH_API_URL and SELAH_API_TOKEN.")]
    RemoteNotConfigured,
}
