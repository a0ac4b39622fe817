//! Contract with the remote store

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{FailureKind, SyncOperation};

/// Failure of a remote call, classified by whether retrying can help
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Transport failure or transient server error
    #[error("network error: {0}")]
    Network(String),

    /// The call did not complete in time
    #[error("request timed out")]
    Timeout,

    /// The remote refused the operation as invalid
    #[error("rejected by remote: {0}")]
    Rejected(String),

    /// Remote state diverged from the local change
    #[error("conflict with remote state: {0}")]
    Conflict(String),
}

impl RemoteError {
    /// Whether the same call may succeed later without user action
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }

    /// How a permanent failure is parked; `None` for retryable errors
    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Network(_) | Self::Timeout => None,
            Self::Rejected(_) => Some(FailureKind::Rejected),
            Self::Conflict(_) => Some(FailureKind::Conflict),
        }
    }
}

/// What the remote acknowledged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: String,
    /// Server-side modification time (Unix ms), when reported
    #[serde(default)]
    pub updated_at: Option<i64>,
}

/// Backend that queued operations are replayed against
pub trait RemoteStore: Send + Sync + 'static {
    /// Apply one create, update or delete
    fn apply(
        &self,
        operation: &SyncOperation,
    ) -> impl Future<Output = Result<RemoteRecord, RemoteError>> + Send;

    /// Cheap reachability check
    fn ping(&self) -> impl Future<Output = Result<(), RemoteError>> + Send;
}
