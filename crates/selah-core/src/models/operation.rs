//! Queued mutations awaiting remote confirmation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{EntityId, EntityType, SyncStatus, Syncable};
use crate::error::{Error, Result};

/// Kind of mutation replayed against the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown operation '{other}'"))),
        }
    }
}

/// Why an operation was parked as permanently failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Retryable failures hit the attempt limit
    Exhausted,
    /// Remote validation rejected the operation
    Rejected,
    /// Remote state conflicts with the local change
    Conflict,
}

impl FailureKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exhausted => "exhausted",
            Self::Rejected => "rejected",
            Self::Conflict => "conflict",
        }
    }

    /// Entity status shown while the operation is parked
    pub const fn entity_status(self) -> SyncStatus {
        match self {
            Self::Conflict => SyncStatus::Conflict,
            Self::Exhausted | Self::Rejected => SyncStatus::Error,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "exhausted" => Ok(Self::Exhausted),
            "rejected" => Ok(Self::Rejected),
            "conflict" => Ok(Self::Conflict),
            other => Err(Error::InvalidInput(format!("unknown failure kind '{other}'"))),
        }
    }
}

/// A durable queue entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOperation {
    /// Queue row id, monotonically increasing in enqueue order
    pub id: i64,
    pub kind: OperationKind,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    /// Data needed to replay the operation remotely
    pub payload: serde_json::Value,
    /// Number of dispatches so far
    pub attempts: u32,
    /// Enqueue time (Unix ms)
    pub created_at: i64,
    /// Backoff gate (Unix ms); 0 means immediately due
    pub next_attempt_at: i64,
    /// Dispatched and awaiting an outcome
    pub in_flight: bool,
    /// Set when parked as failed-permanent
    pub failure: Option<FailureKind>,
    pub last_error: Option<String>,
    /// Bumped whenever a newer change rewrites this entry in place
    pub revision: u32,
}

impl SyncOperation {
    /// Key the remote uses to deduplicate replays of this exact payload
    pub fn idempotency_key(&self) -> String {
        format!("selah-op-{}-{}", self.id, self.revision)
    }

    pub const fn is_parked(&self) -> bool {
        self.failure.is_some()
    }
}

/// An operation about to be enqueued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOperation {
    pub kind: OperationKind,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub payload: serde_json::Value,
}

impl NewOperation {
    pub fn create<E: Syncable>(entity: &E) -> Result<Self> {
        Ok(Self {
            kind: OperationKind::Create,
            entity_type: E::ENTITY_TYPE,
            entity_id: entity.id(),
            payload: serde_json::to_value(entity)?,
        })
    }

    pub fn update<E: Syncable>(entity: &E) -> Result<Self> {
        Ok(Self {
            kind: OperationKind::Update,
            entity_type: E::ENTITY_TYPE,
            entity_id: entity.id(),
            payload: serde_json::to_value(entity)?,
        })
    }

    #[must_use]
    pub fn delete(entity_type: EntityType, entity_id: EntityId) -> Self {
        Self {
            kind: OperationKind::Delete,
            entity_type,
            entity_id,
            payload: serde_json::json!({ "id": entity_id.as_str() }),
        }
    }
}

/// Result of enqueueing an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Appended as a new queue entry
    Appended(i64),
    /// Replaced a queued, not yet dispatched entry in place
    Superseded(i64),
    /// Create followed by delete before first sync; nothing remains queued
    Cancelled,
}

/// Counts describing the queue for status displays
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub total: usize,
    /// Eligible for the next drain
    pub ready: usize,
    /// Waiting on a backoff gate
    pub backing_off: usize,
    pub in_flight: usize,
    /// Parked until the user retries or discards
    pub parked: usize,
}

/// How a new operation combines with the queued one for the same entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Merge {
    Replace(OperationKind),
    Cancel,
}

pub(crate) fn merge_operations(previous: OperationKind, next: OperationKind) -> Result<Merge> {
    use OperationKind::{Create, Delete, Update};

    match (previous, next) {
        (Create, Update) => Ok(Merge::Replace(Create)),
        (Create, Delete) => Ok(Merge::Cancel),
        (Update, Update) | (Delete, Create) => Ok(Merge::Replace(Update)),
        (Update, Delete) => Ok(Merge::Replace(Delete)),
        (Create, Create) | (Update, Create) => Err(Error::InvalidInput(
            "entity already exists; duplicate create".into(),
        )),
        (Delete, Update | Delete) => Err(Error::InvalidInput(
            "entity is already deleted".into(),
        )),
    }
}
