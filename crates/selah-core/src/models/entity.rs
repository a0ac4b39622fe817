//! Shared shape of user-content entities

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::VerseRef;
use crate::error::{Error, Result};

/// A unique identifier for an entity, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Create a new unique entity ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// User-content collections that take part in sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Bookmark,
    Note,
    Highlight,
}

impl EntityType {
    pub const ALL: [Self; 3] = [Self::Bookmark, Self::Note, Self::Highlight];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bookmark => "bookmark",
            Self::Note => "note",
            Self::Highlight => "highlight",
        }
    }

    /// Local table and remote collection name
    pub const fn collection(self) -> &'static str {
        match self {
            Self::Bookmark => "bookmarks",
            Self::Note => "notes",
            Self::Highlight => "highlights",
        }
    }

    /// Column holding the type-specific field
    pub(crate) const fn detail_column(self) -> &'static str {
        match self {
            Self::Bookmark => "label",
            Self::Note => "content",
            Self::Highlight => "color",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bookmark" | "bookmarks" => Ok(Self::Bookmark),
            "note" | "notes" => Ok(Self::Note),
            "highlight" | "highlights" => Ok(Self::Highlight),
            other => Err(Error::InvalidInput(format!("unknown entity type '{other}'"))),
        }
    }
}

/// Relationship of a local entity to the remote store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    #[default]
    Pending,
    Conflict,
    Error,
}

impl SyncStatus {
    pub const ALL: [Self; 4] = [Self::Synced, Self::Pending, Self::Conflict, Self::Error];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Conflict => "conflict",
            Self::Error => "error",
        }
    }

    /// Whether the entity needs a user decision before it syncs again
    pub const fn needs_attention(self) -> bool {
        matches!(self, Self::Conflict | Self::Error)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "synced" => Ok(Self::Synced),
            "pending" => Ok(Self::Pending),
            "conflict" => Ok(Self::Conflict),
            "error" => Ok(Self::Error),
            other => Err(Error::InvalidInput(format!("unknown sync status '{other}'"))),
        }
    }
}

/// Fields every syncable entity carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityHeader {
    /// Locally generated identifier, stable across sync
    pub id: EntityId,
    /// Owner reference
    pub user_id: String,
    /// Scripture locator
    pub verse: VerseRef,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last local mutation timestamp (Unix ms)
    pub updated_at: i64,
    /// Local-only sync bookkeeping, never sent to the remote
    #[serde(skip)]
    pub sync_status: SyncStatus,
}

impl EntityHeader {
    /// Create a header for a freshly created local entity
    ///
    /// Timestamps start at wall-clock time; the local store restamps them
    /// from its own clock on insert.
    #[must_use]
    pub fn new(user_id: impl Into<String>, verse: VerseRef) -> Self {
        Self::new_at(user_id, verse, chrono::Utc::now().timestamp_millis())
    }

    #[must_use]
    pub fn new_at(user_id: impl Into<String>, verse: VerseRef, now: i64) -> Self {
        Self {
            id: EntityId::new(),
            user_id: user_id.into(),
            verse,
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Pending,
        }
    }

    /// Record a local mutation made at `now` (Unix ms)
    pub fn touch(&mut self, now: i64) {
        self.updated_at = now.max(self.updated_at);
        self.sync_status = SyncStatus::Pending;
    }

    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(Error::InvalidInput("user id cannot be empty".into()));
        }
        Ok(())
    }
}

/// A user-content record that is stored locally and mirrored remotely
pub trait Syncable: Clone + Serialize + DeserializeOwned + Send + 'static {
    /// Collection this entity lives in
    const ENTITY_TYPE: EntityType;

    fn header(&self) -> &EntityHeader;

    fn header_mut(&mut self) -> &mut EntityHeader;

    /// Value of the type-specific column
    fn detail(&self) -> Option<String>;

    /// Rebuild an entity from its stored header and type-specific column
    fn from_parts(header: EntityHeader, detail: Option<String>) -> Result<Self>;

    /// Validate domain fields before a write
    fn validate(&self) -> Result<()> {
        self.header().validate()
    }

    fn id(&self) -> EntityId {
        self.header().id
    }

    fn sync_status(&self) -> SyncStatus {
        self.header().sync_status
    }
}
