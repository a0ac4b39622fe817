//! Shared cross-platform state types.

use serde::Serialize;

/// Unified sync state surfaced to clients for status badges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Offline,
    Syncing,
    Synced,
    Error,
}

impl SyncState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }
}
