//! Data models for Selah

mod bookmark;
mod entity;
mod highlight;
mod note;
mod operation;
mod verse;

pub use bookmark::Bookmark;
pub use entity::{EntityHeader, EntityId, EntityType, SyncStatus, Syncable};
pub use highlight::{Highlight, HighlightColor};
pub use note::Note;
pub use operation::{
    EnqueueOutcome, FailureKind, NewOperation, OperationKind, QueueSummary, SyncOperation,
};
pub(crate) use operation::{merge_operations, Merge};
pub use verse::{CachedVerse, VerseRef};
