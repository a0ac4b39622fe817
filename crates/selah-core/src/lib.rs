//! selah-core - Core library for Selah
//!
//! This crate contains the user-content models, the on-device store, the
//! durable sync queue and the engine that reconciles queued mutations with
//! the remote store. Every client (CLI today) builds on these types.

pub mod config;
pub mod db;
pub mod error;
pub mod library;
pub mod models;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use config::{RemoteConfig, SyncSettings};
pub use error::{Error, Result};
pub use library::Library;
pub use models::{
    Bookmark, CachedVerse, EntityId, EntityType, Highlight, HighlightColor, Note, SyncOperation,
    SyncStatus, Syncable, VerseRef,
};
pub use services::LocalStore;
pub use state::SyncState;
