//! Entry point that wires the local store, connectivity monitor and sync
//! engine together for one signed-in user.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::SyncSettings;
use crate::error::Result;
use crate::models::{Bookmark, EntityId, EntityType, Highlight, HighlightColor, Note, VerseRef};
use crate::services::{Discarded, LocalStore};
use crate::state::SyncState;
use crate::sync::{
    ConnectivityMonitor, ConnectivitySignal, DrainReport, NetworkStatus, RemoteStore, SyncEngine,
    SystemClock,
};

/// A user's study library: local data plus background sync
///
/// Writes land in the local store immediately and then ask the engine for a
/// drain; when offline they simply stay queued.
pub struct Library<R: RemoteStore> {
    store: LocalStore,
    monitor: Arc<ConnectivityMonitor>,
    engine: SyncEngine<R>,
    user_id: String,
}

impl<R: RemoteStore> Library<R> {
    /// Open the on-device database and start syncing against `remote`
    pub fn open(
        db_path: impl Into<PathBuf>,
        user_id: impl Into<String>,
        remote: R,
        settings: SyncSettings,
    ) -> Result<Self> {
        settings.validate()?;
        let store = LocalStore::open_path(db_path, Arc::new(SystemClock))?;
        let monitor = Arc::new(ConnectivityMonitor::new(NetworkStatus::Online));
        Ok(Self::new(store, Arc::new(remote), monitor, settings, user_id))
    }

    /// Assemble a library from already constructed parts
    pub fn new(
        store: LocalStore,
        remote: Arc<R>,
        monitor: Arc<ConnectivityMonitor>,
        settings: SyncSettings,
        user_id: impl Into<String>,
    ) -> Self {
        let engine = SyncEngine::new(store.clone(), remote, Arc::clone(&monitor), settings);
        let user_id = user_id.into();
        tracing::info!("Opened library for {user_id}");
        Self {
            store,
            monitor,
            engine,
            user_id,
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn engine(&self) -> &SyncEngine<R> {
        &self.engine
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn sync_state(&self) -> SyncState {
        self.engine.sync_state()
    }

    fn kick(&self) {
        self.engine.request_drain();
    }

    pub async fn add_bookmark(&self, verse: VerseRef, label: Option<String>) -> Result<Bookmark> {
        let bookmark = self.store.add_bookmark(&self.user_id, verse, label).await?;
        self.kick();
        Ok(bookmark)
    }

    pub async fn relabel_bookmark(&self, id: &EntityId, label: Option<String>) -> Result<Bookmark> {
        let bookmark = self.store.relabel_bookmark(id, label).await?;
        self.kick();
        Ok(bookmark)
    }

    pub async fn remove_bookmark(&self, id: &EntityId) -> Result<()> {
        self.store.remove_bookmark(id).await?;
        self.kick();
        Ok(())
    }

    pub async fn add_note(&self, verse: VerseRef, content: &str) -> Result<Note> {
        let note = self.store.add_note(&self.user_id, verse, content).await?;
        self.kick();
        Ok(note)
    }

    pub async fn edit_note(&self, id: &EntityId, content: &str) -> Result<Note> {
        let note = self.store.edit_note(id, content).await?;
        self.kick();
        Ok(note)
    }

    pub async fn remove_note(&self, id: &EntityId) -> Result<()> {
        self.store.remove_note(id).await?;
        self.kick();
        Ok(())
    }

    pub async fn add_highlight(&self, verse: VerseRef, color: HighlightColor) -> Result<Highlight> {
        let highlight = self.store.add_highlight(&self.user_id, verse, color).await?;
        self.kick();
        Ok(highlight)
    }

    pub async fn recolor_highlight(&self, id: &EntityId, color: HighlightColor) -> Result<Highlight> {
        let highlight = self.store.recolor_highlight(id, color).await?;
        self.kick();
        Ok(highlight)
    }

    pub async fn remove_highlight(&self, id: &EntityId) -> Result<()> {
        self.store.remove_highlight(id).await?;
        self.kick();
        Ok(())
    }

    /// Give one entity's failed changes another try
    pub async fn retry(&self, entity_type: EntityType, id: &EntityId) -> Result<usize> {
        let requeued = self.store.retry_entity(entity_type, id).await?;
        if requeued > 0 {
            self.kick();
        }
        Ok(requeued)
    }

    /// Give every failed change another try
    pub async fn retry_failed(&self) -> Result<usize> {
        let requeued = self.store.retry_all_failed().await?;
        if requeued > 0 {
            self.kick();
        }
        Ok(requeued)
    }

    /// Drop an entity's queued changes
    pub async fn discard(&self, entity_type: EntityType, id: &EntityId) -> Result<Discarded> {
        self.store.discard(entity_type, id).await
    }

    /// Drain now and wait for the result
    pub async fn force_sync(&self) -> Result<DrainReport> {
        self.engine.sync_now().await
    }

    /// Feed a platform connectivity event into the monitor
    pub fn set_online(&self, online: bool) {
        let signal = if online {
            ConnectivitySignal::PlatformOnline
        } else {
            ConnectivitySignal::PlatformOffline
        };
        self.monitor.report(signal);
        self.engine.refresh_state();
    }

    /// Stop background sync; queued changes stay on disk for next time
    pub async fn shutdown(self) {
        self.engine.shutdown().await;
        tracing::info!("Closed library for {}", self.user_id);
    }
}
