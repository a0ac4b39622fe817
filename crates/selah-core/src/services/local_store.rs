//! Shared local store used by the sync engine and every client

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::db::{Database, EntityRepository, SyncQueue, VerseCache};
use crate::error::{Error, Result};
use crate::models::{
    Bookmark, CachedVerse, EnqueueOutcome, EntityId, EntityType, FailureKind, Highlight,
    HighlightColor, NewOperation, Note, OperationKind, QueueSummary, SyncOperation, SyncStatus,
    Syncable, VerseRef,
};
use crate::sync::Clock;
use crate::util::normalize_text_option;

/// What happened to the local row when its queued changes were discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discarded {
    /// The entity never reached the remote, so the local row was dropped
    Purged,
    /// The row was kept (and undeleted) and marked synced
    KeptAsSynced,
}

/// Number of entities of one type in one status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub entity_type: EntityType,
    pub status: SyncStatus,
    pub count: usize,
}

/// Thread-safe handle to the on-device database
///
/// Every user-content write updates the entity row, its sync status and the
/// sync queue in a single transaction.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
}

impl LocalStore {
    /// Open the store at the given filesystem path.
    pub fn open_path(db_path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path)?;
        Self::from_database(db, Some(db_path), clock)
    }

    /// Open an in-memory store (primarily for tests).
    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        Self::from_database(Database::open_in_memory()?, None, clock)
    }

    fn from_database(db: Database, db_path: Option<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let recovered = SyncQueue::new(db.connection()).reset_in_flight()?;
        if recovered > 0 {
            tracing::warn!("Recovered {recovered} operation(s) left in flight by a previous run");
        }

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path,
            clock,
        })
    }

    /// Filesystem path of the database, if file-backed.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    // User-content writes

    /// Store a new entity and queue its create
    pub async fn insert<E: Syncable>(&self, mut entity: E) -> Result<E> {
        let now = self.now();
        let header = entity.header_mut();
        header.sync_status = SyncStatus::Pending;
        header.created_at = now;
        header.updated_at = now;
        entity.validate()?;

        let operation = NewOperation::create(&entity)?;
        let db = self.db.lock().await;
        let tx = db.connection().unchecked_transaction()?;
        EntityRepository::new(&tx).insert(&entity)?;
        SyncQueue::new(&tx).enqueue(&operation, now)?;
        tx.commit()?;

        tracing::debug!("Created {} {}", E::ENTITY_TYPE, entity.id());
        Ok(entity)
    }

    /// Apply a change to a stored entity and queue its update
    pub async fn modify<E, F>(&self, id: &EntityId, change: F) -> Result<E>
    where
        E: Syncable,
        F: FnOnce(&mut E) + Send,
    {
        let now = self.now();
        let db = self.db.lock().await;
        let tx = db.connection().unchecked_transaction()?;
        let repo = EntityRepository::new(&tx);

        let mut entity: E = repo
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("{} {id}", E::ENTITY_TYPE)))?;
        change(&mut entity);
        entity.header_mut().touch(now);
        entity.validate()?;

        repo.update(&entity)?;
        SyncQueue::new(&tx).enqueue(&NewOperation::update(&entity)?, now)?;
        tx.commit()?;

        tracing::debug!("Updated {} {id}", E::ENTITY_TYPE);
        Ok(entity)
    }

    /// Soft-delete an entity and queue its delete
    ///
    /// An entity that never reached the remote is dropped outright along with
    /// its queued create.
    pub async fn remove(&self, entity_type: EntityType, id: &EntityId) -> Result<()> {
        let now = self.now();
        let db = self.db.lock().await;
        let tx = db.connection().unchecked_transaction()?;
        let repo = EntityRepository::new(&tx);

        repo.soft_delete(entity_type, id, now)?;
        let outcome = SyncQueue::new(&tx).enqueue(&NewOperation::delete(entity_type, *id), now)?;
        if outcome == EnqueueOutcome::Cancelled {
            repo.purge(entity_type, id)?;
        }
        tx.commit()?;

        tracing::debug!("Deleted {entity_type} {id} ({outcome:?})");
        Ok(())
    }

    pub async fn add_bookmark(
        &self,
        user_id: &str,
        verse: VerseRef,
        label: Option<String>,
    ) -> Result<Bookmark> {
        self.insert(Bookmark::new(user_id, verse, label)).await
    }

    pub async fn relabel_bookmark(&self, id: &EntityId, label: Option<String>) -> Result<Bookmark> {
        let label = normalize_text_option(label);
        self.modify(id, |bookmark: &mut Bookmark| bookmark.label = label)
            .await
    }

    pub async fn remove_bookmark(&self, id: &EntityId) -> Result<()> {
        self.remove(EntityType::Bookmark, id).await
    }

    pub async fn add_note(&self, user_id: &str, verse: VerseRef, content: &str) -> Result<Note> {
        self.insert(Note::new(user_id, verse, content)).await
    }

    pub async fn edit_note(&self, id: &EntityId, content: &str) -> Result<Note> {
        let content = content.trim().to_string();
        self.modify(id, |note: &mut Note| note.content = content).await
    }

    pub async fn remove_note(&self, id: &EntityId) -> Result<()> {
        self.remove(EntityType::Note, id).await
    }

    pub async fn add_highlight(
        &self,
        user_id: &str,
        verse: VerseRef,
        color: HighlightColor,
    ) -> Result<Highlight> {
        self.insert(Highlight::new(user_id, verse, color)).await
    }

    pub async fn recolor_highlight(&self, id: &EntityId, color: HighlightColor) -> Result<Highlight> {
        self.modify(id, |highlight: &mut Highlight| highlight.color = color)
            .await
    }

    pub async fn remove_highlight(&self, id: &EntityId) -> Result<()> {
        self.remove(EntityType::Highlight, id).await
    }

    // User-content reads

    pub async fn get<E: Syncable>(&self, id: &EntityId) -> Result<Option<E>> {
        let db = self.db.lock().await;
        EntityRepository::new(db.connection()).get(id)
    }

    /// Entities attached to a chapter, optionally narrowed to one verse
    pub async fn list_for_chapter<E: Syncable>(
        &self,
        user_id: &str,
        book: &str,
        chapter: u32,
        verse: Option<u32>,
    ) -> Result<Vec<E>> {
        let db = self.db.lock().await;
        EntityRepository::new(db.connection()).list_for_chapter(user_id, book, chapter, verse)
    }

    pub async fn list_for_user<E: Syncable>(&self, user_id: &str, limit: usize) -> Result<Vec<E>> {
        let db = self.db.lock().await;
        EntityRepository::new(db.connection()).list_for_user(user_id, limit)
    }

    /// Entities in the given status, for badges and status reports
    pub async fn list_by_status<E: Syncable>(&self, status: SyncStatus) -> Result<Vec<E>> {
        let db = self.db.lock().await;
        EntityRepository::new(db.connection()).list_by_status(status)
    }

    /// Sync status of an entity, including soft-deleted rows awaiting sync
    pub async fn status_of(&self, entity_type: EntityType, id: &EntityId) -> Result<Option<SyncStatus>> {
        let db = self.db.lock().await;
        EntityRepository::new(db.connection()).status_of(entity_type, id)
    }

    pub async fn status_counts(&self) -> Result<Vec<StatusCount>> {
        let db = self.db.lock().await;
        let repo = EntityRepository::new(db.connection());

        let mut counts = Vec::new();
        for entity_type in EntityType::ALL {
            for (status, count) in repo.count_by_status(entity_type)? {
                counts.push(StatusCount {
                    entity_type,
                    status,
                    count,
                });
            }
        }
        Ok(counts)
    }

    /// Visible IDs of one collection starting with `prefix`
    pub async fn ids_by_prefix(&self, entity_type: EntityType, prefix: &str) -> Result<Vec<EntityId>> {
        let db = self.db.lock().await;
        EntityRepository::new(db.connection()).ids_by_prefix(entity_type, prefix)
    }

    // Queue access for the sync engine

    /// Operations ready to dispatch now, at most one per entity
    pub async fn due_operations(&self, max: usize) -> Result<Vec<SyncOperation>> {
        let now = self.now();
        let db = self.db.lock().await;
        SyncQueue::new(db.connection()).due_batch(max, now)
    }

    /// Count a dispatch; returns the attempt number
    pub async fn begin_attempt(&self, operation_id: i64) -> Result<u32> {
        let db = self.db.lock().await;
        SyncQueue::new(db.connection()).mark_attempt(operation_id)
    }

    /// Record remote acceptance of an operation
    ///
    /// Returns the entity's resulting status, or `None` when a confirmed
    /// delete purged the row.
    pub async fn confirm(&self, operation: &SyncOperation) -> Result<Option<SyncStatus>> {
        let db = self.db.lock().await;
        let tx = db.connection().unchecked_transaction()?;
        let queue = SyncQueue::new(&tx);
        let repo = EntityRepository::new(&tx);

        queue.remove(operation.id)?;
        let remaining = queue.operations_for(operation.entity_type, &operation.entity_id)?;

        let status = if !remaining.is_empty() {
            repo.status_of(operation.entity_type, &operation.entity_id)?
        } else if operation.kind == OperationKind::Delete {
            repo.purge(operation.entity_type, &operation.entity_id)?;
            None
        } else {
            repo.set_status(operation.entity_type, &operation.entity_id, SyncStatus::Synced)?;
            Some(SyncStatus::Synced)
        };
        tx.commit()?;

        Ok(status)
    }

    /// Put a failed operation back behind a backoff gate
    pub async fn schedule_retry(&self, operation_id: i64, next_attempt_at: i64, error: &str) -> Result<()> {
        let db = self.db.lock().await;
        SyncQueue::new(db.connection()).schedule_retry(operation_id, next_attempt_at, error)
    }

    /// Park an operation as failed-permanent and flag its entity
    pub async fn park(&self, operation: &SyncOperation, failure: FailureKind, error: &str) -> Result<SyncStatus> {
        let status = failure.entity_status();
        let db = self.db.lock().await;
        let tx = db.connection().unchecked_transaction()?;
        SyncQueue::new(&tx).park(operation.id, failure, error)?;
        EntityRepository::new(&tx).set_status(operation.entity_type, &operation.entity_id, status)?;
        tx.commit()?;
        Ok(status)
    }

    /// Earliest backoff gate among waiting operations
    pub async fn next_due_at(&self) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        SyncQueue::new(db.connection()).next_due_at()
    }

    /// Release backoff gates and give exhausted operations a fresh budget
    ///
    /// Returns `(released, requeued)`. Rejected and conflicting operations
    /// stay parked; only the user can resolve those.
    pub async fn prepare_reconnect_drain(&self) -> Result<(usize, usize)> {
        let db = self.db.lock().await;
        let tx = db.connection().unchecked_transaction()?;
        let queue = SyncQueue::new(&tx);
        let repo = EntityRepository::new(&tx);

        let released = queue.release_backoff()?;
        let exhausted = queue.parked(Some(FailureKind::Exhausted))?;
        for operation in &exhausted {
            queue.requeue(operation.id)?;
            repo.set_status(operation.entity_type, &operation.entity_id, SyncStatus::Pending)?;
        }
        tx.commit()?;

        Ok((released, exhausted.len()))
    }

    /// Clear in-flight flags so interrupted operations are dispatched again
    pub async fn reset_in_flight(&self) -> Result<usize> {
        let db = self.db.lock().await;
        SyncQueue::new(db.connection()).reset_in_flight()
    }

    // User resolution of failed operations

    /// Re-queue the parked operations of one entity; returns how many
    pub async fn retry_entity(&self, entity_type: EntityType, id: &EntityId) -> Result<usize> {
        let db = self.db.lock().await;
        let tx = db.connection().unchecked_transaction()?;
        let queue = SyncQueue::new(&tx);

        let mut requeued = 0;
        for operation in queue.operations_for(entity_type, id)? {
            if queue.requeue(operation.id)? {
                requeued += 1;
            }
        }
        if requeued > 0 {
            EntityRepository::new(&tx).set_status(entity_type, id, SyncStatus::Pending)?;
        }
        tx.commit()?;

        Ok(requeued)
    }

    /// Re-queue every parked operation; returns how many
    pub async fn retry_all_failed(&self) -> Result<usize> {
        let db = self.db.lock().await;
        let tx = db.connection().unchecked_transaction()?;
        let queue = SyncQueue::new(&tx);
        let repo = EntityRepository::new(&tx);

        let parked = queue.parked(None)?;
        for operation in &parked {
            queue.requeue(operation.id)?;
            repo.set_status(operation.entity_type, &operation.entity_id, SyncStatus::Pending)?;
        }
        tx.commit()?;

        Ok(parked.len())
    }

    /// Drop every queued change for an entity
    pub async fn discard(&self, entity_type: EntityType, id: &EntityId) -> Result<Discarded> {
        let db = self.db.lock().await;
        let tx = db.connection().unchecked_transaction()?;
        let queue = SyncQueue::new(&tx);
        let repo = EntityRepository::new(&tx);

        let operations = queue.operations_for(entity_type, id)?;
        let Some(first) = operations.first() else {
            return Err(Error::NotFound(format!("no queued changes for {entity_type} {id}")));
        };
        if operations.iter().any(|op| op.in_flight) {
            return Err(Error::InvalidInput(format!(
                "{entity_type} {id} is being synced; try again once it finishes"
            )));
        }

        let never_synced = first.kind == OperationKind::Create;
        for operation in &operations {
            queue.remove(operation.id)?;
        }

        let outcome = if never_synced {
            repo.purge(entity_type, id)?;
            Discarded::Purged
        } else {
            repo.restore(entity_type, id)?;
            repo.set_status(entity_type, id, SyncStatus::Synced)?;
            Discarded::KeptAsSynced
        };
        tx.commit()?;

        tracing::info!("Discarded {} queued change(s) for {entity_type} {id}", operations.len());
        Ok(outcome)
    }

    // Queue views

    pub async fn queue_summary(&self) -> Result<QueueSummary> {
        let now = self.now();
        let db = self.db.lock().await;
        SyncQueue::new(db.connection()).summary(now)
    }

    pub async fn queue_len(&self) -> Result<usize> {
        let db = self.db.lock().await;
        SyncQueue::new(db.connection()).len()
    }

    /// Queued operations in FIFO order
    pub async fn pending_operations(&self, max: usize) -> Result<Vec<SyncOperation>> {
        let db = self.db.lock().await;
        SyncQueue::new(db.connection()).dequeue_batch(max)
    }

    pub async fn operations_for(&self, entity_type: EntityType, id: &EntityId) -> Result<Vec<SyncOperation>> {
        let db = self.db.lock().await;
        SyncQueue::new(db.connection()).operations_for(entity_type, id)
    }

    pub async fn parked_operations(&self) -> Result<Vec<SyncOperation>> {
        let db = self.db.lock().await;
        SyncQueue::new(db.connection()).parked(None)
    }

    // Verse cache

    /// Store verse text, stamped with the store clock as its fetch time
    pub async fn cache_verse(&self, verse: &CachedVerse) -> Result<()> {
        let stamped = CachedVerse {
            fetched_at: self.now(),
            ..verse.clone()
        };
        let db = self.db.lock().await;
        VerseCache::new(db.connection()).put(&stamped)
    }

    pub async fn cached_verse(&self, translation: &str, verse: &VerseRef) -> Result<Option<CachedVerse>> {
        let db = self.db.lock().await;
        VerseCache::new(db.connection()).get(translation, verse)
    }

    pub async fn cached_chapter(&self, translation: &str, book: &str, chapter: u32) -> Result<Vec<CachedVerse>> {
        let db = self.db.lock().await;
        VerseCache::new(db.connection()).list_chapter(translation, book, chapter)
    }

    pub async fn cached_verse_count(&self) -> Result<usize> {
        let db = self.db.lock().await;
        VerseCache::new(db.connection()).count()
    }
}
