//! Durable operation queue

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use rusqlite::{params, Connection, OptionalExtension};

use super::conversion_error;
use crate::error::Result;
use crate::models::{
    merge_operations, EnqueueOutcome, EntityId, EntityType, FailureKind, Merge, NewOperation,
    QueueSummary, SyncOperation,
};

const COLUMNS: &str = "id, kind, entity_type, entity_id, payload, attempts, created_at, \
                       next_attempt_at, in_flight, failure, last_error, revision";

/// Queue entries for each entity, stored next to the entity tables so that an
/// entity write and its enqueue share a transaction
pub struct SyncQueue<'a> {
    conn: &'a Connection,
}

impl<'a> SyncQueue<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse an operation from a database row
    fn parse_operation(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncOperation> {
        let kind: String = row.get(1)?;
        let entity_type: String = row.get(2)?;
        let entity_id: String = row.get(3)?;
        let payload: String = row.get(4)?;
        let failure: Option<String> = row.get(9)?;

        Ok(SyncOperation {
            id: row.get(0)?,
            kind: kind.parse().map_err(|e| conversion_error(1, e))?,
            entity_type: entity_type.parse().map_err(|e| conversion_error(2, e))?,
            entity_id: entity_id.parse().map_err(|e| conversion_error(3, e))?,
            payload: serde_json::from_str(&payload).map_err(|e| conversion_error(4, e))?,
            attempts: row.get(5)?,
            created_at: row.get(6)?,
            next_attempt_at: row.get(7)?,
            in_flight: row.get::<_, i32>(8)? != 0,
            failure: failure
                .map(|f| f.parse::<FailureKind>())
                .transpose()
                .map_err(|e| conversion_error(9, e))?,
            last_error: row.get(10)?,
            revision: row.get(11)?,
        })
    }

    fn query(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<SyncOperation>> {
        let mut stmt = self.conn.prepare(sql)?;
        let operations = stmt
            .query_map(params, Self::parse_operation)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(operations)
    }

    /// Add an operation, collapsing it into the queued one for the same entity
    ///
    /// An operation already dispatched is never rewritten; the new one is
    /// appended behind it instead.
    pub fn enqueue(&self, operation: &NewOperation, now: i64) -> Result<EnqueueOutcome> {
        if let Some(previous) = self.latest_for(operation.entity_type, &operation.entity_id)? {
            let merge = merge_operations(previous.kind, operation.kind)?;

            if !previous.in_flight {
                return match merge {
                    Merge::Cancel => {
                        self.remove(previous.id)?;
                        tracing::debug!(
                            "Cancelled queued create for {} {}",
                            operation.entity_type,
                            operation.entity_id
                        );
                        Ok(EnqueueOutcome::Cancelled)
                    }
                    Merge::Replace(kind) => {
                        self.conn.execute(
                            "UPDATE sync_queue
                             SET kind = ?, payload = ?, attempts = 0, next_attempt_at = 0,
                                 failure = NULL, last_error = NULL, revision = revision + 1
                             WHERE id = ?",
                            params![
                                kind.as_str(),
                                operation.payload.to_string(),
                                previous.id
                            ],
                        )?;
                        Ok(EnqueueOutcome::Superseded(previous.id))
                    }
                };
            }
        }

        self.conn.execute(
            "INSERT INTO sync_queue (kind, entity_type, entity_id, payload, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                operation.kind.as_str(),
                operation.entity_type.as_str(),
                operation.entity_id.as_str(),
                operation.payload.to_string(),
                now
            ],
        )?;
        Ok(EnqueueOutcome::Appended(self.conn.last_insert_rowid()))
    }

    /// Up to `max` operations in FIFO order, without removing them
    pub fn dequeue_batch(&self, max: usize) -> Result<Vec<SyncOperation>> {
        self.query(
            &format!("SELECT {COLUMNS} FROM sync_queue ORDER BY created_at, id LIMIT ?"),
            params![max as i64],
        )
    }

    /// Operations ready to dispatch, at most one per entity
    ///
    /// Skips parked and in-flight entries, entries still behind their backoff
    /// gate, and entries queued behind an older entry for the same entity.
    pub fn due_batch(&self, max: usize, now: i64) -> Result<Vec<SyncOperation>> {
        self.query(
            &format!(
                "SELECT {COLUMNS} FROM sync_queue q
                 WHERE q.in_flight = 0 AND q.failure IS NULL AND q.next_attempt_at <= ?
                   AND NOT EXISTS (
                       SELECT 1 FROM sync_queue p
                       WHERE p.entity_type = q.entity_type
                         AND p.entity_id = q.entity_id
                         AND p.id < q.id
                   )
                 ORDER BY q.created_at, q.id
                 LIMIT ?"
            ),
            params![now, max as i64],
        )
    }

    pub fn get(&self, id: i64) -> Result<Option<SyncOperation>> {
        let operation = self
            .conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM sync_queue WHERE id = ?"),
                params![id],
                Self::parse_operation,
            )
            .optional()?;
        Ok(operation)
    }

    /// Newest queued operation for an entity
    pub fn latest_for(&self, entity_type: EntityType, entity_id: &EntityId) -> Result<Option<SyncOperation>> {
        let operation = self
            .conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM sync_queue
                     WHERE entity_type = ? AND entity_id = ?
                     ORDER BY id DESC LIMIT 1"
                ),
                params![entity_type.as_str(), entity_id.as_str()],
                Self::parse_operation,
            )
            .optional()?;
        Ok(operation)
    }

    /// All queued operations for an entity, oldest first
    pub fn operations_for(&self, entity_type: EntityType, entity_id: &EntityId) -> Result<Vec<SyncOperation>> {
        self.query(
            &format!(
                "SELECT {COLUMNS} FROM sync_queue
                 WHERE entity_type = ? AND entity_id = ?
                 ORDER BY id"
            ),
            params![entity_type.as_str(), entity_id.as_str()],
        )
    }

    /// Drop an operation; returns whether it existed
    pub fn remove(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM sync_queue WHERE id = ?", params![id])?;
        Ok(rows > 0)
    }

    /// Count a dispatch and flag the operation in flight
    pub fn mark_attempt(&self, id: i64) -> Result<u32> {
        let attempts = self
            .conn
            .query_row(
                "UPDATE sync_queue SET attempts = attempts + 1, in_flight = 1
                 WHERE id = ? RETURNING attempts",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        attempts.ok_or_else(|| crate::Error::NotFound(format!("queued operation {id}")))
    }

    /// Return a failed operation to the queue behind a backoff gate
    pub fn schedule_retry(&self, id: i64, next_attempt_at: i64, error: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_queue SET in_flight = 0, next_attempt_at = ?, last_error = ? WHERE id = ?",
            params![next_attempt_at, error, id],
        )?;
        Ok(())
    }

    /// Park an operation as failed-permanent until the user acts
    pub fn park(&self, id: i64, failure: FailureKind, error: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_queue SET in_flight = 0, failure = ?, last_error = ? WHERE id = ?",
            params![failure.as_str(), error, id],
        )?;
        Ok(())
    }

    /// Make a parked operation eligible again with a fresh attempt budget
    pub fn requeue(&self, id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE sync_queue
             SET failure = NULL, attempts = 0, next_attempt_at = 0, in_flight = 0
             WHERE id = ? AND failure IS NOT NULL",
            params![id],
        )?;
        Ok(rows > 0)
    }

    /// Parked operations, optionally limited to one failure kind
    pub fn parked(&self, failure: Option<FailureKind>) -> Result<Vec<SyncOperation>> {
        self.query(
            &format!(
                "SELECT {COLUMNS} FROM sync_queue
                 WHERE failure IS NOT NULL AND (?1 IS NULL OR failure = ?1)
                 ORDER BY created_at, id"
            ),
            params![failure.map(FailureKind::as_str)],
        )
    }

    /// Clear every pending backoff gate; returns how many were released
    pub fn release_backoff(&self) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE sync_queue SET next_attempt_at = 0
             WHERE next_attempt_at > 0 AND failure IS NULL AND in_flight = 0",
            [],
        )?;
        Ok(rows)
    }

    /// Clear in-flight flags left behind by an interrupted run
    pub fn reset_in_flight(&self) -> Result<usize> {
        let rows = self
            .conn
            .execute("UPDATE sync_queue SET in_flight = 0 WHERE in_flight = 1", [])?;
        Ok(rows)
    }

    /// Earliest backoff gate among operations that are otherwise dispatchable
    pub fn next_due_at(&self) -> Result<Option<i64>> {
        let due = self.conn.query_row(
            "SELECT MIN(q.next_attempt_at) FROM sync_queue q
             WHERE q.in_flight = 0 AND q.failure IS NULL
               AND NOT EXISTS (
                   SELECT 1 FROM sync_queue p
                   WHERE p.entity_type = q.entity_type
                     AND p.entity_id = q.entity_id
                     AND p.id < q.id
               )",
            [],
            |row| row.get(0),
        )?;
        Ok(due)
    }

    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Counts for status displays
    pub fn summary(&self, now: i64) -> Result<QueueSummary> {
        let summary = self.conn.query_row(
            "SELECT
                 COUNT(*),
                 COALESCE(SUM(in_flight = 0 AND failure IS NULL AND next_attempt_at <= ?1), 0),
                 COALESCE(SUM(in_flight = 0 AND failure IS NULL AND next_attempt_at > ?1), 0),
                 COALESCE(SUM(in_flight = 1), 0),
                 COALESCE(SUM(failure IS NOT NULL), 0)
             FROM sync_queue",
            params![now],
            |row| {
                let count = |index: usize| -> rusqlite::Result<usize> {
                    Ok(usize::try_from(row.get::<_, i64>(index)?).unwrap_or_default())
                };
                Ok(QueueSummary {
                    total: count(0)?,
                    ready: count(1)?,
                    backing_off: count(2)?,
                    in_flight: count(3)?,
                    parked: count(4)?,
                })
            },
        )?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{Note, OperationKind, Syncable, VerseRef};
    use pretty_assertions::assert_eq;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn note(content: &str) -> Note {
        let verse: VerseRef = "Proverbs 3:5".parse().unwrap();
        Note::new("user-1", verse, content)
    }

    #[test]
    fn test_enqueue_appends_in_fifo_order() {
        let db = setup();
        let queue = SyncQueue::new(db.connection());
        let first = note("first");
        let second = note("second");

        queue.enqueue(&NewOperation::create(&first).unwrap(), 10).unwrap();
        queue.enqueue(&NewOperation::create(&second).unwrap(), 20).unwrap();

        let batch = queue.dequeue_batch(10).unwrap();
        let ids: Vec<_> = batch.iter().map(|op| op.entity_id).collect();
        assert_eq!(ids, vec![first.id(), second.id()]);
        assert_eq!(queue.len().unwrap(), 2);
    }

    #[test]
    fn test_update_supersedes_queued_create() {
        let db = setup();
        let queue = SyncQueue::new(db.connection());
        let mut entity = note("draft");

        let first = queue.enqueue(&NewOperation::create(&entity).unwrap(), 1).unwrap();
        entity.content = "final".into();
        let second = queue.enqueue(&NewOperation::update(&entity).unwrap(), 2).unwrap();

        let EnqueueOutcome::Appended(id) = first else {
            panic!("expected append, got {first:?}");
        };
        assert_eq!(second, EnqueueOutcome::Superseded(id));

        let ops = queue.operations_for(EntityType::Note, &entity.id()).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, OperationKind::Create);
        assert_eq!(ops[0].payload["content"], "final");
        assert_eq!(ops[0].created_at, 1);
    }

    #[test]
    fn test_rewritten_entry_gets_new_idempotency_key() {
        let db = setup();
        let queue = SyncQueue::new(db.connection());
        let mut entity = note("first");

        queue.enqueue(&NewOperation::create(&entity).unwrap(), 1).unwrap();
        queue.mark_attempt(1).unwrap();
        queue.schedule_retry(1, 0, "request timed out").unwrap();
        let sent = queue.get(1).unwrap().unwrap();

        entity.content = "second".into();
        queue.enqueue(&NewOperation::update(&entity).unwrap(), 2).unwrap();
        let rewritten = queue.get(1).unwrap().unwrap();

        assert_eq!(rewritten.id, sent.id);
        assert_eq!(rewritten.revision, sent.revision + 1);
        assert_ne!(rewritten.idempotency_key(), sent.idempotency_key());

        // A plain retry of unchanged content keeps its key
        queue.mark_attempt(1).unwrap();
        queue.schedule_retry(1, 0, "request timed out").unwrap();
        let retried = queue.get(1).unwrap().unwrap();
        assert_eq!(retried.idempotency_key(), rewritten.idempotency_key());
    }

    #[test]
    fn test_create_then_delete_cancels() {
        let db = setup();
        let queue = SyncQueue::new(db.connection());
        let entity = note("short lived");

        queue.enqueue(&NewOperation::create(&entity).unwrap(), 1).unwrap();
        let outcome = queue
            .enqueue(&NewOperation::delete(EntityType::Note, entity.id()), 2)
            .unwrap();

        assert_eq!(outcome, EnqueueOutcome::Cancelled);
        assert!(queue.is_empty().unwrap());
    }

    #[test]
    fn test_many_updates_leave_one_entry() {
        let db = setup();
        let queue = SyncQueue::new(db.connection());
        let mut entity = note("v0");
        queue.enqueue(&NewOperation::create(&entity).unwrap(), 0).unwrap();
        queue.mark_attempt(1).unwrap();
        queue.remove(1).unwrap();

        for version in 1..=5 {
            entity.content = format!("v{version}");
            queue.enqueue(&NewOperation::update(&entity).unwrap(), version).unwrap();
        }

        let ops = queue.operations_for(EntityType::Note, &entity.id()).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, OperationKind::Update);
        assert_eq!(ops[0].payload["content"], "v5");
    }

    #[test]
    fn test_invalid_sequences_are_rejected() {
        let db = setup();
        let queue = SyncQueue::new(db.connection());
        let entity = note("x");

        queue.enqueue(&NewOperation::create(&entity).unwrap(), 1).unwrap();
        assert!(queue.enqueue(&NewOperation::create(&entity).unwrap(), 2).is_err());

        let other = note("y");
        queue.enqueue(&NewOperation::create(&other).unwrap(), 1).unwrap();
        queue.mark_attempt(2).unwrap();
        queue.remove(2).unwrap();
        queue.enqueue(&NewOperation::delete(EntityType::Note, other.id()), 3).unwrap();
        assert!(queue.enqueue(&NewOperation::update(&other).unwrap(), 4).is_err());
    }

    #[test]
    fn test_in_flight_operation_is_not_superseded() {
        let db = setup();
        let queue = SyncQueue::new(db.connection());
        let mut entity = note("one");

        queue.enqueue(&NewOperation::create(&entity).unwrap(), 1).unwrap();
        let dispatched = queue.due_batch(10, 1).unwrap().remove(0);
        queue.mark_attempt(dispatched.id).unwrap();

        entity.content = "two".into();
        let outcome = queue.enqueue(&NewOperation::update(&entity).unwrap(), 2).unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Appended(id) if id != dispatched.id));

        let stored = queue.get(dispatched.id).unwrap().unwrap();
        assert_eq!(stored.payload["content"], "one");

        // The follow-up waits for the in-flight entry to resolve
        assert!(queue.due_batch(10, 2).unwrap().is_empty());
        queue.remove(dispatched.id).unwrap();
        let next = queue.due_batch(10, 2).unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].payload["content"], "two");
    }

    #[test]
    fn test_in_flight_create_then_delete_appends_delete() {
        let db = setup();
        let queue = SyncQueue::new(db.connection());
        let entity = note("racing");

        queue.enqueue(&NewOperation::create(&entity).unwrap(), 1).unwrap();
        queue.mark_attempt(1).unwrap();
        let outcome = queue
            .enqueue(&NewOperation::delete(EntityType::Note, entity.id()), 2)
            .unwrap();

        assert_eq!(outcome, EnqueueOutcome::Appended(2));
        assert_eq!(queue.len().unwrap(), 2);
    }

    #[test]
    fn test_due_batch_respects_backoff_and_parking() {
        let db = setup();
        let queue = SyncQueue::new(db.connection());
        let ready = note("ready");
        let waiting = note("waiting");
        let parked = note("parked");
        for entity in [&ready, &waiting, &parked] {
            queue.enqueue(&NewOperation::create(entity).unwrap(), 0).unwrap();
        }

        queue.mark_attempt(2).unwrap();
        queue.schedule_retry(2, 5_000, "timeout").unwrap();
        queue.mark_attempt(3).unwrap();
        queue.park(3, FailureKind::Rejected, "bad payload").unwrap();

        let due = queue.due_batch(10, 1_000).unwrap();
        assert_eq!(due.iter().map(|op| op.id).collect::<Vec<_>>(), vec![1]);
        assert_eq!(queue.next_due_at().unwrap(), Some(0));

        let later = queue.due_batch(10, 5_000).unwrap();
        assert_eq!(later.iter().map(|op| op.id).collect::<Vec<_>>(), vec![1, 2]);

        assert_eq!(
            queue.summary(1_000).unwrap(),
            QueueSummary {
                total: 3,
                ready: 1,
                backing_off: 1,
                in_flight: 0,
                parked: 1,
            }
        );
    }

    #[test]
    fn test_retry_metadata() {
        let db = setup();
        let queue = SyncQueue::new(db.connection());
        let entity = note("flaky");
        queue.enqueue(&NewOperation::create(&entity).unwrap(), 0).unwrap();

        assert_eq!(queue.mark_attempt(1).unwrap(), 1);
        queue.schedule_retry(1, 2_000, "connection reset").unwrap();
        assert_eq!(queue.mark_attempt(1).unwrap(), 2);
        queue.park(1, FailureKind::Exhausted, "timeout").unwrap();

        let op = queue.get(1).unwrap().unwrap();
        assert_eq!(op.attempts, 2);
        assert!(!op.in_flight);
        assert_eq!(op.failure, Some(FailureKind::Exhausted));
        assert_eq!(op.last_error.as_deref(), Some("timeout"));
        assert_eq!(queue.parked(Some(FailureKind::Exhausted)).unwrap().len(), 1);
        assert!(queue.parked(Some(FailureKind::Conflict)).unwrap().is_empty());

        assert!(queue.requeue(1).unwrap());
        let op = queue.get(1).unwrap().unwrap();
        assert_eq!(op.attempts, 0);
        assert_eq!(op.failure, None);
        assert!(!queue.requeue(1).unwrap());
    }

    #[test]
    fn test_release_backoff_and_reset_in_flight() {
        let db = setup();
        let queue = SyncQueue::new(db.connection());
        let a = note("a");
        let b = note("b");
        queue.enqueue(&NewOperation::create(&a).unwrap(), 0).unwrap();
        queue.enqueue(&NewOperation::create(&b).unwrap(), 0).unwrap();

        queue.mark_attempt(1).unwrap();
        queue.schedule_retry(1, 60_000, "timeout").unwrap();
        queue.mark_attempt(2).unwrap();

        assert_eq!(queue.next_due_at().unwrap(), Some(60_000));
        assert_eq!(queue.release_backoff().unwrap(), 1);
        assert_eq!(queue.next_due_at().unwrap(), Some(0));

        assert_eq!(queue.reset_in_flight().unwrap(), 1);
        assert_eq!(queue.due_batch(10, 0).unwrap().len(), 2);
    }

    #[test]
    fn test_mark_attempt_missing_operation() {
        let db = setup();
        let queue = SyncQueue::new(db.connection());
        assert!(queue.mark_attempt(42).is_err());
    }
}
