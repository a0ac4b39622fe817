//! Database migrations

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};

/// Current schema version
const CURRENT_VERSION: i32 = 4;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        apply(conn, 1, MIGRATION_V1)?;
    }
    if version < 2 {
        apply(conn, 2, MIGRATION_V2)?;
    }
    if version < 3 {
        apply(conn, 3, MIGRATION_V3)?;
    }
    if version < 4 {
        apply(conn, 4, MIGRATION_V4)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0)
        })
        .optional()?
        .flatten()
        .unwrap_or(0);

    Ok(version)
}

/// Apply one migration's statements atomically and record its version
fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;

    for stmt in statements {
        tx.execute(stmt, [])?;
    }
    tx.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version} (target {CURRENT_VERSION})");
    Ok(())
}

/// Version 1: user content tables, each row carrying its sync status
const MIGRATION_V1: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS bookmarks (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        book TEXT NOT NULL,
        chapter INTEGER NOT NULL,
        verse INTEGER NOT NULL,
        label TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        is_deleted INTEGER NOT NULL DEFAULT 0,
        sync_status TEXT NOT NULL DEFAULT 'pending'
    )",
    "CREATE INDEX IF NOT EXISTS idx_bookmarks_locator ON bookmarks(user_id, book, chapter, verse)",
    "CREATE INDEX IF NOT EXISTS idx_bookmarks_status ON bookmarks(sync_status)",
    "CREATE TABLE IF NOT EXISTS notes (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        book TEXT NOT NULL,
        chapter INTEGER NOT NULL,
        verse INTEGER NOT NULL,
        content TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        is_deleted INTEGER NOT NULL DEFAULT 0,
        sync_status TEXT NOT NULL DEFAULT 'pending'
    )",
    "CREATE INDEX IF NOT EXISTS idx_notes_locator ON notes(user_id, book, chapter, verse)",
    "CREATE INDEX IF NOT EXISTS idx_notes_status ON notes(sync_status)",
    "CREATE INDEX IF NOT EXISTS idx_notes_updated ON notes(updated_at DESC)",
    "CREATE TABLE IF NOT EXISTS highlights (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        book TEXT NOT NULL,
        chapter INTEGER NOT NULL,
        verse INTEGER NOT NULL,
        color TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        is_deleted INTEGER NOT NULL DEFAULT 0,
        sync_status TEXT NOT NULL DEFAULT 'pending'
    )",
    "CREATE INDEX IF NOT EXISTS idx_highlights_locator ON highlights(user_id, book, chapter, verse)",
    "CREATE INDEX IF NOT EXISTS idx_highlights_status ON highlights(sync_status)",
];

/// Version 2: durable operation queue
const MIGRATION_V2: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sync_queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        entity_type TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        payload TEXT NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        next_attempt_at INTEGER NOT NULL DEFAULT 0,
        in_flight INTEGER NOT NULL DEFAULT 0,
        failure TEXT,
        last_error TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_queue_entity ON sync_queue(entity_type, entity_id)",
    "CREATE INDEX IF NOT EXISTS idx_sync_queue_order ON sync_queue(created_at, id)",
];

/// Version 3: offline Bible text cache
const MIGRATION_V3: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS verse_cache (
        translation TEXT NOT NULL,
        book TEXT NOT NULL,
        chapter INTEGER NOT NULL,
        verse INTEGER NOT NULL,
        text TEXT NOT NULL,
        fetched_at INTEGER NOT NULL,
        PRIMARY KEY (translation, book, chapter, verse)
    )",
];

/// Version 4: revision counter so a rewritten queue entry gets a new idempotency key
const MIGRATION_V4: &[&str] =
    &["ALTER TABLE sync_queue ADD COLUMN revision INTEGER NOT NULL DEFAULT 0"];
