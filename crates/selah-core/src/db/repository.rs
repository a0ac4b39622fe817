//! User-content repository shared by bookmarks, notes and highlights

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use rusqlite::{params, Connection, OptionalExtension};

use super::conversion_error;
use crate::error::{Error, Result};
use crate::models::{EntityHeader, EntityId, EntityType, SyncStatus, Syncable, VerseRef};

/// `SQLite` access to the user-content tables
///
/// Every table has the same layout apart from one type-specific column, so a
/// single repository serves all three collections.
pub struct EntityRepository<'a> {
    conn: &'a Connection,
}

impl<'a> EntityRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn select_columns(entity_type: EntityType) -> String {
        format!(
            "id, user_id, book, chapter, verse, {}, created_at, updated_at, sync_status",
            entity_type.detail_column()
        )
    }

    /// Parse an entity from a database row
    fn parse_entity<E: Syncable>(row: &rusqlite::Row<'_>) -> rusqlite::Result<E> {
        let id: String = row.get(0)?;
        let status: String = row.get(8)?;
        let header = EntityHeader {
            id: id.parse().map_err(|e| conversion_error(0, e))?,
            user_id: row.get(1)?,
            verse: VerseRef {
                book: row.get(2)?,
                chapter: row.get(3)?,
                verse: row.get(4)?,
            },
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
            sync_status: status.parse().map_err(|e| conversion_error(8, e))?,
        };
        E::from_parts(header, row.get(5)?).map_err(|e| conversion_error(5, e))
    }

    /// Insert a new entity row
    pub fn insert<E: Syncable>(&self, entity: &E) -> Result<()> {
        let header = entity.header();
        let sql = format!(
            "INSERT INTO {} (id, user_id, book, chapter, verse, {}, created_at, updated_at, is_deleted, sync_status)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
            E::ENTITY_TYPE.collection(),
            E::ENTITY_TYPE.detail_column()
        );
        self.conn.execute(
            &sql,
            params![
                header.id.as_str(),
                header.user_id,
                header.verse.book,
                header.verse.chapter,
                header.verse.verse,
                entity.detail(),
                header.created_at,
                header.updated_at,
                header.sync_status.as_str()
            ],
        )?;
        Ok(())
    }

    /// Get a visible (not soft-deleted) entity by ID
    pub fn get<E: Syncable>(&self, id: &EntityId) -> Result<Option<E>> {
        self.find(id, false)
    }

    /// Get an entity by ID, optionally including soft-deleted rows
    pub fn find<E: Syncable>(&self, id: &EntityId, include_deleted: bool) -> Result<Option<E>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ? AND (is_deleted = 0 OR ?)",
            Self::select_columns(E::ENTITY_TYPE),
            E::ENTITY_TYPE.collection()
        );
        let entity = self
            .conn
            .query_row(&sql, params![id.as_str(), include_deleted], Self::parse_entity)
            .optional()?;
        Ok(entity)
    }

    /// Overwrite the mutable fields of a visible entity
    pub fn update<E: Syncable>(&self, entity: &E) -> Result<()> {
        let header = entity.header();
        let sql = format!(
            "UPDATE {} SET {} = ?, updated_at = ?, sync_status = ? WHERE id = ? AND is_deleted = 0",
            E::ENTITY_TYPE.collection(),
            E::ENTITY_TYPE.detail_column()
        );
        let rows = self.conn.execute(
            &sql,
            params![
                entity.detail(),
                header.updated_at,
                header.sync_status.as_str(),
                header.id.as_str()
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(header.id.to_string()));
        }
        Ok(())
    }

    /// Hide an entity from reads until the remote confirms the delete
    pub fn soft_delete(&self, entity_type: EntityType, id: &EntityId, now: i64) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET is_deleted = 1, updated_at = ?, sync_status = 'pending'
             WHERE id = ? AND is_deleted = 0",
            entity_type.collection()
        );
        let rows = self.conn.execute(&sql, params![now, id.as_str()])?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Undo a soft delete
    pub fn restore(&self, entity_type: EntityType, id: &EntityId) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET is_deleted = 0 WHERE id = ?",
            entity_type.collection()
        );
        self.conn.execute(&sql, params![id.as_str()])?;
        Ok(())
    }

    /// Remove the row entirely; returns whether a row existed
    pub fn purge(&self, entity_type: EntityType, id: &EntityId) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?", entity_type.collection());
        let rows = self.conn.execute(&sql, params![id.as_str()])?;
        Ok(rows > 0)
    }

    /// Set the sync status of a row, deleted or not
    pub fn set_status(&self, entity_type: EntityType, id: &EntityId, status: SyncStatus) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET sync_status = ? WHERE id = ?",
            entity_type.collection()
        );
        self.conn.execute(&sql, params![status.as_str(), id.as_str()])?;
        Ok(())
    }

    /// Sync status of a row, deleted or not
    pub fn status_of(&self, entity_type: EntityType, id: &EntityId) -> Result<Option<SyncStatus>> {
        let sql = format!(
            "SELECT sync_status FROM {} WHERE id = ?",
            entity_type.collection()
        );
        let status: Option<String> = self
            .conn
            .query_row(&sql, params![id.as_str()], |row| row.get(0))
            .optional()?;
        status.map(|s| s.parse()).transpose()
    }

    /// Whether a row exists and is soft-deleted
    pub fn is_deleted(&self, entity_type: EntityType, id: &EntityId) -> Result<Option<bool>> {
        let sql = format!(
            "SELECT is_deleted FROM {} WHERE id = ?",
            entity_type.collection()
        );
        let deleted = self
            .conn
            .query_row(&sql, params![id.as_str()], |row| row.get::<_, i32>(0))
            .optional()?;
        Ok(deleted.map(|flag| flag != 0))
    }

    /// Entities a user attached to one chapter, optionally narrowed to a verse
    pub fn list_for_chapter<E: Syncable>(
        &self,
        user_id: &str,
        book: &str,
        chapter: u32,
        verse: Option<u32>,
    ) -> Result<Vec<E>> {
        let sql = format!(
            "SELECT {} FROM {}
             WHERE user_id = ? AND book = ? COLLATE NOCASE AND chapter = ?
               AND (? IS NULL OR verse = ?) AND is_deleted = 0
             ORDER BY verse, created_at",
            Self::select_columns(E::ENTITY_TYPE),
            E::ENTITY_TYPE.collection()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let entities = stmt
            .query_map(params![user_id, book, chapter, verse, verse], Self::parse_entity)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entities)
    }

    /// Most recently updated entities for a user
    pub fn list_for_user<E: Syncable>(&self, user_id: &str, limit: usize) -> Result<Vec<E>> {
        let sql = format!(
            "SELECT {} FROM {}
             WHERE user_id = ? AND is_deleted = 0
             ORDER BY updated_at DESC
             LIMIT ?",
            Self::select_columns(E::ENTITY_TYPE),
            E::ENTITY_TYPE.collection()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let entities = stmt
            .query_map(params![user_id, limit as i64], Self::parse_entity)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entities)
    }

    /// Entities in the given status, soft-deleted rows included
    pub fn list_by_status<E: Syncable>(&self, status: SyncStatus) -> Result<Vec<E>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE sync_status = ? ORDER BY updated_at DESC",
            Self::select_columns(E::ENTITY_TYPE),
            E::ENTITY_TYPE.collection()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let entities = stmt
            .query_map(params![status.as_str()], Self::parse_entity)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entities)
    }

    /// Row counts per status for one collection
    pub fn count_by_status(&self, entity_type: EntityType) -> Result<Vec<(SyncStatus, usize)>> {
        let sql = format!(
            "SELECT sync_status, COUNT(*) FROM {} GROUP BY sync_status ORDER BY sync_status",
            entity_type.collection()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(status, count)| -> Result<(SyncStatus, usize)> {
                Ok((status.parse()?, usize::try_from(count).unwrap_or_default()))
            })
            .collect()
    }

    /// Visible IDs starting with the given prefix
    pub fn ids_by_prefix(&self, entity_type: EntityType, prefix: &str) -> Result<Vec<EntityId>> {
        let sql = format!(
            "SELECT id FROM {} WHERE id LIKE ? || '%' AND is_deleted = 0 ORDER BY id LIMIT 10",
            entity_type.collection()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params![prefix.to_ascii_lowercase()], |row| {
                let id: String = row.get(0)?;
                id.parse().map_err(|e| conversion_error(0, e))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }
}
