//! Offline cache of Bible text

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::{CachedVerse, VerseRef};

/// Read-mostly verse text, keyed by translation and locator
pub struct VerseCache<'a> {
    conn: &'a Connection,
}

impl<'a> VerseCache<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_verse(row: &rusqlite::Row<'_>) -> rusqlite::Result<CachedVerse> {
        Ok(CachedVerse {
            translation: row.get(0)?,
            verse: VerseRef {
                book: row.get(1)?,
                chapter: row.get(2)?,
                verse: row.get(3)?,
            },
            text: row.get(4)?,
            fetched_at: row.get(5)?,
        })
    }

    /// Insert or replace cached text
    pub fn put(&self, verse: &CachedVerse) -> Result<()> {
        self.conn.execute(
            "INSERT INTO verse_cache (translation, book, chapter, verse, text, fetched_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (translation, book, chapter, verse)
             DO UPDATE SET text = excluded.text, fetched_at = excluded.fetched_at",
            params![
                verse.translation,
                verse.verse.book,
                verse.verse.chapter,
                verse.verse.verse,
                verse.text,
                verse.fetched_at
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, translation: &str, verse: &VerseRef) -> Result<Option<CachedVerse>> {
        let cached = self
            .conn
            .query_row(
                "SELECT translation, book, chapter, verse, text, fetched_at FROM verse_cache
                 WHERE translation = ? AND book = ? AND chapter = ? AND verse = ?",
                params![translation, verse.book, verse.chapter, verse.verse],
                Self::parse_verse,
            )
            .optional()?;
        Ok(cached)
    }

    /// Every cached verse of a chapter, in verse order
    pub fn list_chapter(&self, translation: &str, book: &str, chapter: u32) -> Result<Vec<CachedVerse>> {
        let mut stmt = self.conn.prepare(
            "SELECT translation, book, chapter, verse, text, fetched_at FROM verse_cache
             WHERE translation = ? AND book = ? AND chapter = ?
             ORDER BY verse",
        )?;
        let verses = stmt
            .query_map(params![translation, book, chapter], Self::parse_verse)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(verses)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM verse_cache", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}
