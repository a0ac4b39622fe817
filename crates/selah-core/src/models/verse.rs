//! Scripture locators and cached verse text

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::{Error, Result};

static VERSE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<book>\S.*?)\s+(?P<chapter>\d+):(?P<verse>\d+)$").expect("Invalid regex")
});

/// A single verse locator such as `1 John 4:8`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerseRef {
    pub book: String,
    pub chapter: u32,
    pub verse: u32,
}

impl VerseRef {
    /// Create a validated verse reference
    pub fn new(book: impl Into<String>, chapter: u32, verse: u32) -> Result<Self> {
        let book = book.into().trim().to_string();
        if book.is_empty() {
            return Err(Error::InvalidInput("book name cannot be empty".into()));
        }
        if chapter == 0 || verse == 0 {
            return Err(Error::InvalidInput(format!(
                "chapter and verse start at 1 (got {chapter}:{verse})"
            )));
        }
        Ok(Self {
            book,
            chapter,
            verse,
        })
    }
}

impl fmt::Display for VerseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.book, self.chapter, self.verse)
    }
}

impl FromStr for VerseRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let captures = VERSE_PATTERN.captures(s.trim()).ok_or_else(|| {
            Error::InvalidInput(format!("'{s}' is not a verse reference like 'John 3:16'"))
        })?;

        let parse_number = |name: &str| {
            captures[name]
                .parse::<u32>()
                .map_err(|_| Error::InvalidInput(format!("{name} number out of range in '{s}'")))
        };

        Self::new(&captures["book"], parse_number("chapter")?, parse_number("verse")?)
    }
}

/// Read-mostly Bible text kept on device for offline reading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedVerse {
    /// Translation code, e.g. `KJV`
    pub translation: String,
    pub verse: VerseRef,
    pub text: String,
    /// When the text was fetched (Unix ms)
    pub fetched_at: i64,
}

impl CachedVerse {
    #[must_use]
    pub fn new(translation: impl Into<String>, verse: VerseRef, text: impl Into<String>) -> Self {
        Self {
            translation: translation.into(),
            verse,
            text: text.into(),
            fetched_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}
