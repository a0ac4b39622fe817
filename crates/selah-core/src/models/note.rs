//! Study note model

use serde::{Deserialize, Serialize};

use super::{EntityHeader, EntityType, Syncable, VerseRef};
use crate::error::{Error, Result};

/// Free-text study note attached to a verse
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    #[serde(flatten)]
    pub header: EntityHeader,
    /// Plain text content
    pub content: String,
}

impl Note {
    #[must_use]
    pub fn new(user_id: impl Into<String>, verse: VerseRef, content: impl Into<String>) -> Self {
        Self {
            header: EntityHeader::new(user_id, verse),
            content: content.into().trim().to_string(),
        }
    }
}

impl Syncable for Note {
    const ENTITY_TYPE: EntityType = EntityType::Note;

    fn header(&self) -> &EntityHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut EntityHeader {
        &mut self.header
    }

    fn detail(&self) -> Option<String> {
        Some(self.content.clone())
    }

    fn from_parts(header: EntityHeader, detail: Option<String>) -> Result<Self> {
        let content = detail
            .ok_or_else(|| Error::Storage(format!("note {} has no content column", header.id)))?;
        Ok(Self { header, content })
    }

    fn validate(&self) -> Result<()> {
        self.header.validate()?;
        if self.content.trim().is_empty() {
            return Err(Error::InvalidInput("note content cannot be empty".into()));
        }
        Ok(())
    }
}
