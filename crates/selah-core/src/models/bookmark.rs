//! Bookmark model

use serde::{Deserialize, Serialize};

use super::{EntityHeader, EntityType, Syncable, VerseRef};
use crate::error::Result;
use crate::util::normalize_text_option;

/// A saved place in scripture, optionally labelled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    #[serde(flatten)]
    pub header: EntityHeader,
    /// Optional user label
    pub label: Option<String>,
}

impl Bookmark {
    #[must_use]
    pub fn new(user_id: impl Into<String>, verse: VerseRef, label: Option<String>) -> Self {
        Self {
            header: EntityHeader::new(user_id, verse),
            label: normalize_text_option(label),
        }
    }
}

impl Syncable for Bookmark {
    const ENTITY_TYPE: EntityType = EntityType::Bookmark;

    fn header(&self) -> &EntityHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut EntityHeader {
        &mut self.header
    }

    fn detail(&self) -> Option<String> {
        self.label.clone()
    }

    fn from_parts(header: EntityHeader, detail: Option<String>) -> Result<Self> {
        Ok(Self {
            header,
            label: detail,
        })
    }
}
