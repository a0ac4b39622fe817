//! Highlight model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{EntityHeader, EntityType, Syncable, VerseRef};
use crate::error::{Error, Result};

/// Palette offered for verse highlights
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightColor {
    #[default]
    Yellow,
    Green,
    Blue,
    Pink,
    Purple,
}

impl HighlightColor {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Yellow => "yellow",
            Self::Green => "green",
            Self::Blue => "blue",
            Self::Pink => "pink",
            Self::Purple => "purple",
        }
    }
}

impl fmt::Display for HighlightColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HighlightColor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yellow" => Ok(Self::Yellow),
            "green" => Ok(Self::Green),
            "blue" => Ok(Self::Blue),
            "pink" => Ok(Self::Pink),
            "purple" => Ok(Self::Purple),
            other => Err(Error::InvalidInput(format!("unknown highlight color '{other}'"))),
        }
    }
}

/// A colored highlight over a verse
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Highlight {
    #[serde(flatten)]
    pub header: EntityHeader,
    pub color: HighlightColor,
}

impl Highlight {
    #[must_use]
    pub fn new(user_id: impl Into<String>, verse: VerseRef, color: HighlightColor) -> Self {
        Self {
            header: EntityHeader::new(user_id, verse),
            color,
        }
    }
}

impl Syncable for Highlight {
    const ENTITY_TYPE: EntityType = EntityType::Highlight;

    fn header(&self) -> &EntityHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut EntityHeader {
        &mut self.header
    }

    fn detail(&self) -> Option<String> {
        Some(self.color.as_str().to_string())
    }

    fn from_parts(header: EntityHeader, detail: Option<String>) -> Result<Self> {
        let color = detail
            .ok_or_else(|| Error::Storage(format!("highlight {} has no color", header.id)))?
            .parse()?;
        Ok(Self { header, color })
    }
}
