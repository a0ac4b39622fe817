use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use selah_core::sync::SystemClock;
use selah_core::{EntityId, EntityType, LocalStore, Syncable, VerseRef};
use serde::Serialize;

use crate::error::CliError;

const ENV_DB_PATH: &str = "SELAH_DB_PATH";
const ENV_USER: &str = "SELAH_USER";
const DEFAULT_USER: &str = "local";
const SHORT_ID_LEN: usize = 13;
const QUEUE_SCAN_LIMIT: usize = 1_000;

#[derive(Debug, Serialize)]
pub struct EntityListItem {
    pub id: String,
    pub entity_type: EntityType,
    pub verse: String,
    pub detail: Option<String>,
    pub sync_status: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub relative_time: String,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os(ENV_DB_PATH).map(PathBuf::from)) {
        return Ok(path);
    }
    default_db_path()
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("selah").join("selah.db"))
        .ok_or(CliError::NoDataDir)
}

pub fn resolve_user(cli_user: Option<String>) -> String {
    pick_user(cli_user, env::var(ENV_USER).ok())
}

pub fn pick_user(cli_user: Option<String>, env_user: Option<String>) -> String {
    cli_user
        .and_then(|user| normalize_content(&user))
        .or_else(|| env_user.and_then(|user| normalize_content(&user)))
        .unwrap_or_else(|| DEFAULT_USER.to_string())
}

pub fn open_store(db_path: &Path) -> Result<LocalStore, CliError> {
    Ok(LocalStore::open_path(db_path, Arc::new(SystemClock))?)
}

pub fn parse_reference(reference: &str) -> Result<VerseRef, CliError> {
    Ok(reference.parse::<VerseRef>()?)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn resolve_note_content(content_parts: &[String]) -> Result<String, CliError> {
    normalize_content(&content_parts.join(" ")).ok_or(CliError::EmptyContent)
}

pub fn normalize_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyId)
    } else {
        Ok(trimmed.to_ascii_lowercase())
    }
}

pub fn short_id(id: &EntityId) -> String {
    id.as_str().chars().take(SHORT_ID_LEN).collect()
}

/// Resolve a live entity of one type from a full ID or a unique prefix
pub async fn resolve_entity_id(
    store: &LocalStore,
    entity_type: EntityType,
    query: &str,
) -> Result<EntityId, CliError> {
    let query = normalize_identifier(query)?;
    let matches = store.ids_by_prefix(entity_type, &query).await?;
    pick_single(&query, matches.into_iter().map(|id| (entity_type, id)).collect())
        .map(|(_, id)| id)
}

/// Resolve an entity of any type, including removed ones that still have
/// queued changes
pub async fn resolve_any_entity(
    store: &LocalStore,
    query: &str,
) -> Result<(EntityType, EntityId), CliError> {
    let query = normalize_identifier(query)?;

    let mut candidates = Vec::new();
    for entity_type in EntityType::ALL {
        for id in store.ids_by_prefix(entity_type, &query).await? {
            candidates.push((entity_type, id));
        }
    }
    for operation in store.pending_operations(QUEUE_SCAN_LIMIT).await? {
        if operation.entity_id.as_str().starts_with(&query) {
            candidates.push((operation.entity_type, operation.entity_id));
        }
    }
    candidates.sort_by_key(|(entity_type, id)| (entity_type.as_str(), id.as_str()));
    candidates.dedup();

    pick_single(&query, candidates)
}

pub fn pick_single(
    query: &str,
    mut candidates: Vec<(EntityType, EntityId)>,
) -> Result<(EntityType, EntityId), CliError> {
    match candidates.len() {
        0 => Err(CliError::EntityNotFound(query.to_string())),
        1 => Ok(candidates.remove(0)),
        _ => {
            let options = candidates
                .iter()
                .take(3)
                .map(|(entity_type, id)| format!("{entity_type} {}", short_id(id)))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousId(format!(
                "ID prefix '{query}' is ambiguous. Matches: {options}"
            )))
        }
    }
}

pub fn entity_to_list_item<E: Syncable>(entity: &E, now_ms: i64) -> EntityListItem {
    let header = entity.header();
    EntityListItem {
        id: header.id.as_str(),
        entity_type: E::ENTITY_TYPE,
        verse: header.verse.to_string(),
        detail: entity.detail(),
        sync_status: header.sync_status.to_string(),
        created_at: header.created_at,
        updated_at: header.updated_at,
        relative_time: format_relative_time(header.updated_at, now_ms),
    }
}

pub fn list_items<E: Syncable>(entities: &[E]) -> Vec<EntityListItem> {
    let now = Utc::now().timestamp_millis();
    entities
        .iter()
        .map(|entity| entity_to_list_item(entity, now))
        .collect()
}

pub fn format_entity_lines(items: &[EntityListItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let short: String = item.id.chars().take(SHORT_ID_LEN).collect();
            let detail = item
                .detail
                .as_deref()
                .map(|text| preview(text, 48))
                .unwrap_or_default();
            format!(
                "{short}  {:<20}  {:<8}  {:<10}  {detail}",
                item.verse, item.sync_status, item.relative_time
            )
            .trim_end()
            .to_string()
        })
        .collect()
}

pub fn preview(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}
