use std::path::Path;

use selah_core::services::Discarded;

use crate::commands::common::{open_store, resolve_any_entity, short_id};
use crate::error::CliError;

pub async fn run_discard(id: &str, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let (entity_type, entity_id) = resolve_any_entity(&store, id).await?;

    let message = match store.discard(entity_type, &entity_id).await? {
        Discarded::Purged => "never synced, removed locally",
        Discarded::KeptAsSynced => "kept the last synced version",
    };
    println!("{entity_type} {}: {message}", short_id(&entity_id));
    Ok(())
}
