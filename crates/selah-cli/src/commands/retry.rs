use std::path::Path;

use crate::commands::common::{open_store, resolve_any_entity, short_id};
use crate::error::CliError;

pub async fn run_retry(id: Option<&str>, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path)?;

    let requeued = if let Some(query) = id {
        let (entity_type, entity_id) = resolve_any_entity(&store, query).await?;
        let requeued = store.retry_entity(entity_type, &entity_id).await?;
        if requeued == 0 {
            println!("Nothing to retry for {entity_type} {}", short_id(&entity_id));
            return Ok(());
        }
        requeued
    } else {
        store.retry_all_failed().await?
    };

    println!("Requeued {requeued} change(s); run `selah sync` to send them");
    Ok(())
}
