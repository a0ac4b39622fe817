use std::path::Path;

use selah_core::{Bookmark, EntityType, Syncable};

use crate::cli::BookmarkCommand;
use crate::commands::common::{normalize_content, open_store, parse_reference, resolve_entity_id};
use crate::commands::list::run_list;
use crate::error::CliError;

pub async fn run_bookmark(
    command: BookmarkCommand,
    db_path: &Path,
    user_id: &str,
) -> Result<(), CliError> {
    let store = open_store(db_path)?;

    match command {
        BookmarkCommand::Add { reference, label } => {
            let verse = parse_reference(&reference)?;
            let label = label.as_deref().and_then(normalize_content);
            let bookmark = store.add_bookmark(user_id, verse, label).await?;
            println!("{}", bookmark.id());
        }
        BookmarkCommand::Label { id, label } => {
            let id = resolve_entity_id(&store, EntityType::Bookmark, &id).await?;
            let label = label.as_deref().and_then(normalize_content);
            let bookmark = store.relabel_bookmark(&id, label).await?;
            println!("{}", bookmark.id());
        }
        BookmarkCommand::List(args) => run_list::<Bookmark>(&store, user_id, &args).await?,
        BookmarkCommand::Remove { id } => {
            let id = resolve_entity_id(&store, EntityType::Bookmark, &id).await?;
            store.remove_bookmark(&id).await?;
            println!("{id}");
        }
    }

    Ok(())
}
