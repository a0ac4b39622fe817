use std::path::Path;

use selah_core::{EntityType, Note, Syncable};

use crate::cli::NoteCommand;
use crate::commands::common::{
    open_store, parse_reference, resolve_entity_id, resolve_note_content,
};
use crate::commands::list::run_list;
use crate::error::CliError;

pub async fn run_note(command: NoteCommand, db_path: &Path, user_id: &str) -> Result<(), CliError> {
    let store = open_store(db_path)?;

    match command {
        NoteCommand::Add { reference, content } => {
            let verse = parse_reference(&reference)?;
            let content = resolve_note_content(&content)?;
            let note = store.add_note(user_id, verse, &content).await?;
            println!("{}", note.id());
        }
        NoteCommand::Edit { id, content } => {
            let id = resolve_entity_id(&store, EntityType::Note, &id).await?;
            let content = resolve_note_content(&content)?;
            let note = store.edit_note(&id, &content).await?;
            println!("{}", note.id());
        }
        NoteCommand::List(args) => run_list::<Note>(&store, user_id, &args).await?,
        NoteCommand::Remove { id } => {
            let id = resolve_entity_id(&store, EntityType::Note, &id).await?;
            store.remove_note(&id).await?;
            println!("{id}");
        }
    }

    Ok(())
}
