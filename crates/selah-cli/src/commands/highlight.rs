use std::path::Path;

use selah_core::{EntityType, Highlight, HighlightColor, Syncable};

use crate::cli::HighlightCommand;
use crate::commands::common::{open_store, parse_reference, resolve_entity_id};
use crate::commands::list::run_list;
use crate::error::CliError;

pub async fn run_highlight(
    command: HighlightCommand,
    db_path: &Path,
    user_id: &str,
) -> Result<(), CliError> {
    let store = open_store(db_path)?;

    match command {
        HighlightCommand::Add { reference, color } => {
            let verse = parse_reference(&reference)?;
            let color = color.parse::<HighlightColor>()?;
            let highlight = store.add_highlight(user_id, verse, color).await?;
            println!("{}", highlight.id());
        }
        HighlightCommand::Recolor { id, color } => {
            let id = resolve_entity_id(&store, EntityType::Highlight, &id).await?;
            let color = color.parse::<HighlightColor>()?;
            let highlight = store.recolor_highlight(&id, color).await?;
            println!("{}", highlight.id());
        }
        HighlightCommand::List(args) => run_list::<Highlight>(&store, user_id, &args).await?,
        HighlightCommand::Remove { id } => {
            let id = resolve_entity_id(&store, EntityType::Highlight, &id).await?;
            store.remove_highlight(&id).await?;
            println!("{id}");
        }
    }

    Ok(())
}
