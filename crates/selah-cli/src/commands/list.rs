use selah_core::{LocalStore, Syncable};

use crate::cli::ListArgs;
use crate::commands::common::{format_entity_lines, list_items};
use crate::error::CliError;

pub async fn run_list<E: Syncable>(
    store: &LocalStore,
    user_id: &str,
    args: &ListArgs,
) -> Result<(), CliError> {
    let entities: Vec<E> = match (args.book.as_deref(), args.chapter) {
        (Some(book), Some(chapter)) => {
            let mut found = store
                .list_for_chapter::<E>(user_id, book, chapter, None)
                .await?;
            found.truncate(args.limit);
            found
        }
        _ => store.list_for_user::<E>(user_id, args.limit).await?,
    };

    let items = list_items(&entities);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if items.is_empty() {
        println!("No {} yet", E::ENTITY_TYPE.collection());
    } else {
        for line in format_entity_lines(&items) {
            println!("{line}");
        }
    }

    Ok(())
}
