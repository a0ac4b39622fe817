//! Selah CLI - bookmarks, notes and highlights from the terminal
//!
//! Writes land in the local database right away; `selah sync` pushes the
//! queued changes when a remote is configured.

mod cli;
mod commands;
mod error;


use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::bookmark::run_bookmark;
use crate::commands::common::{resolve_db_path, resolve_user};
use crate::commands::completions::run_completions;
use crate::commands::discard::run_discard;
use crate::commands::highlight::run_highlight;
use crate::commands::note::run_note;
use crate::commands::retry::run_retry;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "selah=info".parse::<tracing_subscriber::filter::Directive>() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let db_path = resolve_db_path(cli.db_path)?;
    let user_id = resolve_user(cli.user);

    match cli.command {
        Commands::Bookmark(command) => run_bookmark(command, &db_path, &user_id).await?,
        Commands::Note(command) => run_note(command, &db_path, &user_id).await?,
        Commands::Highlight(command) => run_highlight(command, &db_path, &user_id).await?,
        Commands::Sync { json } => run_sync(&db_path, &user_id, json).await?,
        Commands::Status { json } => run_status(&db_path, json).await?,
        Commands::Retry { id } => run_retry(id.as_deref(), &db_path).await?,
        Commands::Discard { id } => run_discard(&id, &db_path).await?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}
