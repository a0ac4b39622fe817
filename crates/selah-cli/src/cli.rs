use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "selah")]
#[command(about = "Bookmarks, notes and highlights for Bible study, synced when online")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// User that owns new content (defaults to SELAH_USER or "local")
    #[arg(long, global = true, value_name = "USER")]
    pub user: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage verse bookmarks
    #[command(subcommand)]
    Bookmark(BookmarkCommand),
    /// Manage verse notes
    #[command(subcommand)]
    Note(NoteCommand),
    /// Manage verse highlights
    #[command(subcommand)]
    Highlight(HighlightCommand),
    /// Push queued changes to the remote store now
    Sync {
        /// Output the drain report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show queued changes and sync status counts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Give failed changes another try (all of them when no ID is given)
    Retry {
        /// Entity ID or unique ID prefix
        id: Option<String>,
    },
    /// Drop an entity's queued changes
    Discard {
        /// Entity ID or unique ID prefix
        id: String,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Write completion script to this file instead of stdout
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum BookmarkCommand {
    /// Bookmark a verse
    Add {
        /// Verse reference, e.g. "John 3:16"
        reference: String,
        /// Optional label
        #[arg(short, long)]
        label: Option<String>,
    },
    /// Change or clear a bookmark's label
    Label {
        /// Bookmark ID or unique ID prefix
        id: String,
        /// New label (omit to clear)
        label: Option<String>,
    },
    /// List bookmarks
    List(ListArgs),
    /// Remove a bookmark
    #[command(alias = "rm")]
    Remove {
        /// Bookmark ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum NoteCommand {
    /// Attach a note to a verse
    Add {
        /// Verse reference, e.g. "Romans 8:28"
        reference: String,
        /// Note text
        #[arg(required = true)]
        content: Vec<String>,
    },
    /// Replace a note's text
    Edit {
        /// Note ID or unique ID prefix
        id: String,
        /// New note text
        #[arg(required = true)]
        content: Vec<String>,
    },
    /// List notes
    List(ListArgs),
    /// Remove a note
    #[command(alias = "rm")]
    Remove {
        /// Note ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum HighlightCommand {
    /// Highlight a verse
    Add {
        /// Verse reference, e.g. "Psalms 23:1"
        reference: String,
        /// Highlight color
        #[arg(short, long, default_value = "yellow")]
        color: String,
    },
    /// Change a highlight's color
    Recolor {
        /// Highlight ID or unique ID prefix
        id: String,
        /// New color
        color: String,
    },
    /// List highlights
    List(ListArgs),
    /// Remove a highlight
    #[command(alias = "rm")]
    Remove {
        /// Highlight ID or unique ID prefix
        id: String,
    },
}

#[derive(clap::Args)]
pub struct ListArgs {
    /// Only show entries in this book (requires --chapter)
    #[arg(long, requires = "chapter")]
    pub book: Option<String>,
    /// Only show entries in this chapter (requires --book)
    #[arg(long, requires = "book")]
    pub chapter: Option<u32>,
    /// Number of entries to show
    #[arg(short, long, default_value = "20")]
    pub limit: usize,
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
