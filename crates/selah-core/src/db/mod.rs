//! Database layer for Selah

mod connection;
mod migrations;
mod queue;
mod repository;
mod verse_cache;

pub use connection::Database;
pub use queue::SyncQueue;
pub use repository::EntityRepository;
pub use verse_cache::VerseCache;

/// Wrap a value-parsing failure so it surfaces as a row conversion error
pub(crate) fn conversion_error<E>(index: usize, error: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(error))
}
