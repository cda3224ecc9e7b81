//! Local cache persistence for Offline Notes

mod cache;
mod connection;
mod migrations;

pub use cache::{LibSqlNoteCache, NoteCache};
pub use connection::Database;
