//! Data models for Offline Notes

mod note;
mod sync_conflict;

pub use note::{validate_title, Note, NoteId, PendingDeletion, SyncStatus, LOCAL_ID_PREFIX};
pub use sync_conflict::{SyncConflict, LWW_STRATEGY};
