//! Reconciliation between the local cache and the remote store, and replay
//! of mutations queued while offline.

mod engine;
mod reconcile;
mod replay;


pub use engine::{DeleteOutcome, NoteSync};
pub use reconcile::{reconcile, sort_view, DiscardedEdit, Reconciliation};
pub use replay::{push_note, replay_pending, ReplayAction, ReplayFailure, ReplayReport, SyncedNote};
