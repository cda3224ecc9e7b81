//! offline-notes-core - Offline-first sync layer for per-user notes
//!
//! Notes live in a local libSQL cache and are reconciled with a remote
//! document store whenever it can be reached. Mutations made while offline
//! are queued and replayed once connectivity returns.

pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod session;
pub mod state;
pub mod sync;
pub mod util;

pub use config::{CacheConfig, RemoteConfig};
pub use connectivity::{ConnectivityEvent, ConnectivityMonitor};
pub use error::{Error, Result};
pub use models::{Note, NoteId, PendingDeletion, SyncConflict, SyncStatus};
pub use remote::{FirebaseRestStore, MemoryRemoteStore, RemoteNoteStore, Subscription};
pub use session::{Identity, SessionContext, UserId};
pub use state::SyncState;
pub use sync::{DeleteOutcome, NoteSync, ReplayReport};
