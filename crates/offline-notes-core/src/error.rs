//! Error types for offline-notes-core

use thiserror::Error;

/// Result type alias using offline-notes-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in offline-notes-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local cache is unusable
    #[error("Storage error: {0}")]
    Storage(String),

    /// libSQL error from the local cache
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Remote store could not be reached. Expected while offline.
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    /// Remote store answered with a non-transient error
    #[error("Remote store error: {0}")]
    Remote(String),

    /// No signed-in user, or the remote rejected the credentials
    #[error("Authentication required")]
    AuthRequired,

    /// Note not found
    #[error("Note not found: {0}")]
    NotFound(String),

    /// Invalid input, rejected before any write
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error means the remote could not be reached.
    ///
    /// Writes that fail this way are queued locally instead of surfaced.
    pub const fn is_remote_unavailable(&self) -> bool {
        matches!(self, Self::RemoteUnavailable(_))
    }

    /// Whether the local cache failed. Fatal for the running session.
    pub const fn is_storage_failure(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::LibSql(_) | Self::Io(_))
    }
}
