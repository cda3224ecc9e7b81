//! Note model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::util::now_millis;

/// Prefix marking ids minted on this device that the remote has not seen yet
pub const LOCAL_ID_PREFIX: &str = "local_";

/// Identifier of a note.
///
/// Remote-origin ids are opaque keys assigned by the remote store. Ids minted
/// offline carry [`LOCAL_ID_PREFIX`] followed by a UUID v7, so they sort by
/// creation time and do not collide across devices.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(String);

impl NoteId {
    /// Wrap an id assigned by the remote store
    pub fn remote(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a new local-origin id
    #[must_use]
    pub fn local() -> Self {
        Self(format!("{LOCAL_ID_PREFIX}{}", Uuid::now_v7().simple()))
    }

    /// Whether this id was minted locally and has no remote counterpart yet
    pub fn is_local(&self) -> bool {
        self.0.starts_with(LOCAL_ID_PREFIX)
    }

    /// Get the string representation of this ID
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NoteId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("note id cannot be empty".into()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Sync status of a note as seen by the UI.
///
/// The cached note record itself is only ever `Clean` or `Dirty`.
/// `PendingDelete` is reported while a deletion for the note is queued,
/// regardless of the record's own status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Confirmed persisted remotely
    Clean,
    /// Has local changes not yet confirmed remotely
    Dirty,
    /// Deletion queued, waiting for the remote to confirm
    PendingDelete,
}

impl SyncStatus {
    /// Storage representation
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Dirty => "dirty",
            Self::PendingDelete => "pending_delete",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "clean" => Ok(Self::Clean),
            "dirty" => Ok(Self::Dirty),
            "pending_delete" => Ok(Self::PendingDelete),
            other => Err(Error::Storage(format!("unknown sync status '{other}'"))),
        }
    }
}

/// A note in the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Unique identifier
    pub id: NoteId,
    /// Title, never blank
    pub title: String,
    /// Plain text content, may be empty
    pub content: String,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Whether this version is confirmed remotely
    pub sync_status: SyncStatus,
}

impl Note {
    /// Create a dirty note with a local-origin id and client timestamps
    pub fn new_local(title: impl Into<String>, content: impl Into<String>) -> Result<Self> {
        let title = title.into();
        validate_title(&title)?;
        let now = now_millis();
        Ok(Self {
            id: NoteId::local(),
            title,
            content: content.into(),
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Dirty,
        })
    }

    /// Apply a user edit: refresh title, content and `updated_at`, mark dirty
    pub fn edit(&mut self, title: impl Into<String>, content: impl Into<String>) -> Result<()> {
        let title = title.into();
        validate_title(&title)?;
        self.title = title;
        self.content = content.into();
        // Never move backwards
        self.updated_at = now_millis().max(self.updated_at.saturating_add(1));
        self.sync_status = SyncStatus::Dirty;
        Ok(())
    }

    /// Whether this version has changes the remote has not confirmed
    pub fn needs_sync(&self) -> bool {
        self.sync_status == SyncStatus::Dirty
    }

    /// Same title and content, whatever the timestamps and status
    pub fn same_content(&self, other: &Self) -> bool {
        self.title == other.title && self.content == other.content
    }
}

/// Reject blank titles before any write is attempted
pub fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(Error::InvalidInput("Title is required".into()));
    }
    Ok(())
}

/// Queued intent to delete a note remotely
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDeletion {
    /// Note to delete remotely
    pub id: NoteId,
    /// When the deletion was requested (Unix ms)
    pub queued_at: i64,
}

impl PendingDeletion {
    /// Queue a deletion for `id` now
    pub fn new(id: NoteId) -> Self {
        Self {
            id,
            queued_at: now_millis(),
        }
    }
}
