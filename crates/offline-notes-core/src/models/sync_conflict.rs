//! Sync conflict model

use serde::{Deserialize, Serialize};

use crate::models::NoteId;

/// Strategy name recorded for last-write-wins resolutions
pub const LWW_STRATEGY: &str = "lww";

/// A dirty local version that lost to a newer remote version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Note involved in the conflict
    pub note_id: NoteId,
    /// Discarded local version's timestamp
    pub local_updated_at: i64,
    /// Winning remote version's timestamp
    pub incoming_updated_at: i64,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
    /// Resolution strategy name
    pub strategy: String,
}
