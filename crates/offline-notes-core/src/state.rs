//! Sync state published to clients.

use serde::Serialize;

use crate::sync::ReplayReport;

/// Unified sync state shown next to the note list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Offline,
    Syncing,
    Synced,
    Error,
}

impl SyncState {
    /// State after a replay finished with `report`
    pub fn after_replay(report: &ReplayReport) -> Self {
        if report.is_clean() {
            Self::Synced
        } else {
            Self::Error
        }
    }

    pub const fn initial(online: bool) -> Self {
        if online {
            Self::Synced
        } else {
            Self::Offline
        }
    }
}
