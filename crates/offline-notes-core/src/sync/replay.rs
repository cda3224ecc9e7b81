//! Replay of queued offline mutations against the remote store.
//!
//! Best-effort batch: every queued entry is attempted independently. An entry
//! leaves its queue only once the remote confirms it; failed entries stay
//! queued for the next online transition. Storage failures and rejected
//! credentials abort the batch.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::db::NoteCache;
use crate::error::{Error, Result};
use crate::models::{Note, NoteId};
use crate::remote::RemoteNoteStore;
use crate::session::UserId;

/// Which queued mutation a failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayAction {
    Write,
    Delete,
}

/// A queued entry that could not be replayed and remains queued
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayFailure {
    pub id: NoteId,
    pub action: ReplayAction,
    pub error: String,
}

/// A dirty note the remote confirmed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncedNote {
    /// Id before the write; a local-origin id for offline creations
    pub previous_id: NoteId,
    /// Canonical id after the write
    pub id: NoteId,
}

/// Aggregate result of one replay
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub synced: Vec<SyncedNote>,
    pub deleted: Vec<NoteId>,
    pub failures: Vec<ReplayFailure>,
}

impl ReplayReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }

    fn fail(&mut self, id: NoteId, action: ReplayAction, error: &Error) {
        tracing::warn!("Replay of {:?} for {} failed: {}", action, id, error);
        self.failures.push(ReplayFailure {
            id,
            action,
            error: error.to_string(),
        });
    }
}

impl fmt::Display for ReplayReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            write!(
                f,
                "{} changes synced, {} deletions confirmed",
                self.synced.len(),
                self.deleted.len()
            )
        } else {
            write!(f, "{} changes failed to sync", self.failed_count())
        }
    }
}

/// Errors that end the batch instead of being collected
const fn is_fatal(error: &Error) -> bool {
    error.is_storage_failure() || matches!(error, Error::AuthRequired)
}

/// Push the cached version of `id` if it still needs syncing.
///
/// Re-reads the cache first, so an entry already confirmed by a concurrent
/// push is not written twice. The remote's answer is settled in one cache
/// transaction under `cache_lock`, the lock every other cache
/// read-modify-write section holds: a local-origin id is retired in favour
/// of the server id, and an edit made while the write was in flight stays
/// dirty.
///
/// Returns the cached note afterwards, or `None` when there was nothing to push.
pub async fn push_note<C, R>(
    cache: &C,
    cache_lock: &Mutex<()>,
    remote: &R,
    user: &UserId,
    id: &NoteId,
) -> Result<Option<Note>>
where
    C: NoteCache + ?Sized,
    R: RemoteNoteStore + ?Sized,
{
    let Some(pushed) = cache.get(id).await? else {
        return Ok(None);
    };
    if !pushed.needs_sync() {
        return Ok(Some(pushed));
    }

    let stored = remote.write(user, &pushed).await?;

    let settled = {
        let _guard = cache_lock.lock().await;
        cache.settle_push(&pushed, &stored).await?
    };
    tracing::debug!("Pushed note {} as {}", id, stored.id);
    Ok(settled)
}

/// Drain both queues against the remote store
pub async fn replay_pending<C, R>(
    cache: &C,
    cache_lock: &Mutex<()>,
    remote: &R,
    user: &UserId,
) -> Result<ReplayReport>
where
    C: NoteCache + ?Sized,
    R: RemoteNoteStore + ?Sized,
{
    let mut report = ReplayReport::default();
    let deletions = cache.pending_deletions().await?;
    let doomed: HashSet<&NoteId> = deletions.iter().map(|deletion| &deletion.id).collect();

    for note in cache.dirty().await? {
        if doomed.contains(&note.id) {
            continue;
        }
        match push_note(cache, cache_lock, remote, user, &note.id).await {
            Ok(Some(synced)) => report.synced.push(SyncedNote {
                previous_id: note.id,
                id: synced.id,
            }),
            Ok(None) => {}
            Err(error) if is_fatal(&error) => return Err(error),
            Err(error) => report.fail(note.id, ReplayAction::Write, &error),
        }
    }

    for deletion in &deletions {
        match remote.delete(user, &deletion.id).await {
            Ok(()) => {
                let _guard = cache_lock.lock().await;
                cache.delete_pending_deletion(&deletion.id).await?;
                cache.delete(&deletion.id).await?;
                report.deleted.push(deletion.id.clone());
            }
            Err(error) if is_fatal(&error) => return Err(error),
            Err(error) => report.fail(deletion.id.clone(), ReplayAction::Delete, &error),
        }
    }

    tracing::info!("Replay finished for {}: {}", user, report);
    Ok(report)
}
