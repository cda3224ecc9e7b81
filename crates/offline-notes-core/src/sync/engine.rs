//! Offline-first note engine.
//!
//! Every user mutation lands in the local cache first and is pushed to the
//! remote store when online. Reads come from the merged view, rebuilt on
//! every remote push and every local mutation. Queued mutations are replayed
//! once per offline to online transition.

use std::collections::HashSet;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch, Mutex};

use super::reconcile::{reconcile, sort_view};
use super::replay::{push_note, replay_pending, ReplayReport};
use crate::config::CacheConfig;
use crate::connectivity::ConnectivityEvent;
use crate::db::{LibSqlNoteCache, NoteCache};
use crate::error::{Error, Result};
use crate::models::{Note, NoteId, PendingDeletion, SyncConflict, SyncStatus};
use crate::remote::{RemoteNoteStore, RemoteSnapshot};
use crate::session::{Identity, SessionContext, UserId};
use crate::state::SyncState;

/// What `delete_note` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Removed locally, and remotely if it ever existed there
    Deleted,
    /// Remote delete queued until the next replay; the note stays readable
    Queued,
}

pub struct NoteSync<C, R> {
    session: SessionContext,
    cache: C,
    remote: R,
    view: watch::Sender<Vec<Note>>,
    state: watch::Sender<SyncState>,
    /// Serializes cache read-modify-write sections
    cache_lock: Mutex<()>,
    /// Clean notes the last snapshot no longer contains; cached, not shown
    hidden: Mutex<HashSet<NoteId>>,
    /// Held by replays and by single remote mutations
    sync_lock: Mutex<()>,
}

impl<R: RemoteNoteStore> NoteSync<LibSqlNoteCache, R> {
    /// Open the signed-in user's cache file under `config`
    pub async fn open(config: &CacheConfig, session: SessionContext, remote: R) -> Result<Self> {
        let cache = LibSqlNoteCache::open(config.cache_path_for(session.user())).await?;
        Ok(Self::new(session, cache, remote))
    }
}

impl<C: NoteCache, R: RemoteNoteStore> NoteSync<C, R> {
    pub fn new(session: SessionContext, cache: C, remote: R) -> Self {
        let (view, _) = watch::channel(Vec::new());
        let (state, _) = watch::channel(SyncState::initial(session.is_online()));
        Self {
            session,
            cache,
            remote,
            view,
            state,
            cache_lock: Mutex::new(()),
            hidden: Mutex::new(HashSet::new()),
            sync_lock: Mutex::new(()),
        }
    }

    pub const fn session(&self) -> &SessionContext {
        &self.session
    }

    pub const fn cache(&self) -> &C {
        &self.cache
    }

    pub const fn remote(&self) -> &R {
        &self.remote
    }

    fn user(&self) -> &UserId {
        self.session.user()
    }

    fn set_state(&self, state: SyncState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                tracing::debug!("Sync state {:?} -> {:?}", current, state);
                *current = state;
                true
            }
        });
    }

    fn publish(&self, notes: Vec<Note>) -> Vec<Note> {
        self.view.send_replace(notes.clone());
        notes
    }

    /// Rebuild the view from the cache, minus notes the remote dropped
    async fn refresh_view(&self) -> Result<Vec<Note>> {
        let mut notes = self.cache.all().await?;
        {
            let hidden = self.hidden.lock().await;
            notes.retain(|note| note.needs_sync() || !hidden.contains(&note.id));
        }
        sort_view(&mut notes);
        Ok(self.publish(notes))
    }

    /// Initial load.
    ///
    /// Reads the remote collection once and merges it. When the remote cannot
    /// be reached the cached notes are shown as they are.
    pub async fn load(&self) -> Result<Vec<Note>> {
        if self.session.is_online() {
            match self.remote.read_once(self.user()).await {
                Ok(snapshot) => return self.apply_remote_snapshot(snapshot).await,
                Err(error) if error.is_remote_unavailable() => {
                    tracing::info!("Remote unavailable on load, showing cached notes: {}", error);
                }
                Err(error) => return Err(error),
            }
        }
        self.set_state(SyncState::Offline);
        self.refresh_view().await
    }

    /// Merge a full remote collection into the cache and publish the result
    pub async fn apply_remote_snapshot(&self, snapshot: RemoteSnapshot) -> Result<Vec<Note>> {
        let _guard = self.cache_lock.lock().await;
        let local = self.cache.all().await?;
        let merged = reconcile(&snapshot, &local);

        for note in &merged.cache_writes {
            self.cache.put(note).await?;
        }
        for edit in &merged.discarded_edits {
            tracing::info!(
                "Remote version of {} ({}) replaced local edit ({})",
                edit.note_id,
                edit.incoming_updated_at,
                edit.local_updated_at
            );
            self.cache
                .record_conflict(&edit.note_id, edit.local_updated_at, edit.incoming_updated_at)
                .await?;
        }

        tracing::debug!(
            "Merged {} remote notes: {} cached, {} hidden, {} in view",
            snapshot.len(),
            merged.cache_writes.len(),
            merged.hidden.len(),
            merged.view.len()
        );
        *self.hidden.lock().await = merged.hidden.into_iter().collect();
        Ok(self.publish(merged.view))
    }

    /// Current merged view, newest first
    pub fn notes(&self) -> Vec<Note> {
        self.view.borrow().clone()
    }

    /// Change notifications for the merged view
    pub fn watch_notes(&self) -> watch::Receiver<Vec<Note>> {
        self.view.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn sync_state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// One note, local first.
    ///
    /// Clean remote-origin notes are re-read from the remote when online; the
    /// later `updated_at` wins and ties go to the remote.
    pub async fn get_note(&self, id: &NoteId) -> Result<Option<Note>> {
        let local = self.cache.get(id).await?;
        if id.is_local() || local.as_ref().is_some_and(Note::needs_sync) {
            return Ok(local);
        }
        if !self.session.is_online() {
            return Ok(local);
        }

        let remote = match self.remote.read_note(self.user(), id).await {
            Ok(Some(remote)) => remote,
            Ok(None) => return Ok(local),
            Err(Error::AuthRequired) => return Err(Error::AuthRequired),
            Err(error) => {
                tracing::debug!("Point read of {} failed, using cache: {}", id, error);
                return Ok(local);
            }
        };
        let remote = Note {
            sync_status: SyncStatus::Clean,
            ..remote
        };

        match local {
            Some(local) if local.updated_at > remote.updated_at => Ok(Some(local)),
            Some(local) if local == remote => Ok(Some(local)),
            _ => {
                let _guard = self.cache_lock.lock().await;
                self.cache.put(&remote).await?;
                Ok(Some(remote))
            }
        }
    }

    /// Create a note. Offline it stays queued with a local-origin id.
    pub async fn create_note(
        &self,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<Note> {
        let note = Note::new_local(title, content)?;
        {
            let _guard = self.cache_lock.lock().await;
            self.cache.put(&note).await?;
        }
        tracing::debug!("Created note {}", note.id);
        self.refresh_view().await?;
        self.push_if_online(note).await
    }

    /// Edit title and content of a cached note
    pub async fn update_note(
        &self,
        id: &NoteId,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<Note> {
        let note = {
            let _guard = self.cache_lock.lock().await;
            if self.cache.get_pending_deletion(id).await?.is_some() {
                return Err(Error::InvalidInput(format!(
                    "Note {id} is pending deletion"
                )));
            }
            let mut note = self
                .cache
                .get(id)
                .await?
                .ok_or_else(|| Error::NotFound(id.to_string()))?;
            note.edit(title, content)?;
            self.cache.put(&note).await?;
            note
        };
        tracing::debug!("Updated note {}", note.id);
        self.refresh_view().await?;
        self.push_if_online(note).await
    }

    async fn push_if_online(&self, note: Note) -> Result<Note> {
        if !self.session.is_online() {
            tracing::debug!("Offline, note {} queued", note.id);
            return Ok(note);
        }

        let pushed = {
            let _guard = self.sync_lock.lock().await;
            push_note(
                &self.cache,
                &self.cache_lock,
                &self.remote,
                self.user(),
                &note.id,
            )
            .await
        };
        match pushed {
            Ok(Some(synced)) => {
                self.refresh_view().await?;
                Ok(synced)
            }
            Ok(None) => Ok(note),
            Err(error) if error.is_remote_unavailable() => {
                tracing::info!("Push of {} deferred: {}", note.id, error);
                Ok(note)
            }
            Err(error) => Err(error),
        }
    }

    /// Delete a note.
    ///
    /// Local-origin notes never reached the remote and are dropped at once.
    /// Offline, remote-origin notes get a pending deletion and stay readable
    /// until the replay confirms it.
    pub async fn delete_note(&self, id: &NoteId) -> Result<DeleteOutcome> {
        let outcome = {
            let _guard = self.cache_lock.lock().await;
            if self.cache.get_pending_deletion(id).await?.is_some() {
                return Ok(DeleteOutcome::Queued);
            }
            if self.cache.get(id).await?.is_none() {
                return Err(Error::NotFound(id.to_string()));
            }

            if id.is_local() {
                self.cache.delete(id).await?;
                DeleteOutcome::Deleted
            } else {
                self.cache
                    .put_pending_deletion(&PendingDeletion::new(id.clone()))
                    .await?;
                DeleteOutcome::Queued
            }
        };

        let outcome = if outcome == DeleteOutcome::Queued && self.session.is_online() {
            self.delete_remote(id).await?
        } else {
            outcome
        };
        tracing::debug!("Delete of {}: {:?}", id, outcome);
        self.refresh_view().await?;
        Ok(outcome)
    }

    async fn delete_remote(&self, id: &NoteId) -> Result<DeleteOutcome> {
        let _guard = self.sync_lock.lock().await;
        match self.remote.delete(self.user(), id).await {
            Ok(()) => {
                let _cache = self.cache_lock.lock().await;
                self.cache.delete(id).await?;
                self.cache.delete_pending_deletion(id).await?;
                Ok(DeleteOutcome::Deleted)
            }
            Err(error) if error.is_remote_unavailable() => {
                tracing::info!("Delete of {} deferred: {}", id, error);
                Ok(DeleteOutcome::Queued)
            }
            Err(error) => Err(error),
        }
    }

    /// Sync status of a cached note; `None` when it is not cached
    pub async fn sync_status(&self, id: &NoteId) -> Result<Option<SyncStatus>> {
        if self.cache.get_pending_deletion(id).await?.is_some() {
            return Ok(Some(SyncStatus::PendingDelete));
        }
        Ok(self.cache.get(id).await?.map(|note| note.sync_status))
    }

    /// Most recent discarded local edits
    pub async fn conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        self.cache.list_conflicts(limit).await
    }

    /// Replay both queues against the remote store.
    ///
    /// Never overlaps with another replay. Does nothing while offline.
    pub async fn replay(&self) -> Result<ReplayReport> {
        let _guard = self.sync_lock.lock().await;
        if !self.session.is_online() {
            self.set_state(SyncState::Offline);
            return Ok(ReplayReport::default());
        }

        self.set_state(SyncState::Syncing);
        let result = replay_pending(&self.cache, &self.cache_lock, &self.remote, self.user()).await;
        match &result {
            Ok(report) => self.set_state(SyncState::after_replay(report)),
            Err(error) => {
                tracing::error!("Replay aborted: {}", error);
                self.set_state(SyncState::Error);
            }
        }
        self.refresh_view().await?;
        result
    }

    /// Drive the session until the signed-in user changes.
    ///
    /// Merges every remote push, replays on each connectivity restore, and
    /// unsubscribes on exit. Fatal errors end the loop.
    pub async fn run(&self, identity: &Identity) -> Result<()> {
        let mut connectivity = self.session.connectivity().subscribe();
        let mut users = identity.subscribe();
        let (sink, mut snapshots) = mpsc::unbounded_channel();
        let subscription = self.remote.subscribe(self.user(), sink).await?;
        tracing::info!("Sync session started for {}", self.user());

        let result = loop {
            if users.borrow_and_update().as_ref() != Some(self.user()) {
                break Ok(());
            }

            tokio::select! {
                Some(snapshot) = snapshots.recv() => {
                    if let Err(error) = self.apply_remote_snapshot(snapshot).await {
                        break Err(error);
                    }
                }
                event = connectivity.recv() => {
                    let outcome = match event {
                        Ok(ConnectivityEvent::Restored) => self.replay().await.map(drop),
                        Ok(ConnectivityEvent::Lost) => {
                            self.set_state(SyncState::Offline);
                            Ok(())
                        }
                        Err(RecvError::Lagged(missed)) => {
                            tracing::warn!("Missed {} connectivity events", missed);
                            self.replay().await.map(drop)
                        }
                        Err(RecvError::Closed) => break Ok(()),
                    };
                    if let Err(error) = outcome {
                        break Err(error);
                    }
                }
                changed = users.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                }
            }
        };

        subscription.cancel();
        tracing::info!("Sync session ended for {}", self.user());
        result
    }
}
