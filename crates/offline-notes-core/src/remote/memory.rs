//! In-process remote store.
//!
//! Behaves like the hosted document store: push-style generated keys, a
//! server clock, full-collection pushes to subscribers, and an online switch.
//! Used for tests, demos, and running the core without a backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{RemoteNoteStore, RemoteSnapshot, Subscription};
use crate::error::{Error, Result};
use crate::models::{Note, NoteId, SyncStatus};
use crate::session::UserId;
use crate::util::now_millis;

#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    offline: bool,
    users: HashMap<UserId, BTreeMap<NoteId, Note>>,
    subscribers: Vec<Subscriber>,
    next_subscriber: usize,
    last_timestamp: i64,
    key_counter: u64,
    failures_remaining: usize,
}

struct Subscriber {
    id: usize,
    user: UserId,
    sink: mpsc::UnboundedSender<RemoteSnapshot>,
}

impl MemoryState {
    fn ensure_reachable(&mut self) -> Result<()> {
        if self.offline {
            return Err(Error::RemoteUnavailable("network is offline".into()));
        }
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            return Err(Error::RemoteUnavailable("injected failure".into()));
        }
        Ok(())
    }

    /// Strictly increasing server clock
    fn server_time(&mut self) -> i64 {
        self.last_timestamp = now_millis().max(self.last_timestamp + 1);
        self.last_timestamp
    }

    fn generate_key(&mut self) -> NoteId {
        self.key_counter += 1;
        let time = self.server_time();
        NoteId::remote(format!("-N{time:012x}{:06x}", self.key_counter))
    }

    fn snapshot(&self, user: &UserId) -> RemoteSnapshot {
        self.users
            .get(user)
            .map(|notes| notes.values().cloned().collect())
            .unwrap_or_default()
    }

    fn notify(&mut self, user: &UserId) {
        let snapshot = self.snapshot(user);
        self.subscribers.retain(|subscriber| {
            if &subscriber.user != user {
                return true;
            }
            subscriber.sink.send(snapshot.clone()).is_ok()
        });
    }

    fn notify_all(&mut self) {
        let users: Vec<UserId> = self
            .subscribers
            .iter()
            .map(|subscriber| subscriber.user.clone())
            .collect();
        for user in users {
            self.notify(&user);
        }
    }
}

impl MemoryRemoteStore {
    /// An empty, reachable store
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Switch reachability. Reconnecting pushes the current collection to
    /// every subscriber, like a live listener resuming.
    pub fn set_online(&self, online: bool) {
        let mut state = self.state();
        let was_online = !state.offline;
        state.offline = !online;
        if online && !was_online {
            state.notify_all();
        }
    }

    pub fn is_online(&self) -> bool {
        !self.state().offline
    }

    /// Make the next `count` operations fail with `RemoteUnavailable`
    pub fn fail_next(&self, count: usize) {
        self.state().failures_remaining = count;
    }

    /// Current collection of `user`, ignoring reachability
    pub fn notes(&self, user: &UserId) -> Vec<Note> {
        self.state().snapshot(user)
    }

    /// Store a note as another device would, keeping its timestamps, and push
    pub fn insert_external(&self, user: &UserId, note: Note) {
        let mut state = self.state();
        let stored = Note {
            sync_status: SyncStatus::Clean,
            ..note
        };
        state
            .users
            .entry(user.clone())
            .or_default()
            .insert(stored.id.clone(), stored);
        state.notify(user);
    }

    /// Remove a note as another device would, and push
    pub fn remove_external(&self, user: &UserId, id: &NoteId) {
        let mut state = self.state();
        if let Some(notes) = state.users.get_mut(user) {
            notes.remove(id);
        }
        state.notify(user);
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state();
        state.subscribers.retain(|subscriber| !subscriber.sink.is_closed());
        state.subscribers.len()
    }
}

#[async_trait]
impl RemoteNoteStore for MemoryRemoteStore {
    async fn subscribe(
        &self,
        user: &UserId,
        sink: mpsc::UnboundedSender<RemoteSnapshot>,
    ) -> Result<Subscription> {
        let mut state = self.state();
        let id = state.next_subscriber;
        state.next_subscriber += 1;

        // Listeners register while offline and get their first push on reconnect
        if !state.offline {
            let _ = sink.send(state.snapshot(user));
        }
        state.subscribers.push(Subscriber {
            id,
            user: user.clone(),
            sink,
        });

        let inner = Arc::downgrade(&self.inner);
        Ok(Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                let mut state = inner.lock().unwrap_or_else(PoisonError::into_inner);
                state.subscribers.retain(|subscriber| subscriber.id != id);
            }
        }))
    }

    async fn read_once(&self, user: &UserId) -> Result<RemoteSnapshot> {
        let mut state = self.state();
        state.ensure_reachable()?;
        Ok(state.snapshot(user))
    }

    async fn read_note(&self, user: &UserId, id: &NoteId) -> Result<Option<Note>> {
        let mut state = self.state();
        state.ensure_reachable()?;
        Ok(state
            .users
            .get(user)
            .and_then(|notes| notes.get(id))
            .cloned())
    }

    async fn write(&self, user: &UserId, note: &Note) -> Result<Note> {
        let mut state = self.state();
        state.ensure_reachable()?;

        let now = state.server_time();
        let (id, created_at) = if note.id.is_local() {
            (state.generate_key(), now)
        } else {
            let created_at = state
                .users
                .get(user)
                .and_then(|notes| notes.get(&note.id))
                .map_or(note.created_at, |existing| existing.created_at);
            (note.id.clone(), created_at)
        };

        let stored = Note {
            id,
            title: note.title.clone(),
            content: note.content.clone(),
            created_at,
            updated_at: now,
            sync_status: SyncStatus::Clean,
        };
        state
            .users
            .entry(user.clone())
            .or_default()
            .insert(stored.id.clone(), stored.clone());
        state.notify(user);
        Ok(stored)
    }

    async fn delete(&self, user: &UserId, id: &NoteId) -> Result<()> {
        let mut state = self.state();
        state.ensure_reachable()?;
        if let Some(notes) = state.users.get_mut(user) {
            notes.remove(id);
        }
        state.notify(user);
        Ok(())
    }
}
