//! Remote note store adapters.
//!
//! The remote store is the durable source of truth once a note is synced. It
//! keeps each user's notes under `users/{uid}/notes/{id}` and stamps
//! `created_at`/`updated_at` with its own clock.

mod firebase;
mod memory;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::models::{Note, NoteId};
use crate::session::UserId;

pub use firebase::FirebaseRestStore;
pub use memory::MemoryRemoteStore;

/// The entire current note collection of one user, never a delta
pub type RemoteSnapshot = Vec<Note>;

/// Keyed, hierarchical per-user note store.
///
/// Every operation fails with `Error::RemoteUnavailable` when the network
/// cannot be reached; callers must not treat that as data loss. Notes
/// returned by the store are always `SyncStatus::Clean`.
#[async_trait]
pub trait RemoteNoteStore: Send + Sync {
    /// Deliver the full collection once on connect and again on every change.
    ///
    /// Delivery stops when the returned `Subscription` is cancelled or dropped.
    async fn subscribe(
        &self,
        user: &UserId,
        sink: mpsc::UnboundedSender<RemoteSnapshot>,
    ) -> Result<Subscription>;

    /// Read the full collection once
    async fn read_once(&self, user: &UserId) -> Result<RemoteSnapshot>;

    /// Point read of one note
    async fn read_note(&self, user: &UserId, id: &NoteId) -> Result<Option<Note>>;

    /// Persist a note and return the stored version.
    ///
    /// A local-origin id is a create: the store assigns the canonical id and
    /// both timestamps. Any other id is an upsert that refreshes `updated_at`.
    async fn write(&self, user: &UserId, note: &Note) -> Result<Note>;

    /// Delete a note. Deleting an absent note succeeds.
    async fn delete(&self, user: &UserId, id: &NoteId) -> Result<()>;
}

/// Handle for a push subscription. Unsubscribes when cancelled or dropped.
///
/// Cancelling only stops further deliveries; writes already in flight are
/// not aborted.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Stop deliveries now
    pub fn cancel(mut self) {
        self.unsubscribe();
    }

    fn unsubscribe(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn subscription_cancels_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let subscription = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        subscription.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscription_cancels_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        {
            let _subscription = Subscription::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
