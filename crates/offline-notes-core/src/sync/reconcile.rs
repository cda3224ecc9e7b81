//! Merge of the latest remote snapshot with the local cache.
//!
//! Pure: takes both collections and returns the merged view together with
//! the cache changes needed to refresh the local copy. The caller applies
//! them.
//!
//! Rules, per id:
//! - present on both sides: the later `updated_at` wins, ties go to the remote;
//! - remote only: included and written to the cache;
//! - local only with a local-origin id: always included, never evicted;
//! - local only, remote-origin and dirty: included, the replay will push it;
//! - local only, remote-origin and clean: deleted elsewhere, hidden from the
//!   view but kept in the cache.
//!
//! A dirty local version that loses is only reported as discarded when its
//! title or content differ from the winner.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::models::{Note, NoteId, SyncStatus};

/// A dirty local version that lost to a newer remote one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscardedEdit {
    pub note_id: NoteId,
    pub local_updated_at: i64,
    pub incoming_updated_at: i64,
}

/// Outcome of one merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Merged notes, unique by id, newest `updated_at` first
    pub view: Vec<Note>,
    /// Remote versions the cache must store
    pub cache_writes: Vec<Note>,
    /// Clean remote-origin notes no longer present remotely
    pub hidden: Vec<NoteId>,
    /// Dirty local edits overwritten by the remote
    pub discarded_edits: Vec<DiscardedEdit>,
}

/// Index notes by id; the first occurrence of an id wins
fn index(notes: &[Note]) -> BTreeMap<NoteId, Note> {
    let mut by_id = BTreeMap::new();
    for note in notes {
        by_id.entry(note.id.clone()).or_insert_with(|| note.clone());
    }
    by_id
}

/// Whether the local version beats the remote one
fn local_wins(local: &Note, remote: &Note) -> bool {
    local.updated_at > remote.updated_at
}

/// Newest first, ties broken by id so the order is total
pub fn sort_view(notes: &mut [Note]) {
    notes.sort_by(|a, b| match b.updated_at.cmp(&a.updated_at) {
        Ordering::Equal => a.id.cmp(&b.id),
        other => other,
    });
}

pub fn reconcile(remote: &[Note], local: &[Note]) -> Reconciliation {
    let remote = index(remote);
    let mut local = index(local);
    let mut result = Reconciliation::default();

    for (id, remote_note) in remote {
        let remote_note = Note {
            sync_status: SyncStatus::Clean,
            ..remote_note
        };

        match local.remove(&id) {
            Some(local_note) if local_wins(&local_note, &remote_note) => {
                result.view.push(local_note);
            }
            Some(local_note) => {
                if local_note.needs_sync() && !local_note.same_content(&remote_note) {
                    result.discarded_edits.push(DiscardedEdit {
                        note_id: id.clone(),
                        local_updated_at: local_note.updated_at,
                        incoming_updated_at: remote_note.updated_at,
                    });
                }
                if local_note != remote_note {
                    result.cache_writes.push(remote_note.clone());
                }
                result.view.push(remote_note);
            }
            None => {
                result.cache_writes.push(remote_note.clone());
                result.view.push(remote_note);
            }
        }
    }

    for (id, local_note) in local {
        if id.is_local() || local_note.needs_sync() {
            result.view.push(local_note);
        } else {
            result.hidden.push(id);
        }
    }

    sort_view(&mut result.view);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn note(id: &str, title: &str, updated_at: i64, sync_status: SyncStatus) -> Note {
        Note {
            id: NoteId::remote(id),
            title: title.to_string(),
            content: String::new(),
            created_at: 1,
            updated_at,
            sync_status,
        }
    }

    fn ids(notes: &[Note]) -> Vec<&str> {
        notes.iter().map(|note| note.id.as_str()).collect()
    }

    #[test]
    fn remote_newer_wins() {
        let remote = vec![note("a", "remote", 300, SyncStatus::Clean)];
        let local = vec![note("a", "local", 200, SyncStatus::Clean)];

        let merged = reconcile(&remote, &local);
        assert_eq!(merged.view, remote);
        assert_eq!(merged.cache_writes, remote);
    }

    #[test]
    fn local_newer_wins_and_is_not_overwritten() {
        let remote = vec![note("abc", "stale", 100, SyncStatus::Clean)];
        let local = vec![note("abc", "edited offline", 200, SyncStatus::Dirty)];

        let merged = reconcile(&remote, &local);
        assert_eq!(merged.view, local);
        assert!(merged.cache_writes.is_empty());
        assert!(merged.discarded_edits.is_empty());
    }

    #[test]
    fn equal_timestamps_go_to_remote() {
        let remote = vec![note("a", "remote", 100, SyncStatus::Clean)];
        let local = vec![note("a", "local", 100, SyncStatus::Dirty)];

        let merged = reconcile(&remote, &local);
        assert_eq!(merged.view, remote);
        assert_eq!(
            merged.discarded_edits,
            vec![DiscardedEdit {
                note_id: NoteId::remote("a"),
                local_updated_at: 100,
                incoming_updated_at: 100,
            }]
        );
    }

    #[test]
    fn identical_versions_need_no_cache_write() {
        let both = vec![note("a", "same", 100, SyncStatus::Clean)];
        let merged = reconcile(&both, &both);
        assert_eq!(merged.view, both);
        assert!(merged.cache_writes.is_empty());
    }

    #[test]
    fn local_origin_notes_always_included() {
        let local_note = Note::new_local("Groceries", "").unwrap();
        let merged = reconcile(&[], std::slice::from_ref(&local_note));

        assert_eq!(merged.view, vec![local_note]);
        assert!(merged.hidden.is_empty());
    }

    #[test]
    fn own_write_echo_is_not_a_discarded_edit() {
        let remote = vec![note("a", "same", 200, SyncStatus::Clean)];
        let local = vec![note("a", "same", 150, SyncStatus::Dirty)];

        let merged = reconcile(&remote, &local);
        assert_eq!(merged.view, remote);
        assert_eq!(merged.cache_writes, remote);
        assert!(merged.discarded_edits.is_empty());
    }

    #[test]
    fn clean_notes_missing_remotely_are_hidden() {
        let local = vec![
            note("gone", "deleted elsewhere", 10, SyncStatus::Clean),
            note("pending", "edited offline", 20, SyncStatus::Dirty),
        ];

        let merged = reconcile(&[], &local);
        assert_eq!(ids(&merged.view), vec!["pending"]);
        assert_eq!(merged.hidden, vec![NoteId::remote("gone")]);
    }

    #[test]
    fn ids_are_unique_in_view() {
        let remote = vec![
            note("a", "one", 10, SyncStatus::Clean),
            note("a", "duplicate", 50, SyncStatus::Clean),
            note("b", "two", 20, SyncStatus::Clean),
        ];
        let local = vec![
            note("a", "local", 5, SyncStatus::Clean),
            note("b", "local", 30, SyncStatus::Dirty),
        ];

        let merged = reconcile(&remote, &local);
        assert_eq!(ids(&merged.view), vec!["b", "a"]);
        assert_eq!(merged.view[1].title, "one");
        assert_eq!(merged.view[0].title, "local");
    }

    #[test]
    fn merge_is_idempotent() {
        let remote = vec![
            note("a", "remote a", 300, SyncStatus::Clean),
            note("b", "remote b", 100, SyncStatus::Clean),
        ];
        let mut local = vec![
            note("a", "local a", 200, SyncStatus::Dirty),
            note("b", "local b", 150, SyncStatus::Dirty),
            note("c", "stale", 10, SyncStatus::Clean),
        ];
        local.push(Note::new_local("offline", "").unwrap());

        let first = reconcile(&remote, &local);
        let second = reconcile(&remote, &local);
        assert_eq!(first, second);

        // Feeding the refreshed cache back in changes nothing
        let mut refreshed: BTreeMap<NoteId, Note> = index(&local);
        for write in &first.cache_writes {
            refreshed.insert(write.id.clone(), write.clone());
        }
        let refreshed: Vec<Note> = refreshed.into_values().collect();
        let third = reconcile(&remote, &refreshed);
        assert_eq!(third.view, first.view);
        assert!(third.cache_writes.is_empty());
        assert_eq!(third.hidden, first.hidden);
    }

    #[test]
    fn remote_notes_are_marked_clean() {
        let remote = vec![note("a", "remote", 10, SyncStatus::Dirty)];
        let merged = reconcile(&remote, &[]);
        assert_eq!(merged.view[0].sync_status, SyncStatus::Clean);
    }
}
