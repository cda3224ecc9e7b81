//! Local cache store for notes and pending deletions

use async_trait::async_trait;
use libsql::{params, Connection, Row};
use std::path::Path;
use tokio::sync::Mutex;

use super::Database;
use crate::error::Result;
use crate::models::{Note, NoteId, PendingDeletion, SyncConflict, SyncStatus, LWW_STRATEGY};
use crate::util::now_millis;

/// Durable key-value storage for one user's notes.
///
/// Two independent keyspaces: notes keyed by id, and pending deletions keyed
/// by the id to delete remotely. Every operation is atomic per key. Errors
/// are storage failures and are never retried.
#[async_trait]
pub trait NoteCache: Send + Sync {
    /// Get a note by ID
    async fn get(&self, id: &NoteId) -> Result<Option<Note>>;

    /// Insert or replace a note
    async fn put(&self, note: &Note) -> Result<()>;

    /// Remove a note. Removing an absent id is not an error.
    async fn delete(&self, id: &NoteId) -> Result<()>;

    /// All cached notes, unordered
    async fn all(&self) -> Result<Vec<Note>>;

    /// Notes whose changes are not yet confirmed remotely
    async fn dirty(&self) -> Result<Vec<Note>>;

    /// Record the remote's copy of `pushed` in one transaction.
    ///
    /// The row is re-read first. Unchanged since the push, it becomes
    /// `stored`, moving to the server id for local-origin notes. Edited
    /// meanwhile, the newer edit stays dirty under the server id. Deleted
    /// meanwhile, nothing is written back and a local-origin note gets a
    /// pending deletion for its server id.
    ///
    /// Returns the cached note afterwards.
    async fn settle_push(&self, pushed: &Note, stored: &Note) -> Result<Option<Note>>;

    /// Get a queued deletion
    async fn get_pending_deletion(&self, id: &NoteId) -> Result<Option<PendingDeletion>>;

    /// Queue a deletion (idempotent per id)
    async fn put_pending_deletion(&self, deletion: &PendingDeletion) -> Result<()>;

    /// Drop a queued deletion once the remote confirmed it
    async fn delete_pending_deletion(&self, id: &NoteId) -> Result<()>;

    /// All queued deletions, oldest first
    async fn pending_deletions(&self) -> Result<Vec<PendingDeletion>>;

    /// Log a dirty local version discarded by last-write-wins
    async fn record_conflict(
        &self,
        note_id: &NoteId,
        local_updated_at: i64,
        incoming_updated_at: i64,
    ) -> Result<()>;

    /// Most recent conflicts first
    async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>>;
}

/// libSQL implementation of `NoteCache`
pub struct LibSqlNoteCache {
    db: Mutex<Database>,
}

impl LibSqlNoteCache {
    /// Wrap an opened database
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Open (or create) the cache file at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Database::open(path).await?))
    }

    /// Open an in-memory cache (primarily for tests)
    pub async fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory().await?))
    }

    fn parse_note(row: &Row) -> Result<Note> {
        let id: String = row.get(0)?;
        let status: String = row.get(5)?;
        Ok(Note {
            id: NoteId::remote(id),
            title: row.get(1)?,
            content: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
            sync_status: status.parse()?,
        })
    }

    async fn query_notes(conn: &Connection, sql: &str) -> Result<Vec<Note>> {
        let mut rows = conn.query(sql, ()).await?;
        let mut notes = Vec::new();
        while let Some(row) = rows.next().await? {
            notes.push(Self::parse_note(&row)?);
        }
        Ok(notes)
    }

    async fn find(conn: &Connection, id: &NoteId) -> Result<Option<Note>> {
        let mut rows = conn
            .query(
                &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?1"),
                params![id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_note(&row)?)),
            None => Ok(None),
        }
    }

    async fn queue_deletion(conn: &Connection, deletion: &PendingDeletion) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO pending_deletions (id, queued_at) VALUES (?1, ?2)",
            params![deletion.id.as_str(), deletion.queued_at],
        )
        .await?;
        Ok(())
    }

    async fn settle(conn: &Connection, pushed: &Note, stored: &Note) -> Result<Option<Note>> {
        let Some(current) = Self::find(conn, &pushed.id).await? else {
            if pushed.id.is_local() {
                Self::queue_deletion(conn, &PendingDeletion::new(stored.id.clone())).await?;
                tracing::debug!("{} was deleted mid-push, queued {}", pushed.id, stored.id);
            }
            return Ok(None);
        };

        let settled = if current == *pushed {
            stored.clone()
        } else {
            tracing::debug!("{} was edited mid-push, keeping the newer edit", pushed.id);
            Note {
                id: stored.id.clone(),
                created_at: stored.created_at,
                ..current
            }
        };

        if settled.id != pushed.id {
            conn.execute(
                "DELETE FROM notes WHERE id = ?1",
                params![pushed.id.as_str()],
            )
            .await?;
        }
        Self::upsert(conn, &settled).await?;
        Ok(Some(settled))
    }

    async fn upsert(conn: &Connection, note: &Note) -> Result<()> {
        conn.execute(
            "INSERT INTO notes (id, title, content, created_at, updated_at, sync_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                sync_status = excluded.sync_status",
            params![
                note.id.as_str(),
                note.title.as_str(),
                note.content.as_str(),
                note.created_at,
                note.updated_at,
                stored_status(note.sync_status)
            ],
        )
        .await?;
        Ok(())
    }
}

/// The notes keyspace only distinguishes clean and dirty records
const fn stored_status(status: SyncStatus) -> &'static str {
    match status {
        SyncStatus::Clean => SyncStatus::Clean.as_str(),
        SyncStatus::Dirty | SyncStatus::PendingDelete => SyncStatus::Dirty.as_str(),
    }
}

const NOTE_COLUMNS: &str = "id, title, content, created_at, updated_at, sync_status";

#[async_trait]
impl NoteCache for LibSqlNoteCache {
    async fn get(&self, id: &NoteId) -> Result<Option<Note>> {
        let db = self.db.lock().await;
        Self::find(db.connection(), id).await
    }

    async fn put(&self, note: &Note) -> Result<()> {
        let db = self.db.lock().await;
        Self::upsert(db.connection(), note).await
    }

    async fn delete(&self, id: &NoteId) -> Result<()> {
        let db = self.db.lock().await;
        db.connection()
            .execute("DELETE FROM notes WHERE id = ?1", params![id.as_str()])
            .await?;
        Ok(())
    }

    async fn all(&self) -> Result<Vec<Note>> {
        let db = self.db.lock().await;
        Self::query_notes(
            db.connection(),
            &format!("SELECT {NOTE_COLUMNS} FROM notes"),
        )
        .await
    }

    async fn dirty(&self) -> Result<Vec<Note>> {
        let db = self.db.lock().await;
        Self::query_notes(
            db.connection(),
            &format!(
                "SELECT {NOTE_COLUMNS} FROM notes WHERE sync_status = 'dirty' ORDER BY created_at ASC"
            ),
        )
        .await
    }

    async fn settle_push(&self, pushed: &Note, stored: &Note) -> Result<Option<Note>> {
        let db = self.db.lock().await;
        let conn = db.connection();

        conn.execute("BEGIN TRANSACTION", ()).await?;
        let settled = match Self::settle(conn, pushed, stored).await {
            Ok(settled) => settled,
            Err(e) => {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(e);
            }
        };
        if let Err(e) = conn.execute("COMMIT", ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
        Ok(settled)
    }

    async fn get_pending_deletion(&self, id: &NoteId) -> Result<Option<PendingDeletion>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT id, queued_at FROM pending_deletions WHERE id = ?1",
                params![id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(PendingDeletion {
                id: NoteId::remote(row.get::<String>(0)?),
                queued_at: row.get(1)?,
            })),
            None => Ok(None),
        }
    }

    async fn put_pending_deletion(&self, deletion: &PendingDeletion) -> Result<()> {
        let db = self.db.lock().await;
        Self::queue_deletion(db.connection(), deletion).await
    }

    async fn delete_pending_deletion(&self, id: &NoteId) -> Result<()> {
        let db = self.db.lock().await;
        db.connection()
            .execute(
                "DELETE FROM pending_deletions WHERE id = ?1",
                params![id.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn pending_deletions(&self) -> Result<Vec<PendingDeletion>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT id, queued_at FROM pending_deletions ORDER BY queued_at ASC, id ASC",
                (),
            )
            .await?;

        let mut deletions = Vec::new();
        while let Some(row) = rows.next().await? {
            deletions.push(PendingDeletion {
                id: NoteId::remote(row.get::<String>(0)?),
                queued_at: row.get(1)?,
            });
        }
        Ok(deletions)
    }

    async fn record_conflict(
        &self,
        note_id: &NoteId,
        local_updated_at: i64,
        incoming_updated_at: i64,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.connection()
            .execute(
                "INSERT INTO sync_conflicts
                    (note_id, local_updated_at, incoming_updated_at, resolved_at, strategy)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    note_id.as_str(),
                    local_updated_at,
                    incoming_updated_at,
                    now_millis(),
                    LWW_STRATEGY
                ],
            )
            .await?;
        Ok(())
    }

    async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT id, note_id, local_updated_at, incoming_updated_at, resolved_at, strategy
                 FROM sync_conflicts
                 ORDER BY resolved_at DESC, id DESC
                 LIMIT ?1",
                params![limit],
            )
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(SyncConflict {
                id: row.get(0)?,
                note_id: NoteId::remote(row.get::<String>(1)?),
                local_updated_at: row.get(2)?,
                incoming_updated_at: row.get(3)?,
                resolved_at: row.get(4)?,
                strategy: row.get(5)?,
            });
        }
        Ok(conflicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    async fn setup() -> LibSqlNoteCache {
        LibSqlNoteCache::open_in_memory().await.unwrap()
    }

    fn clean_note(id: &str, title: &str, updated_at: i64) -> Note {
        Note {
            id: NoteId::remote(id),
            title: title.to_string(),
            content: String::new(),
            created_at: 1,
            updated_at,
            sync_status: SyncStatus::Clean,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_and_get() {
        let cache = setup().await;
        let note = Note::new_local("Hello", "world").unwrap();
        cache.put(&note).await.unwrap();

        let fetched = cache.get(&note.id).await.unwrap().unwrap();
        assert_eq!(fetched, note);
        assert!(cache.get(&NoteId::remote("missing")).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_replaces_existing_key() {
        let cache = setup().await;
        cache.put(&clean_note("a", "first", 10)).await.unwrap();
        cache.put(&clean_note("a", "second", 20)).await.unwrap();

        let all = cache.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "second");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_is_idempotent() {
        let cache = setup().await;
        let note = clean_note("a", "gone", 10);
        cache.put(&note).await.unwrap();

        cache.delete(&note.id).await.unwrap();
        cache.delete(&note.id).await.unwrap();
        assert!(cache.all().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dirty_lists_only_unsynced_notes() {
        let cache = setup().await;
        cache.put(&clean_note("a", "clean", 10)).await.unwrap();
        let local = Note::new_local("dirty", "").unwrap();
        cache.put(&local).await.unwrap();

        let dirty = cache.dirty().await.unwrap();
        assert_eq!(dirty, vec![local]);
    }

    fn confirmed(pushed: &Note, id: &str) -> Note {
        Note {
            id: NoteId::remote(id),
            sync_status: SyncStatus::Clean,
            updated_at: pushed.updated_at + 5,
            ..pushed.clone()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_settle_push_swaps_local_id() {
        let cache = setup().await;
        let local = Note::new_local("Groceries", "milk").unwrap();
        cache.put(&local).await.unwrap();

        let stored = confirmed(&local, "-Nserver1");
        let settled = cache.settle_push(&local, &stored).await.unwrap();

        assert_eq!(settled, Some(stored.clone()));
        assert!(cache.get(&local.id).await.unwrap().is_none());
        assert_eq!(cache.all().await.unwrap(), vec![stored]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_settle_push_keeps_edit_made_during_the_write() {
        let cache = setup().await;
        let pushed = Note::new_local("Plan", "v1").unwrap();
        cache.put(&pushed).await.unwrap();

        let mut edited = pushed.clone();
        edited.edit("Plan", "v2").unwrap();
        cache.put(&edited).await.unwrap();

        let stored = confirmed(&pushed, "-Nserver1");
        let settled = cache.settle_push(&pushed, &stored).await.unwrap().unwrap();

        assert_eq!(settled.id, stored.id);
        assert_eq!(settled.content, "v2");
        assert_eq!(settled.created_at, stored.created_at);
        assert_eq!(settled.sync_status, SyncStatus::Dirty);
        assert_eq!(cache.dirty().await.unwrap(), vec![settled]);
        assert!(cache.get(&pushed.id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_settle_push_after_local_delete_queues_remote_delete() {
        let cache = setup().await;
        let pushed = Note::new_local("Scratch", "").unwrap();
        cache.put(&pushed).await.unwrap();
        cache.delete(&pushed.id).await.unwrap();

        let stored = confirmed(&pushed, "-Nserver1");
        assert_eq!(cache.settle_push(&pushed, &stored).await.unwrap(), None);

        assert!(cache.all().await.unwrap().is_empty());
        let queued: Vec<NoteId> = cache
            .pending_deletions()
            .await
            .unwrap()
            .into_iter()
            .map(|deletion| deletion.id)
            .collect();
        assert_eq!(queued, vec![stored.id]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pending_deletions_keyspace_is_independent() {
        let cache = setup().await;
        let note = clean_note("abc123", "keep me readable", 10);
        cache.put(&note).await.unwrap();

        let deletion = PendingDeletion::new(note.id.clone());
        cache.put_pending_deletion(&deletion).await.unwrap();
        cache.put_pending_deletion(&deletion).await.unwrap();

        assert_eq!(cache.pending_deletions().await.unwrap(), vec![deletion]);
        assert!(cache.get(&note.id).await.unwrap().is_some());

        cache.delete_pending_deletion(&note.id).await.unwrap();
        assert!(cache.get_pending_deletion(&note.id).await.unwrap().is_none());
        assert!(cache.get(&note.id).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_conflicts_newest_first() {
        let cache = setup().await;
        let id = NoteId::remote("a");
        cache.record_conflict(&id, 100, 150).await.unwrap();
        cache.record_conflict(&id, 300, 400).await.unwrap();

        let conflicts = cache.list_conflicts(10).await.unwrap();
        assert_eq!(conflicts.len(), 2);
        assert_eq!(conflicts[0].local_updated_at, 300);
        assert_eq!(conflicts[1].incoming_updated_at, 150);
        assert_eq!(conflicts[0].strategy, "lww");

        assert_eq!(cache.list_conflicts(1).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cache_survives_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("user.db");

        let local = Note::new_local("Offline", "draft").unwrap();
        {
            let cache = LibSqlNoteCache::open(&path).await.unwrap();
            cache.put(&local).await.unwrap();
            cache
                .put_pending_deletion(&PendingDeletion::new(NoteId::remote("abc123")))
                .await
                .unwrap();
        }

        let reopened = LibSqlNoteCache::open(&path).await.unwrap();
        assert_eq!(reopened.get(&local.id).await.unwrap(), Some(local));
        assert_eq!(reopened.pending_deletions().await.unwrap().len(), 1);
    }
}
