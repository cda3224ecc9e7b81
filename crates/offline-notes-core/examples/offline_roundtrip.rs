//! Create and delete notes while offline, then reconnect and replay.
//!
//! Uses the Firebase Realtime Database when `OFFLINE_NOTES_DATABASE_URL` is
//! set (optionally from a `.env` file), and an in-process store otherwise.
//!
//! ```sh
//! RUST_LOG=offline_notes_core=debug cargo run --example offline_roundtrip
//! ```

use offline_notes_core::{
    CacheConfig, ConnectivityMonitor, FirebaseRestStore, MemoryRemoteStore, NoteSync,
    RemoteConfig, RemoteNoteStore, Result, SessionContext, UserId,
};
use tracing_subscriber::EnvFilter;

const USER_ID_ENV: &str = "OFFLINE_NOTES_USER_ID";

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let user = UserId::new(std::env::var(USER_ID_ENV).unwrap_or_else(|_| "demo-user".into()))?;
    let cache_dir = tempfile::tempdir()?;
    let cache = CacheConfig::new(cache_dir.path());

    match RemoteConfig::from_env()? {
        Some(config) => roundtrip(&cache, user, FirebaseRestStore::new(&config)?).await,
        None => roundtrip(&cache, user, MemoryRemoteStore::new()).await,
    }
}

async fn roundtrip<R: RemoteNoteStore>(cache: &CacheConfig, user: UserId, remote: R) -> Result<()> {
    let connectivity = ConnectivityMonitor::new(false);
    let session = SessionContext::new(user, connectivity.clone());
    let notes = NoteSync::open(cache, session, remote).await?;

    let cached = notes.load().await?;
    println!("offline start: {} cached notes", cached.len());

    let groceries = notes.create_note("Groceries", "milk, eggs").await?;
    let scratch = notes.create_note("Scratch", "delete me").await?;
    notes.delete_note(&scratch.id).await?;
    println!(
        "queued {} as {:?}",
        groceries.id,
        notes.sync_status(&groceries.id).await?
    );

    connectivity.set_online(true);
    let report = notes.replay().await?;
    println!("replay: {report}");

    for note in notes.load().await? {
        println!("{}  {}  ({:?})", note.id, note.title, note.sync_status);
    }
    Ok(())
}
