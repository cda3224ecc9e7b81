//! Firebase Realtime Database REST adapter.
//!
//! Notes live at `{database_url}/users/{uid}/notes/{id}.json` as
//! `{title, content, createdAt, updatedAt}`. Timestamps are stamped by the
//! server through `{".sv": "timestamp"}` placeholders. Live updates use the
//! REST streaming endpoint (`text/event-stream`); every `put`/`patch` event
//! triggers a full re-read so subscribers always receive whole collections.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::{RemoteNoteStore, RemoteSnapshot, Subscription};
use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::models::{Note, NoteId, SyncStatus};
use crate::session::UserId;
use crate::util::snippet;

const REQUEST_TIMEOUT_SECS: u64 = 10;
const CONNECT_TIMEOUT_SECS: u64 = 5;
const RECONNECT_DELAY_SECS: u64 = 5;

#[derive(Clone)]
pub struct FirebaseRestStore {
    database_url: String,
    auth_token: Option<String>,
    client: Client,
}

impl std::fmt::Debug for FirebaseRestStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("FirebaseRestStore")
            .field("database_url", &self.database_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Stored shape of a note. Unknown fields written by older clients are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NoteRecord {
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    created_at: i64,
    #[serde(default)]
    updated_at: i64,
}

impl NoteRecord {
    fn into_note(self, id: NoteId) -> Note {
        Note {
            id,
            title: self.title,
            content: self.content,
            created_at: self.created_at,
            updated_at: self.updated_at,
            sync_status: SyncStatus::Clean,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct FirebaseErrorBody {
    error: Option<String>,
}

/// One server-sent event from the streaming endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
struct ServerEvent {
    event: String,
    data: String,
}

/// Splits a byte stream into server-sent events
#[derive(Debug, Default)]
struct EventStreamParser {
    buffer: Vec<u8>,
}

impl EventStreamParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<ServerEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some((end, separator_len)) = find_event_boundary(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..end + separator_len).collect();
            let block = String::from_utf8_lossy(&block[..end]);
            if let Some(event) = parse_event_block(&block) {
                events.push(event);
            }
        }

        events
    }
}

fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|window| window == b"\n\n");
    let crlf = buffer.windows(4).position(|window| window == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) if b < a => Some((b, 4)),
        (Some(a), _) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

fn parse_event_block(block: &str) -> Option<ServerEvent> {
    let mut event = None;
    let mut data = Vec::new();

    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push(value.trim_start().to_string());
        }
    }

    event.map(|event| ServerEvent {
        event,
        data: data.join("\n"),
    })
}

/// Decode a `notes` node. `null` means the user has no notes yet.
///
/// Malformed records are skipped. The engine then leaves the cached copy in
/// place and only drops the note from the view.
fn decode_collection(payload: Option<HashMap<String, Value>>) -> RemoteSnapshot {
    let Some(entries) = payload else {
        return Vec::new();
    };

    entries
        .into_iter()
        .filter_map(|(key, value)| match serde_json::from_value::<NoteRecord>(value) {
            Ok(record) => Some(record.into_note(NoteId::remote(key))),
            Err(error) => {
                tracing::warn!("Skipping malformed remote note {}: {}", key, error);
                None
            }
        })
        .collect()
}

/// Stored version of a note the server already accepted.
///
/// The write has happened, so a failed re-read falls back to the sent note
/// under its server id. The next snapshot brings the server timestamps.
fn accepted_note(id: NoteId, sent: &Note, fetched: Result<Option<Note>>) -> Note {
    match fetched {
        Ok(Some(stored)) => return stored,
        Ok(None) => tracing::warn!("Note {} missing right after write, using sent copy", id),
        Err(error) => {
            tracing::warn!("Re-read of {} after write failed, using sent copy: {}", id, error);
        }
    }
    Note {
        id,
        sync_status: SyncStatus::Clean,
        ..sent.clone()
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<FirebaseErrorBody>(body) {
        if let Some(message) = payload.error {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = snippet(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn classify_status(status: StatusCode, body: &str) -> Error {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::AuthRequired,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            Error::RemoteUnavailable(parse_api_error(status, body))
        }
        _ => Error::Remote(parse_api_error(status, body)),
    }
}

fn map_send_error(error: reqwest::Error) -> Error {
    if error.is_connect() || error.is_timeout() || error.is_request() {
        Error::RemoteUnavailable(error.to_string())
    } else if error.is_decode() {
        Error::Remote(format!("invalid response body: {error}"))
    } else {
        Error::Remote(error.to_string())
    }
}

async fn check_status(response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, &body))
}

enum StreamEnd {
    /// Listener should stop for good
    Closed,
    /// Connection dropped; reconnect
    Disconnected,
}

impl FirebaseRestStore {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|error| Error::InvalidInput(format!("failed to build HTTP client: {error}")))?;
        Ok(Self {
            database_url: config.database_url.clone(),
            auth_token: config.auth_token.clone(),
            client,
        })
    }

    fn notes_url(&self, user: &UserId) -> String {
        format!("{}/users/{}/notes.json", self.database_url, user.as_str())
    }

    fn note_url(&self, user: &UserId, id: &NoteId) -> String {
        format!(
            "{}/users/{}/notes/{}.json",
            self.database_url,
            user.as_str(),
            id.as_str()
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.request_accepting(method, url, "application/json")
    }

    fn request_accepting(&self, method: Method, url: &str, accept: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header(reqwest::header::ACCEPT, accept);
        match &self.auth_token {
            Some(token) => builder.query(&[("auth", token)]),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await
            .map_err(map_send_error)?;
        check_status(response).await
    }

    async fn fetch_note(&self, user: &UserId, id: &NoteId) -> Result<Option<Note>> {
        let response = self
            .send(self.request(Method::GET, &self.note_url(user, id)))
            .await?;
        let record = response
            .json::<Option<NoteRecord>>()
            .await
            .map_err(map_send_error)?;
        Ok(record.map(|record| record.into_note(id.clone())))
    }

    async fn listen(&self, user: UserId, sink: mpsc::UnboundedSender<RemoteSnapshot>) {
        loop {
            match self.stream_events(&user, &sink).await {
                Ok(StreamEnd::Closed) => return,
                Ok(StreamEnd::Disconnected) => {
                    tracing::debug!("Remote event stream for {} ended; reconnecting", user);
                }
                Err(Error::AuthRequired) => {
                    tracing::warn!("Remote event stream for {} rejected credentials", user);
                    return;
                }
                Err(error) => {
                    tracing::warn!("Remote event stream for {} failed: {}", user, error);
                }
            }

            if sink.is_closed() {
                return;
            }
            tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECS)).await;
        }
    }

    async fn stream_events(
        &self,
        user: &UserId,
        sink: &mpsc::UnboundedSender<RemoteSnapshot>,
    ) -> Result<StreamEnd> {
        let response = self
            .request_accepting(Method::GET, &self.notes_url(user), "text/event-stream")
            .send()
            .await
            .map_err(map_send_error)?;
        let mut response = check_status(response).await?;
        let mut parser = EventStreamParser::default();

        while let Some(chunk) = response.chunk().await.map_err(map_send_error)? {
            for event in parser.push(&chunk) {
                match event.event.as_str() {
                    "put" | "patch" => {
                        let snapshot = self.read_once(user).await?;
                        if sink.send(snapshot).is_err() {
                            return Ok(StreamEnd::Closed);
                        }
                    }
                    "keep-alive" => {}
                    "cancel" | "auth_revoked" => {
                        tracing::warn!(
                            "Remote closed event stream for {}: {} {}",
                            user,
                            event.event,
                            event.data
                        );
                        return Ok(StreamEnd::Closed);
                    }
                    other => tracing::debug!("Ignoring remote event '{}'", other),
                }
            }
        }

        Ok(StreamEnd::Disconnected)
    }
}

#[async_trait]
impl RemoteNoteStore for FirebaseRestStore {
    async fn subscribe(
        &self,
        user: &UserId,
        sink: mpsc::UnboundedSender<RemoteSnapshot>,
    ) -> Result<Subscription> {
        let store = self.clone();
        let user = user.clone();
        let handle = tokio::spawn(async move { store.listen(user, sink).await });
        Ok(Subscription::new(move || handle.abort()))
    }

    async fn read_once(&self, user: &UserId) -> Result<RemoteSnapshot> {
        let response = self
            .send(self.request(Method::GET, &self.notes_url(user)))
            .await?;
        let payload = response
            .json::<Option<HashMap<String, Value>>>()
            .await
            .map_err(map_send_error)?;
        Ok(decode_collection(payload))
    }

    async fn read_note(&self, user: &UserId, id: &NoteId) -> Result<Option<Note>> {
        self.fetch_note(user, id).await
    }

    async fn write(&self, user: &UserId, note: &Note) -> Result<Note> {
        let id = if note.id.is_local() {
            let body = json!({
                "title": note.title,
                "content": note.content,
                "createdAt": {".sv": "timestamp"},
                "updatedAt": {".sv": "timestamp"},
            });
            let response = self
                .send(self.request(Method::POST, &self.notes_url(user)).json(&body))
                .await?;
            let pushed = response
                .json::<PushResponse>()
                .await
                .map_err(map_send_error)?;
            NoteId::remote(pushed.name)
        } else {
            let body = json!({
                "title": note.title,
                "content": note.content,
                "createdAt": note.created_at,
                "updatedAt": {".sv": "timestamp"},
            });
            self.send(
                self.request(Method::PATCH, &self.note_url(user, &note.id))
                    .json(&body),
            )
            .await?;
            note.id.clone()
        };

        tracing::debug!("Wrote note {} for {}", id, user);
        let fetched = self.fetch_note(user, &id).await;
        Ok(accepted_note(id, note, fetched))
    }

    async fn delete(&self, user: &UserId, id: &NoteId) -> Result<()> {
        self.send(self.request(Method::DELETE, &self.note_url(user, id)))
            .await?;
        tracing::debug!("Deleted remote note {} for {}", id, user);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store() -> FirebaseRestStore {
        let config =
            RemoteConfig::new("https://notes-app.firebaseio.com", Some("token".into())).unwrap();
        FirebaseRestStore::new(&config).unwrap()
    }

    #[test]
    fn builds_user_scoped_urls() {
        let store = store();
        let user = UserId::new("uid-1").unwrap();
        assert_eq!(
            store.notes_url(&user),
            "https://notes-app.firebaseio.com/users/uid-1/notes.json"
        );
        assert_eq!(
            store.note_url(&user, &NoteId::remote("-Nabc")),
            "https://notes-app.firebaseio.com/users/uid-1/notes/-Nabc.json"
        );
    }

    #[test]
    fn debug_redacts_token() {
        let debug = format!("{:?}", store());
        assert!(!debug.contains("\"token\""));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn decode_collection_handles_null_and_malformed_entries() {
        assert!(decode_collection(None).is_empty());

        let payload: HashMap<String, Value> = serde_json::from_str(
            r#"{
                "-Na": {"title": "Groceries", "content": "milk", "createdAt": 1, "updatedAt": 2, "needsSync": false},
                "-Nb": {"content": "no title"}
            }"#,
        )
        .unwrap();
        let notes = decode_collection(Some(payload));

        assert_eq!(
            notes,
            vec![Note {
                id: NoteId::remote("-Na"),
                title: "Groceries".into(),
                content: "milk".into(),
                created_at: 1,
                updated_at: 2,
                sync_status: SyncStatus::Clean,
            }]
        );
    }

    #[test]
    fn accepted_create_survives_failed_reread() {
        let sent = Note::new_local("Groceries", "milk").unwrap();
        let id = NoteId::remote("-Nserver1");

        let stored = accepted_note(
            id.clone(),
            &sent,
            Err(Error::RemoteUnavailable("connection reset".into())),
        );
        assert_eq!(stored.id, id);
        assert_eq!(stored.title, "Groceries");
        assert_eq!(stored.updated_at, sent.updated_at);
        assert_eq!(stored.sync_status, SyncStatus::Clean);

        assert_eq!(accepted_note(id.clone(), &sent, Ok(None)).id, id);
    }

    #[test]
    fn accepted_note_prefers_server_copy() {
        let sent = Note::new_local("Groceries", "milk").unwrap();
        let server = Note {
            id: NoteId::remote("-Nserver1"),
            created_at: 7,
            updated_at: 9,
            sync_status: SyncStatus::Clean,
            ..sent.clone()
        };

        let stored = accepted_note(server.id.clone(), &sent, Ok(Some(server.clone())));
        assert_eq!(stored, server);
    }

    #[test]
    fn event_parser_handles_split_chunks() {
        let mut parser = EventStreamParser::default();
        assert!(parser.push(b"event: put\ndata: {\"path\":\"/\",").is_empty());

        let events = parser.push(b"\"data\":null}\n\nevent: keep-alive\ndata: null\n\n");
        assert_eq!(
            events,
            vec![
                ServerEvent {
                    event: "put".into(),
                    data: r#"{"path":"/","data":null}"#.into(),
                },
                ServerEvent {
                    event: "keep-alive".into(),
                    data: "null".into(),
                },
            ]
        );
    }

    #[test]
    fn event_parser_accepts_crlf_separators() {
        let mut parser = EventStreamParser::default();
        let events = parser.push(b"event: cancel\r\ndata: permission denied\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "cancel");
        assert_eq!(events[0].data, "permission denied");
    }

    #[test]
    fn classifies_http_statuses() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            Error::AuthRequired
        ));
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, "").is_remote_unavailable());

        let error = classify_status(StatusCode::BAD_REQUEST, r#"{"error": "Invalid data"}"#);
        assert_eq!(error.to_string(), "Remote store error: Invalid data (400)");
    }

    #[test]
    fn parse_api_error_falls_back_to_status() {
        assert_eq!(parse_api_error(StatusCode::NOT_FOUND, "  "), "HTTP 404");
        assert_eq!(
            parse_api_error(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            "boom (500)"
        );
    }
}
