//! Runtime configuration for the remote store and the local cache.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::session::UserId;
use crate::util::{file_stem, is_http_url, trimmed_non_empty};

/// Environment variable holding the remote database base URL
pub const DATABASE_URL_ENV: &str = "OFFLINE_NOTES_DATABASE_URL";
/// Environment variable holding the remote auth token
pub const AUTH_TOKEN_ENV: &str = "OFFLINE_NOTES_AUTH_TOKEN";

/// Connection details for the remote note store.
///
/// The auth token is an ID token issued by the identity provider. It is
/// redacted from `Debug` output.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    pub database_url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RemoteConfig")
            .field("database_url", &self.database_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl RemoteConfig {
    /// Build a validated config from raw values
    pub fn new(database_url: impl Into<String>, auth_token: Option<String>) -> Result<Self> {
        Ok(Self {
            database_url: normalize_database_url(database_url.into())?,
            auth_token: trimmed_non_empty(auth_token),
        })
    }

    /// Read the config from `OFFLINE_NOTES_DATABASE_URL` / `OFFLINE_NOTES_AUTH_TOKEN`.
    ///
    /// Returns `Ok(None)` when no database URL is set (local-only mode).
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>> {
        let Some(database_url) = trimmed_non_empty(lookup(DATABASE_URL_ENV)) else {
            return Ok(None);
        };
        Self::new(database_url, lookup(AUTH_TOKEN_ENV)).map(Some)
    }

    /// Parse a JSON config document
    pub fn from_json(payload: &str) -> Result<Self> {
        let raw: Self = serde_json::from_str(payload)?;
        Self::new(raw.database_url, raw.auth_token)
    }
}

/// Where per-user cache files live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub dir: PathBuf,
}

impl CacheConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cache file for `user`. Each user gets an exclusive file.
    pub fn cache_path_for(&self, user: &UserId) -> PathBuf {
        self.dir.join(format!("{}.db", file_stem(user.as_str())))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn normalize_database_url(raw: String) -> Result<String> {
    let url = trimmed_non_empty(Some(raw))
        .ok_or_else(|| Error::InvalidInput("database URL must not be empty".into()))?;
    if !is_http_url(&url) {
        return Err(Error::InvalidInput(
            "database URL must include http:// or https://".into(),
        ));
    }
    Ok(url.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn new_normalizes_url_and_token() {
        let config = RemoteConfig::new(
            " https://notes-app.firebaseio.com/ ",
            Some("  ".to_string()),
        )
        .unwrap();
        assert_eq!(config.database_url, "https://notes-app.firebaseio.com");
        assert_eq!(config.auth_token, None);
    }

    #[test]
    fn new_rejects_non_http_url() {
        assert!(RemoteConfig::new("notes-app.firebaseio.com", None).is_err());
        assert!(RemoteConfig::new("   ", None).is_err());
    }

    #[test]
    fn from_lookup_missing_url_is_local_only() {
        let config = RemoteConfig::from_lookup(|_| None).unwrap();
        assert!(config.is_none());
    }

    #[test]
    fn from_lookup_reads_both_values() {
        let env = HashMap::from([
            (DATABASE_URL_ENV, "https://db.example.com"),
            (AUTH_TOKEN_ENV, "id-token"),
        ]);
        let config = RemoteConfig::from_lookup(|key| env.get(key).map(ToString::to_string))
            .unwrap()
            .unwrap();
        assert_eq!(config.database_url, "https://db.example.com");
        assert_eq!(config.auth_token.as_deref(), Some("id-token"));
    }

    #[test]
    fn from_json_rejects_unknown_fields() {
        let error = RemoteConfig::from_json(
            r#"{"database_url": "https://db.example.com", "unexpected": true}"#,
        )
        .unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn debug_redacts_token() {
        let config = RemoteConfig::new("https://db.example.com", Some("secret".into())).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn cache_path_is_per_user_and_filesystem_safe() {
        let config = CacheConfig::new("/tmp/offline-notes");
        let path = config.cache_path_for(&UserId::new("uid/../x").unwrap());
        assert_eq!(
            path,
            PathBuf::from("/tmp/offline-notes/uid_2f_2e_2e_2fx.db")
        );
    }

    #[test]
    fn cache_paths_never_collide_between_users() {
        let config = CacheConfig::new("/tmp/offline-notes");
        let dotted = config.cache_path_for(&UserId::new("a.b").unwrap());
        let underscored = config.cache_path_for(&UserId::new("a_b").unwrap());
        assert_ne!(dotted, underscored);
    }
}
