//! Signed-in user and the per-session context passed to core operations.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::connectivity::ConnectivityMonitor;
use crate::error::{Error, Result};

/// Stable identifier of the signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("user id cannot be empty".into()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who is signed in, with a stream of sign-in/sign-out changes.
///
/// The authentication UI drives this; the core only reads it.
#[derive(Clone)]
pub struct Identity {
    user: Arc<watch::Sender<Option<UserId>>>,
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}

impl Identity {
    /// Nobody signed in
    pub fn new() -> Self {
        let (user, _) = watch::channel(None);
        Self {
            user: Arc::new(user),
        }
    }

    /// Start with `user` signed in
    pub fn signed_in(user: UserId) -> Self {
        let identity = Self::new();
        identity.sign_in(user);
        identity
    }

    pub fn sign_in(&self, user: UserId) {
        tracing::info!("User {} signed in", user);
        self.user.send_replace(Some(user));
    }

    pub fn sign_out(&self) {
        if let Some(previous) = self.user.send_replace(None) {
            tracing::info!("User {} signed out", previous);
        }
    }

    pub fn current_user(&self) -> Option<UserId> {
        self.user.borrow().clone()
    }

    /// Sign-in/sign-out stream
    pub fn subscribe(&self) -> watch::Receiver<Option<UserId>> {
        self.user.subscribe()
    }
}

/// Explicit context for one signed-in session.
///
/// Carries the user every remote call is scoped to and the connectivity
/// query, so the core never reads ambient globals.
#[derive(Clone, Debug)]
pub struct SessionContext {
    user: UserId,
    connectivity: ConnectivityMonitor,
}

impl SessionContext {
    pub const fn new(user: UserId, connectivity: ConnectivityMonitor) -> Self {
        Self { user, connectivity }
    }

    /// Context for whoever is signed in right now
    pub fn from_identity(identity: &Identity, connectivity: ConnectivityMonitor) -> Result<Self> {
        let user = identity.current_user().ok_or(Error::AuthRequired)?;
        Ok(Self::new(user, connectivity))
    }

    pub const fn user(&self) -> &UserId {
        &self.user
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub const fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_rejects_blank() {
        assert!(UserId::new("  ").is_err());
        assert_eq!(UserId::new(" uid-1 ").unwrap().as_str(), "uid-1");
    }

    #[test]
    fn session_requires_signed_in_user() {
        let identity = Identity::new();
        let error =
            SessionContext::from_identity(&identity, ConnectivityMonitor::new(true)).unwrap_err();
        assert!(matches!(error, Error::AuthRequired));

        identity.sign_in(UserId::new("uid-1").unwrap());
        let session =
            SessionContext::from_identity(&identity, ConnectivityMonitor::new(false)).unwrap();
        assert_eq!(session.user().as_str(), "uid-1");
        assert!(!session.is_online());
    }

    #[test]
    fn identity_stream_sees_sign_out() {
        let identity = Identity::signed_in(UserId::new("uid-1").unwrap());
        let mut events = identity.subscribe();
        assert!(events.borrow_and_update().is_some());

        identity.sign_out();
        assert!(events.has_changed().unwrap());
        assert!(events.borrow_and_update().is_none());
        assert_eq!(identity.current_user(), None);
    }
}
