//! Session handling for sync gating
//!
//! Farebox does not issue tokens; the host application signs users in and
//! injects the resulting session here. The sync engine only asks two
//! questions: is someone authenticated, and who are they.

use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::models::CurrentUser;

const EXPIRY_SKEW_SECONDS: i64 = 60;

/// Credential plus identity for the signed-in user
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    /// Bearer token for authoritative-store requests
    pub access_token: String,
    /// Unix seconds after which the token is no longer valid
    pub expires_at: i64,
    /// The user this session belongs to
    pub user: CurrentUser,
}

impl AuthSession {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= chrono::Utc::now().timestamp() + EXPIRY_SKEW_SECONDS
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthSession")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

/// Shared handle over the current session
#[derive(Clone, Default)]
pub struct Sessions {
    inner: Arc<RwLock<Option<AuthSession>>>,
}

impl Sessions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a session (sign-in or refresh)
    pub fn set(&self, session: AuthSession) {
        if let Ok(mut slot) = self.inner.write() {
            *slot = Some(session);
        }
    }

    /// Drop the session (sign-out)
    pub fn clear(&self) {
        if let Ok(mut slot) = self.inner.write() {
            *slot = None;
        }
    }

    /// Current non-expired session, if any
    pub fn current(&self) -> Option<AuthSession> {
        self.inner
            .read()
            .ok()
            .and_then(|slot| slot.clone())
            .filter(|session| !session.is_expired())
    }

    /// Whether a valid credential is present
    pub fn is_authenticated(&self) -> bool {
        self.current().is_some()
    }
}
