//! Browser session state for the SPID login flow
//!
//! A [`BrowserSession`] holds at most one pending login attempt and at most
//! one authenticated session. Both are written as part of the whole record,
//! so a store never exposes half a transition.

use crate::models::SpidUser;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A pending login older than this is ignored (10 minutes)
pub const PENDING_LOGIN_TTL_SECONDS: i64 = 600;

/// Ephemeral state of one login attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthenticationRequestContext {
    /// Registry ID of the IdP the user picked
    pub selected_idp_id: String,
    /// ID of the `AuthnRequest` sent to that IdP
    pub request_id: Option<String>,
    /// Sanitized local path to land on after login
    pub return_to: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuthenticationRequestContext {
    #[must_use]
    pub fn new(selected_idp_id: String, request_id: String, return_to: Option<String>) -> Self {
        Self {
            selected_idp_id,
            request_id: Some(request_id),
            return_to,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.created_at + Duration::seconds(PENDING_LOGIN_TTL_SECONDS)
    }
}

/// Authenticated state, created at the end of a successful login
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthenticatedSession {
    /// IdP `SessionIndex`, needed for single logout
    pub session_index: Option<String>,
    pub name_id: String,
    pub idp_id: String,
    pub idp_entity_name: String,
    pub user: SpidUser,
    pub authenticated_at: DateTime<Utc>,
}

/// Everything the SP keeps for one browser
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrowserSession {
    pub pending: Option<AuthenticationRequestContext>,
    pub authenticated: Option<AuthenticatedSession>,
}

impl BrowserSession {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.is_some()
    }

    /// Pending login, unless it has gone stale
    #[must_use]
    pub fn active_pending(&self) -> Option<&AuthenticationRequestContext> {
        self.pending.as_ref().filter(|p| !p.is_expired())
    }

    /// Nothing left worth persisting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_none() && self.authenticated.is_none()
    }
}

/// Browser session store errors
#[derive(Debug, Error, Clone)]
pub enum SessionError {
    /// Storage backend failure
    #[error("Session storage error: {0}")]
    StorageError(String),

    /// Stored record could not be decoded
    #[error("Session record corrupted: {0}")]
    Corrupted(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_pending_not_expired() {
        let ctx = AuthenticationRequestContext::new("poste".into(), "_req".into(), None);
        assert!(!ctx.is_expired());

        let session = BrowserSession {
            pending: Some(ctx),
            authenticated: None,
        };
        assert!(session.active_pending().is_some());
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_stale_pending_ignored() {
        let mut ctx = AuthenticationRequestContext::new("poste".into(), "_req".into(), None);
        ctx.created_at = Utc::now() - Duration::seconds(PENDING_LOGIN_TTL_SECONDS + 1);

        let session = BrowserSession {
            pending: Some(ctx),
            authenticated: None,
        };
        assert!(session.active_pending().is_none());
        assert!(!session.is_empty());
    }

    #[test]
    fn test_default_session_is_empty() {
        assert!(BrowserSession::default().is_empty());
    }
}
