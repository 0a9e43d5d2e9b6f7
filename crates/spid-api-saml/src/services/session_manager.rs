//! SSO session state machine
//!
//! Unauthenticated -> PendingLogin -> Authenticated -> LoggedOut. Every
//! transition writes or removes the whole [`BrowserSession`] record, so a
//! reader never sees a half-applied state.

use crate::error::{SpidError, SpidResult};
use crate::events::{EventPublisher, SpidLogin, SpidLogout};
use crate::models::{IdentityProviderDescriptor, SpidUser};
use crate::services::validator::ValidatedAssertion;
use crate::session::{
    AuthenticatedSession, AuthenticationRequestContext, BrowserSession, SessionStore,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Fields captured from an authenticated session before it is destroyed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutContext {
    pub session_index: Option<String>,
    pub name_id: String,
    pub idp_id: String,
    pub idp_entity_name: String,
}

/// Owns session transitions and the notifications they emit
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    events: EventPublisher,
}

impl SessionManager {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, events: EventPublisher) -> Self {
        Self { store, events }
    }

    /// Current record for a browser, empty when there is none
    pub async fn load(&self, session_id: Option<Uuid>) -> SpidResult<BrowserSession> {
        match session_id {
            Some(id) => Ok(self.store.load(id).await?.unwrap_or_default()),
            None => Ok(BrowserSession::default()),
        }
    }

    pub async fn is_authenticated(&self, session_id: Option<Uuid>) -> SpidResult<bool> {
        Ok(self.load(session_id).await?.is_authenticated())
    }

    pub async fn current_user(&self, session_id: Option<Uuid>) -> SpidResult<Option<SpidUser>> {
        Ok(self.load(session_id).await?.authenticated.map(|a| a.user))
    }

    /// Enter PendingLogin for `idp_id`.
    ///
    /// Any earlier pending attempt is replaced.
    pub async fn begin_login(
        &self,
        session_id: Uuid,
        idp_id: &str,
        request_id: String,
        return_to: Option<String>,
    ) -> SpidResult<()> {
        if idp_id.trim().is_empty() {
            return Err(SpidError::InvalidRequest(
                "An identity provider must be selected".to_string(),
            ));
        }

        let mut session = self.load(Some(session_id)).await?;
        session.pending = Some(AuthenticationRequestContext::new(
            idp_id.to_string(),
            request_id,
            return_to,
        ));
        self.store.save(session_id, session).await?;

        tracing::debug!(session_id = %session_id, idp_id = %idp_id, "SPID login pending");
        Ok(())
    }

    /// Drop the pending login attempt, keeping any authenticated state
    pub async fn clear_pending(&self, session_id: Option<Uuid>) -> SpidResult<()> {
        let Some(id) = session_id else {
            return Ok(());
        };
        let mut session = self.load(Some(id)).await?;
        if session.pending.take().is_none() {
            return Ok(());
        }
        if session.is_empty() {
            self.store.destroy(id).await?;
        } else {
            self.store.save(id, session).await?;
        }
        Ok(())
    }

    /// Enter Authenticated.
    ///
    /// The record is stored under a fresh session ID and the old one is
    /// removed. Returns the new ID.
    pub async fn complete_login(
        &self,
        previous_session_id: Option<Uuid>,
        assertion: &ValidatedAssertion,
        idp: &IdentityProviderDescriptor,
        idp_entity_name: &str,
        requested_attributes: &[String],
    ) -> SpidResult<Uuid> {
        let user = SpidUser::from_attributes(&assertion.attributes, requested_attributes);
        let authenticated = AuthenticatedSession {
            session_index: assertion.session_index.clone(),
            name_id: assertion.name_id.clone(),
            idp_id: idp.id.clone(),
            idp_entity_name: idp_entity_name.to_string(),
            user: user.clone(),
            authenticated_at: Utc::now(),
        };

        let session_id = Uuid::new_v4();
        self.store
            .save(
                session_id,
                BrowserSession {
                    pending: None,
                    authenticated: Some(authenticated),
                },
            )
            .await?;

        if let Some(previous) = previous_session_id {
            if let Err(e) = self.store.destroy(previous).await {
                tracing::warn!(
                    session_id = %previous,
                    error = %e,
                    "Failed to remove pre-login session"
                );
            }
        }

        tracing::info!(
            session_id = %session_id,
            idp_id = %idp.id,
            assertion_id = %assertion.assertion_id,
            "SPID login completed"
        );

        self.events.publish(SpidLogin {
            session_id,
            idp_id: idp.id.clone(),
            idp_entity_name: idp_entity_name.to_string(),
            user,
        });

        Ok(session_id)
    }

    /// Enter LoggedOut and destroy the record.
    ///
    /// Returns `None` when the session was not authenticated.
    pub async fn complete_logout(
        &self,
        session_id: Option<Uuid>,
    ) -> SpidResult<Option<LogoutContext>> {
        let Some(id) = session_id else {
            return Ok(None);
        };
        let Some(authenticated) = self.load(Some(id)).await?.authenticated else {
            return Ok(None);
        };

        let context = LogoutContext {
            session_index: authenticated.session_index,
            name_id: authenticated.name_id,
            idp_id: authenticated.idp_id,
            idp_entity_name: authenticated.idp_entity_name,
        };
        self.store.destroy(id).await?;

        tracing::info!(session_id = %id, idp_id = %context.idp_id, "SPID session logged out");

        self.events.publish(SpidLogout {
            session_id: id,
            idp_id: context.idp_id.clone(),
            idp_entity_name: context.idp_entity_name.clone(),
            user: authenticated.user,
        });

        Ok(Some(context))
    }
}
