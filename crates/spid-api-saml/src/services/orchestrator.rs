//! Authentication orchestrator
//!
//! Composes the registry, the validator, the replay cache and the session
//! manager into the operations exposed over HTTP. Holds no per-request
//! state of its own.

use crate::config::SpConfig;
use crate::error::{SpidError, SpidResult};
use crate::models::{generate_provider_chooser, IdentityProviderDescriptor, SpidUser};
use crate::saml::{LogoutResponseMessage, SamlToolkit};
use crate::services::registry::IdpRegistry;
use crate::services::session_manager::SessionManager;
use crate::services::validator::{build_validator, ValidationOutcome};
use crate::session::{ConsumedAssertion, ReplayCache};
use std::sync::Arc;
use uuid::Uuid;

/// Path of the per-IdP login route, used by the provider chooser
pub const LOGIN_PATH: &str = "/spid/login";

/// What the transport layer must do with the session cookie
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCookie {
    Keep,
    Set(Uuid),
    Clear,
}

/// A redirect plus its effect on the session cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRedirect {
    pub location: String,
    pub cookie: SessionCookie,
}

impl FlowRedirect {
    fn keep(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            cookie: SessionCookie::Keep,
        }
    }
}

/// Result of showing the login entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginPage {
    /// Already authenticated
    Redirect(String),
    /// IdP chooser HTML
    Chooser(String),
}

/// Sanitize a `return_to` value to prevent open redirects.
/// Only allows relative paths starting with `/` (rejects `//`, `://`, `\`).
#[must_use]
pub fn sanitize_return_to(return_to: &str) -> Option<&str> {
    let trimmed = return_to.trim();
    if trimmed.is_empty() || !trimmed.starts_with('/') {
        return None;
    }
    if trimmed.starts_with("//") || trimmed.contains('\\') || trimmed.contains("://") {
        return None;
    }
    Some(trimmed)
}

/// SPID authentication operations
#[derive(Clone)]
pub struct AuthOrchestrator {
    config: Arc<SpConfig>,
    registry: Arc<IdpRegistry>,
    toolkit: Arc<dyn SamlToolkit>,
    replay_cache: Arc<dyn ReplayCache>,
    sessions: SessionManager,
}

impl AuthOrchestrator {
    #[must_use]
    pub fn new(
        config: Arc<SpConfig>,
        registry: Arc<IdpRegistry>,
        toolkit: Arc<dyn SamlToolkit>,
        replay_cache: Arc<dyn ReplayCache>,
        sessions: SessionManager,
    ) -> Self {
        Self {
            config,
            registry,
            toolkit,
            replay_cache,
            sessions,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SpConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &IdpRegistry {
        &self.registry
    }

    /// Where an authenticated browser goes: the sanitized `return_to`, or
    /// the configured post-login URL.
    fn intended_url(&self, return_to: Option<&str>) -> String {
        return_to
            .and_then(sanitize_return_to)
            .map_or_else(|| self.config.after_login_url.clone(), str::to_string)
    }

    /// Show the chooser, or redirect when already authenticated
    pub async fn login(
        &self,
        session_id: Option<Uuid>,
        return_to: Option<&str>,
    ) -> SpidResult<LoginPage> {
        if self.sessions.is_authenticated(session_id).await? {
            return Ok(LoginPage::Redirect(self.intended_url(return_to)));
        }

        let providers = self.list_providers();
        let return_to = return_to.and_then(sanitize_return_to);
        Ok(LoginPage::Chooser(generate_provider_chooser(
            &providers, LOGIN_PATH, return_to,
        )))
    }

    /// Record the IdP selection and redirect to it with a signed
    /// `AuthnRequest`.
    pub async fn do_login(
        &self,
        session_id: Option<Uuid>,
        idp_id: Option<&str>,
        return_to: Option<&str>,
    ) -> SpidResult<FlowRedirect> {
        let idp_id = idp_id.map(str::trim).unwrap_or_default();
        if idp_id.is_empty() {
            return Err(SpidError::InvalidRequest(
                "Missing identity provider".to_string(),
            ));
        }

        if self.sessions.is_authenticated(session_id).await? {
            return Ok(FlowRedirect::keep(self.intended_url(return_to)));
        }

        let idp = self.registry.resolve(idp_id).ok_or_else(|| {
            SpidError::InvalidRequest(format!("Unknown identity provider: {idp_id}"))
        })?;

        let redirect = build_validator(idp, &self.config, self.toolkit.as_ref())
            .build_login_redirect(None)
            .map_err(|e| SpidError::Internal(format!("AuthnRequest for {idp_id}: {e}")))?;

        let (sid, cookie) = match session_id {
            Some(id) => (id, SessionCookie::Keep),
            None => {
                let id = Uuid::new_v4();
                (id, SessionCookie::Set(id))
            }
        };
        let return_to = return_to.and_then(sanitize_return_to).map(str::to_string);
        self.sessions
            .begin_login(sid, &idp.id, redirect.request_id.clone(), return_to)
            .await?;

        tracing::info!(
            session_id = %sid,
            idp_id = %idp.id,
            request_id = %redirect.request_id,
            "Redirecting to SPID identity provider"
        );

        Ok(FlowRedirect {
            location: redirect.url,
            cookie,
        })
    }

    /// Assertion Consumer Service.
    ///
    /// A login completes only in answer to the pending `AuthnRequest` of the
    /// same browser session. A response reaching an authenticated session
    /// with no pending login is still checked for replay, then rejected.
    ///
    /// On failure the pending login is cleared and the replay cache is not
    /// written. An existing authenticated session is kept.
    pub async fn consume_response(
        &self,
        session_id: Option<Uuid>,
        raw_response: Option<&str>,
    ) -> SpidResult<FlowRedirect> {
        let result = self.consume_response_inner(session_id, raw_response).await;
        if result.is_err() {
            if let Err(e) = self.sessions.clear_pending(session_id).await {
                tracing::warn!(error = %e, "Failed to clear pending SPID login");
            }
        }
        result
    }

    async fn consume_response_inner(
        &self,
        session_id: Option<Uuid>,
        raw_response: Option<&str>,
    ) -> SpidResult<FlowRedirect> {
        let raw_response = raw_response.map(str::trim).unwrap_or_default();
        if raw_response.is_empty() {
            return Err(SpidError::InvalidRequest(
                "Missing SAMLResponse".to_string(),
            ));
        }

        let session = self.sessions.load(session_id).await?;
        // Only a pending login carrying the AuthnRequest ID can complete
        let pending = session.active_pending().filter(|p| p.request_id.is_some());
        let idp_id = pending
            .map(|p| p.selected_idp_id.as_str())
            .or(session.authenticated.as_ref().map(|a| a.idp_id.as_str()))
            .ok_or_else(|| {
                SpidError::ResponseValidationError("No SPID login in progress".to_string())
            })?;
        let idp = self.registry.resolve(idp_id).ok_or_else(|| {
            SpidError::ResponseValidationError(format!("Selected IdP {idp_id} is not registered"))
        })?;
        let expected_request_id = pending.and_then(|p| p.request_id.as_deref());

        // Signature, issuer pinning and protocol errors
        let outcome = build_validator(idp, &self.config, self.toolkit.as_ref())
            .validate_response(raw_response, expected_request_id)
            .map_err(|failure| SpidError::ResponseValidationError(failure.to_string()))?;

        let assertion = match outcome {
            ValidationOutcome::Authenticated(assertion) => {
                if !assertion.signature_valid {
                    return Err(SpidError::ResponseValidationError(
                        "assertion signature not verified".to_string(),
                    ));
                }
                self.reject_if_consumed(&assertion.assertion_id).await?;
                assertion
            }
            ValidationOutcome::NotAuthenticated {
                reason,
                assertion_id,
            } => {
                if let Some(id) = assertion_id.as_deref() {
                    self.reject_if_consumed(id).await?;
                }
                return Err(SpidError::AuthenticationFailed(reason));
            }
        };

        if expected_request_id.is_none() {
            tracing::warn!(
                target: "security",
                assertion_id = %assertion.assertion_id,
                idp_id = %idp.id,
                "Unsolicited SPID response rejected"
            );
            return Err(SpidError::ResponseValidationError(
                "Unsolicited response: no login in progress for this session".to_string(),
            ));
        }

        let consumed = ConsumedAssertion::new(&assertion.assertion_id, assertion.not_on_or_after);
        if !self.replay_cache.try_mark_consumed(consumed).await? {
            tracing::warn!(
                target: "security",
                assertion_id = %assertion.assertion_id,
                "Concurrent replay of SPID assertion rejected"
            );
            return Err(SpidError::ResponseAlreadyProcessed(assertion.assertion_id));
        }

        let idp_entity_name = self
            .registry
            .find_by_entity_id(&assertion.issuer)
            .map_or(idp.entity_name.as_str(), |i| i.entity_name.as_str());
        let return_to = pending.and_then(|p| p.return_to.clone());

        let new_session_id = self
            .sessions
            .complete_login(
                session_id,
                &assertion,
                idp,
                idp_entity_name,
                &self.config.requested_attributes,
            )
            .await?;

        Ok(FlowRedirect {
            location: self.intended_url(return_to.as_deref()),
            cookie: SessionCookie::Set(new_session_id),
        })
    }

    async fn reject_if_consumed(&self, assertion_id: &str) -> SpidResult<()> {
        if self.replay_cache.has_been_consumed(assertion_id).await? {
            tracing::warn!(
                target: "security",
                assertion_id = %assertion_id,
                "Replayed SPID assertion rejected"
            );
            return Err(SpidError::ResponseAlreadyProcessed(
                assertion_id.to_string(),
            ));
        }
        Ok(())
    }

    /// Tear down the local session and redirect to the IdP logout endpoint
    pub async fn begin_logout(&self, session_id: Option<Uuid>) -> SpidResult<FlowRedirect> {
        let Some(context) = self.sessions.complete_logout(session_id).await? else {
            return Ok(FlowRedirect {
                location: self.config.after_logout_url.clone(),
                cookie: SessionCookie::Clear,
            });
        };

        let idp = self.registry.resolve(&context.idp_id).ok_or_else(|| {
            SpidError::LogoutError(format!("IdP {} is no longer registered", context.idp_id))
        })?;

        let location = build_validator(idp, &self.config, self.toolkit.as_ref())
            .build_logout_redirect(&context.name_id, context.session_index.as_deref(), None)
            .map_err(|e| SpidError::LogoutError(e.to_string()))?;

        Ok(FlowRedirect {
            location,
            cookie: SessionCookie::Clear,
        })
    }

    /// Single logout endpoint: accept the IdP `LogoutResponse`
    pub fn complete_logout_response(&self, message: &LogoutResponseMessage) -> SpidResult<String> {
        let parsed = self
            .toolkit
            .parse_logout_response(message)
            .map_err(|e| SpidError::LogoutError(e.to_string()))?;

        let idp = self.registry.find_by_entity_id(&parsed.issuer).ok_or_else(|| {
            tracing::warn!(
                target: "security",
                issuer = %parsed.issuer,
                "LogoutResponse from an unregistered issuer"
            );
            SpidError::LogoutError(format!("Unknown LogoutResponse issuer {}", parsed.issuer))
        })?;

        self.toolkit
            .verify_logout_response(message, &parsed, idp)
            .map_err(|e| SpidError::LogoutError(e.to_string()))?;

        if !parsed.is_success() {
            return Err(SpidError::LogoutError(format!(
                "IdP {} reported logout status {}",
                idp.id, parsed.status_code
            )));
        }

        tracing::info!(
            idp_id = %idp.id,
            response_id = %parsed.id,
            "SPID single logout completed"
        );
        Ok(self.config.after_logout_url.clone())
    }

    pub async fn is_authenticated(&self, session_id: Option<Uuid>) -> SpidResult<bool> {
        self.sessions.is_authenticated(session_id).await
    }

    pub async fn current_user(&self, session_id: Option<Uuid>) -> SpidResult<Option<SpidUser>> {
        self.sessions.current_user(session_id).await
    }

    /// Signed SP metadata, validated before it is served
    pub fn metadata(&self) -> SpidResult<String> {
        let xml = self
            .toolkit
            .sp_metadata(&self.config)
            .map_err(|e| SpidError::MetadataError(e.to_string()))?;

        let errors = self.toolkit.validate_metadata(&self.config, &xml);
        if !errors.is_empty() {
            return Err(SpidError::MetadataError(errors.join("; ")));
        }
        Ok(xml)
    }

    #[must_use]
    pub fn list_providers(&self) -> Vec<&IdentityProviderDescriptor> {
        self.registry.list_all(self.config.expose_test_idp)
    }
}
