//! SP metadata handler

use crate::config::SpConfig;
use crate::events::EventPublisher;
use crate::saml::SamlToolkit;
use crate::services::{AuthOrchestrator, IdpRegistry, SessionManager};
use crate::session::{ReplayCache, SessionStore};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// Application state for SPID handlers
#[derive(Clone)]
pub struct SpidState {
    pub config: Arc<SpConfig>,
    pub orchestrator: Arc<AuthOrchestrator>,
    /// Login/logout notifications, for observers to subscribe to
    pub events: EventPublisher,
}

impl SpidState {
    #[must_use]
    pub fn new(
        config: SpConfig,
        registry: IdpRegistry,
        toolkit: Arc<dyn SamlToolkit>,
        session_store: Arc<dyn SessionStore>,
        replay_cache: Arc<dyn ReplayCache>,
        events: EventPublisher,
    ) -> Self {
        let config = Arc::new(config);
        let sessions = SessionManager::new(session_store, events.clone());
        let orchestrator = AuthOrchestrator::new(
            config.clone(),
            Arc::new(registry),
            toolkit,
            replay_cache,
            sessions,
        );
        Self {
            config,
            orchestrator: Arc::new(orchestrator),
            events,
        }
    }
}

/// Return signed SP metadata XML
#[utoipa::path(
    get,
    path = "/spid/metadata",
    responses(
        (status = 200, description = "SP metadata XML", content_type = "text/xml"),
        (status = 500, description = "Failed to generate metadata"),
    ),
    tag = "SPID"
)]
pub async fn get_metadata(State(state): State<SpidState>) -> Response {
    match state.orchestrator.metadata() {
        Ok(xml) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/xml; charset=utf-8")],
            xml,
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}
