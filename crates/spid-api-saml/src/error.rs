//! SPID service provider error types

use crate::session::{ReplayCacheError, SessionError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Result type for SPID operations
pub type SpidResult<T> = Result<T, SpidError>;

/// Errors surfaced by the authentication orchestrator
#[derive(Debug, Error)]
pub enum SpidError {
    /// Malformed caller input (missing or unknown IdP, bad form field)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Signature or protocol failure on an incoming SAML response
    #[error("Response validation failed: {0}")]
    ResponseValidationError(String),

    /// Replay detected for an assertion ID
    #[error("Response already processed: assertion {0}")]
    ResponseAlreadyProcessed(String),

    /// IdP reported the user as not authenticated
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Toolkit failure while building or completing a logout
    #[error("Logout error: {0}")]
    LogoutError(String),

    /// SP metadata generation or validation failed
    #[error("Metadata error: {0}")]
    MetadataError(String),

    /// Browser session store failure
    #[error("Session storage error: {0}")]
    SessionStorage(#[from] SessionError),

    /// Replay cache backend failure
    #[error("Replay cache error: {0}")]
    ReplayCache(#[from] ReplayCacheError),

    /// No authenticated session for the caller
    #[error("User not authenticated")]
    NotAuthenticated,

    /// State-changing request sent from another origin
    #[error("Cross-site request rejected")]
    CrossSiteRequest,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for SpidError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            SpidError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            SpidError::ResponseValidationError(_) => {
                (StatusCode::BAD_REQUEST, "response_validation_error")
            }
            SpidError::ResponseAlreadyProcessed(_) => {
                (StatusCode::CONFLICT, "response_already_processed")
            }
            SpidError::AuthenticationFailed(_) => {
                (StatusCode::UNAUTHORIZED, "authentication_failed")
            }
            SpidError::LogoutError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "logout_error"),
            SpidError::MetadataError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "metadata_error"),
            SpidError::SessionStorage(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "session_storage_error")
            }
            SpidError::ReplayCache(_) => (StatusCode::INTERNAL_SERVER_ERROR, "replay_cache_error"),
            SpidError::NotAuthenticated => (StatusCode::UNAUTHORIZED, "not_authenticated"),
            SpidError::CrossSiteRequest => (StatusCode::FORBIDDEN, "cross_site_request"),
            SpidError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let message = match &self {
            SpidError::ResponseValidationError(detail) => {
                tracing::warn!(detail = %detail, "SPID response validation failed");
                "The authentication response could not be validated".to_string()
            }
            SpidError::ResponseAlreadyProcessed(_) => {
                "The authentication response was already processed".to_string()
            }
            SpidError::AuthenticationFailed(reason) => {
                tracing::info!(reason = %reason, "SPID authentication failed");
                "Authentication failed".to_string()
            }
            SpidError::LogoutError(detail) => {
                tracing::error!(detail = %detail, "SPID logout error");
                "Logout could not be completed".to_string()
            }
            SpidError::MetadataError(detail) => {
                tracing::error!(detail = %detail, "SPID metadata generation failed");
                "Metadata generation failed".to_string()
            }
            SpidError::SessionStorage(e) => {
                tracing::error!("SPID session storage error: {}", e);
                "A session storage error occurred".to_string()
            }
            SpidError::ReplayCache(e) => {
                tracing::error!("SPID replay cache error: {}", e);
                "A replay cache error occurred".to_string()
            }
            SpidError::Internal(msg) => {
                tracing::error!("SPID internal error: {}", msg);
                "An internal error occurred".to_string()
            }
            // Safe user-facing messages
            SpidError::InvalidRequest(_)
            | SpidError::NotAuthenticated
            | SpidError::CrossSiteRequest => self.to_string(),
        };

        let body = ErrorResponse {
            error: error_code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}
