//! SAML toolkit boundary
//!
//! Everything that touches XML, canonicalization or key material sits
//! behind [`SamlToolkit`]. The rest of the crate only sees parsed values
//! and pass/fail flags.

use crate::config::SpConfig;
use crate::models::IdentityProviderDescriptor;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

/// SAML top-level status code for success
pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

/// Errors raised by the cryptographic/XML layer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolkitError {
    /// Message could not be decoded or parsed
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Private key error: {0}")]
    PrivateKey(String),

    /// Signing or verification failure
    #[error("Signature error: {0}")]
    Signature(String),

    #[error("Canonicalization failed: {0}")]
    Canonicalization(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Metadata error: {0}")]
    Metadata(String),
}

/// Outcome of building an `AuthnRequest`
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    /// Full IdP URL carrying the signed query string
    pub url: String,
    /// ID of the generated `AuthnRequest`
    pub request_id: String,
}

/// Assertion content extracted from a verified response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAssertion {
    pub id: String,
    pub issuer: String,
    pub not_on_or_after: DateTime<Utc>,
    pub name_id: String,
    pub name_id_format: Option<String>,
    pub session_index: Option<String>,
    pub authn_context_class_ref: Option<String>,
    pub attributes: BTreeMap<String, Vec<String>>,
}

/// Result of running a `Response` through the toolkit.
///
/// Protocol-level problems are collected in `errors` instead of aborting,
/// so the caller can decide how to report them.
#[derive(Debug, Clone, Default)]
pub struct ProcessedResponse {
    pub response_id: String,
    pub in_response_to: Option<String>,
    /// Response-level `Issuer`
    pub issuer: Option<String>,
    pub status_code: Option<String>,
    pub status_message: Option<String>,
    pub errors: Vec<String>,
    /// Cryptographic check over the assertion (or the response when no
    /// assertion is present) passed
    pub signature_valid: bool,
    pub assertion: Option<ParsedAssertion>,
}

impl ProcessedResponse {
    #[must_use]
    pub fn is_success_status(&self) -> bool {
        self.status_code.as_deref() == Some(STATUS_SUCCESS)
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.errors.is_empty() && self.is_success_status() && self.assertion.is_some()
    }

    /// Human-readable reason for a non-authenticated outcome
    #[must_use]
    pub fn last_error_reason(&self) -> Option<String> {
        if let Some(err) = self.errors.last() {
            return Some(err.clone());
        }
        if !self.is_success_status() {
            return Some(match (&self.status_code, &self.status_message) {
                (Some(code), Some(msg)) => format!("{code}: {msg}"),
                (Some(code), None) => code.clone(),
                (None, _) => "missing status code".to_string(),
            });
        }
        if self.assertion.is_none() {
            return Some("response carries no assertion".to_string());
        }
        None
    }

    /// Issuer to pin against: the assertion's when present
    #[must_use]
    pub fn effective_issuer(&self) -> Option<&str> {
        self.assertion
            .as_ref()
            .map(|a| a.issuer.as_str())
            .or(self.issuer.as_deref())
    }
}

/// `LogoutResponse` as received on the SLO endpoint
#[derive(Debug, Clone)]
pub enum LogoutResponseMessage {
    /// HTTP-Redirect binding; the raw (still URL-encoded) query string
    Redirect { raw_query: String },
    /// HTTP-POST binding; base64 `SAMLResponse` form field
    Post { saml_response: String },
}

/// Parsed `LogoutResponse`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLogoutResponse {
    pub id: String,
    pub issuer: String,
    pub in_response_to: Option<String>,
    pub status_code: String,
    pub xml: String,
}

impl ParsedLogoutResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status_code == STATUS_SUCCESS
    }
}

/// Signature/XML toolkit used by the validator and the orchestrator
pub trait SamlToolkit: Send + Sync {
    /// Build a signed HTTP-Redirect `AuthnRequest` for `idp`
    fn login_redirect(
        &self,
        sp: &SpConfig,
        idp: &IdentityProviderDescriptor,
        relay_state: Option<&str>,
    ) -> Result<LoginRedirect, ToolkitError>;

    /// Decode, parse and verify a base64 `SAMLResponse` against `idp`.
    ///
    /// `Err` is reserved for messages that cannot be read at all.
    fn process_response(
        &self,
        sp: &SpConfig,
        idp: &IdentityProviderDescriptor,
        saml_response: &str,
        expected_request_id: Option<&str>,
    ) -> Result<ProcessedResponse, ToolkitError>;

    /// Build a signed HTTP-Redirect `LogoutRequest`
    fn logout_redirect(
        &self,
        sp: &SpConfig,
        idp: &IdentityProviderDescriptor,
        name_id: &str,
        session_index: Option<&str>,
        relay_state: Option<&str>,
    ) -> Result<String, ToolkitError>;

    /// Decode and parse a `LogoutResponse` without verifying it
    fn parse_logout_response(
        &self,
        message: &LogoutResponseMessage,
    ) -> Result<ParsedLogoutResponse, ToolkitError>;

    /// Verify the signature of a parsed `LogoutResponse` against `idp`
    fn verify_logout_response(
        &self,
        message: &LogoutResponseMessage,
        parsed: &ParsedLogoutResponse,
        idp: &IdentityProviderDescriptor,
    ) -> Result<(), ToolkitError>;

    /// Signed SP metadata document
    fn sp_metadata(&self, sp: &SpConfig) -> Result<String, ToolkitError>;

    /// Structural and signature checks on SP metadata; empty means valid
    fn validate_metadata(&self, sp: &SpConfig, xml: &str) -> Vec<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assertion() -> ParsedAssertion {
        ParsedAssertion {
            id: "_a1".to_string(),
            issuer: "https://idp-a".to_string(),
            not_on_or_after: Utc::now(),
            name_id: "_nid".to_string(),
            name_id_format: None,
            session_index: Some("_s1".to_string()),
            authn_context_class_ref: None,
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn test_authenticated_requires_success_and_assertion() {
        let mut processed = ProcessedResponse {
            status_code: Some(STATUS_SUCCESS.to_string()),
            assertion: Some(assertion()),
            ..Default::default()
        };
        assert!(processed.is_authenticated());
        assert!(processed.last_error_reason().is_none());

        processed.errors.push("Audience mismatch".to_string());
        assert!(!processed.is_authenticated());
        assert_eq!(
            processed.last_error_reason().as_deref(),
            Some("Audience mismatch")
        );
    }

    #[test]
    fn test_failure_status_reason() {
        let processed = ProcessedResponse {
            status_code: Some("urn:oasis:names:tc:SAML:2.0:status:Responder".to_string()),
            status_message: Some("ErrorCode nr22".to_string()),
            ..Default::default()
        };
        assert!(!processed.is_authenticated());
        assert_eq!(
            processed.last_error_reason().as_deref(),
            Some("urn:oasis:names:tc:SAML:2.0:status:Responder: ErrorCode nr22")
        );
    }

    #[test]
    fn test_effective_issuer_prefers_assertion() {
        let processed = ProcessedResponse {
            issuer: Some("https://outer".to_string()),
            assertion: Some(assertion()),
            ..Default::default()
        };
        assert_eq!(processed.effective_issuer(), Some("https://idp-a"));
    }
}
