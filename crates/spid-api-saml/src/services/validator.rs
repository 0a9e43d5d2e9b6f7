//! Protocol message validator
//!
//! A [`Validator`] binds the SAML toolkit to one SP configuration and one
//! IdP. It is cheap to build and is built fresh for every request, so no
//! validator state outlives the request that needed it.

use crate::config::SpConfig;
use crate::models::IdentityProviderDescriptor;
use crate::saml::{LoginRedirect, ProcessedResponse, SamlToolkit, ToolkitError};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

/// Why a response was rejected before any session change
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Issuer {actual:?} does not match expected IdP {expected}")]
    IssuerMismatch {
        expected: String,
        actual: Option<String>,
    },

    #[error("Validation error: {0}")]
    GenericValidationError(String),
}

impl From<ToolkitError> for ValidationFailure {
    fn from(err: ToolkitError) -> Self {
        match err {
            ToolkitError::Malformed(detail) => Self::MalformedMessage(detail),
            other => Self::GenericValidationError(other.to_string()),
        }
    }
}

/// Assertion that passed every protocol and cryptographic check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedAssertion {
    pub assertion_id: String,
    /// `NotOnOrAfter` of the assertion conditions (UTC)
    pub not_on_or_after: DateTime<Utc>,
    pub attributes: BTreeMap<String, Vec<String>>,
    pub session_index: Option<String>,
    pub name_id: String,
    /// Raw assertion issuer
    pub issuer: String,
    /// Authoritative result of the signature check
    pub signature_valid: bool,
}

/// Outcome of a response that is well-formed, signed and pinned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Authenticated(ValidatedAssertion),
    /// IdP answered with a non-success status
    NotAuthenticated {
        reason: String,
        assertion_id: Option<String>,
    },
}

/// Toolkit bound to one SP and one IdP
pub struct Validator<'a> {
    idp: &'a IdentityProviderDescriptor,
    sp: &'a SpConfig,
    toolkit: &'a dyn SamlToolkit,
}

/// Bind `toolkit` to `idp` for the current request
#[must_use]
pub fn build_validator<'a>(
    idp: &'a IdentityProviderDescriptor,
    sp: &'a SpConfig,
    toolkit: &'a dyn SamlToolkit,
) -> Validator<'a> {
    Validator { idp, sp, toolkit }
}

impl Validator<'_> {
    #[must_use]
    pub fn idp(&self) -> &IdentityProviderDescriptor {
        self.idp
    }

    /// Signed `AuthnRequest` redirect to the bound IdP
    pub fn build_login_redirect(
        &self,
        relay_state: Option<&str>,
    ) -> Result<LoginRedirect, ValidationFailure> {
        Ok(self.toolkit.login_redirect(self.sp, self.idp, relay_state)?)
    }

    /// Signed `LogoutRequest` redirect to the bound IdP
    pub fn build_logout_redirect(
        &self,
        name_id: &str,
        session_index: Option<&str>,
        return_to: Option<&str>,
    ) -> Result<String, ValidationFailure> {
        Ok(self
            .toolkit
            .logout_redirect(self.sp, self.idp, name_id, session_index, return_to)?)
    }

    /// Validate a base64 `SAMLResponse`.
    ///
    /// Checks run in order: readability, signature, issuer pinning, protocol
    /// errors. Only then is the IdP status looked at.
    pub fn validate_response(
        &self,
        raw_response: &str,
        expected_request_id: Option<&str>,
    ) -> Result<ValidationOutcome, ValidationFailure> {
        let processed =
            self.toolkit
                .process_response(self.sp, self.idp, raw_response, expected_request_id)?;

        if !processed.signature_valid {
            return Err(ValidationFailure::SignatureInvalid);
        }

        self.check_issuer(&processed)?;

        if !processed.errors.is_empty() {
            return Err(ValidationFailure::GenericValidationError(
                processed.errors.join("; "),
            ));
        }

        if !processed.is_authenticated() {
            return Ok(ValidationOutcome::NotAuthenticated {
                reason: processed
                    .last_error_reason()
                    .unwrap_or_else(|| "not authenticated".to_string()),
                assertion_id: processed.assertion.map(|a| a.id),
            });
        }

        match processed.assertion {
            Some(assertion) => Ok(ValidationOutcome::Authenticated(ValidatedAssertion {
                assertion_id: assertion.id,
                not_on_or_after: assertion.not_on_or_after,
                attributes: assertion.attributes,
                session_index: assertion.session_index,
                name_id: assertion.name_id,
                issuer: assertion.issuer,
                signature_valid: processed.signature_valid,
            })),
            None => Err(ValidationFailure::GenericValidationError(
                "response carries no assertion".to_string(),
            )),
        }
    }

    /// Both the response and the assertion issuer must name the bound IdP
    fn check_issuer(&self, processed: &ProcessedResponse) -> Result<(), ValidationFailure> {
        let expected = self.idp.entity_id.as_str();
        let issuers = [
            processed.issuer.as_deref(),
            processed.assertion.as_ref().map(|a| a.issuer.as_str()),
        ];

        let mismatch = issuers.iter().flatten().find(|issuer| **issuer != expected);
        let missing = processed.effective_issuer().is_none();

        if mismatch.is_some() || missing {
            let actual = mismatch.map(|s| (*s).to_string());
            tracing::warn!(
                target: "security",
                idp_id = %self.idp.id,
                expected = %expected,
                issuer = ?actual,
                "SAML response issuer does not match the selected IdP"
            );
            return Err(ValidationFailure::IssuerMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
        Ok(())
    }
}
