//! [`SamlToolkit`] backed by openssl, quick-xml and exclusive C14N

use super::logout_parser;
use super::metadata::{build_sp_metadata, validate_sp_metadata, xml_escape};
use super::response_parser::{decode_post_message, parse_response_xml, RawAssertion};
use super::signing::{self, parse_certificate, SigningCredentials};
use super::toolkit::{
    LoginRedirect, LogoutResponseMessage, ParsedAssertion, ParsedLogoutResponse,
    ProcessedResponse, SamlToolkit, ToolkitError, STATUS_SUCCESS,
};
use crate::config::{SpConfig, SpidLevel};
use crate::models::IdentityProviderDescriptor;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use openssl::x509::X509;
use std::io::Write;
use uuid::Uuid;

const NAMEID_FORMAT_ENTITY: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:entity";
const BINDING_POST: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";
const CM_BEARER: &str = "urn:oasis:names:tc:SAML:2.0:cm:bearer";

/// Production toolkit signing with the SP key pair
#[derive(Debug, Clone)]
pub struct OpensslToolkit {
    credentials: SigningCredentials,
}

impl OpensslToolkit {
    /// Load the SP key pair from configuration
    pub fn new(sp: &SpConfig) -> Result<Self, ToolkitError> {
        let credentials = SigningCredentials::from_pem(&sp.certificate_pem, &sp.private_key_pem)?;
        Ok(Self { credentials })
    }

    fn redirect_url(
        &self,
        location: &str,
        param: &str,
        xml: &str,
        relay_state: Option<&str>,
    ) -> Result<String, ToolkitError> {
        let encoded = deflate_and_encode(xml)?;
        let query = signing::sign_redirect_query(param, &encoded, relay_state, &self.credentials)?;
        let separator = if location.contains('?') { '&' } else { '?' };
        Ok(format!("{location}{separator}{query}"))
    }
}

fn deflate_and_encode(xml: &str) -> Result<String, ToolkitError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(xml.as_bytes())
        .map_err(|e| ToolkitError::Encoding(format!("Deflate failed: {e}")))?;
    let compressed = encoder
        .finish()
        .map_err(|e| ToolkitError::Encoding(format!("Deflate failed: {e}")))?;
    Ok(STANDARD.encode(compressed))
}

fn new_message_id() -> String {
    format!("_{}", Uuid::new_v4().simple())
}

fn format_instant(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn issuer_element(sp: &SpConfig) -> String {
    let entity_id = xml_escape(&sp.entity_id);
    format!(
        "<saml:Issuer NameQualifier=\"{entity_id}\" Format=\"{NAMEID_FORMAT_ENTITY}\">{entity_id}</saml:Issuer>"
    )
}

/// Verify signatures on the response and its assertion.
///
/// The assertion must be signed. A response-level signature, when
/// present, must verify as well. Without an assertion the response itself
/// must be signed.
fn check_signatures(
    xml: &str,
    response_id: &str,
    assertion: Option<&RawAssertion>,
    certificate: &X509,
) -> Result<(), ToolkitError> {
    let response_signed = signing::has_enveloped_signature(xml, response_id);
    if response_signed {
        signing::verify_enveloped(xml, response_id, certificate)?;
    }
    match assertion {
        Some(a) => signing::verify_enveloped(xml, &a.id, certificate),
        None if response_signed => Ok(()),
        None => Err(ToolkitError::Signature("Response is not signed".to_string())),
    }
}

/// Protocol checks on the single assertion of a successful response
fn check_assertion(
    sp: &SpConfig,
    assertion: &RawAssertion,
    expected_request_id: Option<&str>,
    now: DateTime<Utc>,
    skew: Duration,
    errors: &mut Vec<String>,
) {
    if assertion.id.is_empty() {
        errors.push("Assertion has no ID".to_string());
    }
    if assertion.version.as_deref() != Some("2.0") {
        errors.push("Unsupported assertion version".to_string());
    }
    if assertion.issuer.as_deref().map_or(true, str::is_empty) {
        errors.push("Assertion has no Issuer".to_string());
    }
    if assertion.name_id.as_deref().map_or(true, str::is_empty) {
        errors.push("Assertion has no NameID".to_string());
    }

    if let Some(not_before) = assertion.not_before {
        if now + skew < not_before {
            errors.push(format!("Assertion not valid before {not_before}"));
        }
    }
    match assertion.not_on_or_after {
        Some(not_on_or_after) if now - skew >= not_on_or_after => {
            errors.push(format!("Assertion expired at {not_on_or_after}"));
        }
        Some(_) => {}
        None => errors.push("Assertion has no NotOnOrAfter condition".to_string()),
    }

    if !assertion.audiences.iter().any(|a| *a == sp.entity_id) {
        errors.push(format!("Audience does not include {}", sp.entity_id));
    }

    let confirmation = &assertion.subject_confirmation;
    if confirmation.method.as_deref() != Some(CM_BEARER) {
        errors.push("SubjectConfirmation method is not bearer".to_string());
    }
    if confirmation.recipient.as_deref() != Some(sp.acs_url().as_str()) {
        errors.push(format!(
            "SubjectConfirmationData Recipient {:?} does not match {}",
            confirmation.recipient,
            sp.acs_url()
        ));
    }
    if let Some(not_on_or_after) = confirmation.not_on_or_after {
        if now - skew >= not_on_or_after {
            errors.push("SubjectConfirmationData expired".to_string());
        }
    }
    if let Some(expected) = expected_request_id {
        if confirmation.in_response_to.as_deref() != Some(expected) {
            errors.push("SubjectConfirmationData InResponseTo mismatch".to_string());
        }
    }

    // A stronger authentication than requested is accepted
    match assertion.authn_context_class_ref.as_deref() {
        None => errors.push("Assertion has no AuthnContextClassRef".to_string()),
        Some(class_ref) => match SpidLevel::from_class_ref(class_ref) {
            Some(level) if level >= sp.authn_level => {}
            Some(level) => errors.push(format!(
                "Authentication level {level:?} is below the requested {:?}",
                sp.authn_level
            )),
            None => errors.push(format!("Unknown AuthnContextClassRef {class_ref}")),
        },
    }
}

impl SamlToolkit for OpensslToolkit {
    fn login_redirect(
        &self,
        sp: &SpConfig,
        idp: &IdentityProviderDescriptor,
        relay_state: Option<&str>,
    ) -> Result<LoginRedirect, ToolkitError> {
        let request_id = new_message_id();
        let level = sp.authn_level;

        let mut xml = String::new();
        xml.push_str("<samlp:AuthnRequest xmlns:samlp=\"urn:oasis:names:tc:SAML:2.0:protocol\" xmlns:saml=\"urn:oasis:names:tc:SAML:2.0:assertion\" ID=\"");
        xml.push_str(&request_id);
        xml.push_str("\" Version=\"2.0\" IssueInstant=\"");
        xml.push_str(&format_instant(Utc::now()));
        xml.push_str("\" Destination=\"");
        xml.push_str(&xml_escape(&idp.sso_url));
        xml.push_str("\" AssertionConsumerServiceURL=\"");
        xml.push_str(&xml_escape(&sp.acs_url()));
        xml.push_str("\" ProtocolBinding=\"");
        xml.push_str(BINDING_POST);
        xml.push('"');
        if !sp.requested_attributes.is_empty() {
            xml.push_str(" AttributeConsumingServiceIndex=\"");
            xml.push_str(&sp.attribute_consuming_service_index.to_string());
            xml.push('"');
        }
        if level.force_authn() {
            xml.push_str(" ForceAuthn=\"true\"");
        }
        xml.push('>');
        xml.push_str(&issuer_element(sp));
        xml.push_str("<samlp:NameIDPolicy Format=\"");
        xml.push_str(&xml_escape(&sp.name_id_format));
        xml.push_str("\"/><samlp:RequestedAuthnContext Comparison=\"exact\"><saml:AuthnContextClassRef>");
        xml.push_str(level.class_ref());
        xml.push_str("</saml:AuthnContextClassRef></samlp:RequestedAuthnContext></samlp:AuthnRequest>");

        let url = self.redirect_url(&idp.sso_url, "SAMLRequest", &xml, relay_state)?;
        Ok(LoginRedirect { url, request_id })
    }

    fn process_response(
        &self,
        sp: &SpConfig,
        idp: &IdentityProviderDescriptor,
        saml_response: &str,
        expected_request_id: Option<&str>,
    ) -> Result<ProcessedResponse, ToolkitError> {
        let xml = decode_post_message(saml_response)?;
        let raw = parse_response_xml(&xml)?;
        let certificate = parse_certificate(&idp.certificate)?;

        let now = Utc::now();
        let skew = Duration::seconds(sp.clock_skew_seconds);
        let mut errors = Vec::new();

        if raw.version.as_deref() != Some("2.0") {
            errors.push("Unsupported response version".to_string());
        }
        if raw.destination.as_deref() != Some(sp.acs_url().as_str()) {
            errors.push(format!(
                "Destination {:?} does not match {}",
                raw.destination,
                sp.acs_url()
            ));
        }
        if let Some(expected) = expected_request_id {
            if raw.in_response_to.as_deref() != Some(expected) {
                errors.push(format!(
                    "InResponseTo {:?} does not match request {expected}",
                    raw.in_response_to
                ));
            }
        }
        if let Some(issue_instant) = raw.issue_instant {
            if issue_instant > now + skew {
                errors.push("Response IssueInstant is in the future".to_string());
            }
        }
        if raw.encrypted_assertions > 0 {
            errors.push("Encrypted assertions are not supported".to_string());
        }
        if raw.assertions.len() > 1 {
            errors.push("Response must contain exactly one assertion".to_string());
        }

        let assertion = raw.assertions.first();
        let signature_valid = match check_signatures(&xml, &raw.id, assertion, &certificate) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(response_id = %raw.id, error = %e, "SAML signature check failed");
                errors.push(e.to_string());
                false
            }
        };

        let success = raw.status_code.as_deref() == Some(STATUS_SUCCESS);
        if success {
            match assertion {
                Some(a) => check_assertion(sp, a, expected_request_id, now, skew, &mut errors),
                None => errors.push("Successful response carries no assertion".to_string()),
            }
        }

        let parsed_assertion = assertion.and_then(|a| {
            Some(ParsedAssertion {
                id: a.id.clone(),
                issuer: a.issuer.clone()?,
                not_on_or_after: a.not_on_or_after?,
                name_id: a.name_id.clone()?,
                name_id_format: a.name_id_format.clone(),
                session_index: a.session_index.clone(),
                authn_context_class_ref: a.authn_context_class_ref.clone(),
                attributes: a.attributes.clone(),
            })
        });

        Ok(ProcessedResponse {
            response_id: raw.id,
            in_response_to: raw.in_response_to,
            issuer: raw.issuer,
            status_code: raw.status_code,
            status_message: raw.status_message,
            errors,
            signature_valid,
            assertion: parsed_assertion,
        })
    }

    fn logout_redirect(
        &self,
        sp: &SpConfig,
        idp: &IdentityProviderDescriptor,
        name_id: &str,
        session_index: Option<&str>,
        relay_state: Option<&str>,
    ) -> Result<String, ToolkitError> {
        let request_id = new_message_id();

        let mut xml = String::new();
        xml.push_str("<samlp:LogoutRequest xmlns:samlp=\"urn:oasis:names:tc:SAML:2.0:protocol\" xmlns:saml=\"urn:oasis:names:tc:SAML:2.0:assertion\" ID=\"");
        xml.push_str(&request_id);
        xml.push_str("\" Version=\"2.0\" IssueInstant=\"");
        xml.push_str(&format_instant(Utc::now()));
        xml.push_str("\" Destination=\"");
        xml.push_str(&xml_escape(&idp.slo_url));
        xml.push_str("\">");
        xml.push_str(&issuer_element(sp));
        xml.push_str("<saml:NameID NameQualifier=\"");
        xml.push_str(&xml_escape(&idp.entity_id));
        xml.push_str("\" Format=\"");
        xml.push_str(&xml_escape(&sp.name_id_format));
        xml.push_str("\">");
        xml.push_str(&xml_escape(name_id));
        xml.push_str("</saml:NameID>");
        if let Some(index) = session_index {
            xml.push_str("<samlp:SessionIndex>");
            xml.push_str(&xml_escape(index));
            xml.push_str("</samlp:SessionIndex>");
        }
        xml.push_str("</samlp:LogoutRequest>");

        tracing::debug!(request_id = %request_id, idp = %idp.entity_id, "Built SAML LogoutRequest");
        self.redirect_url(&idp.slo_url, "SAMLRequest", &xml, relay_state)
    }

    fn parse_logout_response(
        &self,
        message: &LogoutResponseMessage,
    ) -> Result<ParsedLogoutResponse, ToolkitError> {
        logout_parser::parse_logout_response(message)
    }

    fn verify_logout_response(
        &self,
        message: &LogoutResponseMessage,
        parsed: &ParsedLogoutResponse,
        idp: &IdentityProviderDescriptor,
    ) -> Result<(), ToolkitError> {
        let certificate = parse_certificate(&idp.certificate)?;
        match message {
            LogoutResponseMessage::Redirect { raw_query }
                if logout_parser::query_param(raw_query, "Signature").is_some() =>
            {
                signing::verify_redirect_query(raw_query, "SAMLResponse", &certificate)
            }
            _ => signing::verify_enveloped(&parsed.xml, &parsed.id, &certificate),
        }
    }

    fn sp_metadata(&self, sp: &SpConfig) -> Result<String, ToolkitError> {
        build_sp_metadata(sp, &self.credentials)
    }

    fn validate_metadata(&self, sp: &SpConfig, xml: &str) -> Vec<String> {
        validate_sp_metadata(sp, &self.credentials, xml)
    }
}
