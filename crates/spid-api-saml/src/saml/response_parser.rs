//! SAML `Response` parsing

use super::signing::reject_forbidden_markup;
use super::toolkit::ToolkitError;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::{BTreeMap, HashSet};

/// Maximum encoded size for `SAMLResponse` in HTTP-POST binding (512 KB)
const MAX_ENCODED_SIZE_POST: usize = 512 * 1024;

/// Maximum length for ID attributes
const MAX_ID_LENGTH: usize = 256;

/// Subject confirmation data of a bearer assertion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectConfirmation {
    pub method: Option<String>,
    pub recipient: Option<String>,
    pub in_response_to: Option<String>,
    pub not_on_or_after: Option<DateTime<Utc>>,
}

/// Assertion as found in the document, before any checks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawAssertion {
    pub id: String,
    pub version: Option<String>,
    pub issuer: Option<String>,
    pub name_id: Option<String>,
    pub name_id_format: Option<String>,
    pub subject_confirmation: SubjectConfirmation,
    pub not_before: Option<DateTime<Utc>>,
    pub not_on_or_after: Option<DateTime<Utc>>,
    pub audiences: Vec<String>,
    pub session_index: Option<String>,
    pub authn_context_class_ref: Option<String>,
    pub attributes: BTreeMap<String, Vec<String>>,
}

/// Response as found in the document, before any checks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawResponse {
    pub id: String,
    pub version: Option<String>,
    pub destination: Option<String>,
    pub in_response_to: Option<String>,
    pub issue_instant: Option<DateTime<Utc>>,
    pub issuer: Option<String>,
    pub status_code: Option<String>,
    pub status_message: Option<String>,
    pub assertions: Vec<RawAssertion>,
    pub encrypted_assertions: usize,
}

/// Decode a base64 HTTP-POST `SAMLResponse`
pub fn decode_post_message(encoded: &str) -> Result<String, ToolkitError> {
    if encoded.len() > MAX_ENCODED_SIZE_POST {
        return Err(ToolkitError::Malformed(format!(
            "Encoded SAMLResponse exceeds maximum size ({} > {} bytes)",
            encoded.len(),
            MAX_ENCODED_SIZE_POST
        )));
    }
    let compact: String = encoded.split_whitespace().collect();
    let decoded = STANDARD
        .decode(compact)
        .map_err(|e| ToolkitError::Malformed(format!("Base64 decode failed: {e}")))?;
    String::from_utf8(decoded).map_err(|e| ToolkitError::Malformed(format!("Invalid UTF-8: {e}")))
}

pub(crate) fn parse_instant(value: &str) -> Result<DateTime<Utc>, ToolkitError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ToolkitError::Malformed(format!("Invalid timestamp '{value}': {e}")))
}

pub(crate) fn attr(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name.as_bytes() && a.key.prefix().is_none())
        .and_then(|a| a.unescape_value().ok().map(|v| v.to_string()))
}

fn local(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_string()
}

/// Parse a decoded `Response` document.
///
/// Rejects duplicated ID attributes, comments, processing instructions and
/// assertions outside the `Response` element, so that signature
/// verification by ID and field extraction always see the same element.
pub fn parse_response_xml(xml: &str) -> Result<RawResponse, ToolkitError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut response = RawResponse::default();
    let mut seen_response = false;
    let mut ids = HashSet::new();
    let mut stack: Vec<String> = Vec::new();
    let mut assertion: Option<RawAssertion> = None;
    let mut current_attribute: Option<String> = None;
    let mut text = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ToolkitError::Malformed(format!("XML parse error: {e}")))?;
        reject_forbidden_markup(&event)?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                let name = local(e);

                if let Some(id) = attr(e, "ID") {
                    if id.len() > MAX_ID_LENGTH {
                        return Err(ToolkitError::Malformed("ID too long (max 256)".to_string()));
                    }
                    if !ids.insert(id.clone()) {
                        return Err(ToolkitError::Malformed(format!("Duplicate ID attribute: {id}")));
                    }
                }

                match name.as_str() {
                    "Response" if stack.is_empty() => {
                        seen_response = true;
                        response.id = attr(e, "ID").unwrap_or_default();
                        response.version = attr(e, "Version");
                        response.destination = attr(e, "Destination");
                        response.in_response_to = attr(e, "InResponseTo");
                        response.issue_instant =
                            attr(e, "IssueInstant").map(|v| parse_instant(&v)).transpose()?;
                    }
                    "Assertion" => {
                        if assertion.is_some() {
                            return Err(ToolkitError::Malformed("Nested Assertion".to_string()));
                        }
                        if stack.len() != 1 {
                            return Err(ToolkitError::Malformed(
                                "Assertion must be a direct child of Response".to_string(),
                            ));
                        }
                        assertion = Some(RawAssertion {
                            id: attr(e, "ID").unwrap_or_default(),
                            version: attr(e, "Version"),
                            ..Default::default()
                        });
                    }
                    "EncryptedAssertion" => response.encrypted_assertions += 1,
                    "StatusCode" => {
                        // Only the top-level code decides success
                        if response.status_code.is_none() {
                            response.status_code = attr(e, "Value");
                        }
                    }
                    "NameID" => {
                        if let Some(a) = assertion.as_mut() {
                            a.name_id_format = attr(e, "Format");
                        }
                    }
                    "SubjectConfirmation" => {
                        if let Some(a) = assertion.as_mut() {
                            a.subject_confirmation.method = attr(e, "Method");
                        }
                    }
                    "SubjectConfirmationData" => {
                        if let Some(a) = assertion.as_mut() {
                            a.subject_confirmation.recipient = attr(e, "Recipient");
                            a.subject_confirmation.in_response_to = attr(e, "InResponseTo");
                            a.subject_confirmation.not_on_or_after = attr(e, "NotOnOrAfter")
                                .map(|v| parse_instant(&v))
                                .transpose()?;
                        }
                    }
                    "Conditions" => {
                        if let Some(a) = assertion.as_mut() {
                            a.not_before =
                                attr(e, "NotBefore").map(|v| parse_instant(&v)).transpose()?;
                            a.not_on_or_after = attr(e, "NotOnOrAfter")
                                .map(|v| parse_instant(&v))
                                .transpose()?;
                        }
                    }
                    "AuthnStatement" => {
                        if let Some(a) = assertion.as_mut() {
                            a.session_index = attr(e, "SessionIndex");
                        }
                    }
                    "Attribute" => {
                        current_attribute = attr(e, "Name");
                        if let (Some(a), Some(n)) = (assertion.as_mut(), current_attribute.as_ref())
                        {
                            a.attributes.entry(n.clone()).or_default();
                        }
                    }
                    _ => {}
                }

                if !is_empty {
                    stack.push(name);
                    text.clear();
                }
            }
            Event::Text(ref e) => {
                let value = e
                    .unescape()
                    .map_err(|e| ToolkitError::Malformed(format!("Invalid text: {e}")))?;
                text.push_str(&value);
            }
            Event::CData(ref e) => {
                text.push_str(&String::from_utf8_lossy(e));
            }
            Event::End(_) => {
                let name = stack.pop().unwrap_or_default();
                let parent = stack.last().map(String::as_str);
                let value = std::mem::take(&mut text).trim().to_string();

                match (name.as_str(), parent) {
                    ("Issuer", Some("Response")) => response.issuer = Some(value),
                    ("Issuer", Some("Assertion")) => {
                        if let Some(a) = assertion.as_mut() {
                            a.issuer = Some(value);
                        }
                    }
                    ("StatusMessage", _) => response.status_message = Some(value),
                    ("NameID", Some("Subject")) => {
                        if let Some(a) = assertion.as_mut() {
                            a.name_id = Some(value);
                        }
                    }
                    ("Audience", _) => {
                        if let Some(a) = assertion.as_mut() {
                            a.audiences.push(value);
                        }
                    }
                    ("AuthnContextClassRef", _) => {
                        if let Some(a) = assertion.as_mut() {
                            a.authn_context_class_ref = Some(value);
                        }
                    }
                    ("AttributeValue", Some("Attribute")) => {
                        if let (Some(a), Some(n)) = (assertion.as_mut(), current_attribute.as_ref())
                        {
                            a.attributes.entry(n.clone()).or_default().push(value);
                        }
                    }
                    ("Attribute", _) => current_attribute = None,
                    ("Assertion", _) => {
                        if let Some(a) = assertion.take() {
                            response.assertions.push(a);
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_response {
        return Err(ToolkitError::Malformed(
            "Root element is not a SAML Response".to_string(),
        ));
    }
    if response.id.is_empty() {
        return Err(ToolkitError::Malformed("Missing Response ID".to_string()));
    }

    Ok(response)
}
