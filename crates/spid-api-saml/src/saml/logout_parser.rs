//! Parse incoming SAML `LogoutResponse` messages

use super::response_parser::{attr, decode_post_message};
use super::signing::reject_forbidden_markup;
use super::toolkit::{LogoutResponseMessage, ParsedLogoutResponse, ToolkitError};
use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::read::DeflateDecoder;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::io::Read;

/// Maximum encoded size for HTTP-Redirect payloads (128 KB)
const MAX_ENCODED_SIZE_REDIRECT: usize = 128 * 1024;

/// Maximum decompressed size for deflate decoding (64 KB)
const MAX_DECOMPRESSED_SIZE: u64 = 64 * 1024;

/// Decode a deflated, base64 HTTP-Redirect payload (already URL-decoded)
pub fn inflate_redirect_message(encoded: &str) -> Result<String, ToolkitError> {
    if encoded.len() > MAX_ENCODED_SIZE_REDIRECT {
        return Err(ToolkitError::Malformed(format!(
            "Encoded message exceeds maximum size ({} > {} bytes)",
            encoded.len(),
            MAX_ENCODED_SIZE_REDIRECT
        )));
    }
    let decoded = STANDARD
        .decode(encoded)
        .map_err(|e| ToolkitError::Malformed(format!("Base64 decode failed: {e}")))?;

    let decoder = DeflateDecoder::new(&decoded[..]);
    let mut xml = String::new();
    decoder
        .take(MAX_DECOMPRESSED_SIZE)
        .read_to_string(&mut xml)
        .map_err(|e| ToolkitError::Malformed(format!("Deflate decode failed: {e}")))?;

    if xml.len() as u64 >= MAX_DECOMPRESSED_SIZE {
        return Err(ToolkitError::Malformed(
            "Decompressed message exceeds maximum size limit (64 KB)".to_string(),
        ));
    }
    Ok(xml)
}

/// Pull a single (URL-decoded) parameter out of a raw query string
pub fn query_param(raw_query: &str, name: &str) -> Option<String> {
    raw_query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key != name {
            return None;
        }
        urlencoding::decode(&value.replace('+', " "))
            .ok()
            .map(|v| v.into_owned())
    })
}

/// Decode and parse a `LogoutResponse` in either binding
pub fn parse_logout_response(
    message: &LogoutResponseMessage,
) -> Result<ParsedLogoutResponse, ToolkitError> {
    let xml = match message {
        LogoutResponseMessage::Redirect { raw_query } => {
            let encoded = query_param(raw_query, "SAMLResponse").ok_or_else(|| {
                ToolkitError::Malformed("Missing SAMLResponse parameter".to_string())
            })?;
            // '+' in base64 was turned into a space by form decoding
            inflate_redirect_message(&encoded.replace(' ', "+"))?
        }
        LogoutResponseMessage::Post { saml_response } => decode_post_message(saml_response)?,
    };
    parse_logout_response_xml(&xml)
}

/// Parse `LogoutResponse` from raw XML
pub fn parse_logout_response_xml(xml: &str) -> Result<ParsedLogoutResponse, ToolkitError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut id = None;
    let mut in_response_to = None;
    let mut issuer = None;
    let mut status_code = None;
    let mut is_logout_response = false;
    let mut depth = 0usize;
    let mut current_element = String::new();

    let mut buf = Vec::new();
    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ToolkitError::Malformed(format!("XML parse error: {e}")))?;
        reject_forbidden_markup(&event)?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let local = String::from_utf8_lossy(e.local_name().into_inner()).to_string();
                if depth == 0 && local == "LogoutResponse" {
                    is_logout_response = true;
                    id = attr(e, "ID");
                    in_response_to = attr(e, "InResponseTo");
                } else if local == "StatusCode" && status_code.is_none() {
                    status_code = attr(e, "Value");
                }
                current_element = local;
                if matches!(event, Event::Start(_)) {
                    depth += 1;
                }
            }
            Event::Text(ref e) => {
                if current_element == "Issuer" && issuer.is_none() {
                    issuer = Some(e.unescape().unwrap_or_default().trim().to_string());
                }
            }
            Event::End(_) => {
                current_element.clear();
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !is_logout_response {
        return Err(ToolkitError::Malformed(
            "Root element is not a LogoutResponse".to_string(),
        ));
    }
    let id = id.ok_or_else(|| ToolkitError::Malformed("Missing LogoutResponse ID".to_string()))?;
    let issuer = issuer.ok_or_else(|| ToolkitError::Malformed("Missing Issuer".to_string()))?;
    let status_code =
        status_code.ok_or_else(|| ToolkitError::Malformed("Missing StatusCode".to_string()))?;

    if issuer.len() > 1024 {
        return Err(ToolkitError::Malformed(
            "Issuer too long (max 1024)".to_string(),
        ));
    }

    Ok(ParsedLogoutResponse {
        id,
        issuer,
        in_response_to,
        status_code,
        xml: xml.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write;

    const LOGOUT_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<samlp:LogoutResponse xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
    xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"
    ID="_lresp1" Version="2.0" IssueInstant="2026-02-21T10:00:00Z"
    Destination="https://sp.example.it/spid/slo" InResponseTo="_lr1">
    <saml:Issuer>https://idp-a</saml:Issuer>
    <samlp:Status>
        <samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/>
    </samlp:Status>
</samlp:LogoutResponse>"#;

    #[test]
    fn test_parse_logout_response() {
        let parsed = parse_logout_response_xml(LOGOUT_RESPONSE).unwrap();
        assert_eq!(parsed.id, "_lresp1");
        assert_eq!(parsed.issuer, "https://idp-a");
        assert_eq!(parsed.in_response_to.as_deref(), Some("_lr1"));
        assert!(parsed.is_success());
    }

    #[test]
    fn test_parse_logout_response_missing_status() {
        let xml = r#"<samlp:LogoutResponse xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
    xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_x">
    <saml:Issuer>https://idp-a</saml:Issuer>
</samlp:LogoutResponse>"#;
        assert!(parse_logout_response_xml(xml).is_err());
    }

    #[test]
    fn test_rejects_other_root() {
        let xml = r#"<samlp:LogoutRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_x"/>"#;
        assert!(parse_logout_response_xml(xml).is_err());
    }

    #[test]
    fn test_comment_in_issuer_rejected() {
        let xml = LOGOUT_RESPONSE.replace(
            "<saml:Issuer>https://idp-a</saml:Issuer>",
            "<saml:Issuer><!-- x -->https://idp-b</saml:Issuer>",
        );
        assert!(matches!(
            parse_logout_response_xml(&xml),
            Err(ToolkitError::Malformed(_))
        ));
    }

    #[test]
    fn test_redirect_binding_decoding() {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(LOGOUT_RESPONSE.as_bytes()).unwrap();
        let encoded = STANDARD.encode(encoder.finish().unwrap());
        let raw_query = format!(
            "SAMLResponse={}&RelayState=%2F",
            urlencoding::encode(&encoded)
        );

        let parsed =
            parse_logout_response(&LogoutResponseMessage::Redirect { raw_query }).unwrap();
        assert_eq!(parsed.issuer, "https://idp-a");
    }

    #[test]
    fn test_post_binding_decoding() {
        let message = LogoutResponseMessage::Post {
            saml_response: STANDARD.encode(LOGOUT_RESPONSE),
        };
        assert_eq!(parse_logout_response(&message).unwrap().id, "_lresp1");
    }

    #[test]
    fn test_query_param() {
        assert_eq!(
            query_param("a=1&RelayState=%2Fhome&b=2", "RelayState").as_deref(),
            Some("/home")
        );
        assert!(query_param("a=1", "RelayState").is_none());
    }
}
