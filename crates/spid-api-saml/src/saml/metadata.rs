//! SP metadata generation and validation

use super::response_parser::attr;
use super::signing::{self, SigningCredentials};
use super::toolkit::ToolkitError;
use crate::config::SpConfig;
use quick_xml::events::Event;
use quick_xml::Reader;

const BINDING_REDIRECT: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";
const BINDING_POST: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";
const PROTOCOL_NS: &str = "urn:oasis:names:tc:SAML:2.0:protocol";

/// ID of the signed `EntityDescriptor`, derived from the entity ID so the
/// document is stable across requests.
fn descriptor_id(entity_id: &str) -> String {
    let digest = openssl::sha::sha1(entity_id.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("_{hex}")
}

/// Build the signed SP `EntityDescriptor`
pub fn build_sp_metadata(
    sp: &SpConfig,
    credentials: &SigningCredentials,
) -> Result<String, ToolkitError> {
    let id = descriptor_id(&sp.entity_id);
    let certificate = credentials.certificate_base64_der()?;

    let mut xml = String::new();
    xml.push_str("<md:EntityDescriptor xmlns:md=\"urn:oasis:names:tc:SAML:2.0:metadata\" xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\" entityID=\"");
    xml.push_str(&xml_escape(&sp.entity_id));
    xml.push_str("\" ID=\"");
    xml.push_str(&id);
    xml.push_str("\">");

    xml.push_str("<md:SPSSODescriptor protocolSupportEnumeration=\"");
    xml.push_str(PROTOCOL_NS);
    xml.push_str("\" AuthnRequestsSigned=\"true\" WantAssertionsSigned=\"true\">");

    xml.push_str("<md:KeyDescriptor use=\"signing\"><ds:KeyInfo><ds:X509Data><ds:X509Certificate>");
    xml.push_str(&certificate);
    xml.push_str("</ds:X509Certificate></ds:X509Data></ds:KeyInfo></md:KeyDescriptor>");

    xml.push_str("<md:SingleLogoutService Binding=\"");
    xml.push_str(BINDING_REDIRECT);
    xml.push_str("\" Location=\"");
    xml.push_str(&xml_escape(&sp.slo_url()));
    xml.push_str("\"/><md:SingleLogoutService Binding=\"");
    xml.push_str(BINDING_POST);
    xml.push_str("\" Location=\"");
    xml.push_str(&xml_escape(&sp.slo_url()));
    xml.push_str("\"/>");

    xml.push_str("<md:NameIDFormat>");
    xml.push_str(&xml_escape(&sp.name_id_format));
    xml.push_str("</md:NameIDFormat>");

    xml.push_str("<md:AssertionConsumerService index=\"0\" isDefault=\"true\" Binding=\"");
    xml.push_str(BINDING_POST);
    xml.push_str("\" Location=\"");
    xml.push_str(&xml_escape(&sp.acs_url()));
    xml.push_str("\"/>");

    if !sp.requested_attributes.is_empty() {
        xml.push_str("<md:AttributeConsumingService index=\"");
        xml.push_str(&sp.attribute_consuming_service_index.to_string());
        xml.push_str("\"><md:ServiceName xml:lang=\"it\">");
        xml.push_str(&xml_escape(&sp.organization.display_name));
        xml.push_str("</md:ServiceName>");
        for name in &sp.requested_attributes {
            xml.push_str("<md:RequestedAttribute Name=\"");
            xml.push_str(&xml_escape(name));
            xml.push_str("\"/>");
        }
        xml.push_str("</md:AttributeConsumingService>");
    }
    xml.push_str("</md:SPSSODescriptor>");

    xml.push_str("<md:Organization><md:OrganizationName xml:lang=\"it\">");
    xml.push_str(&xml_escape(&sp.organization.name));
    xml.push_str("</md:OrganizationName><md:OrganizationDisplayName xml:lang=\"it\">");
    xml.push_str(&xml_escape(&sp.organization.display_name));
    xml.push_str("</md:OrganizationDisplayName><md:OrganizationURL xml:lang=\"it\">");
    xml.push_str(&xml_escape(&sp.organization.url));
    xml.push_str("</md:OrganizationURL></md:Organization>");
    xml.push_str("</md:EntityDescriptor>");

    signing::sign_enveloped(&xml, &id, credentials)
}

/// Check generated metadata against the configuration it came from.
///
/// Returns the list of problems found; empty means valid.
pub fn validate_sp_metadata(
    sp: &SpConfig,
    credentials: &SigningCredentials,
    xml: &str,
) -> Vec<String> {
    let mut errors = Vec::new();

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut root_seen = false;
    let mut entity_id = None;
    let mut descriptor_id = None;
    let mut sp_descriptor = false;
    let mut authn_requests_signed = false;
    let mut signing_key = false;
    let mut acs_locations = Vec::new();
    let mut slo_locations = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let local = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match local.as_str() {
                    "EntityDescriptor" if !root_seen => {
                        root_seen = true;
                        entity_id = attr(e, "entityID");
                        descriptor_id = attr(e, "ID");
                    }
                    "SPSSODescriptor" => {
                        sp_descriptor = attr(e, "protocolSupportEnumeration")
                            .is_some_and(|p| p.split_whitespace().any(|v| v == PROTOCOL_NS));
                        authn_requests_signed =
                            attr(e, "AuthnRequestsSigned").as_deref() == Some("true");
                    }
                    "KeyDescriptor" => {
                        signing_key |= attr(e, "use").as_deref() != Some("encryption");
                    }
                    "AssertionConsumerService" => {
                        if let Some(location) = attr(e, "Location") {
                            acs_locations.push(location);
                        }
                    }
                    "SingleLogoutService" => {
                        if let Some(location) = attr(e, "Location") {
                            slo_locations.push(location);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                errors.push(format!("XML parse error: {e}"));
                return errors;
            }
            _ => {}
        }
    }

    if !root_seen {
        errors.push("Missing EntityDescriptor".to_string());
        return errors;
    }
    if entity_id.as_deref() != Some(sp.entity_id.as_str()) {
        errors.push(format!(
            "entityID {:?} does not match configured {}",
            entity_id, sp.entity_id
        ));
    }
    if !sp_descriptor {
        errors.push("Missing SAML 2.0 SPSSODescriptor".to_string());
    }
    if !authn_requests_signed {
        errors.push("AuthnRequestsSigned must be true".to_string());
    }
    if !signing_key {
        errors.push("Missing signing KeyDescriptor".to_string());
    }
    if !acs_locations.iter().any(|l| *l == sp.acs_url()) {
        errors.push(format!("No AssertionConsumerService at {}", sp.acs_url()));
    }
    if slo_locations.is_empty() {
        errors.push("Missing SingleLogoutService".to_string());
    }

    match descriptor_id {
        Some(id) => {
            if let Err(e) = signing::verify_enveloped(xml, &id, credentials.certificate()) {
                errors.push(format!("Metadata signature invalid: {e}"));
            }
        }
        None => errors.push("EntityDescriptor has no ID to sign".to_string()),
    }

    errors
}

pub(crate) fn xml_escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&apos;"),
            _ => result.push(c),
        }
    }
    result
}
