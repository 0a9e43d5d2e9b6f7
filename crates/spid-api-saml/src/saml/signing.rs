//! XML-DSig and redirect-binding signatures
//!
//! Enveloped signatures use exclusive C14N over the referenced element and
//! RSA with SHA-256 when signing. Verification accepts SHA-1/256/384/512.

use super::toolkit::ToolkitError;
use base64::{engine::general_purpose::STANDARD, Engine};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::sign::{Signer, Verifier};
use openssl::x509::X509;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;
use xml_canonicalization::Canonicalizer;

pub const XMLDSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const ALG_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
const ALG_EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
const ALG_ENVELOPED: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const ALG_DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

/// SP key pair used to sign outgoing messages
#[derive(Clone)]
pub struct SigningCredentials {
    certificate: X509,
    private_key: PKey<Private>,
}

impl std::fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("certificate", &self.certificate.subject_name())
            .finish_non_exhaustive()
    }
}

impl SigningCredentials {
    /// Load a certificate and its private key from PEM
    pub fn from_pem(certificate_pem: &str, private_key_pem: &str) -> Result<Self, ToolkitError> {
        let certificate = parse_certificate(certificate_pem)?;
        let private_key = PKey::private_key_from_pem(private_key_pem.as_bytes())
            .map_err(|e| ToolkitError::PrivateKey(e.to_string()))?;

        let public_key = certificate
            .public_key()
            .map_err(|e| ToolkitError::Certificate(e.to_string()))?;
        if !public_key.public_eq(&private_key) {
            return Err(ToolkitError::PrivateKey(
                "private key does not match certificate".to_string(),
            ));
        }

        Ok(Self {
            certificate,
            private_key,
        })
    }

    /// RSA-SHA256 signature over `data`
    pub fn sign_sha256(&self, data: &[u8]) -> Result<Vec<u8>, ToolkitError> {
        let mut signer = Signer::new(MessageDigest::sha256(), &self.private_key)
            .map_err(|e| ToolkitError::Signature(format!("Signer creation failed: {e}")))?;
        signer
            .update(data)
            .map_err(|e| ToolkitError::Signature(format!("Signer update failed: {e}")))?;
        signer
            .sign_to_vec()
            .map_err(|e| ToolkitError::Signature(format!("Signing failed: {e}")))
    }

    /// Certificate as bare base64 DER, as embedded in `X509Certificate`
    pub fn certificate_base64_der(&self) -> Result<String, ToolkitError> {
        let der = self
            .certificate
            .to_der()
            .map_err(|e| ToolkitError::Certificate(e.to_string()))?;
        Ok(STANDARD.encode(der))
    }

    #[must_use]
    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }
}

/// Parse an X.509 certificate given as PEM or bare base64 DER
pub fn parse_certificate(pem: &str) -> Result<X509, ToolkitError> {
    let pem_data = if pem.contains("-----BEGIN CERTIFICATE-----") {
        pem.to_string()
    } else {
        let body: String = pem.split_whitespace().collect();
        format!("-----BEGIN CERTIFICATE-----\n{body}\n-----END CERTIFICATE-----")
    };

    X509::from_pem(pem_data.as_bytes())
        .map_err(|e| ToolkitError::Certificate(format!("Invalid certificate: {e}")))
}

/// Apply Exclusive XML Canonicalization (without comments)
pub fn canonicalize_xml(xml: &str) -> Result<String, ToolkitError> {
    let mut output = Vec::new();
    Canonicalizer::read_from_str(xml)
        .write_to_writer(&mut output)
        .canonicalize(false)
        .map_err(|e| ToolkitError::Canonicalization(e.to_string()))?;

    String::from_utf8(output).map_err(|e| ToolkitError::Canonicalization(e.to_string()))
}

/// Digest for an XML-DSig / redirect-binding algorithm URI
fn digest_for(algorithm: &str) -> Option<MessageDigest> {
    match algorithm {
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"
        | "http://www.w3.org/2001/04/xmlenc#sha256" => Some(MessageDigest::sha256()),
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384"
        | "http://www.w3.org/2001/04/xmldsig-more#sha384" => Some(MessageDigest::sha384()),
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512"
        | "http://www.w3.org/2001/04/xmlenc#sha512" => Some(MessageDigest::sha512()),
        "http://www.w3.org/2000/09/xmldsig#rsa-sha1" | "http://www.w3.org/2000/09/xmldsig#sha1" => {
            Some(MessageDigest::sha1())
        }
        _ => None,
    }
}

/// Comments, processing instructions and DTDs are never accepted in a
/// signed SAML message.
pub(crate) fn reject_forbidden_markup(event: &Event<'_>) -> Result<(), ToolkitError> {
    let kind = match event {
        Event::Comment(_) => "comments",
        Event::PI(_) => "processing instructions",
        Event::DocType(_) => "a DTD",
        _ => return Ok(()),
    };
    Err(ToolkitError::Malformed(format!("SAML message must not contain {kind}")))
}

/// An element found by its `ID` attribute in the parsed document.
///
/// Offsets come from the reader, so they always point at real markup.
struct ElementSpan {
    start: usize,
    end: usize,
    /// End of the qualified name in the start tag
    name_end: usize,
    start_tag_end: usize,
    name: String,
    /// Declarations in scope from ancestors and not redeclared on the element
    inherited_namespaces: Vec<(String, String)>,
    /// Direct `ds:Signature` child
    signature: Option<(usize, usize)>,
}

impl ElementSpan {
    /// The element cut out of its document, ready for canonicalization:
    /// inherited namespace declarations are carried onto its start tag and
    /// its enveloped signature is removed.
    fn detached(&self, xml: &str) -> String {
        let mut out = String::with_capacity(self.end - self.start + 256);
        out.push_str(&xml[self.start..self.name_end]);
        for (name, value) in &self.inherited_namespaces {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(value);
            out.push('"');
        }
        match self.signature {
            Some((sig_start, sig_end)) => {
                out.push_str(&xml[self.name_end..sig_start]);
                out.push_str(&xml[sig_end..self.end]);
            }
            None => out.push_str(&xml[self.name_end..self.end]),
        }
        out
    }
}

type Declarations = Vec<(String, String)>;

fn namespace_declarations(e: &BytesStart<'_>) -> Declarations {
    e.attributes()
        .flatten()
        .filter_map(|attr| {
            let key = std::str::from_utf8(attr.key.as_ref()).ok()?;
            (key == "xmlns" || key.starts_with("xmlns:")).then(|| {
                let value = String::from_utf8_lossy(&attr.value).replace('"', "&quot;");
                (key.to_string(), value)
            })
        })
        .collect()
}

fn inherited_namespaces(scopes: &[Declarations], own: &Declarations) -> Declarations {
    let mut in_scope: BTreeMap<&str, &str> = BTreeMap::new();
    for (name, value) in scopes.iter().flatten() {
        in_scope.insert(name, value);
    }
    in_scope
        .into_iter()
        .filter(|(name, _)| !own.iter().any(|(own_name, _)| own_name == name))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

/// Namespace URI bound to the prefix of `qualified`
fn resolve_namespace<'a>(
    scopes: &'a [Declarations],
    own: &'a Declarations,
    qualified: &str,
) -> Option<&'a str> {
    let key = match qualified.split_once(':') {
        Some((prefix, _)) => format!("xmlns:{prefix}"),
        None => "xmlns".to_string(),
    };
    own.iter()
        .chain(scopes.iter().rev().flatten())
        .find(|(name, _)| *name == key)
        .map(|(_, value)| value.as_str())
}

fn has_id(e: &BytesStart<'_>, element_id: &str) -> bool {
    e.attributes().flatten().any(|attr| {
        attr.key.as_ref() == b"ID" && attr.unescape_value().is_ok_and(|v| v == element_id)
    })
}

fn reader_offset(reader: &Reader<&[u8]>) -> usize {
    reader.buffer_position() as usize
}

/// Find the element whose `ID` attribute is `element_id`, together with its
/// enveloped signature and the namespaces it inherits.
///
/// The whole document is read, so a second element with the same ID is
/// reported instead of silently ignored.
fn locate_element(xml: &str, element_id: &str) -> Result<ElementSpan, ToolkitError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut scopes: Vec<Declarations> = Vec::new();
    let mut found: Option<ElementSpan> = None;
    // Depth of the referenced element while it is open
    let mut open_depth: Option<usize> = None;
    let mut signature_start: Option<usize> = None;

    loop {
        let offset = reader_offset(&reader);
        let event = reader
            .read_event()
            .map_err(|e| ToolkitError::Malformed(format!("XML parse error: {e}")))?;
        reject_forbidden_markup(&event)?;

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                let depth = scopes.len();
                let own = namespace_declarations(e);
                let qualified = String::from_utf8_lossy(e.name().as_ref()).to_string();

                if has_id(e, element_id) {
                    if found.is_some() {
                        return Err(ToolkitError::Signature(format!(
                            "Duplicate element ID: {element_id}"
                        )));
                    }
                    if is_empty {
                        return Err(ToolkitError::Signature(format!(
                            "Referenced element {element_id} is empty"
                        )));
                    }
                    found = Some(ElementSpan {
                        start: offset,
                        end: 0,
                        name_end: offset + 1 + qualified.len(),
                        start_tag_end: reader_offset(&reader),
                        inherited_namespaces: inherited_namespaces(&scopes, &own),
                        signature: None,
                        name: qualified,
                    });
                    open_depth = Some(depth);
                } else if open_depth.map(|d| d + 1) == Some(depth)
                    && e.local_name().as_ref() == b"Signature"
                    && resolve_namespace(&scopes, &own, &qualified) == Some(XMLDSIG_NS)
                {
                    let already_signed = signature_start.is_some()
                        || found.as_ref().is_some_and(|span| span.signature.is_some());
                    if already_signed || is_empty {
                        return Err(ToolkitError::Signature(format!(
                            "Element {element_id} must carry exactly one signature"
                        )));
                    }
                    signature_start = Some(offset);
                }

                if !is_empty {
                    scopes.push(own);
                }
            }
            Event::End(_) => {
                scopes.pop();
                let depth = scopes.len();
                let position = reader_offset(&reader);
                if open_depth == Some(depth) {
                    if let Some(span) = found.as_mut() {
                        span.end = position;
                    }
                    open_depth = None;
                } else if open_depth.map(|d| d + 1) == Some(depth) {
                    if let (Some(sig_start), Some(span)) = (signature_start.take(), found.as_mut()) {
                        span.signature = Some((sig_start, position));
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    found.filter(|span| span.end > 0).ok_or_else(|| {
        ToolkitError::Signature(format!("Referenced element not found: {element_id}"))
    })
}

/// Insert an enveloped signature into the element whose `ID` is `element_id`.
///
/// The signature goes right after the element's `saml:Issuer` child when it
/// has one, otherwise as its first child.
pub fn sign_enveloped(
    xml: &str,
    element_id: &str,
    credentials: &SigningCredentials,
) -> Result<String, ToolkitError> {
    let span = locate_element(xml, element_id)?;
    if span.signature.is_some() {
        return Err(ToolkitError::Signature(format!(
            "Element {element_id} is already signed"
        )));
    }

    let canonicalized = canonicalize_xml(&span.detached(xml))?;
    let digest = openssl::hash::hash(MessageDigest::sha256(), canonicalized.as_bytes())
        .map_err(|e| ToolkitError::Signature(format!("Digest failed: {e}")))?;
    let digest_b64 = STANDARD.encode(digest);

    let mut signed_info = String::new();
    signed_info.push_str("<ds:SignedInfo xmlns:ds=\"");
    signed_info.push_str(XMLDSIG_NS);
    signed_info.push_str("\"><ds:CanonicalizationMethod Algorithm=\"");
    signed_info.push_str(ALG_EXC_C14N);
    signed_info.push_str("\"/><ds:SignatureMethod Algorithm=\"");
    signed_info.push_str(ALG_RSA_SHA256);
    signed_info.push_str("\"/><ds:Reference URI=\"#");
    signed_info.push_str(element_id);
    signed_info.push_str("\"><ds:Transforms><ds:Transform Algorithm=\"");
    signed_info.push_str(ALG_ENVELOPED);
    signed_info.push_str("\"/><ds:Transform Algorithm=\"");
    signed_info.push_str(ALG_EXC_C14N);
    signed_info.push_str("\"/></ds:Transforms><ds:DigestMethod Algorithm=\"");
    signed_info.push_str(ALG_DIGEST_SHA256);
    signed_info.push_str("\"/><ds:DigestValue>");
    signed_info.push_str(&digest_b64);
    signed_info.push_str("</ds:DigestValue></ds:Reference></ds:SignedInfo>");

    let canonicalized_signed_info = canonicalize_xml(&signed_info)?;
    let signature = credentials.sign_sha256(canonicalized_signed_info.as_bytes())?;

    let mut sig_xml = String::new();
    sig_xml.push_str("<ds:Signature xmlns:ds=\"");
    sig_xml.push_str(XMLDSIG_NS);
    sig_xml.push_str("\">");
    sig_xml.push_str(&signed_info);
    sig_xml.push_str("<ds:SignatureValue>");
    sig_xml.push_str(&STANDARD.encode(signature));
    sig_xml.push_str("</ds:SignatureValue><ds:KeyInfo><ds:X509Data><ds:X509Certificate>");
    sig_xml.push_str(&credentials.certificate_base64_der()?);
    sig_xml.push_str("</ds:X509Certificate></ds:X509Data></ds:KeyInfo></ds:Signature>");

    let body = &xml[span.start_tag_end..span.end];
    let insert_at = if body.trim_start().starts_with("<saml:Issuer") {
        body.find("</saml:Issuer>")
            .map(|p| span.start_tag_end + p + "</saml:Issuer>".len())
            .unwrap_or(span.start_tag_end)
    } else {
        span.start_tag_end
    };

    let mut result = String::with_capacity(xml.len() + sig_xml.len());
    result.push_str(&xml[..insert_at]);
    result.push_str(&sig_xml);
    result.push_str(&xml[insert_at..]);
    Ok(result)
}

/// Whether the element with `element_id` carries an enveloped signature
#[must_use]
pub fn has_enveloped_signature(xml: &str, element_id: &str) -> bool {
    locate_element(xml, element_id)
        .ok()
        .and_then(|span| span.signature)
        .and_then(|(sig_start, sig_end)| extract_signature_info(&xml[sig_start..sig_end]).ok())
        .is_some_and(|info| info.reference_uri.trim_start_matches('#') == element_id)
}

/// Verify the enveloped signature of the element whose `ID` is `element_id`.
///
/// The signature must be a direct child of that element and reference it
/// by ID. The digest covers the element as it sits in the document,
/// including the namespace declarations it inherits.
pub fn verify_enveloped(xml: &str, element_id: &str, certificate: &X509) -> Result<(), ToolkitError> {
    let span = locate_element(xml, element_id)?;
    let (sig_start, sig_end) = span.signature.ok_or_else(|| {
        ToolkitError::Signature(format!("{} {element_id} is not signed", span.name))
    })?;
    let sig_info = extract_signature_info(&xml[sig_start..sig_end])?;

    if sig_info.reference_uri.trim_start_matches('#') != element_id {
        return Err(ToolkitError::Signature(format!(
            "Signature references {} instead of {} in {}",
            sig_info.reference_uri, element_id, span.name
        )));
    }

    // Reference digest over the element without its signature
    let digest_alg = digest_for(&sig_info.digest_method).ok_or_else(|| {
        ToolkitError::Signature(format!(
            "Unsupported digest algorithm: {}",
            sig_info.digest_method
        ))
    })?;
    let canonicalized = canonicalize_xml(&span.detached(xml))?;
    let digest = openssl::hash::hash(digest_alg, canonicalized.as_bytes())
        .map_err(|e| ToolkitError::Signature(format!("Hash failed: {e}")))?;
    let expected_digest: String = sig_info.digest_value.split_whitespace().collect();
    if STANDARD.encode(digest) != expected_digest {
        return Err(ToolkitError::Signature("Digest mismatch".to_string()));
    }

    // Signature over canonical SignedInfo
    let signature_alg = digest_for(&sig_info.signature_method).ok_or_else(|| {
        ToolkitError::Signature(format!(
            "Unsupported signature algorithm: {}",
            sig_info.signature_method
        ))
    })?;
    let canonicalized_signed_info = canonicalize_xml(&sig_info.signed_info)?;
    let signature_value: String = sig_info.signature_value.split_whitespace().collect();
    let signature_bytes = STANDARD
        .decode(signature_value)
        .map_err(|e| ToolkitError::Signature(format!("Invalid signature encoding: {e}")))?;

    verify_bytes(
        certificate,
        signature_alg,
        canonicalized_signed_info.as_bytes(),
        &signature_bytes,
    )
}

fn verify_bytes(
    certificate: &X509,
    digest: MessageDigest,
    data: &[u8],
    signature: &[u8],
) -> Result<(), ToolkitError> {
    let public_key = certificate
        .public_key()
        .map_err(|e| ToolkitError::Certificate(e.to_string()))?;
    let mut verifier = Verifier::new(digest, &public_key)
        .map_err(|e| ToolkitError::Signature(format!("Verifier creation failed: {e}")))?;
    verifier
        .update(data)
        .map_err(|e| ToolkitError::Signature(format!("Signature update failed: {e}")))?;
    let valid = verifier
        .verify(signature)
        .map_err(|e| ToolkitError::Signature(format!("Signature verification failed: {e}")))?;

    if valid {
        Ok(())
    } else {
        Err(ToolkitError::Signature(
            "Signature verification failed: invalid signature".to_string(),
        ))
    }
}

/// Build a signed HTTP-Redirect query string.
///
/// `param` is `SAMLRequest` or `SAMLResponse`; `message` is the deflated
/// and base64-encoded payload.
pub fn sign_redirect_query(
    param: &str,
    message: &str,
    relay_state: Option<&str>,
    credentials: &SigningCredentials,
) -> Result<String, ToolkitError> {
    let mut query = format!("{param}={}", urlencoding::encode(message));
    if let Some(rs) = relay_state.filter(|rs| !rs.is_empty()) {
        query.push_str("&RelayState=");
        query.push_str(&urlencoding::encode(rs));
    }
    query.push_str("&SigAlg=");
    query.push_str(&urlencoding::encode(ALG_RSA_SHA256));

    let signature = credentials.sign_sha256(query.as_bytes())?;
    query.push_str("&Signature=");
    query.push_str(&urlencoding::encode(&STANDARD.encode(signature)));
    Ok(query)
}

/// Verify an HTTP-Redirect signature over the raw, still-encoded query.
///
/// The signed octets are `<param>=..[&RelayState=..]&SigAlg=..` exactly as
/// sent by the peer.
pub fn verify_redirect_query(
    raw_query: &str,
    param: &str,
    certificate: &X509,
) -> Result<(), ToolkitError> {
    let mut message = None;
    let mut relay_state = None;
    let mut sig_alg = None;
    let mut signature = None;
    for pair in raw_query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match key {
            k if k == param => message = Some(value),
            "RelayState" => relay_state = Some(value),
            "SigAlg" => sig_alg = Some(value),
            "Signature" => signature = Some(value),
            _ => {}
        }
    }

    let message =
        message.ok_or_else(|| ToolkitError::Malformed(format!("Missing {param} parameter")))?;
    let sig_alg = sig_alg.ok_or_else(|| ToolkitError::Signature("Missing SigAlg".to_string()))?;
    let signature =
        signature.ok_or_else(|| ToolkitError::Signature("Missing Signature".to_string()))?;

    let mut signed_data = format!("{param}={message}");
    if let Some(rs) = relay_state {
        signed_data.push_str("&RelayState=");
        signed_data.push_str(rs);
    }
    signed_data.push_str("&SigAlg=");
    signed_data.push_str(sig_alg);

    let decoded_alg = urlencoding::decode(sig_alg)
        .map_err(|e| ToolkitError::Signature(format!("Invalid SigAlg encoding: {e}")))?;
    let digest = digest_for(&decoded_alg).ok_or_else(|| {
        ToolkitError::Signature(format!("Unsupported signature algorithm: {decoded_alg}"))
    })?;
    let decoded_signature = urlencoding::decode(signature)
        .map_err(|e| ToolkitError::Signature(format!("Invalid Signature encoding: {e}")))?;
    let signature_bytes = STANDARD
        .decode(decoded_signature.as_bytes())
        .map_err(|e| ToolkitError::Signature(format!("Invalid signature encoding: {e}")))?;

    verify_bytes(certificate, digest, signed_data.as_bytes(), &signature_bytes)
}

/// Signature information extracted from XML
struct SignatureInfo {
    signed_info: String,
    signature_value: String,
    signature_method: String,
    digest_method: String,
    reference_uri: String,
    digest_value: String,
}

fn algorithm_attr(e: &BytesStart<'_>) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == b"Algorithm")
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.to_string()))
}

/// Rebuild the start tag, declaring the XML-DSig namespace on `SignedInfo`
/// when it was only inherited from an ancestor.
fn push_start_tag(out: &mut String, raw: &str, local_name: &str, is_root: bool) {
    out.push('<');
    out.push_str(raw);
    if is_root {
        let qualified = raw.split_whitespace().next().unwrap_or(local_name);
        let declaration = match qualified.split_once(':') {
            Some((prefix, _)) => format!("xmlns:{prefix}="),
            None => "xmlns=".to_string(),
        };
        if !raw.contains(&declaration) {
            out.push(' ');
            out.push_str(&declaration);
            out.push('"');
            out.push_str(XMLDSIG_NS);
            out.push('"');
        }
    }
}

/// Extract the first signature in `xml` using quick-xml
fn extract_signature_info(xml: &str) -> Result<SignatureInfo, ToolkitError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut depth_in_signed_info = 0usize;
    let mut in_signature_value = false;
    let mut in_digest_value = false;
    let mut done = false;
    let mut signed_info = String::new();
    let mut signature_value = String::new();
    let mut signature_method = String::new();
    let mut digest_method = String::new();
    let mut digest_value = String::new();
    let mut reference_uri = String::new();

    while !done {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let local_name = e.local_name();
                let name = std::str::from_utf8(local_name.as_ref()).unwrap_or("");
                let raw = std::str::from_utf8(&e).unwrap_or("");

                if name == "SignedInfo" && depth_in_signed_info == 0 && signed_info.is_empty() {
                    depth_in_signed_info = 1;
                    push_start_tag(&mut signed_info, raw, name, true);
                    signed_info.push('>');
                    continue;
                }
                if depth_in_signed_info > 0 {
                    depth_in_signed_info += 1;
                    push_start_tag(&mut signed_info, raw, name, false);
                    signed_info.push('>');
                }
                match name {
                    "SignatureValue" => in_signature_value = true,
                    "DigestValue" if depth_in_signed_info > 0 => in_digest_value = true,
                    "Reference" if depth_in_signed_info > 0 => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"URI" {
                                reference_uri =
                                    attr.unescape_value().unwrap_or_default().to_string();
                            }
                        }
                    }
                    "SignatureMethod" => {
                        signature_method = algorithm_attr(&e).unwrap_or_default();
                    }
                    "DigestMethod" => digest_method = algorithm_attr(&e).unwrap_or_default(),
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                if depth_in_signed_info > 0 {
                    let local_name = e.local_name();
                    let name = std::str::from_utf8(local_name.as_ref()).unwrap_or("");
                    let raw = std::str::from_utf8(&e).unwrap_or("");
                    push_start_tag(&mut signed_info, raw, name, false);
                    signed_info.push_str("/>");
                    match name {
                        "SignatureMethod" => {
                            signature_method = algorithm_attr(&e).unwrap_or_default();
                        }
                        "DigestMethod" => digest_method = algorithm_attr(&e).unwrap_or_default(),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                let qualified = e.name();
                let qualified = std::str::from_utf8(qualified.as_ref()).unwrap_or("");
                let local_name = e.local_name();
                let name = std::str::from_utf8(local_name.as_ref()).unwrap_or("");

                if depth_in_signed_info > 0 {
                    signed_info.push_str("</");
                    signed_info.push_str(qualified);
                    signed_info.push('>');
                    depth_in_signed_info -= 1;
                }
                match name {
                    "SignatureValue" => in_signature_value = false,
                    "DigestValue" => in_digest_value = false,
                    "Signature" => done = true,
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                let raw = std::str::from_utf8(&e).unwrap_or("");
                if depth_in_signed_info > 0 {
                    signed_info.push_str(raw);
                }
                if in_signature_value {
                    signature_value.push_str(raw);
                } else if in_digest_value {
                    digest_value.push_str(raw);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ToolkitError::Malformed(format!("XML parse error: {e}")));
            }
            _ => {}
        }
    }

    if signed_info.is_empty() {
        return Err(ToolkitError::Signature(
            "No SignedInfo element found".to_string(),
        ));
    }
    if signature_value.trim().is_empty() {
        return Err(ToolkitError::Signature(
            "No SignatureValue element found".to_string(),
        ));
    }

    Ok(SignatureInfo {
        signed_info,
        signature_value,
        signature_method,
        digest_method,
        reference_uri,
        digest_value,
    })
}
