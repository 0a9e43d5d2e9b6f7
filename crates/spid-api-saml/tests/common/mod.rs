//! Shared fixtures for SPID integration tests: key material, IdP
//! descriptors and signed SAML messages.

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::x509::{X509NameBuilder, X509};
use spid_api_saml::saml::{sign_enveloped, SigningCredentials, STATUS_SUCCESS};
use spid_api_saml::services::{AuthOrchestrator, IdpRegistry};
use spid_api_saml::session::{InMemoryReplayCache, InMemorySessionStore, SessionStore};
use spid_api_saml::{
    EventEnvelope, EventPublisher, IdentityProviderDescriptor, OpensslToolkit, SpConfig,
    SpidLevel, SpidState,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

pub const SP_ENTITY_ID: &str = "https://sp.example.it";
pub const SP_BASE_URL: &str = "https://sp.example.it";
pub const ACS_URL: &str = "https://sp.example.it/spid/acs";
pub const IDP_A_ENTITY_ID: &str = "https://idp-a";
pub const IDP_B_ENTITY_ID: &str = "https://idp-b";
pub const AFTER_LOGIN_URL: &str = "/dashboard";
pub const AFTER_LOGOUT_URL: &str = "/goodbye";

const STATUS_RESPONDER: &str = "urn:oasis:names:tc:SAML:2.0:status:Responder";
const SAML_NS_DECLARATION: &str = r#" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion""#;

/// Self-signed certificate and PKCS#8 key, both PEM
pub fn generate_keypair(common_name: &str) -> (String, String) {
    let rsa = Rsa::generate(2048).unwrap();
    let key = PKey::from_rsa(rsa).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", common_name).unwrap();
    let name = name.build();

    let mut serial = BigNum::new().unwrap();
    serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(30).unwrap())
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();

    let cert_pem = String::from_utf8(builder.build().to_pem().unwrap()).unwrap();
    let key_pem = String::from_utf8(key.private_key_to_pem_pkcs8().unwrap()).unwrap();
    (cert_pem, key_pem)
}

/// An IdP under test control: its descriptor plus its signing key
pub struct TestIdp {
    pub descriptor: IdentityProviderDescriptor,
    pub credentials: SigningCredentials,
}

impl TestIdp {
    pub fn new(id: &str, entity_id: &str, entity_name: &str) -> Self {
        let (cert, key) = generate_keypair(id);
        Self::with_keys(id, entity_id, entity_name, &cert, &key)
    }

    pub fn with_keys(id: &str, entity_id: &str, entity_name: &str, cert: &str, key: &str) -> Self {
        Self {
            descriptor: IdentityProviderDescriptor {
                id: id.to_string(),
                entity_id: entity_id.to_string(),
                entity_name: entity_name.to_string(),
                sso_url: format!("{entity_id}/sso"),
                slo_url: format!("{entity_id}/slo"),
                certificate: cert.to_string(),
                logo: None,
            },
            credentials: SigningCredentials::from_pem(cert, key).unwrap(),
        }
    }
}

fn instant(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Builder for a signed `samlp:Response`
#[derive(Clone)]
pub struct ResponseBuilder {
    pub response_issuer: String,
    pub assertion_issuer: String,
    pub assertion_id: String,
    pub in_response_to: Option<String>,
    pub not_on_or_after: DateTime<Utc>,
    pub success: bool,
    pub session_index: String,
    pub name_id: String,
    pub attributes: Vec<(String, String)>,
    pub authn_context: String,
    /// Declare `xmlns:saml` once on the `Response` instead of on each element
    pub namespace_on_root: bool,
}

impl ResponseBuilder {
    pub fn new(issuer: &str, assertion_id: &str) -> Self {
        Self {
            response_issuer: issuer.to_string(),
            assertion_issuer: issuer.to_string(),
            assertion_id: assertion_id.to_string(),
            in_response_to: None,
            not_on_or_after: Utc::now() + Duration::minutes(5),
            success: true,
            session_index: "_session-index-1".to_string(),
            name_id: "_transient-name-id".to_string(),
            attributes: vec![
                ("name".to_string(), "Mario".to_string()),
                ("familyName".to_string(), "Rossi".to_string()),
                ("fiscalNumber".to_string(), "TINIT-RSSMRA80A01H501U".to_string()),
            ],
            authn_context: SpidLevel::L1.class_ref().to_string(),
            namespace_on_root: false,
        }
    }

    pub fn level(mut self, level: SpidLevel) -> Self {
        self.authn_context = level.class_ref().to_string();
        self
    }

    pub fn namespace_on_root(mut self) -> Self {
        self.namespace_on_root = true;
        self
    }

    fn saml_namespace(&self) -> &'static str {
        if self.namespace_on_root {
            ""
        } else {
            SAML_NS_DECLARATION
        }
    }

    pub fn in_response_to(mut self, request_id: impl Into<String>) -> Self {
        self.in_response_to = Some(request_id.into());
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }

    fn assertion_xml(&self, now: DateTime<Utc>) -> String {
        let in_response_to = self
            .in_response_to
            .as_deref()
            .map(|id| format!(r#" InResponseTo="{id}""#))
            .unwrap_or_default();
        let attributes: String = self
            .attributes
            .iter()
            .map(|(name, value)| {
                format!(
                    r#"<saml:Attribute Name="{name}"><saml:AttributeValue>{value}</saml:AttributeValue></saml:Attribute>"#
                )
            })
            .collect();

        format!(
            concat!(
                r#"<saml:Assertion{ns} ID="{id}" Version="2.0" IssueInstant="{now}">"#,
                r#"<saml:Issuer>{issuer}</saml:Issuer>"#,
                r#"<saml:Subject>"#,
                r#"<saml:NameID Format="urn:oasis:names:tc:SAML:2.0:nameid-format:transient" NameQualifier="{issuer}">{name_id}</saml:NameID>"#,
                r#"<saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer">"#,
                r#"<saml:SubjectConfirmationData Recipient="{acs}" NotOnOrAfter="{noa}"{irt}/>"#,
                r#"</saml:SubjectConfirmation>"#,
                r#"</saml:Subject>"#,
                r#"<saml:Conditions NotBefore="{nb}" NotOnOrAfter="{noa}">"#,
                r#"<saml:AudienceRestriction><saml:Audience>{audience}</saml:Audience></saml:AudienceRestriction>"#,
                r#"</saml:Conditions>"#,
                r#"<saml:AuthnStatement AuthnInstant="{now}" SessionIndex="{session_index}">"#,
                r#"<saml:AuthnContext><saml:AuthnContextClassRef>{class_ref}</saml:AuthnContextClassRef></saml:AuthnContext>"#,
                r#"</saml:AuthnStatement>"#,
                r#"<saml:AttributeStatement>{attributes}</saml:AttributeStatement>"#,
                r#"</saml:Assertion>"#,
            ),
            ns = self.saml_namespace(),
            id = self.assertion_id,
            now = instant(now),
            issuer = self.assertion_issuer,
            name_id = self.name_id,
            acs = ACS_URL,
            noa = instant(self.not_on_or_after),
            irt = in_response_to,
            nb = instant(now - Duration::seconds(30)),
            audience = SP_ENTITY_ID,
            session_index = self.session_index,
            class_ref = self.authn_context,
            attributes = attributes,
        )
    }

    /// Response XML with the assertion signed by `signer`
    pub fn build_xml(&self, signer: &SigningCredentials) -> String {
        let now = Utc::now();
        let in_response_to = self
            .in_response_to
            .as_deref()
            .map(|id| format!(r#" InResponseTo="{id}""#))
            .unwrap_or_default();
        let status = if self.success {
            STATUS_SUCCESS
        } else {
            STATUS_RESPONDER
        };
        let assertion = if self.success {
            self.assertion_xml(now)
        } else {
            String::new()
        };
        let response_id = format!("_resp-{}", Uuid::new_v4().simple());

        let xml = format!(
            concat!(
                r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"{root_ns} ID="{rid}" Version="2.0" IssueInstant="{now}" Destination="{acs}"{irt}>"#,
                r#"<saml:Issuer{ns}>{issuer}</saml:Issuer>"#,
                r#"<samlp:Status><samlp:StatusCode Value="{status}"/></samlp:Status>"#,
                r#"{assertion}"#,
                r#"</samlp:Response>"#,
            ),
            root_ns = if self.namespace_on_root {
                SAML_NS_DECLARATION
            } else {
                ""
            },
            ns = self.saml_namespace(),
            rid = response_id,
            now = instant(now),
            acs = ACS_URL,
            irt = in_response_to,
            issuer = self.response_issuer,
            status = status,
            assertion = assertion,
        );

        if self.success {
            sign_enveloped(&xml, &self.assertion_id, signer).unwrap()
        } else {
            sign_enveloped(&xml, &response_id, signer).unwrap()
        }
    }

    /// Base64 `SAMLResponse` form value
    pub fn build(&self, signer: &SigningCredentials) -> String {
        STANDARD.encode(self.build_xml(signer))
    }
}

/// Signed `LogoutResponse`, base64 for the HTTP-POST binding
pub fn logout_response(issuer: &str, success: bool, signer: &SigningCredentials) -> String {
    let id = format!("_lr-{}", Uuid::new_v4().simple());
    let status = if success {
        STATUS_SUCCESS
    } else {
        STATUS_RESPONDER
    };
    let xml = format!(
        concat!(
            r#"<samlp:LogoutResponse xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="{id}" Version="2.0" IssueInstant="{now}" Destination="https://sp.example.it/spid/slo" InResponseTo="_logout-req">"#,
            r#"<saml:Issuer>{issuer}</saml:Issuer>"#,
            r#"<samlp:Status><samlp:StatusCode Value="{status}"/></samlp:Status>"#,
            r#"</samlp:LogoutResponse>"#,
        ),
        id = id,
        now = instant(Utc::now()),
        issuer = issuer,
        status = status,
    );
    STANDARD.encode(sign_enveloped(&xml, &id, signer).unwrap())
}

/// Wired SP with two IdPs (`a`, `b`) and a hidden `test` IdP
pub struct Harness {
    pub state: SpidState,
    pub orchestrator: Arc<AuthOrchestrator>,
    pub store: Arc<InMemorySessionStore>,
    pub events: broadcast::Receiver<EventEnvelope>,
    pub idp_a: TestIdp,
    pub idp_b: TestIdp,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_idps(
            TestIdp::new("a", IDP_A_ENTITY_ID, "IdP A"),
            TestIdp::new("b", IDP_B_ENTITY_ID, "IdP B"),
        )
    }

    pub fn with_idps(idp_a: TestIdp, idp_b: TestIdp) -> Self {
        Self::build(idp_a, idp_b, SpidLevel::L1)
    }

    /// SP requesting `level` in its `AuthnRequest`
    pub fn requiring_level(level: SpidLevel) -> Self {
        Self::build(
            TestIdp::new("a", IDP_A_ENTITY_ID, "IdP A"),
            TestIdp::new("b", IDP_B_ENTITY_ID, "IdP B"),
            level,
        )
    }

    fn build(idp_a: TestIdp, idp_b: TestIdp, authn_level: SpidLevel) -> Self {
        let (sp_cert, sp_key) = generate_keypair("sp");
        let mut config = SpConfig::new(SP_ENTITY_ID, SP_BASE_URL, sp_cert, sp_key);
        config.authn_level = authn_level;
        config.after_login_url = AFTER_LOGIN_URL.to_string();
        config.after_logout_url = AFTER_LOGOUT_URL.to_string();
        config.requested_attributes = vec![
            "name".to_string(),
            "familyName".to_string(),
            "fiscalNumber".to_string(),
        ];

        let test_idp = TestIdp::new("test", "https://validator.spid.gov.it", "SPID Validator");
        let registry = IdpRegistry::new(vec![
            idp_a.descriptor.clone(),
            idp_b.descriptor.clone(),
            test_idp.descriptor,
        ])
        .unwrap();

        let toolkit = Arc::new(OpensslToolkit::new(&config).unwrap());
        let store = Arc::new(InMemorySessionStore::default());
        let replay_cache = Arc::new(InMemoryReplayCache::new(config.clock_skew_seconds));
        let (publisher, events) = EventPublisher::new(64);

        let state = SpidState::new(
            config,
            registry,
            toolkit,
            store.clone(),
            replay_cache,
            publisher,
        );

        Self {
            orchestrator: state.orchestrator.clone(),
            state,
            store,
            events,
            idp_a,
            idp_b,
        }
    }

    /// Request ID of the pending login stored for `session_id`
    pub async fn pending_request_id(&self, session_id: Uuid) -> String {
        self.store
            .load(session_id)
            .await
            .unwrap()
            .and_then(|s| s.pending)
            .and_then(|p| p.request_id)
            .expect("pending login with request id")
    }
}
