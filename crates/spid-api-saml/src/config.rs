//! Service provider configuration

use serde::{Deserialize, Serialize};

/// Transient NameID format, the SPID default
pub const NAMEID_FORMAT_TRANSIENT: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:transient";

/// Default allowed clock skew (seconds)
pub const DEFAULT_CLOCK_SKEW_SECONDS: i64 = 60;

/// Default browser session lifetime (seconds)
pub const DEFAULT_SESSION_LIFETIME_SECONDS: u64 = 3600;

/// Organization shown in SP metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Organization {
    pub name: String,
    pub display_name: String,
    pub url: String,
}

/// SPID authentication level requested in the `AuthnRequest`.
///
/// Levels are ordered: `L1 < L2 < L3`.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default,
)]
pub enum SpidLevel {
    #[default]
    L1,
    L2,
    L3,
}

impl SpidLevel {
    /// Parse a numeric level (1-3)
    pub fn from_number(level: u8) -> Option<Self> {
        match level {
            1 => Some(Self::L1),
            2 => Some(Self::L2),
            3 => Some(Self::L3),
            _ => None,
        }
    }

    /// Level named by an `AuthnContextClassRef` URI
    pub fn from_class_ref(class_ref: &str) -> Option<Self> {
        [Self::L1, Self::L2, Self::L3]
            .into_iter()
            .find(|level| level.class_ref() == class_ref.trim())
    }

    /// `AuthnContextClassRef` URI for this level
    #[must_use]
    pub fn class_ref(self) -> &'static str {
        match self {
            Self::L1 => "https://www.spid.gov.it/SpidL1",
            Self::L2 => "https://www.spid.gov.it/SpidL2",
            Self::L3 => "https://www.spid.gov.it/SpidL3",
        }
    }

    /// SPID requires `ForceAuthn` above level 1
    #[must_use]
    pub fn force_authn(self) -> bool {
        !matches!(self, Self::L1)
    }
}

/// Static configuration of this service provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpConfig {
    /// SP entity ID published in metadata and used as `Issuer`
    pub entity_id: String,
    /// Public base URL, without trailing slash
    pub base_url: String,
    #[serde(default = "default_acs_path")]
    pub acs_path: String,
    #[serde(default = "default_slo_path")]
    pub slo_path: String,
    /// SP signing certificate (PEM)
    pub certificate_pem: String,
    /// SP private key (PEM)
    pub private_key_pem: String,
    /// Attributes to request; empty keeps everything the IdP releases
    #[serde(default)]
    pub requested_attributes: Vec<String>,
    #[serde(default)]
    pub attribute_consuming_service_index: u32,
    #[serde(default)]
    pub authn_level: SpidLevel,
    #[serde(default = "default_name_id_format")]
    pub name_id_format: String,
    pub organization: Organization,
    pub after_login_url: String,
    pub after_logout_url: String,
    /// Show the `test` IdP in the public provider listing
    #[serde(default)]
    pub expose_test_idp: bool,
    #[serde(default = "default_clock_skew")]
    pub clock_skew_seconds: i64,
    #[serde(default = "default_session_lifetime")]
    pub session_lifetime_seconds: u64,
    #[serde(default = "default_true")]
    pub secure_cookies: bool,
}

fn default_acs_path() -> String {
    "/spid/acs".to_string()
}

fn default_slo_path() -> String {
    "/spid/slo".to_string()
}

fn default_name_id_format() -> String {
    NAMEID_FORMAT_TRANSIENT.to_string()
}

fn default_clock_skew() -> i64 {
    DEFAULT_CLOCK_SKEW_SECONDS
}

fn default_session_lifetime() -> u64 {
    DEFAULT_SESSION_LIFETIME_SECONDS
}

fn default_true() -> bool {
    true
}

impl SpConfig {
    /// Minimal configuration with defaults for everything optional.
    #[must_use]
    pub fn new(
        entity_id: impl Into<String>,
        base_url: impl Into<String>,
        certificate_pem: impl Into<String>,
        private_key_pem: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            entity_id: entity_id.into(),
            acs_path: default_acs_path(),
            slo_path: default_slo_path(),
            certificate_pem: certificate_pem.into(),
            private_key_pem: private_key_pem.into(),
            requested_attributes: Vec::new(),
            attribute_consuming_service_index: 0,
            authn_level: SpidLevel::default(),
            name_id_format: default_name_id_format(),
            organization: Organization {
                name: "Service Provider".to_string(),
                display_name: "Service Provider".to_string(),
                url: base_url.clone(),
            },
            after_login_url: "/".to_string(),
            after_logout_url: "/".to_string(),
            expose_test_idp: false,
            clock_skew_seconds: DEFAULT_CLOCK_SKEW_SECONDS,
            session_lifetime_seconds: DEFAULT_SESSION_LIFETIME_SECONDS,
            secure_cookies: true,
            base_url,
        }
    }

    /// Absolute Assertion Consumer Service URL
    #[must_use]
    pub fn acs_url(&self) -> String {
        format!("{}{}", self.base_url, self.acs_path)
    }

    /// Absolute Single Logout Service URL
    #[must_use]
    pub fn slo_url(&self) -> String {
        format!("{}{}", self.base_url, self.slo_path)
    }
}
