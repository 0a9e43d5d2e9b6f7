//! Identity Provider descriptor loaded from configuration

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Reserved identifier of the SPID validator/test Identity Provider.
pub const TEST_PROVIDER_ID: &str = "test";

/// Static description of an external Identity Provider.
///
/// Loaded once at process start and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityProviderDescriptor {
    /// Short registry key used by the login chooser (e.g. `poste`)
    pub id: String,
    /// SAML entity ID, matched against the response `Issuer`
    #[serde(rename = "entityId")]
    pub entity_id: String,
    /// Human-readable provider name
    #[serde(rename = "entityName")]
    pub entity_name: String,
    /// HTTP-Redirect `SingleSignOnService` location
    #[serde(rename = "ssoUrl")]
    pub sso_url: String,
    /// HTTP-Redirect `SingleLogoutService` location
    #[serde(rename = "sloUrl")]
    pub slo_url: String,
    /// Signing certificate, PEM or bare base64 DER
    pub certificate: String,
    /// Optional logo shown in the provider chooser
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
}

impl IdentityProviderDescriptor {
    #[must_use]
    pub fn is_test_provider(&self) -> bool {
        self.id == TEST_PROVIDER_ID
    }
}

/// Public view of a provider, without key material.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProviderResponse {
    pub id: String,
    #[serde(rename = "entityId")]
    pub entity_id: String,
    #[serde(rename = "entityName")]
    pub entity_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
}

impl From<&IdentityProviderDescriptor> for ProviderResponse {
    fn from(idp: &IdentityProviderDescriptor) -> Self {
        Self {
            id: idp.id.clone(),
            entity_id: idp.entity_id.clone(),
            entity_name: idp.entity_name.clone(),
            logo: idp.logo.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_deserializes_registry_json() {
        let json = r#"{
            "id": "poste",
            "entityId": "https://posteid.poste.it",
            "entityName": "Poste ID",
            "ssoUrl": "https://posteid.poste.it/jod-fs/ssoservicepost",
            "sloUrl": "https://posteid.poste.it/jod-fs/sloservicepost",
            "certificate": "MIIC..."
        }"#;

        let idp: IdentityProviderDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(idp.entity_id, "https://posteid.poste.it");
        assert!(idp.logo.is_none());
        assert!(!idp.is_test_provider());
    }

    #[test]
    fn test_provider_response_omits_certificate() {
        let idp = IdentityProviderDescriptor {
            id: "test".to_string(),
            entity_id: "https://validator.spid.gov.it".to_string(),
            entity_name: "SPID Validator".to_string(),
            sso_url: "https://validator.spid.gov.it/samlsso".to_string(),
            slo_url: "https://validator.spid.gov.it/samlsso".to_string(),
            certificate: "secret-cert".to_string(),
            logo: None,
        };

        let json = serde_json::to_string(&ProviderResponse::from(&idp)).unwrap();
        assert!(!json.contains("secret-cert"));
        assert!(json.contains("\"entityName\":\"SPID Validator\""));
    }
}
