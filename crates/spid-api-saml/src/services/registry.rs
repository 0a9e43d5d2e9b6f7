//! Identity Provider registry
//!
//! Read-only after construction. Reloading requires a restart.

use crate::models::IdentityProviderDescriptor;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Registry construction errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Duplicate IdP id: {0}")]
    DuplicateId(String),

    #[error("Duplicate IdP entity ID: {0}")]
    DuplicateEntityId(String),

    #[error("IdP descriptor {0} is missing {1}")]
    IncompleteDescriptor(String, &'static str),

    #[error("Failed to read IdP registry: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse IdP registry: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Static mapping from IdP ID to descriptor, with an issuer index
#[derive(Debug, Clone, Default)]
pub struct IdpRegistry {
    providers: Vec<IdentityProviderDescriptor>,
    by_id: HashMap<String, usize>,
    by_entity_id: HashMap<String, usize>,
}

impl IdpRegistry {
    /// Build a registry, keeping the given order for listings.
    pub fn new(providers: Vec<IdentityProviderDescriptor>) -> Result<Self, RegistryError> {
        let mut by_id = HashMap::with_capacity(providers.len());
        let mut by_entity_id = HashMap::with_capacity(providers.len());

        for (index, idp) in providers.iter().enumerate() {
            if idp.id.trim().is_empty() {
                return Err(RegistryError::IncompleteDescriptor(
                    idp.entity_id.clone(),
                    "id",
                ));
            }
            if idp.entity_id.trim().is_empty() {
                return Err(RegistryError::IncompleteDescriptor(idp.id.clone(), "entityId"));
            }
            if idp.sso_url.trim().is_empty() {
                return Err(RegistryError::IncompleteDescriptor(idp.id.clone(), "ssoUrl"));
            }
            if by_id.insert(idp.id.clone(), index).is_some() {
                return Err(RegistryError::DuplicateId(idp.id.clone()));
            }
            if by_entity_id.insert(idp.entity_id.clone(), index).is_some() {
                return Err(RegistryError::DuplicateEntityId(idp.entity_id.clone()));
            }
        }

        Ok(Self {
            providers,
            by_id,
            by_entity_id,
        })
    }

    /// Parse a JSON array of descriptors
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let providers: Vec<IdentityProviderDescriptor> = serde_json::from_str(json)?;
        Self::new(providers)
    }

    /// Load a JSON array of descriptors from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Look up an IdP by registry ID. The test provider always resolves.
    #[must_use]
    pub fn resolve(&self, id: &str) -> Option<&IdentityProviderDescriptor> {
        self.by_id.get(id).map(|&i| &self.providers[i])
    }

    /// Look up an IdP by SAML entity ID (response `Issuer`)
    #[must_use]
    pub fn find_by_entity_id(&self, entity_id: &str) -> Option<&IdentityProviderDescriptor> {
        self.by_entity_id.get(entity_id).map(|&i| &self.providers[i])
    }

    /// Public listing in configuration order
    #[must_use]
    pub fn list_all(&self, include_test_provider: bool) -> Vec<&IdentityProviderDescriptor> {
        self.providers
            .iter()
            .filter(|idp| include_test_provider || !idp.is_test_provider())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TEST_PROVIDER_ID;

    fn idp(id: &str) -> IdentityProviderDescriptor {
        IdentityProviderDescriptor {
            id: id.to_string(),
            entity_id: format!("https://{id}.example"),
            entity_name: format!("{id} ID"),
            sso_url: format!("https://{id}.example/sso"),
            slo_url: format!("https://{id}.example/slo"),
            certificate: String::new(),
            logo: None,
        }
    }

    fn registry() -> IdpRegistry {
        IdpRegistry::new(vec![idp("poste"), idp(TEST_PROVIDER_ID), idp("aruba")]).unwrap()
    }

    #[test]
    fn test_resolve_and_issuer_lookup() {
        let registry = registry();
        assert_eq!(registry.resolve("aruba").unwrap().id, "aruba");
        assert!(registry.resolve("missing").is_none());
        assert!(registry.resolve("").is_none());

        let by_issuer = registry.find_by_entity_id("https://poste.example").unwrap();
        assert_eq!(by_issuer.entity_name, "poste ID");
        assert!(registry.find_by_entity_id("https://evil.example").is_none());
    }

    #[test]
    fn test_test_provider_hidden_but_resolvable() {
        let registry = registry();

        let public: Vec<_> = registry.list_all(false).iter().map(|i| i.id.clone()).collect();
        assert_eq!(public, vec!["poste", "aruba"]);
        assert!(registry.resolve(TEST_PROVIDER_ID).is_some());

        let all: Vec<_> = registry.list_all(true).iter().map(|i| i.id.clone()).collect();
        assert_eq!(all, vec!["poste", TEST_PROVIDER_ID, "aruba"]);
    }

    #[test]
    fn test_duplicates_rejected() {
        assert!(matches!(
            IdpRegistry::new(vec![idp("poste"), idp("poste")]),
            Err(RegistryError::DuplicateId(_))
        ));

        let mut other = idp("other");
        other.entity_id = "https://poste.example".to_string();
        assert!(matches!(
            IdpRegistry::new(vec![idp("poste"), other]),
            Err(RegistryError::DuplicateEntityId(_))
        ));
    }

    #[test]
    fn test_from_json() {
        let json = r#"[{
            "id": "poste",
            "entityId": "https://posteid.poste.it",
            "entityName": "Poste ID",
            "ssoUrl": "https://posteid.poste.it/sso",
            "sloUrl": "https://posteid.poste.it/slo",
            "certificate": "MIIC"
        }]"#;
        let registry = IdpRegistry::from_json(json).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(IdpRegistry::from_json("{").is_err());
    }
}
