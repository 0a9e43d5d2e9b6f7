//! Authenticated SPID identity

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// Identity built from the attribute statement of a validated assertion.
///
/// Immutable after construction. The attribute set is whatever the IdP
/// released, filtered by the SP's configured requested attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SpidUser {
    attributes: BTreeMap<String, Vec<String>>,
}

impl SpidUser {
    /// Build a user from released attributes.
    ///
    /// When `requested` is empty every released attribute is kept.
    #[must_use]
    pub fn from_attributes(
        released: &BTreeMap<String, Vec<String>>,
        requested: &[String],
    ) -> Self {
        let attributes = released
            .iter()
            .filter(|(name, _)| requested.is_empty() || requested.iter().any(|r| r == *name))
            .map(|(name, values)| (name.clone(), values.clone()))
            .collect();
        Self { attributes }
    }

    /// First value of an attribute.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values of a (possibly multi-valued) attribute.
    #[must_use]
    pub fn values(&self, name: &str) -> &[String] {
        self.attributes.get(name).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, Vec<String>> {
        &self.attributes
    }

    /// Fiscal number with the `TINIT-` prefix stripped.
    #[must_use]
    pub fn fiscal_code(&self) -> Option<&str> {
        self.get("fiscalNumber")
            .map(|v| v.strip_prefix("TINIT-").unwrap_or(v))
    }
}
