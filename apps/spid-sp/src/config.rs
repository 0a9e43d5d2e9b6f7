//! Application configuration loaded from environment variables.
//!
//! Loading is fail-fast: a missing or malformed required variable stops the
//! server before it binds. Production mode (`APP_ENV=production`) refuses to
//! run with insecure session cookies.

use spid_api_saml::config::{DEFAULT_CLOCK_SKEW_SECONDS, DEFAULT_SESSION_LIFETIME_SECONDS};
use spid_api_saml::{Organization, SpConfig, SpidLevel};
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Application environment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Production,
}

impl AppEnvironment {
    /// Parse an `APP_ENV` value, defaulting to `Development`.
    pub fn from_env_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => {
                tracing::warn!(
                    value = other,
                    "Unrecognized APP_ENV value, defaulting to Development"
                );
                Self::Development
            }
        }
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        *self == Self::Production
    }
}

impl std::fmt::Display for AppEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error("Failed to parse port: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub rust_log: String,
    pub app_env: AppEnvironment,
    /// PostgreSQL replay cache when set, in-memory otherwise
    pub database_url: Option<String>,
    pub entity_id: String,
    pub base_url: String,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub idp_registry_file: PathBuf,
    pub requested_attributes: Vec<String>,
    pub authn_level: SpidLevel,
    pub after_login_url: String,
    pub after_logout_url: String,
    pub expose_test_idp: bool,
    pub organization: Organization,
    pub clock_skew_seconds: i64,
    pub session_lifetime_seconds: u64,
    pub secure_cookies: bool,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let require =
            |var: &str| get(var).ok_or_else(|| ConfigError::MissingVar(var.to_string()));

        let app_env = get("APP_ENV")
            .map(|v| AppEnvironment::from_env_str(&v))
            .unwrap_or(AppEnvironment::Development);

        let base_url = require("SPID_SP_BASE_URL")?;
        let parsed = url::Url::parse(&base_url).map_err(|e| ConfigError::InvalidValue {
            var: "SPID_SP_BASE_URL".to_string(),
            message: e.to_string(),
        })?;
        if parsed.scheme() != "https" && app_env.is_production() {
            return Err(ConfigError::InvalidValue {
                var: "SPID_SP_BASE_URL".to_string(),
                message: "must use https in production".to_string(),
            });
        }
        let base_url = base_url.trim_end_matches('/').to_string();

        let authn_level = match get("SPID_AUTHN_LEVEL") {
            Some(v) => v
                .trim()
                .parse::<u8>()
                .ok()
                .and_then(SpidLevel::from_number)
                .ok_or_else(|| ConfigError::InvalidValue {
                    var: "SPID_AUTHN_LEVEL".to_string(),
                    message: format!("expected 1, 2 or 3, got '{v}'"),
                })?,
            None => SpidLevel::default(),
        };

        let secure_cookies =
            parse_bool(get("SPID_SECURE_COOKIES"), "SPID_SECURE_COOKIES", true)?;
        if !secure_cookies && app_env.is_production() {
            return Err(ConfigError::InvalidValue {
                var: "SPID_SECURE_COOKIES".to_string(),
                message: "insecure cookies are not allowed in production".to_string(),
            });
        }

        let org_name = get("SPID_ORG_NAME").unwrap_or_else(|| "Service Provider".to_string());
        let organization = Organization {
            display_name: get("SPID_ORG_DISPLAY_NAME").unwrap_or_else(|| org_name.clone()),
            url: get("SPID_ORG_URL").unwrap_or_else(|| base_url.clone()),
            name: org_name,
        };

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: get("PORT").map_or(Ok(8080), |p| p.parse())?,
            rust_log: get("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            app_env,
            database_url: get("DATABASE_URL"),
            entity_id: require("SPID_SP_ENTITY_ID")?,
            cert_file: require("SPID_SP_CERT_FILE")?.into(),
            key_file: require("SPID_SP_KEY_FILE")?.into(),
            idp_registry_file: require("SPID_IDP_REGISTRY_FILE")?.into(),
            requested_attributes: get("SPID_REQUESTED_ATTRIBUTES")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            authn_level,
            after_login_url: get("SPID_AFTER_LOGIN_URL").unwrap_or_else(|| "/".to_string()),
            after_logout_url: get("SPID_AFTER_LOGOUT_URL").unwrap_or_else(|| "/".to_string()),
            expose_test_idp: parse_bool(
                get("SPID_EXPOSE_TEST_IDP"),
                "SPID_EXPOSE_TEST_IDP",
                false,
            )?,
            organization,
            clock_skew_seconds: parse_number(
                get("SPID_CLOCK_SKEW_SECS"),
                "SPID_CLOCK_SKEW_SECS",
                DEFAULT_CLOCK_SKEW_SECONDS,
            )?,
            session_lifetime_seconds: parse_number(
                get("SPID_SESSION_LIFETIME_SECS"),
                "SPID_SESSION_LIFETIME_SECS",
                DEFAULT_SESSION_LIFETIME_SECONDS,
            )?,
            secure_cookies,
            base_url,
        })
    }

    /// Bind address as `host:port`.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Build the SP configuration, reading the certificate and key files.
    pub fn sp_config(&self) -> Result<SpConfig, ConfigError> {
        let certificate_pem = read_pem(&self.cert_file, "SPID_SP_CERT_FILE")?;
        let private_key_pem = read_pem(&self.key_file, "SPID_SP_KEY_FILE")?;

        let mut sp = SpConfig::new(
            self.entity_id.clone(),
            self.base_url.clone(),
            certificate_pem,
            private_key_pem,
        );
        sp.requested_attributes = self.requested_attributes.clone();
        sp.authn_level = self.authn_level;
        sp.organization = self.organization.clone();
        sp.after_login_url = self.after_login_url.clone();
        sp.after_logout_url = self.after_logout_url.clone();
        sp.expose_test_idp = self.expose_test_idp;
        sp.clock_skew_seconds = self.clock_skew_seconds;
        sp.session_lifetime_seconds = self.session_lifetime_seconds;
        sp.secure_cookies = self.secure_cookies;
        Ok(sp)
    }
}

fn read_pem(path: &Path, var: &str) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidValue {
        var: var.to_string(),
        message: format!("cannot read {}: {e}", path.display()),
    })
}

fn parse_bool(value: Option<String>, var: &str, default: bool) -> Result<bool, ConfigError> {
    match value.as_deref().map(str::to_lowercase).as_deref() {
        None => Ok(default),
        Some("true" | "1" | "yes") => Ok(true),
        Some("false" | "0" | "no") => Ok(false),
        Some(other) => Err(ConfigError::InvalidValue {
            var: var.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(
    value: Option<String>,
    var: &str,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            message: format!("expected a number, got '{v}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("SPID_SP_ENTITY_ID", "https://sp.example.it"),
            ("SPID_SP_BASE_URL", "https://sp.example.it/"),
            ("SPID_SP_CERT_FILE", "/etc/spid/sp.crt"),
            ("SPID_SP_KEY_FILE", "/etc/spid/sp.key"),
            ("SPID_IDP_REGISTRY_FILE", "/etc/spid/idps.json"),
        ])
    }

    fn load(vars: &HashMap<&str, &str>) -> Result<Config, ConfigError> {
        Config::from_lookup(|var| vars.get(var).map(|v| (*v).to_string()))
    }

    #[test]
    fn test_defaults() {
        let config = load(&base_vars()).unwrap();
        assert_eq!(config.base_url, "https://sp.example.it");
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.app_env, AppEnvironment::Development);
        assert!(config.database_url.is_none());
        assert!(config.requested_attributes.is_empty());
        assert_eq!(config.authn_level, SpidLevel::L1);
        assert!(config.secure_cookies);
        assert!(!config.expose_test_idp);
        assert_eq!(config.organization.url, "https://sp.example.it");
    }

    #[test]
    fn test_missing_required_var() {
        let mut vars = base_vars();
        vars.remove("SPID_IDP_REGISTRY_FILE");
        let err = load(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ref v) if v == "SPID_IDP_REGISTRY_FILE"));
    }

    #[test]
    fn test_parses_spid_options() {
        let mut vars = base_vars();
        vars.insert("SPID_REQUESTED_ATTRIBUTES", "name, familyName,,fiscalNumber");
        vars.insert("SPID_AUTHN_LEVEL", "2");
        vars.insert("SPID_EXPOSE_TEST_IDP", "true");
        vars.insert("SPID_CLOCK_SKEW_SECS", "30");
        vars.insert("PORT", "9000");

        let config = load(&vars).unwrap();
        assert_eq!(
            config.requested_attributes,
            vec!["name", "familyName", "fiscalNumber"]
        );
        assert_eq!(config.authn_level, SpidLevel::L2);
        assert!(config.expose_test_idp);
        assert_eq!(config.clock_skew_seconds, 30);
        assert_eq!(config.port, 9000);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let mut vars = base_vars();
        vars.insert("SPID_AUTHN_LEVEL", "4");
        assert!(matches!(load(&vars), Err(ConfigError::InvalidValue { .. })));

        let mut vars = base_vars();
        vars.insert("SPID_SP_BASE_URL", "not a url");
        assert!(matches!(load(&vars), Err(ConfigError::InvalidValue { .. })));

        let mut vars = base_vars();
        vars.insert("PORT", "http");
        assert!(matches!(load(&vars), Err(ConfigError::InvalidPort(_))));
    }

    #[test]
    fn test_production_refuses_insecure_cookies() {
        let mut vars = base_vars();
        vars.insert("SPID_SECURE_COOKIES", "false");
        assert!(!load(&vars).unwrap().secure_cookies);

        vars.insert("APP_ENV", "production");
        let err = load(&vars).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref var, .. } if var == "SPID_SECURE_COOKIES"
        ));
    }
}
