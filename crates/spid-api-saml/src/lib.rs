//! SAML 2.0 Service Provider library for SPID
//!
//! This crate provides the Service Provider side of SPID federated login:
//! - SP-initiated SSO (signed `AuthnRequest`, HTTP-Redirect binding)
//! - Response validation with issuer pinning and replay prevention
//! - Browser session state machine with login/logout events
//! - Single logout towards the IdP and `LogoutResponse` handling
//! - Signed SP metadata publishing

pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod migrations;
pub mod models;
pub mod router;
pub mod saml;
pub mod services;
pub mod session;

pub use config::{Organization, SpConfig, SpidLevel};
pub use error::{SpidError, SpidResult};
pub use events::{EventEnvelope, EventPublisher, SpidEvent, SpidLogin, SpidLogout};
pub use handlers::SpidState;
pub use migrations::run_migrations;
pub use models::{IdentityProviderDescriptor, SpidUser};
pub use router::spid_router;
pub use saml::{OpensslToolkit, SamlToolkit};
pub use services::{AuthOrchestrator, IdpRegistry, RegistryError};
pub use session::{
    InMemoryReplayCache, InMemorySessionStore, PostgresReplayCache, PostgresSessionStore,
    ReplayCache, SessionStore,
};
