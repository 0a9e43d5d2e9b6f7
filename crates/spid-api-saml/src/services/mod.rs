//! Business logic services for the SPID login flow

pub mod orchestrator;
pub mod registry;
pub mod session_manager;
pub mod validator;

pub use orchestrator::{
    sanitize_return_to, AuthOrchestrator, FlowRedirect, LoginPage, SessionCookie, LOGIN_PATH,
};
pub use registry::{IdpRegistry, RegistryError};
pub use session_manager::{LogoutContext, SessionManager};
pub use validator::{
    build_validator, ValidatedAssertion, ValidationFailure, ValidationOutcome, Validator,
};
