//! SAML-specific utilities

pub mod logout_parser;
pub mod metadata;
pub mod openssl_toolkit;
pub mod response_parser;
pub mod signing;
pub mod toolkit;

pub use openssl_toolkit::OpensslToolkit;
pub use signing::{
    canonicalize_xml, parse_certificate, sign_enveloped, verify_enveloped, SigningCredentials,
};
pub use toolkit::{
    LoginRedirect, LogoutResponseMessage, ParsedAssertion, ParsedLogoutResponse,
    ProcessedResponse, SamlToolkit, ToolkitError, STATUS_SUCCESS,
};
