//! Request/response models and domain value types

pub mod idp;
pub mod responses;
pub mod user;

pub use idp::{IdentityProviderDescriptor, ProviderResponse, TEST_PROVIDER_ID};
pub use responses::{generate_provider_chooser, AcsForm, DoLoginQuery, LoginQuery, SloParams};
pub use user::SpidUser;
