//! HTTP handlers for SPID endpoints

pub mod acs;
pub mod cookie;
pub mod login;
pub mod logout;
pub mod metadata;
pub mod providers;
pub mod user;

pub use acs::consume_response;
pub use login::{do_login, login_page, login_with_provider};
pub use logout::{logout, slo_post, slo_redirect};
pub use metadata::{get_metadata, SpidState};
pub use providers::list_providers;
pub use user::current_user;

use crate::services::FlowRedirect;
use axum::response::{IntoResponse, Redirect, Response};

/// Redirect response carrying the session cookie change
pub(crate) fn flow_response(state: &SpidState, flow: FlowRedirect) -> Response {
    let mut response = Redirect::to(&flow.location).into_response();
    cookie::apply_session_cookie(
        response.headers_mut(),
        flow.cookie,
        state.config.secure_cookies,
        state.config.session_lifetime_seconds,
    );
    response
}
