//! SPID route definitions

use crate::handlers::{
    consume_response, current_user, do_login, get_metadata, list_providers, login_page,
    login_with_provider, logout, slo_post, slo_redirect, SpidState,
};
use axum::{
    routing::{get, post},
    Router,
};

/// Create the SPID router.
///
/// All endpoints are public; the session is carried by the `spid_session`
/// cookie. Logout changes state and only answers same-origin POSTs.
pub fn spid_router(state: SpidState) -> Router {
    Router::new()
        .route("/spid/login", get(login_page))
        .route("/spid/login/:idp", get(login_with_provider))
        .route("/spid/dologin", get(do_login))
        .route("/spid/acs", post(consume_response))
        .route("/spid/logout", post(logout))
        .route("/spid/slo", get(slo_redirect).post(slo_post))
        .route("/spid/metadata", get(get_metadata))
        .route("/spid/providers", get(list_providers))
        .route("/spid/user", get(current_user))
        .with_state(state)
}
