//! Login handlers: IdP chooser and redirect to the selected IdP

use crate::handlers::cookie::extract_session_cookie;
use crate::handlers::{flow_response, SpidState};
use crate::models::{DoLoginQuery, LoginQuery};
use crate::services::LoginPage;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{Html, IntoResponse, Redirect, Response},
};

/// Show the IdP chooser, or redirect when already authenticated
#[utoipa::path(
    get,
    path = "/spid/login",
    params(LoginQuery),
    responses(
        (status = 200, description = "IdP chooser page", content_type = "text/html"),
        (status = 303, description = "Already authenticated, redirect to the application"),
    ),
    tag = "SPID"
)]
pub async fn login_page(
    State(state): State<SpidState>,
    headers: HeaderMap,
    Query(query): Query<LoginQuery>,
) -> Response {
    let session_id = extract_session_cookie(&headers);
    match state
        .orchestrator
        .login(session_id, query.return_to.as_deref())
        .await
    {
        Ok(LoginPage::Redirect(location)) => Redirect::to(&location).into_response(),
        Ok(LoginPage::Chooser(html)) => Html(html).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Start login with the IdP named in the path
#[utoipa::path(
    get,
    path = "/spid/login/{idp}",
    params(
        ("idp" = String, Path, description = "IdP registry ID"),
        LoginQuery,
    ),
    responses(
        (status = 303, description = "Redirect to the IdP with a signed AuthnRequest"),
        (status = 400, description = "Unknown IdP"),
    ),
    tag = "SPID"
)]
pub async fn login_with_provider(
    State(state): State<SpidState>,
    Path(idp): Path<String>,
    headers: HeaderMap,
    Query(query): Query<LoginQuery>,
) -> Response {
    start_login(&state, &headers, Some(&idp), query.return_to.as_deref()).await
}

/// Start login with the IdP named in the `provider` query parameter
#[utoipa::path(
    get,
    path = "/spid/dologin",
    params(DoLoginQuery),
    responses(
        (status = 303, description = "Redirect to the IdP with a signed AuthnRequest"),
        (status = 400, description = "Missing or unknown IdP"),
    ),
    tag = "SPID"
)]
pub async fn do_login(
    State(state): State<SpidState>,
    headers: HeaderMap,
    Query(query): Query<DoLoginQuery>,
) -> Response {
    start_login(
        &state,
        &headers,
        query.provider.as_deref(),
        query.return_to.as_deref(),
    )
    .await
}

async fn start_login(
    state: &SpidState,
    headers: &HeaderMap,
    idp: Option<&str>,
    return_to: Option<&str>,
) -> Response {
    let session_id = extract_session_cookie(headers);
    match state.orchestrator.do_login(session_id, idp, return_to).await {
        Ok(flow) => flow_response(state, flow),
        Err(e) => e.into_response(),
    }
}
