//! Logout handlers

use crate::error::SpidError;
use crate::handlers::cookie::extract_session_cookie;
use crate::handlers::{flow_response, SpidState};
use crate::models::SloParams;
use crate::saml::LogoutResponseMessage;
use crate::services::{FlowRedirect, SessionCookie};
use axum::{
    extract::{RawQuery, State},
    http::{
        header::{ORIGIN, REFERER},
        HeaderMap,
    },
    response::{IntoResponse, Response},
    Form,
};

/// Scheme, host and port of an absolute URL
fn origin_of(url: &str) -> &str {
    match url.find("://") {
        Some(scheme_end) => {
            let authority = scheme_end + 3;
            url[authority..]
                .find('/')
                .map_or(url, |slash| &url[..authority + slash])
        }
        None => url,
    }
}

/// Whether a state-changing request was sent by the SP's own pages.
///
/// Browsers send `Origin` with every POST; `Referer` is the fallback. A
/// request carrying neither did not come from a cross-site form.
fn is_same_origin(headers: &HeaderMap, base_url: &str) -> bool {
    let expected = origin_of(base_url);
    if let Some(origin) = headers.get(ORIGIN) {
        return origin
            .to_str()
            .is_ok_and(|origin| origin.eq_ignore_ascii_case(expected));
    }
    headers.get(REFERER).map_or(true, |referer| {
        referer
            .to_str()
            .is_ok_and(|referer| origin_of(referer).eq_ignore_ascii_case(expected))
    })
}

/// End the local session and redirect to the IdP single logout service
#[utoipa::path(
    post,
    path = "/spid/logout",
    responses(
        (status = 303, description = "Redirect to the IdP, or to the application when not logged in"),
        (status = 403, description = "Request sent from another origin"),
        (status = 500, description = "Logout request could not be built"),
    ),
    tag = "SPID"
)]
pub async fn logout(State(state): State<SpidState>, headers: HeaderMap) -> Response {
    if !is_same_origin(&headers, &state.config.base_url) {
        tracing::warn!(
            target: "security",
            origin = ?headers.get(ORIGIN),
            referer = ?headers.get(REFERER),
            "Cross-site SPID logout rejected"
        );
        return SpidError::CrossSiteRequest.into_response();
    }

    let session_id = extract_session_cookie(&headers);
    match state.orchestrator.begin_logout(session_id).await {
        Ok(flow) => flow_response(&state, flow),
        Err(e) => e.into_response(),
    }
}

/// Receive the IdP `LogoutResponse` (HTTP-Redirect binding)
#[utoipa::path(
    get,
    path = "/spid/slo",
    responses(
        (status = 303, description = "Logout completed"),
        (status = 500, description = "Invalid LogoutResponse"),
    ),
    tag = "SPID"
)]
pub async fn slo_redirect(
    State(state): State<SpidState>,
    RawQuery(query): RawQuery,
) -> Response {
    let message = LogoutResponseMessage::Redirect {
        raw_query: query.unwrap_or_default(),
    };
    complete(&state, &message)
}

/// Receive the IdP `LogoutResponse` (HTTP-POST binding)
#[utoipa::path(
    post,
    path = "/spid/slo",
    request_body(content = SloParams, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Logout completed"),
        (status = 500, description = "Invalid LogoutResponse"),
    ),
    tag = "SPID"
)]
pub async fn slo_post(State(state): State<SpidState>, Form(form): Form<SloParams>) -> Response {
    let message = LogoutResponseMessage::Post {
        saml_response: form.saml_response.unwrap_or_default(),
    };
    complete(&state, &message)
}

fn complete(state: &SpidState, message: &LogoutResponseMessage) -> Response {
    match state.orchestrator.complete_logout_response(message) {
        Ok(location) => flow_response(
            state,
            FlowRedirect {
                location,
                cookie: SessionCookie::Clear,
            },
        ),
        Err(e) => e.into_response(),
    }
}
