//! Assertion Consumer Service handler

use crate::handlers::cookie::extract_session_cookie;
use crate::handlers::{flow_response, SpidState};
use crate::models::AcsForm;
use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Form,
};

/// Consume the IdP `Response` (HTTP-POST binding)
#[utoipa::path(
    post,
    path = "/spid/acs",
    request_body(content = AcsForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Authenticated, redirect to the application"),
        (status = 400, description = "Invalid or unverifiable response"),
        (status = 401, description = "IdP reported authentication failure"),
        (status = 409, description = "Response already processed"),
    ),
    tag = "SPID"
)]
pub async fn consume_response(
    State(state): State<SpidState>,
    headers: HeaderMap,
    Form(form): Form<AcsForm>,
) -> Response {
    let session_id = extract_session_cookie(&headers);
    match state
        .orchestrator
        .consume_response(session_id, form.saml_response.as_deref())
        .await
    {
        Ok(flow) => flow_response(&state, flow),
        Err(e) => e.into_response(),
    }
}
