//! Current user handler

use crate::error::{SpidError, SpidResult};
use crate::handlers::cookie::extract_session_cookie;
use crate::handlers::SpidState;
use crate::models::SpidUser;
use axum::{extract::State, http::HeaderMap, Json};

/// Attributes of the authenticated SPID user
#[utoipa::path(
    get,
    path = "/spid/user",
    responses(
        (status = 200, description = "Authenticated user", body = SpidUser),
        (status = 401, description = "Not authenticated"),
    ),
    tag = "SPID"
)]
pub async fn current_user(
    State(state): State<SpidState>,
    headers: HeaderMap,
) -> SpidResult<Json<SpidUser>> {
    let session_id = extract_session_cookie(&headers);
    state
        .orchestrator
        .current_user(session_id)
        .await?
        .map(Json)
        .ok_or(SpidError::NotAuthenticated)
}
