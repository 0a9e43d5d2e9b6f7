//! Provider listing handler

use crate::handlers::SpidState;
use crate::models::ProviderResponse;
use axum::{extract::State, Json};

/// List the IdPs offered in the login chooser
#[utoipa::path(
    get,
    path = "/spid/providers",
    responses(
        (status = 200, description = "Registered identity providers", body = Vec<ProviderResponse>),
    ),
    tag = "SPID"
)]
pub async fn list_providers(State(state): State<SpidState>) -> Json<Vec<ProviderResponse>> {
    Json(
        state
            .orchestrator
            .list_providers()
            .into_iter()
            .map(ProviderResponse::from)
            .collect(),
    )
}
