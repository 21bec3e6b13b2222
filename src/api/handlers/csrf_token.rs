//! CSRF token issuance endpoint.

use axum::{
    extract::Extension,
    http::{header::CACHE_CONTROL, HeaderMap, HeaderValue, StatusCode},
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::api::envelope::{ApiError, ErrorResponse};
use crate::api::handlers::{
    extract_client_ip, optional_principal, require_within_rate, GateState,
};
use crate::clock::unix_now;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CsrfTokenResponse {
    pub csrf_token: String,
    /// Unix seconds.
    pub expires_at: i64,
    pub expires_in: i64,
}

#[utoipa::path(
    get,
    path= "/v1/csrf-token",
    responses (
        (status = 200, description = "Fresh CSRF token", body = CsrfTokenResponse),
        (status = 429, description = "Issuance budget spent", body = ErrorResponse),
        (status = 500, description = "Token generation failed", body = ErrorResponse)
    ),
    tag = "protection",
)]
/// Issue a fresh CSRF synchronizer token.
///
/// Authentication is optional: a token issued on an authenticated request
/// is bound to that principal and later rejected for anyone else, while an
/// anonymous token stays unbound. The client address is recorded for
/// diagnostics only.
pub async fn csrf_token(
    Extension(state): Extension<Arc<GateState>>,
    headers: HeaderMap,
) -> Result<(StatusCode, HeaderMap, Json<CsrfTokenResponse>), ApiError> {
    require_within_rate(&state.limits().csrf_issuance, &headers).await?;

    let principal = optional_principal(&state, &headers).await;
    let issued = state
        .csrf()
        .generate(
            principal.map(|p| p.id),
            extract_client_ip(&headers),
            unix_now(),
        )
        .await?;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));

    Ok((
        StatusCode::OK,
        response_headers,
        Json(CsrfTokenResponse {
            csrf_token: issued.token,
            expires_at: issued.expires_at,
            expires_in: issued.expires_in_seconds,
        }),
    ))
}
