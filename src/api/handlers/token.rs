//! Token refresh endpoint.

use axum::{
    extract::Extension,
    http::{header::CACHE_CONTROL, HeaderMap, HeaderValue, StatusCode},
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::api::envelope::{ApiError, ErrorResponse};
use crate::api::handlers::{require_within_rate, GateState};
use crate::clock::unix_now;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

#[utoipa::path(
    post,
    path= "/v1/token/refresh",
    request_body = RefreshRequest,
    responses (
        (status = 200, description = "Fresh token pair", body = TokenPairResponse),
        (status = 400, description = "Missing payload", body = ErrorResponse),
        (status = 401, description = "Invalid, expired or non-refresh token", body = ErrorResponse),
        (status = 403, description = "Principal deactivated or deleted", body = ErrorResponse),
        (status = 429, description = "Rotation budget spent", body = ErrorResponse)
    ),
    tag = "gate",
)]
/// Exchange a refresh token for a fresh access/refresh pair.
///
/// Only tokens minted as refresh tokens are accepted; an access token
/// presented here is rejected outright. The refresh token then goes
/// through the same live directory re-check as any bearer credential, so
/// a deactivated principal cannot keep rotating tokens. The new pair
/// reflects the directory's current role.
pub async fn refresh(
    Extension(state): Extension<Arc<GateState>>,
    headers: HeaderMap,
    payload: Option<Json<RefreshRequest>>,
) -> Result<(StatusCode, HeaderMap, Json<TokenPairResponse>), ApiError> {
    require_within_rate(&state.limits().token_refresh, &headers).await?;

    let Some(Json(request)) = payload else {
        return Err(ApiError::bad_request("missing payload"));
    };

    let now = unix_now();
    let principal = state
        .authenticator()
        .tokens()
        .authenticate_refresh(&request.refresh_token, now)
        .await?;

    let signer = state.authenticator().tokens().signer();
    let access_token = signer.issue_access(&principal, now)?;
    let refresh_token = signer.issue_refresh(&principal, now)?;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));

    Ok((
        StatusCode::OK,
        response_headers,
        Json(TokenPairResponse {
            access_token,
            refresh_token,
            expires_in: signer.access_ttl_seconds(),
        }),
    ))
}
