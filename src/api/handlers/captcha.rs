//! CAPTCHA challenge endpoints.

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
use crate::captcha::ChallengeKind;
use crate::clock::unix_now;

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct ChallengeRequest {
    /// `math` (default) or `code`.
    pub kind: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    pub token_id: String,
    /// Plain-text challenge to present to the human.
    pub rendering: String,
    /// Unix seconds.
    pub expires_at: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub captcha_token: Option<String>,
    pub captcha_response: Option<String>,
}

#[utoipa::path(
    post,
    path= "/v1/captcha",
    request_body = ChallengeRequest,
    responses (
        (status = 200, description = "New challenge", body = ChallengeResponse),
        (status = 400, description = "Unknown challenge kind", body = ErrorResponse),
        (status = 429, description = "Challenge budget spent", body = ErrorResponse)
    ),
    tag = "protection",
)]
/// Issue a new human-verification challenge.
pub async fn challenge(
    Extension(state): Extension<Arc<GateState>>,
    headers: HeaderMap,
    payload: Option<Json<ChallengeRequest>>,
) -> Result<(StatusCode, HeaderMap, Json<ChallengeResponse>), ApiError> {
    require_within_rate(&state.limits().captcha, &headers).await?;

    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let kind = match request.kind.as_deref() {
        None | Some("math") => ChallengeKind::Math,
        Some("code") => ChallengeKind::Code,
        Some(other) => {
            return Err(ApiError::bad_request(format!(
                "unknown challenge kind: {other}"
            )))
        }
    };

    let issued = state.captcha().issue(kind, unix_now()).await;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));

    Ok((
        StatusCode::OK,
        response_headers,
        Json(ChallengeResponse {
            token_id: issued.token_id,
            rendering: issued.rendering,
            expires_at: issued.expires_at,
        }),
    ))
}

#[utoipa::path(
    post,
    path= "/v1/captcha/verify",
    request_body = VerifyRequest,
    responses (
        (status = 204, description = "Response accepted; challenge consumed"),
        (status = 400, description = "Missing, wrong, expired or reused challenge", body = ErrorResponse),
        (status = 429, description = "Verification budget spent", body = ErrorResponse)
    ),
    tag = "protection",
)]
/// Verify a challenge response, consuming the challenge either way.
pub async fn verify(
    Extension(state): Extension<Arc<GateState>>,
    headers: HeaderMap,
    payload: Option<Json<VerifyRequest>>,
) -> Result<StatusCode, ApiError> {
    require_within_rate(&state.limits().captcha, &headers).await?;

    let Some(Json(request)) = payload else {
        return Err(ApiError::from(crate::captcha::Error::MissingFields));
    };

    state
        .captcha()
        .validate(
            request.captcha_token.as_deref(),
            request.captcha_response.as_deref(),
            unix_now(),
        )
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
