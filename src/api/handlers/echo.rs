//! Echo endpoint running the full gate.
//!
//! Exists so every protection layer can be exercised end to end on one
//! mutating route: CAPTCHA (when required), credentials, CSRF, permission.

use axum::{extract::Extension, http::HeaderMap, response::Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::api::envelope::{ApiError, ErrorResponse};
use crate::api::handlers::{require_csrf, require_permission, require_principal, GateState};
use crate::auth::CredentialPolicy;
use crate::clock::unix_now;

const RESOURCE: &str = "echo";
const ACTION: &str = "create";

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct EchoRequest {
    pub message: String,
    /// Required only when the gate runs with CAPTCHA verification on.
    #[serde(default)]
    pub captcha_token: Option<String>,
    #[serde(default)]
    pub captcha_response: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct EchoResponse {
    pub message: String,
    pub username: String,
}

#[utoipa::path(
    post,
    path= "/v1/echo",
    request_body = EchoRequest,
    responses (
        (status = 200, description = "Request passed every gate layer", body = EchoResponse),
        (status = 400, description = "CAPTCHA rejected", body = ErrorResponse),
        (status = 401, description = "No or invalid credentials", body = ErrorResponse),
        (status = 403, description = "Revoked, CSRF rejected or not permitted", body = ErrorResponse)
    ),
    tag = "gate",
)]
/// Echo the message back after the full protection chain.
pub async fn echo(
    Extension(state): Extension<Arc<GateState>>,
    headers: HeaderMap,
    Json(request): Json<EchoRequest>,
) -> Result<Json<EchoResponse>, ApiError> {
    // Human verification runs before any credential is looked at.
    if state.captcha_required() {
        state
            .captcha()
            .validate(
                request.captcha_token.as_deref(),
                request.captcha_response.as_deref(),
                unix_now(),
            )
            .await?;
    }

    let principal = require_principal(&state, &headers, CredentialPolicy::Either).await?;
    require_csrf(&state, &headers, Some(&principal)).await?;
    require_permission(&state, &principal, RESOURCE, ACTION).await?;

    Ok(Json(EchoResponse {
        message: request.message,
        username: principal.username,
    }))
}
