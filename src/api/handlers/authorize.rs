//! The full gate: authenticate, CSRF-check, authorize.
//!
//! `POST /v1/authorize` is the decision endpoint other platform modules
//! call before acting on a request: either credential scheme is accepted,
//! the CSRF token is validated when protection is on, and the caller's
//! live role is checked against the requested resource/action pair.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::envelope::{ApiError, ErrorResponse};
use crate::api::handlers::{require_csrf, require_permission, require_principal, GateState};
use crate::auth::CredentialPolicy;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AuthorizeRequest {
    pub resource: String,
    pub action: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AuthorizeResponse {
    pub allowed: bool,
    pub principal_id: Uuid,
    pub username: String,
    pub role: String,
}

#[utoipa::path(
    post,
    path= "/v1/authorize",
    request_body = AuthorizeRequest,
    responses (
        (status = 200, description = "Request is allowed", body = AuthorizeResponse),
        (status = 400, description = "Missing or empty resource/action", body = ErrorResponse),
        (status = 401, description = "Missing or invalid credentials", body = ErrorResponse),
        (status = 403, description = "Inactive principal, CSRF rejection or permission denial", body = ErrorResponse),
        (status = 500, description = "Directory or store unavailable", body = ErrorResponse)
    ),
    tag = "gate",
)]
/// Decide whether the caller may perform `action` on `resource`.
///
/// Check order is fixed: credentials first, then CSRF, then the
/// permission lookup, so a forged request never learns whether its
/// target would have been allowed.
pub async fn authorize(
    Extension(state): Extension<Arc<GateState>>,
    headers: HeaderMap,
    payload: Option<Json<AuthorizeRequest>>,
) -> Result<(StatusCode, Json<AuthorizeResponse>), ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::bad_request("missing payload"));
    };
    if request.resource.trim().is_empty() || request.action.trim().is_empty() {
        return Err(ApiError::bad_request("resource and action are required"));
    }

    let principal = require_principal(&state, &headers, CredentialPolicy::Either).await?;
    require_csrf(&state, &headers, Some(&principal)).await?;
    require_permission(&state, &principal, &request.resource, &request.action).await?;

    Ok((
        StatusCode::OK,
        Json(AuthorizeResponse {
            allowed: true,
            principal_id: principal.id,
            username: principal.username,
            role: principal.role,
        }),
    ))
}
