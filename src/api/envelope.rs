//! Uniform JSON error envelope.
//!
//! Every failure leaves the API as `{"error": <stable code>, "message":
//! <human text>}`. The status mapping is fixed per failure class: bad or
//! missing credentials are 401, live-state rejections are 403, CAPTCHA
//! input problems are 400, throttled requests are 429, and collaborator
//! outages are 500 so an availability problem never reads as a security
//! rejection.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{auth, captcha, csrf};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    /// Stable machine-readable code, e.g. `unauthorized`.
    pub error: String,
    pub message: String,
}

/// Error half of every handler's return type.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: &'static str,
    message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, error: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            error,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    #[must_use]
    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "rate_limited", message)
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        self.error
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.error.to_string(),
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<auth::Error> for ApiError {
    fn from(err: auth::Error) -> Self {
        use auth::Error as E;
        let (status, code) = match err {
            E::MissingCredentials
            | E::TokenFormat
            | E::Base64
            | E::Json(_)
            | E::UnsupportedAlg(_)
            | E::InvalidSignature
            | E::Expired
            | E::WrongTokenType
            | E::SchemeNotAllowed
            | E::ApiKeyNotFound
            | E::ApiKeyExpired => (StatusCode::UNAUTHORIZED, "unauthorized"),
            E::PrincipalNotFound
            | E::PrincipalInactive
            | E::ApiKeyRevoked
            | E::PermissionDenied => (StatusCode::FORBIDDEN, "forbidden"),
            E::DirectoryUnavailable
            | E::StoreUnavailable
            | E::Hash
            | E::WeakSigningSecret
            | E::Entropy => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        Self::new(status, code, err.to_string())
    }
}

impl From<csrf::Error> for ApiError {
    fn from(err: csrf::Error) -> Self {
        // Entropy is the one non-client failure in the CSRF pipeline.
        if err == csrf::Error::Entropy {
            return Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                err.to_string(),
            );
        }
        Self::new(StatusCode::FORBIDDEN, "csrf_rejected", err.to_string())
    }
}

impl From<captcha::Error> for ApiError {
    fn from(err: captcha::Error) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "captcha_rejected", err.to_string())
    }
}
