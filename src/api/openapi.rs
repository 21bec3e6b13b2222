//! `OpenAPI` document for the gate's routes.
//!
//! Handlers carry `#[utoipa::path]` annotations; register new ones in
//! `paths(...)` here so the generated spec stays in sync with the router.

use utoipa::OpenApi;

use crate::api::envelope::ErrorResponse;
use crate::api::handlers::{api_keys, authorize, captcha, csrf_token, echo, health, token};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        csrf_token::csrf_token,
        captcha::challenge,
        captcha::verify,
        authorize::authorize,
        echo::echo,
        api_keys::create,
        api_keys::list,
        api_keys::delete,
        token::refresh,
    ),
    components(schemas(
        ErrorResponse,
        health::Health,
        csrf_token::CsrfTokenResponse,
        captcha::ChallengeRequest,
        captcha::ChallengeResponse,
        captcha::VerifyRequest,
        authorize::AuthorizeRequest,
        authorize::AuthorizeResponse,
        echo::EchoRequest,
        echo::EchoResponse,
        api_keys::CreateKeyRequest,
        api_keys::CreatedKeyResponse,
        api_keys::ApiKeySummary,
        token::RefreshRequest,
        token::TokenPairResponse,
    )),
    tags(
        (name = "gate", description = "Authentication and authorization decisions"),
        (name = "protection", description = "CSRF tokens and CAPTCHA challenges"),
        (name = "api-keys", description = "API key lifecycle"),
        (name = "health", description = "Service probes"),
    ),
    info(
        title = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        description = env!("CARGO_PKG_DESCRIPTION"),
        license(name = "BSD-3-Clause"),
        contact(name = "Team Portero", email = "team@portero.dev"),
    )
)]
pub struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
