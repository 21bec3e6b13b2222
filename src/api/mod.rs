//! HTTP surface: router construction and server wiring.

use crate::{
    acl::{storage::PgRoleSource, RoleSource},
    auth::{
        api_key::{ApiKeyStore, ApiKeyVerifier},
        directory::Directory,
        storage::{PgApiKeyStore, PgDirectory},
        token::TokenSigner,
        CredentialVerifier, DualAuthenticator,
    },
    captcha::{self, CaptchaChallengeService},
    cli::globals::GlobalArgs,
    csrf::{CsrfTokenService, MemoryCsrfStore},
};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    routing::{delete, get, post},
    Extension, Router,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;

pub mod envelope;
pub mod handlers;
mod openapi;
pub mod rate_limit;

pub use openapi::openapi;

use handlers::{AuthConfig, GateState, CSRF_HEADER};

/// Build the router over a shared [`GateState`].
///
/// Keep this in sync with the `paths(...)` list in `openapi.rs`.
pub fn router(state: Arc<GateState>) -> Router {
    Router::new()
        .route("/", get(handlers::root::root))
        .route("/health", get(handlers::health::health))
        .route("/v1/csrf-token", get(handlers::csrf_token::csrf_token))
        .route("/v1/captcha", post(handlers::captcha::challenge))
        .route("/v1/captcha/verify", post(handlers::captcha::verify))
        .route("/v1/authorize", post(handlers::authorize::authorize))
        .route("/v1/echo", post(handlers::echo::echo))
        .route(
            "/v1/api-keys",
            post(handlers::api_keys::create).get(handlers::api_keys::list),
        )
        .route("/v1/api-keys/:id", delete(handlers::api_keys::delete))
        .route("/v1/token/refresh", post(handlers::token::refresh))
        .layer(Extension(state))
}

/// Start the server.
///
/// # Errors
///
/// Returns an error if the signing secret is too weak, the database is
/// unreachable, or the listener cannot bind.
pub async fn new(port: u16, dsn: String, globals: &GlobalArgs) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    // Weak secret material aborts startup; the gate never runs degraded.
    let signer = TokenSigner::new(
        globals.signing_secret.clone(),
        globals.access_ttl_seconds,
        globals.refresh_ttl_seconds,
    )
    .context("Invalid token signing secret")?;

    let directory: Arc<dyn Directory> = Arc::new(PgDirectory::new(pool.clone()));
    let keys = ApiKeyVerifier::new(
        Arc::new(PgApiKeyStore::new(pool.clone())) as Arc<dyn ApiKeyStore>
    );
    let tokens = CredentialVerifier::new(signer, Arc::clone(&directory));
    let authenticator = DualAuthenticator::new(tokens, keys, Arc::clone(&directory));

    let roles: Arc<dyn RoleSource> = Arc::new(PgRoleSource::new(pool.clone()));

    let csrf = CsrfTokenService::new(
        Arc::new(MemoryCsrfStore::new()),
        globals.csrf_ttl_seconds,
        globals.csrf_single_use,
    );
    let captcha_service = Arc::new(CaptchaChallengeService::new(globals.captcha_ttl_seconds));
    captcha::spawn_sweeper(
        Arc::clone(&captcha_service),
        captcha::DEFAULT_SWEEP_INTERVAL,
    );

    let state = Arc::new(GateState::new(
        authenticator,
        roles,
        csrf,
        captcha_service,
        AuthConfig::default()
            .with_csrf_protection(globals.csrf_protection)
            .with_captcha_required(globals.captcha_required),
    ));

    let cors = CorsLayer::new()
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static(crate::auth::API_KEY_HEADER),
            HeaderName::from_static(CSRF_HEADER),
        ])
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_origin(Any);

    let app = router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors)
            .layer(Extension(pool)),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
