//! End-to-end gate flow over the HTTP router with in-memory collaborators.

use axum::body::{to_bytes, Body};
use axum::http::{header::CONTENT_TYPE, Request, Response, StatusCode};
use portero::acl::{MemoryRoleSource, RoleDefinition, RoleSource, WILDCARD};
use portero::api::handlers::{AuthConfig, GateState, CSRF_HEADER};
use portero::api::router;
use portero::auth::api_key::{ApiKeyStore, ApiKeyVerifier, MemoryApiKeyStore};
use portero::auth::directory::{Directory, DirectoryEntry, MemoryDirectory};
use portero::auth::token::{
    TokenSigner, DEFAULT_ACCESS_TTL_SECONDS, DEFAULT_REFRESH_TTL_SECONDS,
};
use portero::auth::{CredentialVerifier, DualAuthenticator, Principal, API_KEY_HEADER};
use portero::captcha::CaptchaChallengeService;
use portero::clock::unix_now;
use portero::csrf::{CsrfTokenService, MemoryCsrfStore};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "0123456789abcdef0123456789abcdef";

struct Gate {
    app: axum::Router,
    state: Arc<GateState>,
    directory: Arc<MemoryDirectory>,
    user: Principal,
}

async fn gate(csrf_protection: bool, csrf_single_use: bool) -> Gate {
    let directory = Arc::new(MemoryDirectory::new());
    let user = Principal {
        id: Uuid::new_v4(),
        username: "maria".to_string(),
        role: "treasurer".to_string(),
        active: true,
    };
    directory
        .insert(DirectoryEntry {
            id: user.id,
            username: user.username.clone(),
            role: user.role.clone(),
            active: true,
        })
        .await;

    let roles = Arc::new(MemoryRoleSource::new());
    roles
        .insert(RoleDefinition::new(
            "treasurer",
            false,
            Some(HashMap::from([
                (
                    "accounting".to_string(),
                    HashSet::from(["read".to_string(), "update".to_string()]),
                ),
                (
                    "api-keys".to_string(),
                    HashSet::from([
                        "create".to_string(),
                        "read".to_string(),
                        "delete".to_string(),
                    ]),
                ),
                (
                    "echo".to_string(),
                    HashSet::from(["create".to_string()]),
                ),
            ])),
        ))
        .await;
    roles
        .insert(RoleDefinition::new(
            "root",
            true,
            Some(HashMap::from([(
                WILDCARD.to_string(),
                HashSet::from([WILDCARD.to_string()]),
            )])),
        ))
        .await;

    let signer = TokenSigner::new(
        SecretString::from(SECRET.to_string()),
        DEFAULT_ACCESS_TTL_SECONDS,
        DEFAULT_REFRESH_TTL_SECONDS,
    )
    .expect("test secret is long enough");
    let tokens = CredentialVerifier::new(signer, Arc::clone(&directory) as Arc<dyn Directory>);
    let keys = ApiKeyVerifier::new(Arc::new(MemoryApiKeyStore::new()) as Arc<dyn ApiKeyStore>);
    let authenticator =
        DualAuthenticator::new(tokens, keys, Arc::clone(&directory) as Arc<dyn Directory>);

    let csrf = CsrfTokenService::new(
        Arc::new(MemoryCsrfStore::new()),
        portero::csrf::DEFAULT_TTL_SECONDS,
        csrf_single_use,
    );
    let captcha = Arc::new(CaptchaChallengeService::new(
        portero::captcha::DEFAULT_TTL_SECONDS,
    ));

    let state = Arc::new(GateState::new(
        authenticator,
        roles as Arc<dyn RoleSource>,
        csrf,
        captcha,
        AuthConfig::default().with_csrf_protection(csrf_protection),
    ));

    Gate {
        app: router(Arc::clone(&state)),
        state,
        directory,
        user,
    }
}

fn access_token(gate: &Gate) -> String {
    gate.state
        .authenticator()
        .tokens()
        .signer()
        .issue_access(&gate.user, unix_now())
        .expect("signing cannot fail with a valid secret")
}

async fn send(gate: &Gate, request: Request<Body>) -> Response<Body> {
    gate.app
        .clone()
        .oneshot(request)
        .await
        .expect("router is infallible")
}

async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body is readable");
    serde_json::from_slice(&bytes).expect("body is json")
}

fn post_json(uri: &str, body: &Value, headers: &[(&str, String)]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, value);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request is well formed")
}

fn get(uri: &str, headers: &[(&str, String)]) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, value);
    }
    builder.body(Body::empty()).expect("request is well formed")
}

fn bearer(token: &str) -> (&'static str, String) {
    ("authorization", format!("Bearer {token}"))
}

fn authorize_body(resource: &str, action: &str) -> Value {
    json!({"resource": resource, "action": action})
}

#[tokio::test]
async fn csrf_token_then_authorize_flow() {
    let fixture = gate(true, false).await;
    let token = access_token(&fixture);

    // Without a CSRF token the gate refuses.
    let denied = send(
        &fixture,
        post_json(
            "/v1/authorize",
            &authorize_body("accounting", "read"),
            &[bearer(&token)],
        ),
    )
    .await;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    // Fetch a token bound to the caller.
    let issued = send(&fixture, get("/v1/csrf-token", &[bearer(&token)])).await;
    assert_eq!(issued.status(), StatusCode::OK);
    let issued = body_json(issued).await;
    let csrf_token = issued["csrfToken"]
        .as_str()
        .expect("token present")
        .to_string();
    assert_eq!(csrf_token.len(), 64);

    // Now the same request passes.
    let allowed = send(
        &fixture,
        post_json(
            "/v1/authorize",
            &authorize_body("accounting", "read"),
            &[bearer(&token), (CSRF_HEADER, csrf_token.clone())],
        ),
    )
    .await;
    assert_eq!(allowed.status(), StatusCode::OK);
    let decision = body_json(allowed).await;
    assert_eq!(decision["allowed"], json!(true));
    assert_eq!(decision["role"], json!("treasurer"));

    // Denied action with valid credentials and CSRF.
    let forbidden = send(
        &fixture,
        post_json(
            "/v1/authorize",
            &authorize_body("accounting", "delete"),
            &[bearer(&token), (CSRF_HEADER, csrf_token)],
        ),
    )
    .await;
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn single_use_csrf_tokens_burn_after_success() {
    let fixture = gate(true, true).await;
    let token = access_token(&fixture);

    let issued = send(&fixture, get("/v1/csrf-token", &[bearer(&token)])).await;
    let issued = body_json(issued).await;
    let csrf_token = issued["csrfToken"]
        .as_str()
        .expect("token present")
        .to_string();

    let request = || {
        post_json(
            "/v1/authorize",
            &authorize_body("accounting", "update"),
            &[bearer(&token), (CSRF_HEADER, csrf_token.clone())],
        )
    };

    let first = send(&fixture, request()).await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = send(&fixture, request()).await;
    assert_eq!(second.status(), StatusCode::FORBIDDEN);
    let envelope = body_json(second).await;
    assert_eq!(envelope["error"], json!("csrf_rejected"));
}

#[tokio::test]
async fn captcha_challenge_is_single_attempt() {
    let fixture = gate(false, false).await;

    let issued = send(
        &fixture,
        post_json("/v1/captcha", &json!({"kind": "code"}), &[]),
    )
    .await;
    assert_eq!(issued.status(), StatusCode::OK);
    let issued = body_json(issued).await;
    let captcha_token = issued["tokenId"].as_str().expect("token present");
    let rendering = issued["rendering"].as_str().expect("challenge present");
    let answer = rendering.rsplit(' ').next().expect("code at the end");

    // A wrong answer consumes the challenge.
    let wrong = send(
        &fixture,
        post_json(
            "/v1/captcha/verify",
            &json!({"captchaToken": captcha_token, "captchaResponse": "nope"}),
            &[],
        ),
    )
    .await;
    assert_eq!(wrong.status(), StatusCode::BAD_REQUEST);

    // Even the right answer is too late now.
    let retry = send(
        &fixture,
        post_json(
            "/v1/captcha/verify",
            &json!({"captchaToken": captcha_token, "captchaResponse": answer}),
            &[],
        ),
    )
    .await;
    assert_eq!(retry.status(), StatusCode::BAD_REQUEST);
    let envelope = body_json(retry).await;
    assert_eq!(envelope["error"], json!("captcha_rejected"));
}

#[tokio::test]
async fn api_key_lifecycle_over_http() {
    let fixture = gate(false, false).await;
    let token = access_token(&fixture);

    let created = send(
        &fixture,
        post_json("/v1/api-keys", &json!({"name": "maria-cli"}), &[bearer(&token)]),
    )
    .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = body_json(created).await;
    let plaintext = created["api_key"]
        .as_str()
        .expect("plaintext once")
        .to_string();
    let key_id = created["id"].as_str().expect("id present").to_string();
    assert!(plaintext.starts_with("pk_"));

    // The key authenticates the owner on the decision endpoint.
    let allowed = send(
        &fixture,
        post_json(
            "/v1/authorize",
            &authorize_body("accounting", "read"),
            &[(API_KEY_HEADER, plaintext.clone())],
        ),
    )
    .await;
    assert_eq!(allowed.status(), StatusCode::OK);

    // Revoke it; the key stops working on the next request.
    let revoked = send(
        &fixture,
        Request::builder()
            .method("DELETE")
            .uri(format!("/v1/api-keys/{key_id}"))
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .expect("request is well formed"),
    )
    .await;
    assert_eq!(revoked.status(), StatusCode::NO_CONTENT);

    let rejected = send(
        &fixture,
        post_json(
            "/v1/authorize",
            &authorize_body("accounting", "read"),
            &[(API_KEY_HEADER, plaintext)],
        ),
    )
    .await;
    assert_eq!(rejected.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn deactivation_cuts_off_live_tokens() {
    let fixture = gate(false, false).await;
    let token = access_token(&fixture);

    let allowed = send(
        &fixture,
        post_json(
            "/v1/authorize",
            &authorize_body("accounting", "read"),
            &[bearer(&token)],
        ),
    )
    .await;
    assert_eq!(allowed.status(), StatusCode::OK);

    fixture.directory.set_active(fixture.user.id, false).await;

    let rejected = send(
        &fixture,
        post_json(
            "/v1/authorize",
            &authorize_body("accounting", "read"),
            &[bearer(&token)],
        ),
    )
    .await;
    assert_eq!(rejected.status(), StatusCode::FORBIDDEN);
    let envelope = body_json(rejected).await;
    assert_eq!(envelope["error"], json!("forbidden"));
}

#[tokio::test]
async fn echo_runs_the_full_chain() {
    let fixture = gate(true, false).await;
    let token = access_token(&fixture);

    let issued = send(&fixture, get("/v1/csrf-token", &[bearer(&token)])).await;
    let issued = body_json(issued).await;
    let csrf_token = issued["csrfToken"]
        .as_str()
        .expect("token present")
        .to_string();

    let response = send(
        &fixture,
        post_json(
            "/v1/echo",
            &json!({"message": "hola"}),
            &[bearer(&token), (CSRF_HEADER, csrf_token)],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["message"], json!("hola"));
    assert_eq!(body["username"], json!("maria"));
}

#[tokio::test]
async fn token_refresh_over_http() {
    let fixture = gate(false, false).await;
    let refresh_token = fixture
        .state
        .authenticator()
        .tokens()
        .signer()
        .issue_refresh(&fixture.user, unix_now())
        .expect("signing cannot fail with a valid secret");

    let response = send(
        &fixture,
        post_json(
            "/v1/token/refresh",
            &json!({"refresh_token": refresh_token}),
            &[],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let pair = body_json(response).await;
    let access = pair["access_token"].as_str().expect("access token");

    let allowed = send(
        &fixture,
        post_json(
            "/v1/authorize",
            &authorize_body("accounting", "read"),
            &[bearer(access)],
        ),
    )
    .await;
    assert_eq!(allowed.status(), StatusCode::OK);
}
