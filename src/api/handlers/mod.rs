//! Route handlers and the shared gate state they run against.

pub mod api_keys;
pub mod authorize;
pub mod captcha;
pub mod csrf_token;
pub mod echo;
pub mod health;
pub mod root;
pub mod token;

use axum::http::{HeaderMap, StatusCode};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::acl::RoleSource;
use crate::api::envelope::ApiError;
use crate::api::rate_limit::{FixedWindowLimiter, RateLimits};
use crate::auth::{CredentialPolicy, DualAuthenticator, Principal};
use crate::captcha::CaptchaChallengeService;
use crate::clock::unix_now;
use crate::csrf::{CsrfTokenService, ValidationContext};

/// Header carrying the CSRF synchronizer token on mutating requests.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Gate behavior toggles.
#[derive(Clone, Copy, Debug)]
pub struct AuthConfig {
    /// CSRF checks on mutating endpoints are defense-in-depth and can be
    /// switched off for deployments that only ever see header-based auth.
    pub csrf_protection: bool,
    /// Demand a solved CAPTCHA on flows that opt into human verification.
    pub captcha_required: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            csrf_protection: true,
            captcha_required: false,
        }
    }
}

impl AuthConfig {
    #[must_use]
    pub fn with_csrf_protection(mut self, enabled: bool) -> Self {
        self.csrf_protection = enabled;
        self
    }

    #[must_use]
    pub fn with_captcha_required(mut self, required: bool) -> Self {
        self.captcha_required = required;
        self
    }
}

/// Everything a handler needs, shared via `Extension<Arc<GateState>>`.
pub struct GateState {
    authenticator: DualAuthenticator,
    roles: Arc<dyn RoleSource>,
    csrf: CsrfTokenService,
    captcha: Arc<CaptchaChallengeService>,
    config: AuthConfig,
    limits: RateLimits,
}

impl GateState {
    #[must_use]
    pub fn new(
        authenticator: DualAuthenticator,
        roles: Arc<dyn RoleSource>,
        csrf: CsrfTokenService,
        captcha: Arc<CaptchaChallengeService>,
        config: AuthConfig,
    ) -> Self {
        Self {
            authenticator,
            roles,
            csrf,
            captcha,
            config,
            limits: RateLimits::default(),
        }
    }

    #[must_use]
    pub fn authenticator(&self) -> &DualAuthenticator {
        &self.authenticator
    }

    #[must_use]
    pub fn csrf(&self) -> &CsrfTokenService {
        &self.csrf
    }

    #[must_use]
    pub fn captcha(&self) -> &Arc<CaptchaChallengeService> {
        &self.captcha
    }

    #[must_use]
    pub fn captcha_required(&self) -> bool {
        self.config.captcha_required
    }

    #[must_use]
    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }
}

/// Throttle the request against `limiter`, keyed by client address.
///
/// Requests with no proxy headers share one bucket; the service runs
/// behind a proxy in any deployment where that matters.
pub async fn require_within_rate(
    limiter: &FixedWindowLimiter,
    headers: &HeaderMap,
) -> Result<(), ApiError> {
    let key = extract_client_ip(headers).unwrap_or_else(|| "direct".to_string());
    if limiter.try_acquire(&key, unix_now()).await {
        Ok(())
    } else {
        debug!(client = %key, "request rate limited");
        Err(ApiError::too_many_requests("too many requests, retry later"))
    }
}

/// Authenticate the request or fail with the mapped status.
pub async fn require_principal(
    state: &GateState,
    headers: &HeaderMap,
    policy: CredentialPolicy,
) -> Result<Principal, ApiError> {
    state
        .authenticator
        .authenticate(headers, policy, unix_now())
        .await
        .map_err(ApiError::from)
}

/// Authenticate when credentials are present, stay anonymous otherwise.
///
/// Invalid presented credentials degrade to anonymous instead of failing:
/// the callers of this guard only use the identity to *bind* issued state,
/// never to grant anything.
pub async fn optional_principal(state: &GateState, headers: &HeaderMap) -> Option<Principal> {
    match state
        .authenticator
        .authenticate(headers, CredentialPolicy::Either, unix_now())
        .await
    {
        Ok(principal) => Some(principal),
        Err(err) => {
            debug!("optional authentication not used: {err}");
            None
        }
    }
}

/// Check the principal's role for `action` on `resource`.
///
/// A role missing from the role source denies: stale tokens referencing a
/// deleted role must not keep their access.
pub async fn require_permission(
    state: &GateState,
    principal: &Principal,
    resource: &str,
    action: &str,
) -> Result<(), ApiError> {
    let role = state
        .roles
        .find_role_by_name(&principal.role)
        .await
        .map_err(|err| {
            warn!(role = %principal.role, "role lookup failed: {err}");
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "role source unavailable",
            )
        })?;

    let allowed = role.is_some_and(|role| role.has_permission(resource, action));
    if allowed {
        Ok(())
    } else {
        debug!(
            principal = %principal.username,
            role = %principal.role,
            resource,
            action,
            "permission denied"
        );
        Err(ApiError::from(crate::auth::Error::PermissionDenied))
    }
}

/// Validate the CSRF token on a mutating request, when protection is on.
pub async fn require_csrf(
    state: &GateState,
    headers: &HeaderMap,
    principal: Option<&Principal>,
) -> Result<(), ApiError> {
    if !state.config.csrf_protection {
        return Ok(());
    }
    let presented = headers
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok());
    let context = ValidationContext {
        principal_id: principal.map(|p| p.id),
        ip_address: extract_client_ip(headers),
    };
    state
        .csrf
        .validate(presented, &context, unix_now())
        .await
        .map_err(ApiError::from)
}

/// Client address as reported by the proxy chain.
///
/// First `X-Forwarded-For` hop wins, then `X-Real-IP`. Informational only;
/// nothing security-relevant keys off this value.
#[must_use]
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        let first = forwarded.split(',').next().map(str::trim).unwrap_or("");
        if !first.is_empty() {
            return Some(first.to_string());
        }
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
pub(crate) mod test_support {
    //! In-memory gate fixture shared by handler tests.

    use super::*;
    use crate::acl::{MemoryRoleSource, RoleDefinition};
    use crate::auth::api_key::{ApiKeyStore, ApiKeyVerifier, MemoryApiKeyStore};
    use crate::auth::directory::{Directory, DirectoryEntry, MemoryDirectory};
    use crate::auth::token::{
        TokenSigner, DEFAULT_ACCESS_TTL_SECONDS, DEFAULT_REFRESH_TTL_SECONDS,
    };
    use crate::auth::CredentialVerifier;
    use crate::csrf::MemoryCsrfStore;
    use axum::http::header::AUTHORIZATION;
    use axum::http::HeaderValue;
    use secrecy::SecretString;
    use std::collections::{HashMap, HashSet};
    use uuid::Uuid;

    pub const TEST_SECRET: &str = "0123456789abcdef0123456789abcdef";

    pub struct Gate {
        pub state: Arc<GateState>,
        pub directory: Arc<MemoryDirectory>,
        pub roles: Arc<MemoryRoleSource>,
        pub user: Principal,
    }

    pub async fn gate(csrf_protection: bool, csrf_single_use: bool) -> Gate {
        gate_with(
            AuthConfig::default().with_csrf_protection(csrf_protection),
            csrf_single_use,
        )
        .await
    }

    pub async fn gate_with(config: AuthConfig, csrf_single_use: bool) -> Gate {
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
                    crate::acl::WILDCARD.to_string(),
                    HashSet::from([crate::acl::WILDCARD.to_string()]),
                )])),
            ))
            .await;

        let signer = TokenSigner::new(
            SecretString::from(TEST_SECRET.to_string()),
            DEFAULT_ACCESS_TTL_SECONDS,
            DEFAULT_REFRESH_TTL_SECONDS,
        )
        .expect("test secret is long enough");
        let tokens =
            CredentialVerifier::new(signer, Arc::clone(&directory) as Arc<dyn Directory>);
        let keys =
            ApiKeyVerifier::new(Arc::new(MemoryApiKeyStore::new()) as Arc<dyn ApiKeyStore>);
        let authenticator =
            DualAuthenticator::new(tokens, keys, Arc::clone(&directory) as Arc<dyn Directory>);

        let csrf = CsrfTokenService::new(
            Arc::new(MemoryCsrfStore::new()),
            crate::csrf::DEFAULT_TTL_SECONDS,
            csrf_single_use,
        );
        let captcha = Arc::new(CaptchaChallengeService::new(
            crate::captcha::DEFAULT_TTL_SECONDS,
        ));

        let state = Arc::new(GateState::new(
            authenticator,
            Arc::clone(&roles) as Arc<dyn RoleSource>,
            csrf,
            captcha,
            config,
        ));

        Gate {
            state,
            directory,
            roles,
            user,
        }
    }

    pub fn bearer_headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).expect("ascii token"),
        );
        headers
    }

    pub fn access_token(gate: &Gate) -> String {
        gate.state
            .authenticator()
            .tokens()
            .signer()
            .issue_access(&gate.user, unix_now())
            .expect("signing cannot fail with a valid secret")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{access_token, bearer_headers, gate};
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(extract_client_ip(&headers).as_deref(), Some("203.0.113.7"));

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(extract_client_ip(&headers).as_deref(), Some("10.0.0.2"));

        assert_eq!(extract_client_ip(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn require_permission_denies_unknown_role() {
        let fixture = gate(false, false).await;
        let ghost = Principal {
            role: "deleted-role".to_string(),
            ..fixture.user.clone()
        };
        let result = require_permission(&fixture.state, &ghost, "accounting", "read").await;
        assert!(result.is_err_and(|err| err.status() == StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn require_permission_allows_granted_action() {
        let fixture = gate(false, false).await;
        require_permission(&fixture.state, &fixture.user, "accounting", "read")
            .await
            .expect("treasurer can read accounting");

        let result =
            require_permission(&fixture.state, &fixture.user, "accounting", "delete").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn optional_principal_degrades_to_anonymous() {
        let fixture = gate(false, false).await;
        assert!(optional_principal(&fixture.state, &HeaderMap::new())
            .await
            .is_none());
        assert!(
            optional_principal(&fixture.state, &bearer_headers("not-a-token"))
                .await
                .is_none()
        );

        let token = access_token(&fixture);
        let principal = optional_principal(&fixture.state, &bearer_headers(&token)).await;
        assert_eq!(principal.map(|p| p.id), Some(fixture.user.id));
    }

    #[tokio::test]
    async fn require_csrf_is_a_no_op_when_disabled() {
        let fixture = gate(false, false).await;
        require_csrf(&fixture.state, &HeaderMap::new(), None)
            .await
            .expect("disabled protection accepts anything");
    }

    #[tokio::test]
    async fn require_csrf_enforces_when_enabled() {
        let fixture = gate(true, false).await;
        let result = require_csrf(&fixture.state, &HeaderMap::new(), None).await;
        assert!(result.is_err_and(|err| err.status() == StatusCode::FORBIDDEN));

        let issued = fixture
            .state
            .csrf()
            .generate(None, None, unix_now())
            .await
            .expect("entropy available in tests");
        let mut headers = HeaderMap::new();
        headers.insert(
            CSRF_HEADER,
            HeaderValue::from_str(&issued.token).expect("hex token"),
        );
        require_csrf(&fixture.state, &headers, None)
            .await
            .expect("valid token passes");
    }
}
