//! API key lifecycle endpoints.
//!
//! Key management is token-only: a key cannot mint, list or destroy keys.
//! The plaintext key appears exactly once, in the creation response.

use axum::{
    extract::{Extension, Path, Query},
    http::{header::CACHE_CONTROL, HeaderMap, HeaderValue, StatusCode},
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::api::envelope::{ApiError, ErrorResponse};
use crate::api::handlers::{require_csrf, require_permission, require_principal, GateState};
use crate::auth::api_key::ApiKeyRecord;
use crate::auth::CredentialPolicy;

const API_KEYS_RESOURCE: &str = "api-keys";
const MAX_KEY_NAME_CHARS: usize = 100;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CreateKeyRequest {
    pub name: String,
    /// Unix seconds; omit for a key that never expires.
    pub expires_at: Option<i64>,
    /// Create an owner-less service account key. Needs the `manage` action.
    #[serde(default)]
    pub service: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CreatedKeyResponse {
    pub id: Uuid,
    pub name: String,
    /// Plaintext key, shown only in this response.
    pub api_key: String,
    pub expires_at: Option<i64>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ApiKeySummary {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
    pub expires_at: Option<i64>,
    /// Unix milliseconds of the last accepted validation.
    pub last_used_at: Option<i64>,
}

impl From<ApiKeyRecord> for ApiKeySummary {
    fn from(record: ApiKeyRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            active: record.active,
            expires_at: record.expires_at,
            last_used_at: record.last_used_at,
        }
    }
}

#[derive(IntoParams, Debug, Deserialize, Default)]
#[into_params(parameter_in = Query)]
pub struct DeleteArgs {
    /// Purge the record instead of soft-revoking it.
    #[serde(default)]
    pub purge: bool,
}

#[utoipa::path(
    post,
    path= "/v1/api-keys",
    request_body = CreateKeyRequest,
    responses (
        (status = 201, description = "Key created; plaintext returned once", body = CreatedKeyResponse),
        (status = 400, description = "Missing or invalid name", body = ErrorResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorResponse),
        (status = 403, description = "CSRF rejection or permission denial", body = ErrorResponse)
    ),
    tag = "api-keys",
)]
/// Create an API key owned by the caller (or a service key).
pub async fn create(
    Extension(state): Extension<Arc<GateState>>,
    headers: HeaderMap,
    payload: Option<Json<CreateKeyRequest>>,
) -> Result<(StatusCode, HeaderMap, Json<CreatedKeyResponse>), ApiError> {
    let principal = require_principal(&state, &headers, CredentialPolicy::TokenOnly).await?;
    require_csrf(&state, &headers, Some(&principal)).await?;
    require_permission(&state, &principal, API_KEYS_RESOURCE, "create").await?;

    let Some(Json(request)) = payload else {
        return Err(ApiError::bad_request("missing payload"));
    };
    let name = request.name.trim();
    if name.is_empty() || name.chars().count() > MAX_KEY_NAME_CHARS {
        return Err(ApiError::bad_request("key name must be 1-100 characters"));
    }

    let owner_id = if request.service {
        require_permission(&state, &principal, API_KEYS_RESOURCE, "manage").await?;
        None
    } else {
        Some(principal.id)
    };

    let (plaintext, record) = state
        .authenticator()
        .keys()
        .create(name, owner_id, request.expires_at)
        .await?;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));

    Ok((
        StatusCode::CREATED,
        response_headers,
        Json(CreatedKeyResponse {
            id: record.id,
            name: record.name,
            api_key: plaintext,
            expires_at: record.expires_at,
        }),
    ))
}

#[utoipa::path(
    get,
    path= "/v1/api-keys",
    responses (
        (status = 200, description = "Caller's keys, hashes excluded", body = [ApiKeySummary]),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorResponse),
        (status = 403, description = "Permission denial", body = ErrorResponse)
    ),
    tag = "api-keys",
)]
/// List the caller's own keys.
pub async fn list(
    Extension(state): Extension<Arc<GateState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ApiKeySummary>>, ApiError> {
    let principal = require_principal(&state, &headers, CredentialPolicy::TokenOnly).await?;
    require_permission(&state, &principal, API_KEYS_RESOURCE, "read").await?;

    let keys = state
        .authenticator()
        .keys()
        .list_for_owner(principal.id)
        .await?;
    Ok(Json(keys.into_iter().map(ApiKeySummary::from).collect()))
}

#[utoipa::path(
    delete,
    path= "/v1/api-keys/{id}",
    params(("id" = Uuid, Path, description = "Key id"), DeleteArgs),
    responses (
        (status = 204, description = "Key revoked or purged"),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorResponse),
        (status = 403, description = "CSRF rejection or permission denial", body = ErrorResponse),
        (status = 404, description = "No such key for this caller", body = ErrorResponse)
    ),
    tag = "api-keys",
)]
/// Revoke (default) or purge (`?purge=true`) a key.
///
/// Callers may touch their own keys; other principals' keys additionally
/// need the `manage` action on the `api-keys` resource.
pub async fn delete(
    Extension(state): Extension<Arc<GateState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    args: Option<Query<DeleteArgs>>,
) -> Result<StatusCode, ApiError> {
    let principal = require_principal(&state, &headers, CredentialPolicy::TokenOnly).await?;
    require_csrf(&state, &headers, Some(&principal)).await?;
    require_permission(&state, &principal, API_KEYS_RESOURCE, "delete").await?;

    let owned = state
        .authenticator()
        .keys()
        .list_for_owner(principal.id)
        .await?;
    if !owned.iter().any(|record| record.id == id) {
        // Not the caller's key: only managers may touch it, and for anyone
        // else it does not exist.
        require_permission(&state, &principal, API_KEYS_RESOURCE, "manage")
            .await
            .map_err(|_| ApiError::not_found("api key not found"))?;
    }

    let purge = args.is_some_and(|Query(args)| args.purge);
    let result = if purge {
        state.authenticator().keys().delete(id).await
    } else {
        state.authenticator().keys().revoke(id).await
    };
    match result {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(crate::auth::Error::ApiKeyNotFound) => Err(ApiError::not_found("api key not found")),
        Err(err) => Err(ApiError::from(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::test_support::{access_token, bearer_headers, gate, Gate};
    use crate::auth::directory::DirectoryEntry;
    use crate::auth::Principal;
    use crate::clock::unix_now;

    fn create_request(name: &str, service: bool) -> Option<Json<CreateKeyRequest>> {
        Some(Json(CreateKeyRequest {
            name: name.to_string(),
            expires_at: None,
            service,
        }))
    }

    async fn root_user(fixture: &Gate) -> Principal {
        let root = Principal {
            id: uuid::Uuid::new_v4(),
            username: "admin".to_string(),
            role: "root".to_string(),
            active: true,
        };
        fixture
            .directory
            .insert(DirectoryEntry {
                id: root.id,
                username: root.username.clone(),
                role: root.role.clone(),
                active: true,
            })
            .await;
        root
    }

    #[tokio::test]
    async fn create_returns_plaintext_once_and_key_works() -> Result<(), ApiError> {
        let fixture = gate(false, false).await;
        let token = access_token(&fixture);

        let (status, response_headers, Json(created)) = create(
            Extension(Arc::clone(&fixture.state)),
            bearer_headers(&token),
            create_request("maria-cli", false),
        )
        .await?;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(
            response_headers.get(CACHE_CONTROL).map(HeaderValue::as_bytes),
            Some(b"no-store".as_slice())
        );
        assert!(created.api_key.starts_with("pk_"));

        let record = state_validate(&fixture, &created.api_key).await?;
        assert_eq!(record.owner_id, Some(fixture.user.id));
        Ok(())
    }

    async fn state_validate(
        fixture: &Gate,
        plaintext: &str,
    ) -> Result<ApiKeyRecord, crate::auth::Error> {
        fixture
            .state
            .authenticator()
            .keys()
            .validate(plaintext, unix_now())
            .await
    }

    #[tokio::test]
    async fn key_cannot_manage_keys() -> Result<(), ApiError> {
        let fixture = gate(false, false).await;
        let (key, _) = fixture
            .state
            .authenticator()
            .keys()
            .create("bootstrap", None, None)
            .await?;

        let mut headers = HeaderMap::new();
        headers.insert(
            crate::auth::API_KEY_HEADER,
            HeaderValue::from_str(&key).expect("ascii"),
        );
        let result = create(
            Extension(Arc::clone(&fixture.state)),
            headers,
            create_request("escalation", false),
        )
        .await;
        assert!(result.is_err_and(|err| err.status() == StatusCode::UNAUTHORIZED));
        Ok(())
    }

    #[tokio::test]
    async fn service_keys_need_the_manage_action() -> Result<(), ApiError> {
        let fixture = gate(false, false).await;
        let token = access_token(&fixture);

        // Treasurer has create but not manage.
        let result = create(
            Extension(Arc::clone(&fixture.state)),
            bearer_headers(&token),
            create_request("ci", true),
        )
        .await;
        assert!(result.is_err_and(|err| err.status() == StatusCode::FORBIDDEN));

        let root = root_user(&fixture).await;
        let root_token = fixture
            .state
            .authenticator()
            .tokens()
            .signer()
            .issue_access(&root, unix_now())?;
        let (_, _, Json(created)) = create(
            Extension(Arc::clone(&fixture.state)),
            bearer_headers(&root_token),
            create_request("ci", true),
        )
        .await?;

        let record = state_validate(&fixture, &created.api_key).await?;
        assert_eq!(record.owner_id, None);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_names_are_rejected() -> Result<(), ApiError> {
        let fixture = gate(false, false).await;
        let token = access_token(&fixture);

        for name in ["", "   ", &"x".repeat(MAX_KEY_NAME_CHARS + 1)] {
            let result = create(
                Extension(Arc::clone(&fixture.state)),
                bearer_headers(&token),
                create_request(name, false),
            )
            .await;
            assert!(result.is_err_and(|err| err.status() == StatusCode::BAD_REQUEST));
        }
        Ok(())
    }

    #[tokio::test]
    async fn list_shows_only_the_callers_keys() -> Result<(), ApiError> {
        let fixture = gate(false, false).await;
        let token = access_token(&fixture);

        create(
            Extension(Arc::clone(&fixture.state)),
            bearer_headers(&token),
            create_request("mine", false),
        )
        .await?;
        fixture
            .state
            .authenticator()
            .keys()
            .create("someone-elses", Some(uuid::Uuid::new_v4()), None)
            .await?;

        let Json(keys) = list(
            Extension(Arc::clone(&fixture.state)),
            bearer_headers(&token),
        )
        .await?;
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].name, "mine");
        Ok(())
    }

    #[tokio::test]
    async fn revoke_is_soft_and_purge_is_hard() -> Result<(), ApiError> {
        let fixture = gate(false, false).await;
        let token = access_token(&fixture);

        let (_, _, Json(created)) = create(
            Extension(Arc::clone(&fixture.state)),
            bearer_headers(&token),
            create_request("short-lived", false),
        )
        .await?;

        let status = delete(
            Extension(Arc::clone(&fixture.state)),
            bearer_headers(&token),
            Path(created.id),
            None,
        )
        .await?;
        assert_eq!(status, StatusCode::NO_CONTENT);
        // Revoked, not gone: still listed, but unusable.
        let result = state_validate(&fixture, &created.api_key).await;
        assert!(matches!(result, Err(crate::auth::Error::ApiKeyRevoked)));

        let status = delete(
            Extension(Arc::clone(&fixture.state)),
            bearer_headers(&token),
            Path(created.id),
            Some(Query(DeleteArgs { purge: true })),
        )
        .await?;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let result = state_validate(&fixture, &created.api_key).await;
        assert!(matches!(result, Err(crate::auth::Error::ApiKeyNotFound)));
        Ok(())
    }

    #[tokio::test]
    async fn other_owners_keys_look_nonexistent() -> Result<(), ApiError> {
        let fixture = gate(false, false).await;
        let token = access_token(&fixture);
        let (_, record) = fixture
            .state
            .authenticator()
            .keys()
            .create("theirs", Some(uuid::Uuid::new_v4()), None)
            .await?;

        let result = delete(
            Extension(Arc::clone(&fixture.state)),
            bearer_headers(&token),
            Path(record.id),
            None,
        )
        .await;
        assert!(result.is_err_and(|err| err.status() == StatusCode::NOT_FOUND));

        // A manager may revoke anyone's key.
        let root = root_user(&fixture).await;
        let root_token = fixture
            .state
            .authenticator()
            .tokens()
            .signer()
            .issue_access(&root, unix_now())?;
        let status = delete(
            Extension(Arc::clone(&fixture.state)),
            bearer_headers(&root_token),
            Path(record.id),
            None,
        )
        .await?;
        assert_eq!(status, StatusCode::NO_CONTENT);
        Ok(())
    }
}
