//! Dual-scheme authentication policy.
//!
//! Composes the bearer token verifier and the API key verifier behind one
//! decision: a present-but-invalid credential of an allowed kind fails with
//! that scheme's own error; only total absence of a credential allows the
//! other scheme to be considered. Either way the output is a normalized
//! [`Principal`] so downstream permission checks stay scheme-agnostic.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use std::sync::Arc;
use tracing::warn;

use crate::auth::api_key::ApiKeyVerifier;
use crate::auth::directory::Directory;
use crate::auth::verifier::CredentialVerifier;
use crate::auth::{Error, Principal};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Which credential kinds an endpoint accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialPolicy {
    Either,
    TokenOnly,
    KeyOnly,
}

/// Credentials as presented on the wire, before any verification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PresentedCredentials {
    pub bearer: Option<String>,
    pub api_key: Option<String>,
}

impl PresentedCredentials {
    /// Pull both credential kinds out of the request headers.
    ///
    /// Empty or whitespace-only values count as absent.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            bearer: extract_bearer_token(headers),
            api_key: extract_api_key(headers),
        }
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

/// Authenticates requests via bearer token or API key, per endpoint policy.
pub struct DualAuthenticator {
    tokens: CredentialVerifier,
    keys: ApiKeyVerifier,
    directory: Arc<dyn Directory>,
}

impl DualAuthenticator {
    #[must_use]
    pub fn new(
        tokens: CredentialVerifier,
        keys: ApiKeyVerifier,
        directory: Arc<dyn Directory>,
    ) -> Self {
        Self {
            tokens,
            keys,
            directory,
        }
    }

    #[must_use]
    pub fn tokens(&self) -> &CredentialVerifier {
        &self.tokens
    }

    #[must_use]
    pub fn keys(&self) -> &ApiKeyVerifier {
        &self.keys
    }

    /// Authenticate a request's headers under `policy`.
    ///
    /// API keys take precedence when both kinds are present and allowed.
    ///
    /// # Errors
    ///
    /// [`Error::MissingCredentials`] when nothing usable was presented,
    /// [`Error::SchemeNotAllowed`] when only a disallowed kind was, and
    /// otherwise the failing scheme's own error.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
        policy: CredentialPolicy,
        now_unix_seconds: i64,
    ) -> Result<Principal, Error> {
        let presented = PresentedCredentials::from_headers(headers);
        self.authenticate_presented(&presented, policy, now_unix_seconds)
            .await
    }

    /// Same as [`Self::authenticate`] for pre-extracted credentials.
    ///
    /// # Errors
    ///
    /// See [`Self::authenticate`].
    pub async fn authenticate_presented(
        &self,
        presented: &PresentedCredentials,
        policy: CredentialPolicy,
        now_unix_seconds: i64,
    ) -> Result<Principal, Error> {
        match policy {
            CredentialPolicy::KeyOnly => match &presented.api_key {
                Some(key) => self.authenticate_key(key, now_unix_seconds).await,
                None if presented.bearer.is_some() => Err(Error::SchemeNotAllowed),
                None => Err(Error::MissingCredentials),
            },
            CredentialPolicy::TokenOnly => match &presented.bearer {
                Some(token) => self.tokens.authenticate(token, now_unix_seconds).await,
                None if presented.api_key.is_some() => Err(Error::SchemeNotAllowed),
                None => Err(Error::MissingCredentials),
            },
            CredentialPolicy::Either => {
                // A presented key is committed to: its failure is final even
                // when a bearer token is also present.
                if let Some(key) = &presented.api_key {
                    return self.authenticate_key(key, now_unix_seconds).await;
                }
                if let Some(token) = &presented.bearer {
                    return self.tokens.authenticate(token, now_unix_seconds).await;
                }
                Err(Error::MissingCredentials)
            }
        }
    }

    async fn authenticate_key(
        &self,
        presented: &str,
        now_unix_seconds: i64,
    ) -> Result<Principal, Error> {
        let record = self.keys.validate(presented, now_unix_seconds).await?;

        let Some(owner_id) = record.owner_id else {
            return Ok(Principal::service_account(record.id, &record.name));
        };

        let entry = self
            .directory
            .fetch_principal_by_id(owner_id)
            .await
            .map_err(|err| {
                warn!(%owner_id, "directory lookup failed: {err}");
                Error::DirectoryUnavailable
            })?
            .ok_or(Error::PrincipalNotFound)?;

        if !entry.active {
            return Err(Error::PrincipalInactive);
        }

        Ok(Principal {
            id: entry.id,
            username: entry.username,
            role: entry.role,
            active: entry.active,
        })
    }
}
