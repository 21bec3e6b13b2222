//! Bearer credential verification with live revocation re-check.

use std::sync::Arc;
use tracing::warn;

use crate::auth::directory::Directory;
use crate::auth::token::{AccessClaims, TokenKind, TokenSigner};
use crate::auth::{Error, Principal};

/// Verifies signed bearer tokens and re-validates the principal against the
/// live directory.
///
/// The directory round-trip is the central correctness property here: a
/// structurally valid token whose principal has been deactivated, or no
/// longer exists, is rejected on the very next request. The lookup happens
/// on the request's own path and is never cached or skipped; when it fails,
/// the request fails closed as a dependency error, not as "authenticated".
pub struct CredentialVerifier {
    signer: TokenSigner,
    directory: Arc<dyn Directory>,
}

impl CredentialVerifier {
    #[must_use]
    pub fn new(signer: TokenSigner, directory: Arc<dyn Directory>) -> Self {
        Self { signer, directory }
    }

    #[must_use]
    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    /// Verify `token` structurally, then against the live directory.
    ///
    /// The returned principal reflects the directory snapshot, not the
    /// claims: a role change since issuance is picked up immediately.
    ///
    /// # Errors
    ///
    /// Structural failures ([`Error::TokenFormat`], [`Error::Expired`],
    /// [`Error::InvalidSignature`], ...), then [`Error::PrincipalNotFound`],
    /// [`Error::PrincipalInactive`], or [`Error::DirectoryUnavailable`].
    pub async fn authenticate(
        &self,
        token: &str,
        now_unix_seconds: i64,
    ) -> Result<Principal, Error> {
        self.authenticate_kind(token, TokenKind::Access, now_unix_seconds)
            .await
    }

    /// Like [`Self::authenticate`], but for the refresh endpoint.
    ///
    /// Only refresh tokens are accepted; a leaked access token must not be
    /// exchangeable for a pair with the longer refresh lifetime.
    ///
    /// # Errors
    ///
    /// [`Error::WrongTokenType`] for an access token, otherwise as
    /// [`Self::authenticate`].
    pub async fn authenticate_refresh(
        &self,
        token: &str,
        now_unix_seconds: i64,
    ) -> Result<Principal, Error> {
        self.authenticate_kind(token, TokenKind::Refresh, now_unix_seconds)
            .await
    }

    async fn authenticate_kind(
        &self,
        token: &str,
        expected: TokenKind,
        now_unix_seconds: i64,
    ) -> Result<Principal, Error> {
        let claims = self.signer.verify(token, now_unix_seconds)?;

        if claims.typ != expected {
            return Err(Error::WrongTokenType);
        }

        // Quick reject on the issuance-time snapshot before the round-trip.
        if !claims.active {
            return Err(Error::PrincipalInactive);
        }

        let entry = self
            .directory
            .fetch_principal_by_id(claims.sub)
            .await
            .map_err(|err| {
                warn!(principal_id = %claims.sub, "directory lookup failed: {err}");
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

    /// Structural verification without the directory re-check.
    ///
    /// Only for flows that immediately re-authenticate, such as exchanging
    /// a refresh token; request gating always goes through
    /// [`Self::authenticate`].
    ///
    /// # Errors
    ///
    /// See [`TokenSigner::verify`].
    pub fn decode(&self, token: &str, now_unix_seconds: i64) -> Result<AccessClaims, Error> {
        self.signer.verify(token, now_unix_seconds)
    }
}
