//! CSRF synchronizer tokens for mutating requests.
//!
//! Bearer-token auth in an Authorization header is not itself
//! CSRF-susceptible; this layer is defense-in-depth for mixed or future
//! cookie-based auth and for XSS token-theft scenarios. It is independently
//! toggleable and never part of the core authorization decision.

mod store;

pub use store::{CsrfStore, CsrfTokenRecord, MemoryCsrfStore};

use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

pub const DEFAULT_TTL_SECONDS: i64 = 2 * 60 * 60;
/// 32 random bytes rendered as lowercase hex.
pub const TOKEN_HEX_CHARS: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("csrf token missing")]
    Missing,
    #[error("csrf token malformed")]
    Malformed,
    #[error("csrf token not found")]
    NotFound,
    #[error("csrf token expired")]
    Expired,
    #[error("csrf token already used")]
    AlreadyUsed,
    #[error("csrf token bound to another principal")]
    OwnerMismatch,
    #[error("random generator failure")]
    Entropy,
}

/// Token handed back to the client at issuance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedCsrfToken {
    pub token: String,
    pub expires_at: i64,
    pub expires_in_seconds: i64,
}

/// Request-side facts the validation pipeline compares against the record.
#[derive(Clone, Debug, Default)]
pub struct ValidationContext {
    pub principal_id: Option<Uuid>,
    pub ip_address: Option<String>,
}

/// Issues and validates synchronizer tokens against an ephemeral store.
pub struct CsrfTokenService {
    store: Arc<dyn CsrfStore>,
    ttl_seconds: i64,
    single_use: bool,
}

impl CsrfTokenService {
    #[must_use]
    pub fn new(store: Arc<dyn CsrfStore>, ttl_seconds: i64, single_use: bool) -> Self {
        Self {
            store,
            ttl_seconds,
            single_use,
        }
    }

    #[must_use]
    pub fn single_use(&self) -> bool {
        self.single_use
    }

    /// Create and store a fresh token, optionally bound to a principal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Entropy`] if the OS random source fails.
    pub async fn generate(
        &self,
        owner_id: Option<Uuid>,
        ip_address: Option<String>,
        now_unix_seconds: i64,
    ) -> Result<IssuedCsrfToken, Error> {
        let mut bytes = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|_| Error::Entropy)?;
        let token = base16ct::lower::encode_string(&bytes);
        let expires_at = now_unix_seconds + self.ttl_seconds;

        self.store
            .insert(CsrfTokenRecord {
                token: token.clone(),
                expires_at,
                used: false,
                owner_id,
                ip_address,
            })
            .await;

        Ok(IssuedCsrfToken {
            token,
            expires_at,
            expires_in_seconds: self.ttl_seconds,
        })
    }

    /// Validate a presented token for a mutating request.
    ///
    /// Expired records are deleted on observation; in single-use mode the
    /// used-mark is atomic with the validation so concurrent validators of
    /// the same token see exactly one success. An IP mismatch is logged but
    /// never blocks: addresses legitimately change.
    ///
    /// # Errors
    ///
    /// One of [`Error::Missing`], [`Error::Malformed`], [`Error::NotFound`],
    /// [`Error::Expired`], [`Error::AlreadyUsed`], [`Error::OwnerMismatch`].
    pub async fn validate(
        &self,
        presented: Option<&str>,
        context: &ValidationContext,
        now_unix_seconds: i64,
    ) -> Result<(), Error> {
        let Some(token) = presented else {
            return Err(Error::Missing);
        };
        // Shape gate before any store access.
        if !well_formed(token) {
            return Err(Error::Malformed);
        }

        let record = self.store.get(token).await.ok_or(Error::NotFound)?;

        if record.expires_at <= now_unix_seconds {
            self.store.remove(token).await;
            return Err(Error::Expired);
        }

        if self.single_use && record.used {
            return Err(Error::AlreadyUsed);
        }

        if let (Some(owner), Some(principal)) = (record.owner_id, context.principal_id) {
            if owner != principal {
                return Err(Error::OwnerMismatch);
            }
        }

        if let (Some(recorded), Some(current)) = (&record.ip_address, &context.ip_address) {
            if recorded != current {
                warn!(
                    recorded_ip = %recorded,
                    current_ip = %current,
                    "csrf token presented from a different address"
                );
            }
        }

        if self.single_use && !self.store.mark_used_if_unused(token).await {
            // Lost the race between the read above and the mark.
            return Err(Error::AlreadyUsed);
        }

        Ok(())
    }

    /// Remove every expired record; administrative / on-demand trigger.
    pub async fn sweep(&self, now_unix_seconds: i64) -> usize {
        self.store.remove_expired(now_unix_seconds).await
    }
}

/// Fixed-shape check: exactly 64 hex characters.
fn well_formed(token: &str) -> bool {
    token.len() == TOKEN_HEX_CHARS
        && Regex::new(r"^[0-9a-fA-F]{64}$").is_ok_and(|re| re.is_match(token))
}
