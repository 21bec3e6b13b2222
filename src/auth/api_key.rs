//! Static API key credentials.
//!
//! Keys are 256-bit random secrets handed to the caller exactly once at
//! creation; only the SHA-256 hash is ever stored or compared. Revocation
//! (soft, auditable) and deletion (hard purge) are distinct operations.

use anyhow::Result;
use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::auth::Error;
use crate::clock::unix_now_millis;

/// Plaintext keys carry this prefix so they are recognizable in configs
/// and grep-able in leaked logs without revealing anything about the hash.
const KEY_PREFIX: &str = "pk_";

/// Stored form of one API key. The plaintext never appears here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiKeyRecord {
    pub id: Uuid,
    /// Hex SHA-256 of the plaintext key; unique per store.
    pub key_hash: String,
    /// Linked directory principal, or `None` for service accounts.
    pub owner_id: Option<Uuid>,
    pub name: String,
    pub active: bool,
    /// Unix seconds; `None` means the key never expires.
    pub expires_at: Option<i64>,
    /// Unix milliseconds of the last accepted validation.
    pub last_used_at: Option<i64>,
}

impl ApiKeyRecord {
    #[must_use]
    pub fn is_expired(&self, now_unix_seconds: i64) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= now_unix_seconds)
    }
}

/// Persistence interface for API keys.
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn create(&self, record: ApiKeyRecord) -> Result<()>;
    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>>;
    async fn find_by_owner(&self, owner_id: Uuid) -> Result<Vec<ApiKeyRecord>>;
    /// Soft revocation: sets `active = false`, keeps the row for audit.
    async fn deactivate(&self, id: Uuid) -> Result<bool>;
    /// Hard deletion: purges the row entirely.
    async fn delete(&self, id: Uuid) -> Result<bool>;
    /// Record a successful use at `when_unix_millis`.
    async fn touch(&self, id: Uuid, when_unix_millis: i64) -> Result<()>;
}

/// Generate a fresh key: `(plaintext, hex_sha256_hash)`.
///
/// The plaintext is returned to the caller exactly once and never stored.
///
/// # Errors
///
/// Returns [`Error::Entropy`] if the OS random source fails.
pub fn generate_key() -> Result<(String, String), Error> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|_| Error::Entropy)?;
    let plaintext = format!("{KEY_PREFIX}{}", Base64UrlUnpadded::encode_string(&bytes));
    let hash = hash_key(&plaintext);
    Ok((plaintext, hash))
}

/// One-way hash used for storage and lookup.
#[must_use]
pub fn hash_key(plaintext: &str) -> String {
    let digest = Sha256::digest(plaintext.as_bytes());
    base16ct::lower::encode_string(&digest)
}

/// Validates presented keys and manages their lifecycle.
pub struct ApiKeyVerifier {
    store: Arc<dyn ApiKeyStore>,
}

impl ApiKeyVerifier {
    #[must_use]
    pub fn new(store: Arc<dyn ApiKeyStore>) -> Self {
        Self { store }
    }

    /// Create and persist a new key, returning the plaintext once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Entropy`] on random source failure or
    /// [`Error::StoreUnavailable`] when persistence fails.
    pub async fn create(
        &self,
        name: &str,
        owner_id: Option<Uuid>,
        expires_at: Option<i64>,
    ) -> Result<(String, ApiKeyRecord), Error> {
        let (plaintext, key_hash) = generate_key()?;
        let record = ApiKeyRecord {
            id: Uuid::new_v4(),
            key_hash,
            owner_id,
            name: name.to_string(),
            active: true,
            expires_at,
            last_used_at: None,
        };
        self.store.create(record.clone()).await.map_err(|err| {
            warn!("failed to persist api key: {err}");
            Error::StoreUnavailable
        })?;
        Ok((plaintext, record))
    }

    /// Validate a presented plaintext key.
    ///
    /// On acceptance, `last_used_at` is updated off the request path; a
    /// bookkeeping failure is logged, never surfaced to the caller.
    ///
    /// # Errors
    ///
    /// - [`Error::ApiKeyNotFound`] when no record matches the hash,
    /// - [`Error::ApiKeyRevoked`] when the record is inactive,
    /// - [`Error::ApiKeyExpired`] when past `expires_at`,
    /// - [`Error::StoreUnavailable`] when the store itself fails.
    pub async fn validate(
        &self,
        presented: &str,
        now_unix_seconds: i64,
    ) -> Result<ApiKeyRecord, Error> {
        let key_hash = hash_key(presented);
        let record = self
            .store
            .find_by_hash(&key_hash)
            .await
            .map_err(|err| {
                warn!("api key lookup failed: {err}");
                Error::StoreUnavailable
            })?
            .ok_or(Error::ApiKeyNotFound)?;

        if !record.active {
            return Err(Error::ApiKeyRevoked);
        }
        if record.is_expired(now_unix_seconds) {
            return Err(Error::ApiKeyExpired);
        }

        let store = Arc::clone(&self.store);
        let key_id = record.id;
        tokio::spawn(async move {
            if let Err(err) = store.touch(key_id, unix_now_millis()).await {
                warn!(%key_id, "failed to record api key use: {err}");
            }
        });

        Ok(record)
    }

    /// List keys owned by a principal. Hashes stay internal to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] when the store fails.
    pub async fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<ApiKeyRecord>, Error> {
        self.store.find_by_owner(owner_id).await.map_err(|err| {
            warn!("api key listing failed: {err}");
            Error::StoreUnavailable
        })
    }

    /// Soft-revoke: the record stays for audit with `active = false`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ApiKeyNotFound`] if no record matches, or
    /// [`Error::StoreUnavailable`] when the store fails.
    pub async fn revoke(&self, id: Uuid) -> Result<(), Error> {
        let found = self.store.deactivate(id).await.map_err(|err| {
            warn!("api key revocation failed: {err}");
            Error::StoreUnavailable
        })?;
        if found {
            Ok(())
        } else {
            Err(Error::ApiKeyNotFound)
        }
    }

    /// Hard-delete the record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ApiKeyNotFound`] if no record matches, or
    /// [`Error::StoreUnavailable`] when the store fails.
    pub async fn delete(&self, id: Uuid) -> Result<(), Error> {
        let found = self.store.delete(id).await.map_err(|err| {
            warn!("api key deletion failed: {err}");
            Error::StoreUnavailable
        })?;
        if found {
            Ok(())
        } else {
            Err(Error::ApiKeyNotFound)
        }
    }
}

/// In-memory key store for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryApiKeyStore {
    records: Mutex<HashMap<Uuid, ApiKeyRecord>>,
}

impl MemoryApiKeyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiKeyStore for MemoryApiKeyStore {
    async fn create(&self, record: ApiKeyRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        if records
            .values()
            .any(|existing| existing.key_hash == record.key_hash)
        {
            anyhow::bail!("duplicate key hash");
        }
        records.insert(record.id, record);
        Ok(())
    }

    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .find(|record| record.key_hash == key_hash)
            .cloned())
    }

    async fn find_by_owner(&self, owner_id: Uuid) -> Result<Vec<ApiKeyRecord>> {
        let records = self.records.lock().await;
        let mut owned: Vec<ApiKeyRecord> = records
            .values()
            .filter(|record| record.owner_id == Some(owner_id))
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(owned)
    }

    async fn deactivate(&self, id: Uuid) -> Result<bool> {
        let mut records = self.records.lock().await;
        match records.get_mut(&id) {
            Some(record) => {
                record.active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.records.lock().await.remove(&id).is_some())
    }

    async fn touch(&self, id: Uuid, when_unix_millis: i64) -> Result<()> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(&id) {
            // Monotonic even if two acceptances land in the same millisecond.
            let floor = record.last_used_at.map_or(when_unix_millis, |last| {
                when_unix_millis.max(last + 1)
            });
            record.last_used_at = Some(floor);
        }
        Ok(())
    }
}
