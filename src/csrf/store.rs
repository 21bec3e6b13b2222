//! Ephemeral keyed store for CSRF synchronizer tokens.
//!
//! Every mutation is atomic per key: the check-and-mark of single-use
//! validation and the compare-and-delete of expiry both happen under one
//! lock acquisition, so two concurrent validations of the same token
//! resolve to exactly one winner. Swap in an external TTL-capable keyed
//! store behind the same trait to survive restarts or run multiple
//! instances.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

/// One issued synchronizer token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsrfTokenRecord {
    /// 64 lowercase hex characters (256 bits of entropy).
    pub token: String,
    /// Unix seconds after which the record is inert.
    pub expires_at: i64,
    /// Meaningful only when the service runs in single-use mode.
    pub used: bool,
    /// Principal the token was issued to, when issued authenticated.
    pub owner_id: Option<Uuid>,
    /// Client address at issuance; informational only.
    pub ip_address: Option<String>,
}

/// Atomic per-key operations the validation pipeline relies on.
#[async_trait]
pub trait CsrfStore: Send + Sync {
    async fn insert(&self, record: CsrfTokenRecord);
    async fn get(&self, token: &str) -> Option<CsrfTokenRecord>;
    /// Compare-and-delete by key; true when the record existed.
    async fn remove(&self, token: &str) -> bool;
    /// Check-and-mark in one step; true only for the single caller that
    /// observed `used == false`.
    async fn mark_used_if_unused(&self, token: &str) -> bool;
    /// Drop every record past expiry; returns how many were removed.
    async fn remove_expired(&self, now_unix_seconds: i64) -> usize;
}

/// In-memory store; one mutexed map, no lock held across awaits.
#[derive(Default)]
pub struct MemoryCsrfStore {
    records: Mutex<HashMap<String, CsrfTokenRecord>>,
}

impl MemoryCsrfStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CsrfStore for MemoryCsrfStore {
    async fn insert(&self, record: CsrfTokenRecord) {
        self.records.lock().await.insert(record.token.clone(), record);
    }

    async fn get(&self, token: &str) -> Option<CsrfTokenRecord> {
        self.records.lock().await.get(token).cloned()
    }

    async fn remove(&self, token: &str) -> bool {
        self.records.lock().await.remove(token).is_some()
    }

    async fn mark_used_if_unused(&self, token: &str) -> bool {
        let mut records = self.records.lock().await;
        match records.get_mut(token) {
            Some(record) if !record.used => {
                record.used = true;
                true
            }
            _ => false,
        }
    }

    async fn remove_expired(&self, now_unix_seconds: i64) -> usize {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, record| record.expires_at > now_unix_seconds);
        before - records.len()
    }
}
