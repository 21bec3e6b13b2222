//! Principal directory collaborator.
//!
//! The directory is the source of truth for whether a principal still
//! exists and is still active. It is consulted synchronously on every
//! authenticated request; caching its answers across requests would turn
//! revocation staleness into a security defect.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Live directory snapshot of one principal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub id: Uuid,
    pub username: String,
    pub role: String,
    pub active: bool,
}

/// Lookup interface the credential verifier depends on.
///
/// Implementations must treat errors as dependency failures, never as
/// "principal not found": the caller fails closed with a 500 on `Err`.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn fetch_principal_by_id(&self, id: Uuid) -> Result<Option<DirectoryEntry>>;
}

/// In-memory directory for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryDirectory {
    entries: Mutex<HashMap<Uuid, DirectoryEntry>>,
    unavailable: AtomicBool,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, entry: DirectoryEntry) {
        self.entries.lock().await.insert(entry.id, entry);
    }

    pub async fn remove(&self, id: Uuid) {
        self.entries.lock().await.remove(&id);
    }

    /// Flip the live active flag, as an admin deactivation would.
    pub async fn set_active(&self, id: Uuid, active: bool) {
        if let Some(entry) = self.entries.lock().await.get_mut(&id) {
            entry.active = active;
        }
    }

    /// Simulate a directory outage; lookups fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn fetch_principal_by_id(&self, id: Uuid) -> Result<Option<DirectoryEntry>> {
        if self.unavailable.load(Ordering::SeqCst) {
            anyhow::bail!("directory unavailable");
        }
        Ok(self.entries.lock().await.get(&id).cloned())
    }
}
