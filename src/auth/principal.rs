//! Normalized authenticated identity.

use uuid::Uuid;

/// Role granted to API keys that have no linked directory entry.
///
/// Such keys are service accounts: machine credentials provisioned by an
/// administrator, trusted with the top role rather than treated as an error.
pub const SERVICE_ACCOUNT_ROLE: &str = "root";

/// Authenticated identity derived per-request from a verified credential.
///
/// Immutable once constructed for the life of the request; downstream
/// permission checks never need to know which credential scheme produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub username: String,
    pub role: String,
    pub active: bool,
}

impl Principal {
    /// Synthesize a principal for an owner-less API key.
    #[must_use]
    pub fn service_account(key_id: Uuid, key_name: &str) -> Self {
        Self {
            id: key_id,
            username: key_name.to_string(),
            role: SERVICE_ACCOUNT_ROLE.to_string(),
            active: true,
        }
    }
}
