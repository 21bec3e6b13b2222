//! Role-based permission decisions.
//!
//! A role maps resource names to sets of actions, with `"*"` as a wildcard
//! for "all resources" or "all actions". The engine is deny-by-default:
//! unknown resources, empty maps, and absent maps all deny, and no input
//! can make a decision fail instead of denying.

mod source;
pub mod storage;

pub use source::{MemoryRoleSource, RoleSource};

use std::collections::{HashMap, HashSet};

/// Wildcard sentinel accepted for both resources and actions.
pub const WILDCARD: &str = "*";

/// A named role and its resource/action grants.
///
/// Permission maps are normalized once at load time; per-request checks are
/// plain map lookups.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleDefinition {
    pub name: String,
    /// System roles cannot be modified or deleted by administrators.
    pub is_system: bool,
    permissions: HashMap<String, HashSet<String>>,
}

impl RoleDefinition {
    /// Build a role from an optional permission map.
    ///
    /// `None` normalizes to an empty (deny-all) map so later checks never
    /// have to distinguish "missing" from "empty".
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        is_system: bool,
        permissions: Option<HashMap<String, HashSet<String>>>,
    ) -> Self {
        Self {
            name: name.into(),
            is_system,
            permissions: permissions.unwrap_or_default(),
        }
    }

    /// True iff this role may perform `action` on `resource`.
    ///
    /// Exact and wildcard entries are independent grants combined with OR;
    /// wildcards only ever add access, so there is no precedence to resolve.
    #[must_use]
    pub fn has_permission(&self, resource: &str, action: &str) -> bool {
        let allows = |actions: &HashSet<String>| {
            actions.contains(action) || actions.contains(WILDCARD)
        };
        self.permissions.get(resource).is_some_and(allows)
            || self.permissions.get(WILDCARD).is_some_and(allows)
    }

    /// True iff this role may perform *any* action on `resource`.
    #[must_use]
    pub fn can_access_resource(&self, resource: &str) -> bool {
        self.permissions
            .get(resource)
            .is_some_and(|actions| !actions.is_empty())
            || self
                .permissions
                .get(WILDCARD)
                .is_some_and(|actions| !actions.is_empty())
    }

    /// Actions granted on `resource`; empty, never absent, for unknown ones.
    #[must_use]
    pub fn get_resource_permissions(&self, resource: &str) -> HashSet<String> {
        self.permissions.get(resource).cloned().unwrap_or_default()
    }
}
