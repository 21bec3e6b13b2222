//! Role lookup collaborator.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::acl::RoleDefinition;

/// Where role definitions come from.
///
/// Errors are dependency failures; callers map them to 500, never to a
/// permission denial.
#[async_trait]
pub trait RoleSource: Send + Sync {
    async fn find_role_by_name(&self, name: &str) -> Result<Option<RoleDefinition>>;
}

/// In-memory role source for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryRoleSource {
    roles: Mutex<HashMap<String, RoleDefinition>>,
}

impl MemoryRoleSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, role: RoleDefinition) {
        self.roles.lock().await.insert(role.name.clone(), role);
    }
}

#[async_trait]
impl RoleSource for MemoryRoleSource {
    async fn find_role_by_name(&self, name: &str) -> Result<Option<RoleDefinition>> {
        Ok(self.roles.lock().await.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn finds_inserted_roles_by_name() -> Result<()> {
        let source = MemoryRoleSource::new();
        source
            .insert(RoleDefinition::new(
                "treasurer",
                false,
                Some(HashMap::from([(
                    "accounting".to_string(),
                    HashSet::from(["read".to_string()]),
                )])),
            ))
            .await;

        let role = source.find_role_by_name("treasurer").await?;
        assert!(role.is_some_and(|role| role.has_permission("accounting", "read")));
        assert!(source.find_role_by_name("nobody").await?.is_none());
        Ok(())
    }
}
