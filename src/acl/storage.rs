//! Postgres-backed role source.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::{HashMap, HashSet};
use tracing::Instrument;

use crate::acl::{RoleDefinition, RoleSource};

/// Roles and grants from the `roles` / `role_permissions` tables.
///
/// `role_permissions` holds one row per (resource, action) grant; the rows
/// are folded into the permission map of a [`RoleDefinition`] per lookup.
pub struct PgRoleSource {
    pool: PgPool,
}

impl PgRoleSource {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn collect_grants(
    rows: impl IntoIterator<Item = (String, String)>,
) -> HashMap<String, HashSet<String>> {
    let mut permissions: HashMap<String, HashSet<String>> = HashMap::new();
    for (resource, action) in rows {
        permissions.entry(resource).or_default().insert(action);
    }
    permissions
}

#[async_trait]
impl RoleSource for PgRoleSource {
    async fn find_role_by_name(&self, name: &str) -> Result<Option<RoleDefinition>> {
        let query = "SELECT name, is_system FROM roles WHERE name = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let role_row = sqlx::query(query)
            .bind(name)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to look up role")?;

        let Some(role_row) = role_row else {
            return Ok(None);
        };

        let query = "SELECT resource, action FROM role_permissions WHERE role_name = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let grant_rows = sqlx::query(query)
            .bind(name)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to load role permissions")?;

        let permissions = collect_grants(
            grant_rows
                .iter()
                .map(|row| (row.get("resource"), row.get("action"))),
        );

        Ok(Some(RoleDefinition::new(
            role_row.get::<String, _>("name"),
            role_row.get("is_system"),
            Some(permissions),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_fold_per_resource() {
        let permissions = collect_grants([
            ("accounting".to_string(), "read".to_string()),
            ("accounting".to_string(), "update".to_string()),
            ("api-keys".to_string(), "create".to_string()),
        ]);

        assert_eq!(permissions.len(), 2);
        let accounting = permissions.get("accounting").map(HashSet::len);
        assert_eq!(accounting, Some(2));
        assert!(permissions["api-keys"].contains("create"));
    }
}
