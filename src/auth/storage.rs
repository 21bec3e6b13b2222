//! Postgres-backed collaborators for the credential verifiers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::api_key::{ApiKeyRecord, ApiKeyStore};
use crate::auth::directory::{Directory, DirectoryEntry};

/// Directory backed by the platform's `users` table.
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Directory for PgDirectory {
    async fn fetch_principal_by_id(&self, id: Uuid) -> Result<Option<DirectoryEntry>> {
        let query = "SELECT id, username, role, active FROM users WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch principal")?;

        Ok(row.map(|row| DirectoryEntry {
            id: row.get("id"),
            username: row.get("username"),
            role: row.get("role"),
            active: row.get("active"),
        }))
    }
}

/// API key persistence backed by the `api_keys` table.
///
/// Timestamps cross the wire as unix numbers; the table stores
/// `timestamptz` and the queries convert at the boundary.
pub struct PgApiKeyStore {
    pool: PgPool,
}

impl PgApiKeyStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> ApiKeyRecord {
    ApiKeyRecord {
        id: row.get("id"),
        key_hash: row.get("key_hash"),
        owner_id: row.get("owner_id"),
        name: row.get("name"),
        active: row.get("active"),
        expires_at: row.get("expires_at_unix"),
        last_used_at: row.get("last_used_at_millis"),
    }
}

const SELECT_COLUMNS: &str = r"
    id, key_hash, owner_id, name, active,
    EXTRACT(EPOCH FROM expires_at)::BIGINT AS expires_at_unix,
    (EXTRACT(EPOCH FROM last_used_at) * 1000)::BIGINT AS last_used_at_millis
";

#[async_trait]
impl ApiKeyStore for PgApiKeyStore {
    async fn create(&self, record: ApiKeyRecord) -> Result<()> {
        let query = r"
            INSERT INTO api_keys (id, key_hash, owner_id, name, active, expires_at)
            VALUES ($1, $2, $3, $4, $5, to_timestamp($6))
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(record.id)
            .bind(&record.key_hash)
            .bind(record.owner_id)
            .bind(&record.name)
            .bind(record.active)
            .bind(record.expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert api key")?;
        Ok(())
    }

    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM api_keys WHERE key_hash = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to look up api key by hash")?;
        Ok(row.as_ref().map(record_from_row))
    }

    async fn find_by_owner(&self, owner_id: Uuid) -> Result<Vec<ApiKeyRecord>> {
        let query =
            format!("SELECT {SELECT_COLUMNS} FROM api_keys WHERE owner_id = $1 ORDER BY name");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let rows = sqlx::query(&query)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list api keys by owner")?;
        Ok(rows.iter().map(record_from_row).collect())
    }

    async fn deactivate(&self, id: Uuid) -> Result<bool> {
        let query = "UPDATE api_keys SET active = FALSE WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to deactivate api key")?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let query = "DELETE FROM api_keys WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete api key")?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch(&self, id: Uuid, when_unix_millis: i64) -> Result<()> {
        // GREATEST keeps the column monotonic under concurrent acceptances.
        let query = r"
            UPDATE api_keys
            SET last_used_at = GREATEST(last_used_at, to_timestamp($2::DOUBLE PRECISION / 1000))
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(when_unix_millis)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to record api key use")?;
        Ok(())
    }
}
