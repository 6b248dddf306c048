//! Per-entity sync lifecycle rows, read by the HTTP status surface.

use anyhow::Result;
use serde_json::Value as JsonValue;
use sqlx::PgPool;

use crate::rows::{SyncStateRow, SyncStatus};

#[derive(Debug, Clone)]
pub struct SyncStateRepo {
    pool: PgPool,
}

impl SyncStateRepo {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Records a status for an entity and stamps `last_sync_at`. Used on
    /// successful transitions (and for `syncing`/`connected` style states).
    ///
    /// # Errors
    /// Returns an error if the statement fails.
    pub async fn mark(
        &self,
        entity: &str,
        status: SyncStatus,
        metadata: Option<JsonValue>,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO sync_state (entity, status, last_sync_at, metadata, error_message, updated_at)
            VALUES ($1, $2, NOW(), $3, NULL, NOW())
            ON CONFLICT (entity) DO UPDATE SET
                status = EXCLUDED.status,
                last_sync_at = NOW(),
                metadata = COALESCE(EXCLUDED.metadata, sync_state.metadata),
                error_message = NULL,
                updated_at = NOW()
            ",
        )
        .bind(entity)
        .bind(status.as_str())
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Records an error without advancing `last_sync_at`, so staleness keeps
    /// measuring from the last success.
    ///
    /// # Errors
    /// Returns an error if the statement fails.
    pub async fn mark_error(&self, entity: &str, message: &str) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO sync_state (entity, status, last_sync_at, metadata, error_message, updated_at)
            VALUES ($1, 'error', NULL, NULL, $2, NOW())
            ON CONFLICT (entity) DO UPDATE SET
                status = 'error',
                error_message = EXCLUDED.error_message,
                updated_at = NOW()
            ",
        )
        .bind(entity)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Marks an entity disabled by configuration.
    ///
    /// # Errors
    /// Returns an error if the statement fails.
    pub async fn mark_disabled(&self, entity: &str) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO sync_state (entity, status, last_sync_at, metadata, error_message, updated_at)
            VALUES ($1, 'disabled', NULL, NULL, NULL, NOW())
            ON CONFLICT (entity) DO UPDATE SET
                status = 'disabled',
                error_message = NULL,
                updated_at = NOW()
            ",
        )
        .bind(entity)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All sync-state rows, for status surfaces.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn all(&self) -> Result<Vec<SyncStateRow>> {
        let rows = sqlx::query_as::<_, SyncStateRow>(
            r"
            SELECT entity, status, last_sync_at, metadata, error_message
            FROM sync_state
            ORDER BY entity
            ",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// One entity's row, if it has ever reported.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get(&self, entity: &str) -> Result<Option<SyncStateRow>> {
        let row = sqlx::query_as::<_, SyncStateRow>(
            r"
            SELECT entity, status, last_sync_at, metadata, error_message
            FROM sync_state
            WHERE entity = $1
            ",
        )
        .bind(entity)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
