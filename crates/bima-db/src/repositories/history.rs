//! History repository implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use bima_core::{
    ActiveTenant, EntityKind, HistoryRecord, HistoryRecordId, HistoryRepository, Page, Result,
};

use crate::db_err;

use super::parse_enum;

/// PostgreSQL implementation of HistoryRepository
pub struct PgHistoryRepository {
    pool: PgPool,
}

impl PgHistoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<HistoryRecord> {
        let entity_kind: String = row.get("entity_kind");
        Ok(HistoryRecord {
            id: HistoryRecordId::from_uuid(row.get("id")),
            tenant_id: bima_core::TenantId::from_uuid(row.get("tenant_id")),
            entity_kind: parse_enum(
                &entity_kind,
                EntityKind::parse_str,
                "history_records.entity_kind",
            )?,
            entity_id: row.get("entity_id"),
            recorded_at: row.get("recorded_at"),
            snapshot: row.get("snapshot"),
        })
    }
}

#[async_trait]
impl HistoryRepository for PgHistoryRepository {
    #[instrument(skip(self, scope))]
    async fn for_entity(
        &self,
        scope: &ActiveTenant,
        entity_kind: EntityKind,
        entity_id: uuid::Uuid,
        page: Page,
    ) -> Result<Vec<HistoryRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, entity_kind, entity_id, recorded_at, snapshot
            FROM history_records
            WHERE tenant_id = $1 AND entity_kind = $2 AND entity_id = $3
            ORDER BY recorded_at DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(scope.id().as_uuid())
        .bind(entity_kind.as_str())
        .bind(entity_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::map_row).collect()
    }

    #[instrument(skip(self, scope))]
    async fn snapshot_as_of(
        &self,
        scope: &ActiveTenant,
        entity_kind: EntityKind,
        entity_id: uuid::Uuid,
        as_of: DateTime<Utc>,
    ) -> Result<Option<HistoryRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, entity_kind, entity_id, recorded_at, snapshot
            FROM history_records
            WHERE tenant_id = $1 AND entity_kind = $2 AND entity_id = $3
              AND recorded_at <= $4
            ORDER BY recorded_at DESC
            LIMIT 1
            "#,
        )
        .bind(scope.id().as_uuid())
        .bind(entity_kind.as_str())
        .bind(entity_id)
        .bind(as_of)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(Self::map_row).transpose()
    }
}
