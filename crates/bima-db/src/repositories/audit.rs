//! Audit repository implementation
//!
//! Query-only: rows enter through [`crate::recorder`] on the mutating
//! transaction, and the schema's append-only triggers reject anything else.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use bima_core::{
    ActiveTenant, AuditAction, AuditEntry, AuditEntryId, AuditFilter, AuditOutcome,
    AuditRepository, EntityKind, Page, Result, UserId,
};

use crate::db_err;

use super::parse_enum;

/// PostgreSQL implementation of AuditRepository
pub struct PgAuditRepository {
    pool: PgPool,
}

impl PgAuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<AuditEntry> {
        let entity_kind: String = row.get("entity_kind");
        let action: String = row.get("action");
        let outcome: String = row.get("outcome");
        Ok(AuditEntry {
            id: AuditEntryId::from_uuid(row.get("id")),
            tenant_id: bima_core::TenantId::from_uuid(row.get("tenant_id")),
            actor_user_id: row
                .get::<Option<uuid::Uuid>, _>("actor_user_id")
                .map(UserId::from_uuid),
            at_ts: row.get("at_ts"),
            entity_kind: parse_enum(
                &entity_kind,
                EntityKind::parse_str,
                "audit_entries.entity_kind",
            )?,
            entity_id: row.get("entity_id"),
            action: parse_enum(&action, AuditAction::parse_str, "audit_entries.action")?,
            outcome: parse_enum(&outcome, AuditOutcome::parse_str, "audit_entries.outcome")?,
            before: row.get("before"),
            after: row.get("after"),
            reason: row.get("reason"),
        })
    }
}

#[async_trait]
impl AuditRepository for PgAuditRepository {
    #[instrument(skip(self, scope, filter))]
    async fn query(
        &self,
        scope: &ActiveTenant,
        filter: &AuditFilter,
        page: Page,
    ) -> Result<Vec<AuditEntry>> {
        let mut builder = sqlx::QueryBuilder::new(
            "SELECT id, tenant_id, actor_user_id, at_ts, entity_kind, entity_id, \
             action, outcome, before, after, reason \
             FROM audit_entries WHERE tenant_id = ",
        );
        builder.push_bind(*scope.id().as_uuid());

        if let Some(kind) = filter.entity_kind {
            builder.push(" AND entity_kind = ").push_bind(kind.as_str());
        }
        if let Some(entity_id) = filter.entity_id {
            builder.push(" AND entity_id = ").push_bind(entity_id);
        }
        if let Some(actor) = filter.actor_user_id {
            builder
                .push(" AND actor_user_id = ")
                .push_bind(*actor.as_uuid());
        }
        if let Some(action) = filter.action {
            builder.push(" AND action = ").push_bind(action.as_str());
        }
        if let Some(from) = filter.from_ts {
            builder.push(" AND at_ts >= ").push_bind(from);
        }
        if let Some(to) = filter.to_ts {
            builder.push(" AND at_ts < ").push_bind(to);
        }

        builder.push(" ORDER BY at_ts DESC LIMIT ");
        builder.push_bind(page.limit());
        builder.push(" OFFSET ");
        builder.push_bind(page.offset());

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(Self::map_row).collect()
    }
}
