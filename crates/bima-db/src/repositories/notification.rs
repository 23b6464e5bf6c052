//! Notification buffer implementation
//!
//! The core only records intent; delivery adapters read this table. Rows
//! carrying a `cycle_date` ride the partial unique index, so a reconciler
//! cycle that runs twice enqueues each reminder exactly once.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use bima_core::{
    ActiveTenant, BimaError, Notification, NotificationId, NotificationKind,
    NotificationPriority, NotificationRepository, Page, Result, UserId,
};

use crate::db_err;

use super::parse_enum;

/// PostgreSQL implementation of NotificationRepository
pub struct PgNotificationRepository {
    pool: PgPool,
}

const COLUMNS: &str = "id, tenant_id, user_id, kind, priority, title, payload, entity_id, \
     cycle_date, created_at, read_at";

impl PgNotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<Notification> {
        let kind: String = row.get("kind");
        let priority: String = row.get("priority");
        Ok(Notification {
            id: NotificationId::from_uuid(row.get("id")),
            tenant_id: bima_core::TenantId::from_uuid(row.get("tenant_id")),
            user_id: UserId::from_uuid(row.get("user_id")),
            kind: parse_enum(&kind, NotificationKind::parse_str, "notifications.kind")?,
            priority: parse_enum(
                &priority,
                NotificationPriority::parse_str,
                "notifications.priority",
            )?,
            title: row.get("title"),
            payload: row.get("payload"),
            entity_id: row.get("entity_id"),
            cycle_date: row.get("cycle_date"),
            created_at: row.get("created_at"),
            read_at: row.get("read_at"),
        })
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    #[instrument(skip(self, scope, notifications))]
    async fn enqueue(
        &self,
        scope: &ActiveTenant,
        notifications: &[Notification],
    ) -> Result<u64> {
        let mut inserted = 0u64;
        for notification in notifications {
            let result = sqlx::query(
                r#"
                INSERT INTO notifications
                    (id, tenant_id, user_id, kind, priority, title, payload,
                     entity_id, cycle_date, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(notification.id.as_uuid())
            .bind(scope.id().as_uuid())
            .bind(notification.user_id.as_uuid())
            .bind(notification.kind.as_str())
            .bind(notification.priority.as_str())
            .bind(&notification.title)
            .bind(&notification.payload)
            .bind(notification.entity_id)
            .bind(notification.cycle_date)
            .bind(notification.created_at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    #[instrument(skip(self, scope))]
    async fn list_for_user(
        &self,
        scope: &ActiveTenant,
        user_id: UserId,
        unread_only: bool,
        page: Page,
    ) -> Result<Vec<Notification>> {
        let mut builder = sqlx::QueryBuilder::new(format!(
            "SELECT {COLUMNS} FROM notifications WHERE tenant_id = "
        ));
        builder.push_bind(*scope.id().as_uuid());
        builder.push(" AND user_id = ").push_bind(*user_id.as_uuid());
        if unread_only {
            builder.push(" AND read_at IS NULL");
        }
        builder.push(" ORDER BY created_at DESC LIMIT ");
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

    #[instrument(skip(self, scope))]
    async fn mark_read(
        &self,
        scope: &ActiveTenant,
        id: NotificationId,
        user_id: UserId,
    ) -> Result<Notification> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE notifications
            SET read_at = COALESCE(read_at, $1)
            WHERE id = $2 AND tenant_id = $3 AND user_id = $4
            RETURNING {COLUMNS}
            "#
        ))
        .bind(Utc::now())
        .bind(id.as_uuid())
        .bind(scope.id().as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => Self::map_row(&row),
            None => Err(BimaError::not_found("notification", id)),
        }
    }
}
