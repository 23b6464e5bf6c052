//! Tenant repository implementation

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use bima_core::{
    EntityKind, Page, Result, Tenant, TenantId, TenantRepository, TenantSettings, TenantStatus,
    UserId,
};

use crate::recorder::{self, Change};
use crate::{db_err, unique_violation};

use super::parse_enum;

/// PostgreSQL implementation of TenantRepository
pub struct PgTenantRepository {
    pool: PgPool,
}

impl PgTenantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<Tenant> {
        let status: String = row.get("status");
        let settings_json: serde_json::Value = row.get("settings");
        let settings: TenantSettings = serde_json::from_value(settings_json).unwrap_or_default();

        Ok(Tenant {
            id: TenantId::from_uuid(row.get("id")),
            name: row.get("name"),
            slug: row.get("slug"),
            status: parse_enum(&status, TenantStatus::parse_str, "tenants.status")?,
            settings,
            contact_email: row.get("contact_email"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            deleted_at: row.get("deleted_at"),
        })
    }
}

const COLUMNS: &str =
    "id, name, slug, status, settings, contact_email, created_at, updated_at, deleted_at";

#[async_trait]
impl TenantRepository for PgTenantRepository {
    #[instrument(skip(self, tenant))]
    async fn create(&self, tenant: &Tenant, actor: UserId) -> Result<Tenant> {
        let settings_json = serde_json::to_value(&tenant.settings)
            .map_err(|e| bima_core::BimaError::internal(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO tenants (id, name, slug, status, settings, contact_email, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(tenant.id.as_uuid())
        .bind(&tenant.name)
        .bind(&tenant.slug)
        .bind(tenant.status.as_str())
        .bind(&settings_json)
        .bind(&tenant.contact_email)
        .bind(tenant.created_at)
        .bind(tenant.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match unique_violation(&e).as_deref() {
            Some("tenants_slug_key") | Some("tenants_name_key") => {
                bima_core::BimaError::validation("slug", "tenant name or slug already taken")
            }
            _ => db_err(e),
        })?;

        recorder::record(
            &mut tx,
            tenant.id,
            Change::created(
                actor,
                EntityKind::Tenant,
                *tenant.id.as_uuid(),
                serde_json::to_value(tenant).unwrap_or_default(),
            ),
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(tenant.clone())
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: TenantId) -> Result<Tenant> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM tenants WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => Self::map_row(&row),
            None => Err(bima_core::BimaError::not_found("tenant", id)),
        }
    }

    #[instrument(skip(self))]
    async fn get_by_slug(&self, slug: &str) -> Result<Tenant> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM tenants WHERE slug = $1 AND deleted_at IS NULL"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => Self::map_row(&row),
            None => Err(bima_core::BimaError::not_found("tenant", slug)),
        }
    }

    #[instrument(skip(self))]
    async fn list(&self, page: Page) -> Result<Vec<Tenant>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS} FROM tenants
            WHERE deleted_at IS NULL
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::map_row).collect()
    }

    #[instrument(skip(self))]
    async fn list_all_active(&self) -> Result<Vec<Tenant>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM tenants WHERE status = 'active' AND deleted_at IS NULL ORDER BY slug"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::map_row).collect()
    }

    #[instrument(skip(self, tenant))]
    async fn update(&self, tenant: &Tenant, actor: UserId) -> Result<Tenant> {
        let settings_json = serde_json::to_value(&tenant.settings)
            .map_err(|e| bima_core::BimaError::internal(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let before = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM tenants WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"
        ))
        .bind(tenant.id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| bima_core::BimaError::not_found("tenant", tenant.id))?;
        let before = Self::map_row(&before)?;

        let updated_at = Utc::now();
        sqlx::query(
            r#"
            UPDATE tenants
            SET name = $1, slug = $2, status = $3, settings = $4, contact_email = $5, updated_at = $6
            WHERE id = $7
            "#,
        )
        .bind(&tenant.name)
        .bind(&tenant.slug)
        .bind(tenant.status.as_str())
        .bind(&settings_json)
        .bind(&tenant.contact_email)
        .bind(updated_at)
        .bind(tenant.id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let mut updated = tenant.clone();
        updated.updated_at = updated_at;

        recorder::record(
            &mut tx,
            tenant.id,
            Change::updated(
                actor,
                EntityKind::Tenant,
                *tenant.id.as_uuid(),
                serde_json::to_value(&before).unwrap_or_default(),
                serde_json::to_value(&updated).unwrap_or_default(),
            ),
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(updated)
    }
}
