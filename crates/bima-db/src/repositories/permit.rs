//! Permit repository implementation
//!
//! LATRA registrations are rows with `permit_type = 'latra_license'`; the
//! repository treats every permit type identically. The partial unique
//! index `uq_permits_single_active_per_type` arbitrates the one-active-per
//! (vehicle, type) invariant.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use tracing::instrument;

use bima_core::{
    ActiveTenant, BimaError, EntityKind, Page, Permit, PermitCancellationReason, PermitId,
    PermitRepository, PermitTypeEntry, RecordFilter, RecordStatus, Result, UserId, VehicleId,
};

use crate::recorder::{self, Change};
use crate::{db_err, unique_violation};

use super::parse_enum;

/// PostgreSQL implementation of PermitRepository
pub struct PgPermitRepository {
    pool: PgPool,
}

const COLUMNS: &str = "p.id, p.tenant_id, p.vehicle_id, p.permit_type, p.reference_number, \
     p.issuing_authority, p.start_date, p.end_date, p.status, p.activated_at, p.cancelled_at, \
     p.cancelled_by, p.cancellation_reason, p.cancellation_note, p.created_at, p.updated_at, \
     p.deleted_at";

impl PgPermitRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) fn map_row(row: &PgRow) -> Result<Permit> {
        let status: String = row.get("status");
        let reason: Option<String> = row.get("cancellation_reason");
        Ok(Permit {
            id: PermitId::from_uuid(row.get("id")),
            tenant_id: bima_core::TenantId::from_uuid(row.get("tenant_id")),
            vehicle_id: VehicleId::from_uuid(row.get("vehicle_id")),
            permit_type: row.get("permit_type"),
            reference_number: row.get("reference_number"),
            issuing_authority: row.get("issuing_authority"),
            start_date: row.get("start_date"),
            end_date: row.get("end_date"),
            status: parse_enum(&status, RecordStatus::parse_str, "permits.status")?,
            activated_at: row.get("activated_at"),
            cancelled_at: row.get("cancelled_at"),
            cancelled_by: row
                .get::<Option<uuid::Uuid>, _>("cancelled_by")
                .map(UserId::from_uuid),
            cancellation_reason: reason
                .as_deref()
                .map(|r| {
                    parse_enum(
                        r,
                        PermitCancellationReason::parse_str,
                        "permits.cancellation_reason",
                    )
                })
                .transpose()?,
            cancellation_note: row.get("cancellation_note"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            deleted_at: row.get("deleted_at"),
        })
    }

    /// Lock the permit row for a lifecycle transition.
    pub async fn fetch_for_update(
        conn: &mut PgConnection,
        scope: &ActiveTenant,
        id: PermitId,
    ) -> Result<Permit> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM permits p
             WHERE p.id = $1 AND p.tenant_id = $2 AND p.deleted_at IS NULL FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .bind(scope.id().as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => Self::map_row(&row),
            None => Err(BimaError::not_found("permit", id)),
        }
    }

    /// Another active permit of the same type on the same vehicle?
    pub async fn has_conflicting_active(
        conn: &mut PgConnection,
        scope: &ActiveTenant,
        vehicle_id: VehicleId,
        permit_type: &str,
        exclude: PermitId,
    ) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT 1 FROM permits
            WHERE tenant_id = $1 AND vehicle_id = $2 AND permit_type = $3
              AND status = 'active' AND deleted_at IS NULL AND id <> $4
            LIMIT 1
            "#,
        )
        .bind(scope.id().as_uuid())
        .bind(vehicle_id.as_uuid())
        .bind(permit_type)
        .bind(exclude.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;
        Ok(row.is_some())
    }

    /// Persist a transition's new state on the caller's transaction.
    pub async fn apply_transition(
        conn: &mut PgConnection,
        scope: &ActiveTenant,
        permit: &Permit,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE permits
            SET status = $1, activated_at = $2, cancelled_at = $3, cancelled_by = $4,
                cancellation_reason = $5, cancellation_note = $6, updated_at = $7
            WHERE id = $8 AND tenant_id = $9
            "#,
        )
        .bind(permit.status.as_str())
        .bind(permit.activated_at)
        .bind(permit.cancelled_at)
        .bind(permit.cancelled_by.map(|u| *u.as_uuid()))
        .bind(permit.cancellation_reason.map(|r| r.as_str()))
        .bind(&permit.cancellation_note)
        .bind(permit.updated_at)
        .bind(permit.id.as_uuid())
        .bind(scope.id().as_uuid())
        .execute(&mut *conn)
        .await
        .map_err(|e| match unique_violation(&e).as_deref() {
            Some("uq_permits_single_active_per_type") => BimaError::Overlap,
            _ => db_err(e),
        })?;
        Ok(())
    }

    /// Tenant permit-type catalog.
    pub async fn upsert_permit_type(
        &self,
        scope: &ActiveTenant,
        name: &str,
        is_active: bool,
    ) -> Result<PermitTypeEntry> {
        sqlx::query(
            r#"
            INSERT INTO permit_types (tenant_id, name, is_active)
            VALUES ($1, $2, $3)
            ON CONFLICT (tenant_id, name) DO UPDATE SET is_active = EXCLUDED.is_active
            "#,
        )
        .bind(scope.id().as_uuid())
        .bind(name)
        .bind(is_active)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(PermitTypeEntry {
            tenant_id: scope.id(),
            name: name.to_string(),
            is_active,
        })
    }

    pub async fn list_permit_types(&self, scope: &ActiveTenant) -> Result<Vec<PermitTypeEntry>> {
        let rows = sqlx::query(
            "SELECT tenant_id, name, is_active FROM permit_types WHERE tenant_id = $1 ORDER BY name",
        )
        .bind(scope.id().as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .iter()
            .map(|row| PermitTypeEntry {
                tenant_id: bima_core::TenantId::from_uuid(row.get("tenant_id")),
                name: row.get("name"),
                is_active: row.get("is_active"),
            })
            .collect())
    }
}

#[async_trait]
impl PermitRepository for PgPermitRepository {
    #[instrument(skip(self, scope, permit))]
    async fn save_new(
        &self,
        scope: &ActiveTenant,
        permit: &Permit,
        actor: UserId,
    ) -> Result<Permit> {
        let mut stored = permit.clone();
        stored.tenant_id = scope.id();

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO permits
                (id, tenant_id, vehicle_id, permit_type, reference_number, issuing_authority,
                 start_date, end_date, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(stored.id.as_uuid())
        .bind(scope.id().as_uuid())
        .bind(stored.vehicle_id.as_uuid())
        .bind(&stored.permit_type)
        .bind(&stored.reference_number)
        .bind(&stored.issuing_authority)
        .bind(stored.start_date)
        .bind(stored.end_date)
        .bind(stored.status.as_str())
        .bind(stored.created_at)
        .bind(stored.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match unique_violation(&e).as_deref() {
            Some("uq_permits_single_active_per_type") => BimaError::Overlap,
            _ => db_err(e),
        })?;

        recorder::record(
            &mut tx,
            scope.id(),
            Change::created(
                actor,
                EntityKind::Permit,
                *stored.id.as_uuid(),
                serde_json::to_value(&stored).unwrap_or_default(),
            ),
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(stored)
    }

    #[instrument(skip(self, scope))]
    async fn get_by_id(&self, scope: &ActiveTenant, id: PermitId) -> Result<Permit> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM permits p
             WHERE p.id = $1 AND p.tenant_id = $2 AND p.deleted_at IS NULL"
        ))
        .bind(id.as_uuid())
        .bind(scope.id().as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => Self::map_row(&row),
            None => Err(BimaError::not_found("permit", id)),
        }
    }

    #[instrument(skip(self, scope, filter))]
    async fn list(
        &self,
        scope: &ActiveTenant,
        filter: &RecordFilter,
        page: Page,
    ) -> Result<Vec<Permit>> {
        let mut builder = sqlx::QueryBuilder::new(format!(
            "SELECT {COLUMNS} FROM permits p WHERE p.tenant_id = "
        ));
        builder.push_bind(*scope.id().as_uuid());
        builder.push(" AND p.deleted_at IS NULL");

        if let Some(status) = filter.status {
            builder.push(" AND p.status = ").push_bind(status.as_str());
        }
        if let Some(vehicle_id) = filter.vehicle_id {
            builder
                .push(" AND p.vehicle_id = ")
                .push_bind(*vehicle_id.as_uuid());
        }
        if let Some(end) = filter.ending_on_or_before {
            builder.push(" AND p.end_date <= ").push_bind(end);
        }
        if let Some((from, to)) = filter.created_between {
            builder.push(" AND p.created_at >= ").push_bind(from);
            builder.push(" AND p.created_at < ").push_bind(to);
        }

        builder.push(" ORDER BY p.created_at DESC LIMIT ");
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
    async fn list_for_vehicle(
        &self,
        scope: &ActiveTenant,
        vehicle_id: VehicleId,
    ) -> Result<Vec<Permit>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM permits p
             WHERE p.vehicle_id = $1 AND p.tenant_id = $2 AND p.deleted_at IS NULL
             ORDER BY p.start_date DESC"
        ))
        .bind(vehicle_id.as_uuid())
        .bind(scope.id().as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::map_row).collect()
    }

    #[instrument(skip(self, scope, permit))]
    async fn update(&self, scope: &ActiveTenant, permit: &Permit, actor: UserId) -> Result<Permit> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let before = Self::fetch_for_update(&mut tx, scope, permit.id).await?;
        if before.is_immutable() {
            return Err(BimaError::Immutable);
        }

        let updated_at = Utc::now();
        sqlx::query(
            r#"
            UPDATE permits
            SET vehicle_id = $1, permit_type = $2, reference_number = $3,
                issuing_authority = $4, start_date = $5, end_date = $6, updated_at = $7
            WHERE id = $8 AND tenant_id = $9
            "#,
        )
        .bind(permit.vehicle_id.as_uuid())
        .bind(&permit.permit_type)
        .bind(&permit.reference_number)
        .bind(&permit.issuing_authority)
        .bind(permit.start_date)
        .bind(permit.end_date)
        .bind(updated_at)
        .bind(permit.id.as_uuid())
        .bind(scope.id().as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let mut updated = permit.clone();
        updated.tenant_id = scope.id();
        updated.updated_at = updated_at;

        recorder::record(
            &mut tx,
            scope.id(),
            Change::updated(
                actor,
                EntityKind::Permit,
                *permit.id.as_uuid(),
                serde_json::to_value(&before).unwrap_or_default(),
                serde_json::to_value(&updated).unwrap_or_default(),
            ),
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(updated)
    }

    #[instrument(skip(self, scope))]
    async fn soft_delete(&self, scope: &ActiveTenant, id: PermitId, actor: UserId) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let before = Self::fetch_for_update(&mut tx, scope, id).await?;
        if before.is_immutable() {
            return Err(BimaError::Immutable);
        }

        sqlx::query(
            "UPDATE permits SET deleted_at = $1, updated_at = $1 WHERE id = $2 AND tenant_id = $3",
        )
        .bind(Utc::now())
        .bind(id.as_uuid())
        .bind(scope.id().as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        recorder::record(
            &mut tx,
            scope.id(),
            Change::soft_deleted(
                actor,
                EntityKind::Permit,
                *id.as_uuid(),
                serde_json::to_value(&before).unwrap_or_default(),
            ),
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }
}
