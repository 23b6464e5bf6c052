//! Policy repository implementation
//!
//! Besides the trait CRUD surface, this repository exposes the
//! transaction-scoped helpers the lifecycle engine composes: row locking,
//! transition application and overlap probes. The partial unique index
//! `uq_policies_single_active` is the final arbiter of the single-active
//! invariant; violations surface as `Overlap`.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use tracing::instrument;

use bima_core::{
    ActiveTenant, BimaError, EntityKind, Page, Policy, PolicyCancellationReason, PolicyId,
    PolicyRepository, RecordFilter, RecordStatus, Result, UserId, VehicleId,
};

use crate::recorder::{self, Change};
use crate::{db_err, unique_violation};

use super::parse_enum;

/// PostgreSQL implementation of PolicyRepository
pub struct PgPolicyRepository {
    pool: PgPool,
}

const COLUMNS: &str = "p.id, p.tenant_id, p.vehicle_id, p.policy_number, p.start_date, \
     p.end_date, p.premium_amount, p.status, p.activated_at, p.cancelled_at, p.cancelled_by, \
     p.cancellation_reason, p.cancellation_note, p.notes, p.created_at, p.updated_at, p.deleted_at";

impl PgPolicyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) fn map_row(row: &PgRow) -> Result<Policy> {
        let status: String = row.get("status");
        let reason: Option<String> = row.get("cancellation_reason");
        Ok(Policy {
            id: PolicyId::from_uuid(row.get("id")),
            tenant_id: bima_core::TenantId::from_uuid(row.get("tenant_id")),
            vehicle_id: VehicleId::from_uuid(row.get("vehicle_id")),
            policy_number: row.get("policy_number"),
            start_date: row.get("start_date"),
            end_date: row.get("end_date"),
            premium_amount: row.get("premium_amount"),
            status: parse_enum(&status, RecordStatus::parse_str, "policies.status")?,
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
                        PolicyCancellationReason::parse_str,
                        "policies.cancellation_reason",
                    )
                })
                .transpose()?,
            cancellation_note: row.get("cancellation_note"),
            notes: row.get("notes"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            deleted_at: row.get("deleted_at"),
        })
    }

    /// Lock the policy row for a lifecycle transition.
    pub async fn fetch_for_update(
        conn: &mut PgConnection,
        scope: &ActiveTenant,
        id: PolicyId,
    ) -> Result<Policy> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM policies p
             WHERE p.id = $1 AND p.tenant_id = $2 AND p.deleted_at IS NULL FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .bind(scope.id().as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => Self::map_row(&row),
            None => Err(BimaError::not_found("policy", id)),
        }
    }

    /// Another active policy for the same vehicle? Pre-check that turns the
    /// common conflict into a clean error; the unique index still closes the
    /// race window.
    pub async fn has_conflicting_active(
        conn: &mut PgConnection,
        scope: &ActiveTenant,
        vehicle_id: VehicleId,
        exclude: PolicyId,
    ) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT 1 FROM policies
            WHERE tenant_id = $1 AND vehicle_id = $2 AND status = 'active'
              AND deleted_at IS NULL AND id <> $3
            LIMIT 1
            "#,
        )
        .bind(scope.id().as_uuid())
        .bind(vehicle_id.as_uuid())
        .bind(exclude.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;
        Ok(row.is_some())
    }

    /// Persist a lifecycle transition's new state (status + closure fields)
    /// on the caller's transaction.
    pub async fn apply_transition(
        conn: &mut PgConnection,
        scope: &ActiveTenant,
        policy: &Policy,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE policies
            SET status = $1, activated_at = $2, cancelled_at = $3, cancelled_by = $4,
                cancellation_reason = $5, cancellation_note = $6, updated_at = $7
            WHERE id = $8 AND tenant_id = $9
            "#,
        )
        .bind(policy.status.as_str())
        .bind(policy.activated_at)
        .bind(policy.cancelled_at)
        .bind(policy.cancelled_by.map(|u| *u.as_uuid()))
        .bind(policy.cancellation_reason.map(|r| r.as_str()))
        .bind(&policy.cancellation_note)
        .bind(policy.updated_at)
        .bind(policy.id.as_uuid())
        .bind(scope.id().as_uuid())
        .execute(&mut *conn)
        .await
        .map_err(|e| match unique_violation(&e).as_deref() {
            Some("uq_policies_single_active") => BimaError::Overlap,
            _ => db_err(e),
        })?;
        Ok(())
    }

    async fn generate_policy_number(
        conn: &mut PgConnection,
        scope: &ActiveTenant,
        year: i32,
    ) -> Result<String> {
        let prefix = format!("POL-{}-{}", year, scope.slug().to_uppercase());
        let last: Option<String> = sqlx::query_scalar(
            r#"
            SELECT policy_number FROM policies
            WHERE tenant_id = $1 AND policy_number LIKE $2 AND deleted_at IS NULL
            ORDER BY policy_number DESC
            LIMIT 1
            "#,
        )
        .bind(scope.id().as_uuid())
        .bind(format!("{prefix}-%"))
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;

        let sequence = last
            .and_then(|n| n.rsplit('-').next().and_then(|s| s.parse::<u32>().ok()))
            .map_or(1, |s| s + 1);
        Ok(format!("{prefix}-{sequence:05}"))
    }
}

#[async_trait]
impl PolicyRepository for PgPolicyRepository {
    #[instrument(skip(self, scope, policy))]
    async fn save_new(
        &self,
        scope: &ActiveTenant,
        policy: &Policy,
        actor: UserId,
    ) -> Result<Policy> {
        let mut stored = policy.clone();
        stored.tenant_id = scope.id();

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        if stored.policy_number.is_empty() {
            use chrono::Datelike;
            stored.policy_number =
                Self::generate_policy_number(&mut tx, scope, stored.start_date.year()).await?;
        }

        sqlx::query(
            r#"
            INSERT INTO policies
                (id, tenant_id, vehicle_id, policy_number, start_date, end_date,
                 premium_amount, status, notes, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(stored.id.as_uuid())
        .bind(scope.id().as_uuid())
        .bind(stored.vehicle_id.as_uuid())
        .bind(&stored.policy_number)
        .bind(stored.start_date)
        .bind(stored.end_date)
        .bind(stored.premium_amount)
        .bind(stored.status.as_str())
        .bind(&stored.notes)
        .bind(stored.created_at)
        .bind(stored.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match unique_violation(&e).as_deref() {
            Some("uq_policies_number_per_tenant") => {
                BimaError::validation("policy_number", "policy number already in use")
            }
            Some("uq_policies_single_active") => BimaError::Overlap,
            _ => db_err(e),
        })?;

        recorder::record(
            &mut tx,
            scope.id(),
            Change::created(
                actor,
                EntityKind::Policy,
                *stored.id.as_uuid(),
                serde_json::to_value(&stored).unwrap_or_default(),
            ),
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(stored)
    }

    #[instrument(skip(self, scope))]
    async fn get_by_id(&self, scope: &ActiveTenant, id: PolicyId) -> Result<Policy> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM policies p
             WHERE p.id = $1 AND p.tenant_id = $2 AND p.deleted_at IS NULL"
        ))
        .bind(id.as_uuid())
        .bind(scope.id().as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => Self::map_row(&row),
            None => Err(BimaError::not_found("policy", id)),
        }
    }

    #[instrument(skip(self, scope, filter))]
    async fn list(
        &self,
        scope: &ActiveTenant,
        filter: &RecordFilter,
        page: Page,
    ) -> Result<Vec<Policy>> {
        let mut builder = sqlx::QueryBuilder::new(format!(
            "SELECT {COLUMNS} FROM policies p WHERE p.tenant_id = "
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
    ) -> Result<Vec<Policy>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM policies p
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

    #[instrument(skip(self, scope, policy))]
    async fn update(&self, scope: &ActiveTenant, policy: &Policy, actor: UserId) -> Result<Policy> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let before = Self::fetch_for_update(&mut tx, scope, policy.id).await?;
        if before.is_immutable() {
            return Err(BimaError::Immutable);
        }

        let updated_at = Utc::now();
        sqlx::query(
            r#"
            UPDATE policies
            SET vehicle_id = $1, start_date = $2, end_date = $3, premium_amount = $4,
                status = $5, notes = $6, updated_at = $7
            WHERE id = $8 AND tenant_id = $9
            "#,
        )
        .bind(policy.vehicle_id.as_uuid())
        .bind(policy.start_date)
        .bind(policy.end_date)
        .bind(policy.premium_amount)
        .bind(policy.status.as_str())
        .bind(&policy.notes)
        .bind(updated_at)
        .bind(policy.id.as_uuid())
        .bind(scope.id().as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let mut updated = policy.clone();
        updated.tenant_id = scope.id();
        updated.updated_at = updated_at;

        recorder::record(
            &mut tx,
            scope.id(),
            Change::updated(
                actor,
                EntityKind::Policy,
                *policy.id.as_uuid(),
                serde_json::to_value(&before).unwrap_or_default(),
                serde_json::to_value(&updated).unwrap_or_default(),
            ),
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(updated)
    }

    #[instrument(skip(self, scope))]
    async fn soft_delete(&self, scope: &ActiveTenant, id: PolicyId, actor: UserId) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let before = Self::fetch_for_update(&mut tx, scope, id).await?;
        // Historical records are preserved; only unactivated drafts may go
        if before.is_immutable() {
            return Err(BimaError::Immutable);
        }

        sqlx::query(
            "UPDATE policies SET deleted_at = $1, updated_at = $1 WHERE id = $2 AND tenant_id = $3",
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
                EntityKind::Policy,
                *id.as_uuid(),
                serde_json::to_value(&before).unwrap_or_default(),
            ),
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    #[instrument(skip(self, scope))]
    async fn next_policy_number(&self, scope: &ActiveTenant, year: i32) -> Result<String> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        Self::generate_policy_number(&mut conn, scope, year).await
    }
}
