//! Report projection queries
//!
//! Tenant-scoped read models for dashboards and exports. The compliance
//! rollup classifies the whole fleet in one SQL pass; per-vehicle loops do
//! not scale past small fleets.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use bima_core::compliance::ComplianceSummary;
use bima_core::{ActiveTenant, Page, Policy, ReportRepository, Result, Vehicle};

use crate::db_err;

use super::{PgPolicyRepository, PgVehicleRepository};

/// PostgreSQL implementation of ReportRepository
pub struct PgReportRepository {
    pool: PgPool,
}

impl PgReportRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const POLICY_COLUMNS: &str = "p.id, p.tenant_id, p.vehicle_id, p.policy_number, p.start_date, \
     p.end_date, p.premium_amount, p.status, p.activated_at, p.cancelled_at, p.cancelled_by, \
     p.cancellation_reason, p.cancellation_note, p.notes, p.created_at, p.updated_at, p.deleted_at";

const VEHICLE_COLUMNS: &str = "v.id, v.tenant_id, v.registration_plate, v.chassis_number, \
     v.engine_number, v.vehicle_type, v.usage_category, v.status, \
     v.created_at, v.updated_at, v.deleted_at";

#[async_trait]
impl ReportRepository for PgReportRepository {
    #[instrument(skip(self, scope))]
    async fn active_policies(&self, scope: &ActiveTenant, page: Page) -> Result<Vec<Policy>> {
        let rows = sqlx::query(&format!(
            "SELECT {POLICY_COLUMNS} FROM policies p
             WHERE p.tenant_id = $1 AND p.status = 'active' AND p.deleted_at IS NULL
             ORDER BY p.end_date
             LIMIT $2 OFFSET $3"
        ))
        .bind(scope.id().as_uuid())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(PgPolicyRepository::map_row).collect()
    }

    #[instrument(skip(self, scope))]
    async fn expired_policies(&self, scope: &ActiveTenant, page: Page) -> Result<Vec<Policy>> {
        let rows = sqlx::query(&format!(
            "SELECT {POLICY_COLUMNS} FROM policies p
             WHERE p.tenant_id = $1 AND p.status = 'expired' AND p.deleted_at IS NULL
             ORDER BY p.end_date DESC
             LIMIT $2 OFFSET $3"
        ))
        .bind(scope.id().as_uuid())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(PgPolicyRepository::map_row).collect()
    }

    #[instrument(skip(self, scope))]
    async fn policies_ending_between(
        &self,
        scope: &ActiveTenant,
        from: NaiveDate,
        to: NaiveDate,
        page: Page,
    ) -> Result<Vec<Policy>> {
        let rows = sqlx::query(&format!(
            "SELECT {POLICY_COLUMNS} FROM policies p
             WHERE p.tenant_id = $1 AND p.deleted_at IS NULL
               AND p.end_date >= $2 AND p.end_date <= $3
             ORDER BY p.end_date
             LIMIT $4 OFFSET $5"
        ))
        .bind(scope.id().as_uuid())
        .bind(from)
        .bind(to)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(PgPolicyRepository::map_row).collect()
    }

    #[instrument(skip(self, scope))]
    async fn vehicles_registered_between(
        &self,
        scope: &ActiveTenant,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page: Page,
    ) -> Result<Vec<Vehicle>> {
        let rows = sqlx::query(&format!(
            "SELECT {VEHICLE_COLUMNS} FROM vehicles v
             WHERE v.tenant_id = $1 AND v.deleted_at IS NULL
               AND v.created_at >= $2 AND v.created_at < $3
             ORDER BY v.created_at DESC
             LIMIT $4 OFFSET $5"
        ))
        .bind(scope.id().as_uuid())
        .bind(from)
        .bind(to)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(PgVehicleRepository::map_row).collect()
    }

    #[instrument(skip(self, scope))]
    async fn compliance_summary(
        &self,
        scope: &ActiveTenant,
        as_of: NaiveDate,
        risk_window_days: i64,
    ) -> Result<ComplianceSummary> {
        let required = &scope.settings().required_permit_types;
        let required_count = required.len() as i64;
        let risk_threshold = as_of + Duration::days(risk_window_days);

        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE insured AND permits_ok AND NOT expiring) AS compliant,
                COUNT(*) FILTER (WHERE insured AND permits_ok AND expiring) AS at_risk,
                COUNT(*) FILTER (WHERE NOT insured OR NOT permits_ok) AS non_compliant
            FROM (
                SELECT
                    v.id,
                    EXISTS (
                        SELECT 1 FROM policies p
                        WHERE p.tenant_id = v.tenant_id AND p.vehicle_id = v.id
                          AND p.status = 'active' AND p.deleted_at IS NULL
                          AND p.start_date <= $2 AND p.end_date >= $2
                    ) AS insured,
                    (
                        SELECT COUNT(DISTINCT pr.permit_type) FROM permits pr
                        WHERE pr.tenant_id = v.tenant_id AND pr.vehicle_id = v.id
                          AND pr.status = 'active' AND pr.deleted_at IS NULL
                          AND pr.start_date <= $2 AND pr.end_date >= $2
                          AND pr.permit_type = ANY($3)
                    ) = $4 AS permits_ok,
                    (
                        EXISTS (
                            SELECT 1 FROM policies p
                            WHERE p.tenant_id = v.tenant_id AND p.vehicle_id = v.id
                              AND p.status = 'active' AND p.deleted_at IS NULL
                              AND p.start_date <= $2 AND p.end_date >= $2
                              AND p.end_date <= $5
                        )
                        OR EXISTS (
                            SELECT 1 FROM permits pr
                            WHERE pr.tenant_id = v.tenant_id AND pr.vehicle_id = v.id
                              AND pr.status = 'active' AND pr.deleted_at IS NULL
                              AND pr.start_date <= $2 AND pr.end_date >= $2
                              AND pr.end_date <= $5
                        )
                    ) AS expiring
                FROM vehicles v
                WHERE v.tenant_id = $1 AND v.deleted_at IS NULL
            ) fleet
            "#,
        )
        .bind(scope.id().as_uuid())
        .bind(as_of)
        .bind(required)
        .bind(required_count)
        .bind(risk_threshold)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(ComplianceSummary {
            total: row.get("total"),
            compliant: row.get("compliant"),
            at_risk: row.get("at_risk"),
            non_compliant: row.get("non_compliant"),
        })
    }
}
