//! Payment repository implementation
//!
//! Payments are a ledger: rows are created, verified once, and never edited
//! or hard-deleted. Only the verified sum feeds the activation guard.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use tracing::instrument;

use bima_core::{
    ActiveTenant, BimaError, EntityKind, Payment, PaymentId, PaymentMethod, PaymentRepository,
    PolicyId, Result, UserId,
};

use crate::db_err;
use crate::recorder::{self, Change};

use super::parse_enum;

/// PostgreSQL implementation of PaymentRepository
pub struct PgPaymentRepository {
    pool: PgPool,
}

const COLUMNS: &str = "pm.id, pm.tenant_id, pm.policy_id, pm.amount, pm.method, \
     pm.reference_number, pm.received_at, pm.verified_at, pm.verified_by, \
     pm.created_at, pm.updated_at, pm.deleted_at";

impl PgPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<Payment> {
        let method: String = row.get("method");
        Ok(Payment {
            id: PaymentId::from_uuid(row.get("id")),
            tenant_id: bima_core::TenantId::from_uuid(row.get("tenant_id")),
            policy_id: PolicyId::from_uuid(row.get("policy_id")),
            amount: row.get("amount"),
            method: parse_enum(&method, PaymentMethod::parse_str, "payments.method")?,
            reference_number: row.get("reference_number"),
            received_at: row.get("received_at"),
            verified_at: row.get("verified_at"),
            verified_by: row
                .get::<Option<uuid::Uuid>, _>("verified_by")
                .map(UserId::from_uuid),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            deleted_at: row.get("deleted_at"),
        })
    }

    /// Verified sum on an open transaction: the activation guard reads
    /// through this so the sum and the status flip commit together.
    pub async fn sum_verified_tx(
        conn: &mut PgConnection,
        scope: &ActiveTenant,
        policy_id: PolicyId,
    ) -> Result<Decimal> {
        let total: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT SUM(amount) FROM payments
            WHERE tenant_id = $1 AND policy_id = $2
              AND verified_at IS NOT NULL AND deleted_at IS NULL
            "#,
        )
        .bind(scope.id().as_uuid())
        .bind(policy_id.as_uuid())
        .fetch_one(&mut *conn)
        .await
        .map_err(db_err)?;
        Ok(total.unwrap_or_default())
    }
}

#[async_trait]
impl PaymentRepository for PgPaymentRepository {
    #[instrument(skip(self, scope, payment))]
    async fn save_new(
        &self,
        scope: &ActiveTenant,
        payment: &Payment,
        actor: UserId,
    ) -> Result<Payment> {
        if payment.amount <= Decimal::ZERO {
            return Err(BimaError::validation("amount", "payment amount must be positive"));
        }

        let mut stored = payment.clone();
        stored.tenant_id = scope.id();

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // The policy must exist in this tenant before money is booked on it
        let policy_exists = sqlx::query(
            "SELECT 1 FROM policies WHERE id = $1 AND tenant_id = $2 AND deleted_at IS NULL",
        )
        .bind(stored.policy_id.as_uuid())
        .bind(scope.id().as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        if policy_exists.is_none() {
            return Err(BimaError::not_found("policy", stored.policy_id));
        }

        sqlx::query(
            r#"
            INSERT INTO payments
                (id, tenant_id, policy_id, amount, method, reference_number,
                 received_at, verified_at, verified_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(stored.id.as_uuid())
        .bind(scope.id().as_uuid())
        .bind(stored.policy_id.as_uuid())
        .bind(stored.amount)
        .bind(stored.method.as_str())
        .bind(&stored.reference_number)
        .bind(stored.received_at)
        .bind(stored.verified_at)
        .bind(stored.verified_by.map(|u| *u.as_uuid()))
        .bind(stored.created_at)
        .bind(stored.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        recorder::record(
            &mut tx,
            scope.id(),
            Change::created(
                actor,
                EntityKind::Payment,
                *stored.id.as_uuid(),
                serde_json::to_value(&stored).unwrap_or_default(),
            ),
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(stored)
    }

    #[instrument(skip(self, scope))]
    async fn get_by_id(&self, scope: &ActiveTenant, id: PaymentId) -> Result<Payment> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM payments pm
             WHERE pm.id = $1 AND pm.tenant_id = $2 AND pm.deleted_at IS NULL"
        ))
        .bind(id.as_uuid())
        .bind(scope.id().as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => Self::map_row(&row),
            None => Err(BimaError::not_found("payment", id)),
        }
    }

    #[instrument(skip(self, scope))]
    async fn list_for_policy(
        &self,
        scope: &ActiveTenant,
        policy_id: PolicyId,
    ) -> Result<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM payments pm
             WHERE pm.policy_id = $1 AND pm.tenant_id = $2 AND pm.deleted_at IS NULL
             ORDER BY pm.received_at DESC"
        ))
        .bind(policy_id.as_uuid())
        .bind(scope.id().as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::map_row).collect()
    }

    #[instrument(skip(self, scope))]
    async fn verify(
        &self,
        scope: &ActiveTenant,
        id: PaymentId,
        verified_by: UserId,
    ) -> Result<Payment> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM payments pm
             WHERE pm.id = $1 AND pm.tenant_id = $2 AND pm.deleted_at IS NULL FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .bind(scope.id().as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| BimaError::not_found("payment", id))?;
        let before = Self::map_row(&row)?;

        if before.is_verified() {
            // Verification is one-way and idempotent
            tx.rollback().await.map_err(db_err)?;
            return Ok(before);
        }

        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE payments
            SET verified_at = $1, verified_by = $2, updated_at = $1
            WHERE id = $3 AND tenant_id = $4
            "#,
        )
        .bind(now)
        .bind(verified_by.as_uuid())
        .bind(id.as_uuid())
        .bind(scope.id().as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let mut verified = before.clone();
        verified.verified_at = Some(now);
        verified.verified_by = Some(verified_by);
        verified.updated_at = now;

        recorder::record(
            &mut tx,
            scope.id(),
            Change::updated(
                verified_by,
                EntityKind::Payment,
                *id.as_uuid(),
                serde_json::to_value(&before).unwrap_or_default(),
                serde_json::to_value(&verified).unwrap_or_default(),
            ),
        )
        .await?;

        tx.commit().await.map_err(db_err)?;
        Ok(verified)
    }

    #[instrument(skip(self, scope))]
    async fn sum_verified(&self, scope: &ActiveTenant, policy_id: PolicyId) -> Result<Decimal> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        Self::sum_verified_tx(&mut conn, scope, policy_id).await
    }
}
